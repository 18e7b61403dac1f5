//! Static configuration of rings, fifos, vpaths and the device,
//! with the ranges the X3100 accepts for each value.

use vxge_descriptors::{BufferMode, TxInterruptType};
use crate::error::VxgeError;

/// The most virtual paths an X3100 function can expose.
pub const MAX_VIRTUAL_PATHS: usize = 17;
/// Number of TIM (traffic interrupt) MSI-X vectors a vpath owns.
pub const VPATH_MSIX_MAX: usize = 4;

pub const MIN_RING_LENGTH: usize = 1;
pub const MAX_RING_LENGTH: usize = 8096;
pub const DEF_RING_LENGTH: usize = 512;

pub const MIN_FIFO_LENGTH: usize = 1;
pub const MAX_FIFO_LENGTH: usize = 12 * 1024;
pub const DEF_FIFO_LENGTH: usize = 512;

pub const MIN_FIFO_FRAGS: usize = 1;
pub const MAX_FIFO_FRAGS: usize = 256;
pub const DEF_FIFO_FRAGS: usize = 256;

pub const MAX_FIFO_ALIGNMENT_SIZE: usize = 65536;
/// One cache line.
pub const DEF_FIFO_ALIGNMENT_SIZE: usize = 64;

pub const MIN_MTU: u32 = 68;
pub const MAX_MTU: u32 = 9600;
pub const DEF_MTU: u32 = 1500;

/// Polls of [`Vpath::reset_poll()`](crate::vpath::Vpath::reset_poll) before giving up.
pub const DEF_RESET_POLL_LIMIT: u32 = 1000;
/// Completions drained per ring and per fifo on every interrupt.
pub const DEF_IRQ_BUDGET: usize = 64;


/// Configuration of a receive ring.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RingConfig {
    /// Number of receive descriptors in the ring.
    pub ring_length: usize,
    pub buffer_mode: BufferMode,
    /// Maximum number of frames handed to the completion callback per poll.
    pub indicate_max_pkts: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        RingConfig {
            ring_length: DEF_RING_LENGTH,
            buffer_mode: BufferMode::One,
            indicate_max_pkts: DEF_IRQ_BUDGET,
        }
    }
}

impl RingConfig {
    pub fn validate(&self) -> Result<(), VxgeError> {
        if !(MIN_RING_LENGTH..=MAX_RING_LENGTH).contains(&self.ring_length) {
            return Err(VxgeError::InvalidConfig("ring length out of range"));
        }
        if self.indicate_max_pkts == 0 {
            return Err(VxgeError::InvalidConfig("ring indicate_max_pkts must be non-zero"));
        }
        Ok(())
    }
}


/// Configuration of a transmit fifo.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FifoConfig {
    /// Number of transmit descriptor lists in the fifo.
    pub fifo_length: usize,
    /// Maximum number of fragments (TxDs) per list.
    pub max_frags: usize,
    /// The interrupt type set on every posted list, if any.
    pub interrupt_type: Option<TxInterruptType>,
    pub no_bandwidth_limit: bool,
    /// Size of one slot of a list's aligned area, a power of two.
    pub alignment_size: usize,
    /// Number of fragments per list that may go through the aligned area;
    /// 0 leaves the fifo without aligned areas.
    pub max_aligned_frags: usize,
}

impl Default for FifoConfig {
    fn default() -> Self {
        FifoConfig {
            fifo_length: DEF_FIFO_LENGTH,
            max_frags: DEF_FIFO_FRAGS,
            interrupt_type: Some(TxInterruptType::Utilization),
            no_bandwidth_limit: false,
            alignment_size: DEF_FIFO_ALIGNMENT_SIZE,
            max_aligned_frags: 0,
        }
    }
}

impl FifoConfig {
    pub fn validate(&self) -> Result<(), VxgeError> {
        if !(MIN_FIFO_LENGTH..=MAX_FIFO_LENGTH).contains(&self.fifo_length) {
            return Err(VxgeError::InvalidConfig("fifo length out of range"));
        }
        if !(MIN_FIFO_FRAGS..=MAX_FIFO_FRAGS).contains(&self.max_frags) {
            return Err(VxgeError::InvalidConfig("fifo max_frags out of range"));
        }
        if self.alignment_size > MAX_FIFO_ALIGNMENT_SIZE {
            return Err(VxgeError::InvalidConfig("fifo alignment_size out of range"));
        }
        if self.alignment_size != 0 && !self.alignment_size.is_power_of_two() {
            return Err(VxgeError::InvalidConfig("fifo alignment_size must be a power of two"));
        }
        if self.max_aligned_frags > self.max_frags {
            return Err(VxgeError::InvalidConfig("fifo max_aligned_frags exceeds max_frags"));
        }
        if self.max_aligned_frags > 0 && self.alignment_size == 0 {
            return Err(VxgeError::InvalidConfig("fifo aligned fragments need a non-zero alignment_size"));
        }
        Ok(())
    }

    /// Bytes of the aligned area of every list, or 0 if the fifo has none.
    pub fn aligned_area_size(&self) -> usize {
        self.alignment_size * self.max_aligned_frags
    }
}


/// Configuration of one virtual path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VpathConfig {
    pub ring: RingConfig,
    pub fifo: FifoConfig,
    pub mtu: u32,
    pub reset_poll_limit: u32,
}

impl Default for VpathConfig {
    fn default() -> Self {
        VpathConfig {
            ring: RingConfig::default(),
            fifo: FifoConfig::default(),
            mtu: DEF_MTU,
            reset_poll_limit: DEF_RESET_POLL_LIMIT,
        }
    }
}

impl VpathConfig {
    pub fn validate(&self) -> Result<(), VxgeError> {
        self.ring.validate()?;
        self.fifo.validate()?;
        mtu_check(self.mtu)?;
        if self.reset_poll_limit == 0 {
            return Err(VxgeError::InvalidConfig("reset_poll_limit must be non-zero"));
        }
        Ok(())
    }
}

/// Checks that `mtu` is within the range the adapter supports.
pub fn mtu_check(mtu: u32) -> Result<(), VxgeError> {
    if (MIN_MTU..=MAX_MTU).contains(&mtu) {
        Ok(())
    } else {
        Err(VxgeError::InvalidMtuSize)
    }
}


/// Device-wide configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Completions drained per ring and per fifo of every vpath in one `continue_irq()` call.
    pub irq_budget: usize,
    /// Size of the MSI-X table; 0 means line interrupts only.
    pub msix_vectors: usize,
    /// Configuration used for each vpath opened on the device, indexed by vpath id.
    pub vpaths: [VpathConfig; MAX_VIRTUAL_PATHS],
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            irq_budget: DEF_IRQ_BUDGET,
            msix_vectors: MAX_VIRTUAL_PATHS * VPATH_MSIX_MAX,
            vpaths: [VpathConfig::default(); MAX_VIRTUAL_PATHS],
        }
    }
}

impl DeviceConfig {
    pub fn validate(&self) -> Result<(), VxgeError> {
        if self.irq_budget == 0 {
            return Err(VxgeError::InvalidConfig("irq_budget must be non-zero"));
        }
        if self.msix_vectors > MAX_VIRTUAL_PATHS * VPATH_MSIX_MAX {
            return Err(VxgeError::InvalidConfig("more MSI-X vectors than the adapter has"));
        }
        self.vpaths.iter().try_for_each(|v| v.validate())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(DeviceConfig::default().validate(), Ok(()));
    }

    #[test]
    fn out_of_range_values() {
        let mut ring = RingConfig::default();
        ring.ring_length = MAX_RING_LENGTH + 1;
        assert!(ring.validate().is_err());

        let mut fifo = FifoConfig::default();
        fifo.max_frags = 0;
        assert!(fifo.validate().is_err());

        let mut fifo = FifoConfig { max_frags: 4, max_aligned_frags: 5, ..Default::default() };
        assert!(fifo.validate().is_err());
        fifo.max_aligned_frags = 2;
        assert_eq!(fifo.validate(), Ok(()));
        assert_eq!(fifo.aligned_area_size(), 2 * DEF_FIFO_ALIGNMENT_SIZE);
        fifo.alignment_size = 48;
        assert!(fifo.validate().is_err());
        fifo.alignment_size = MAX_FIFO_ALIGNMENT_SIZE * 2;
        assert!(fifo.validate().is_err());

        assert_eq!(mtu_check(MIN_MTU - 1), Err(VxgeError::InvalidMtuSize));
        assert_eq!(mtu_check(9000), Ok(()));
    }
}
