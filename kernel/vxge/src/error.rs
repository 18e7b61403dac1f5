//! The errors returned by ring, fifo, vpath and device operations.

use core::fmt;

/// Possible reasons for an operation to fail.
///
/// `OutOfDescriptors`, `NoMoreCompletedDescriptors`, `ResetPending`, `Busy` and `WrongIrq`
/// occur during normal operation and should simply be retried on the next poll or interrupt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VxgeError {
    /// Every descriptor of the ring or fifo is reserved or posted
    OutOfDescriptors,
    /// The adapter has not returned ownership of the next posted descriptor yet
    NoMoreCompletedDescriptors,
    /// A vpath reset has been requested and has not completed
    ResetPending,
    /// Another context is already servicing device interrupts
    Busy,
    /// The interrupt was not raised by this device
    WrongIrq,
    /// The vpath is not assigned to this driver instance
    VpathNotAvailable,
    /// The vpath has not been opened or has been closed
    VpathNotOpen,
    /// Descriptor memory could not be allocated
    OutOfMemory,
    /// The aligned area of the transmit list has no room left
    OutOfAlignedFrags,
    InvalidMtuSize,
    /// The MSI-X vector is out of range or does not belong to the vpath
    InvalidVector,
    InvalidConfig(&'static str),
    /// The adapter refused the reset request
    ResetFailed,
    /// The reset did not complete within the configured number of polls
    TimeOut,
    /// A hardware error that requires the vpath to be reset
    Critical,
    /// All-ones register reads: the PCI slot is frozen
    SlotFreeze,
    /// The device was declared dead; no further register access is made
    DeviceDead,
    /// The caller broke the descriptor or interrupt protocol
    ContractViolation(&'static str),
}

impl VxgeError {
    /// Returns true for the conditions that are expected during normal operation.
    pub fn is_transient(&self) -> bool {
        matches!(self,
            VxgeError::OutOfDescriptors
            | VxgeError::NoMoreCompletedDescriptors
            | VxgeError::ResetPending
            | VxgeError::Busy
            | VxgeError::WrongIrq
        )
    }

    /// Returns true if the device can no longer be used.
    pub fn is_device_fatal(&self) -> bool {
        matches!(self, VxgeError::SlotFreeze | VxgeError::DeviceDead)
    }
}

impl From<VxgeError> for &'static str {
    fn from(error: VxgeError) -> Self {
        match error {
            VxgeError::OutOfDescriptors => "No free descriptor is available",
            VxgeError::NoMoreCompletedDescriptors => "No more completed descriptors",
            VxgeError::ResetPending => "Vpath reset is still in progress",
            VxgeError::Busy => "Device interrupts are being serviced by another context",
            VxgeError::WrongIrq => "Interrupt was not raised by this device",
            VxgeError::VpathNotAvailable => "Vpath is not assigned to this driver instance",
            VxgeError::VpathNotOpen => "Vpath is not open",
            VxgeError::OutOfMemory => "Failed to allocate descriptor memory",
            VxgeError::OutOfAlignedFrags => "No room left in the aligned area of the transmit list",
            VxgeError::InvalidMtuSize => "MTU is out of range",
            VxgeError::InvalidVector => "MSI-X vector is out of range for this vpath",
            VxgeError::InvalidConfig(msg) => msg,
            VxgeError::ResetFailed => "Adapter did not accept the reset request",
            VxgeError::TimeOut => "Timed out waiting for the vpath reset to complete",
            VxgeError::Critical => "Critical hardware error",
            VxgeError::SlotFreeze => "PCI slot is frozen",
            VxgeError::DeviceDead => "Device is dead",
            VxgeError::ContractViolation(msg) => msg,
        }
    }
}

impl fmt::Display for VxgeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg: &'static str = (*self).into();
        f.write_str(msg)
    }
}

/// Logs a broken caller contract and returns the matching error.
pub(crate) fn contract_violation(msg: &'static str) -> VxgeError {
    error!("vxge: contract violation: {}", msg);
    VxgeError::ContractViolation(msg)
}
