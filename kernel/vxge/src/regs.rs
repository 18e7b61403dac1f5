//! The register interface the data-path core needs from the adapter.
//!
//! BAR mapping and the actual register offsets belong to the bus layer, which hands the core
//! one set of register objects per vpath plus the device-wide registers.
//! Each ring, fifo and vpath owns its own register object, so no two queues ever
//! share mutable register state.

use alloc::boxed::Box;
use bit_field::BitField;
use vxge_descriptors::{bit, mbit, DmaAddress};
use crate::config::MAX_VIRTUAL_PATHS;


/// Doorbell registers of a receive ring.
pub trait RingRegisters: Send {
    /// Tells the adapter where the first descriptor block of the ring lives.
    fn set_ring_base(&mut self, first_block: DmaAddress);

    /// Tells the adapter that `count` more receive descriptors have been posted.
    fn rxd_doorbell(&mut self, count: u32);
}

/// Doorbell registers of a transmit fifo.
pub trait FifoRegisters: Send {
    /// Hands one transmit descriptor list of `num_txds` descriptors to the adapter.
    fn txdl_doorbell(&mut self, txdl: DmaAddress, num_txds: u32);

    /// Discards any doorbell state the adapter holds for this fifo.
    fn doorbell_reset(&mut self);
}

/// The traffic interrupt sources of a vpath, as numbered by the TIM block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum TimSource {
    Tx    = 0,
    Rx    = 1,
    Einta = 2,
    Bmap  = 3,
}

/// Reset, interrupt mask and alarm registers of a vpath.
pub trait VpathRegisters: Send {
    /// Asks the adapter to reset the vpath. Returns false if the request was refused.
    fn request_reset(&mut self) -> bool;

    /// Returns true while a requested reset is still running.
    fn reset_in_progress(&self) -> bool;

    /// Takes the vpath out of reset and puts it into service.
    fn clear_reset(&mut self);

    fn set_tim_mask(&mut self, source: TimSource, masked: bool);

    /// Acknowledges a pending traffic interrupt.
    fn clear_tim(&mut self, source: TimSource);

    fn set_alarm_mask(&mut self, masked: bool);

    /// Reads the vpath alarm status, see [`VpathAlarms`].
    fn alarm_status(&self) -> u64;

    /// Clears (write-1-to-clear) the given alarm bits.
    fn clear_alarms(&mut self, bits: u64);
}

/// MSI-X vector table of the device.
pub trait MsixRegisters: Send {
    /// Steers interrupt `source` of vpath `vp_id` to `vector`.
    fn bind(&mut self, vp_id: usize, source: usize, vector: usize);

    fn set_mask(&mut self, vector: usize, masked: bool);

    /// Acknowledges a pending interrupt on `vector`.
    fn clear(&mut self, vector: usize);
}

/// The register objects of one vpath.
pub struct VpathRegisterSet {
    pub ring: Box<dyn RingRegisters>,
    pub fifo: Box<dyn FifoRegisters>,
    pub vpath: Box<dyn VpathRegisters>,
}

/// Device-wide registers.
pub trait DeviceRegisters: Send {
    /// The general interrupt status, see [`GENERAL_INT_STATUS_ALARM`] and [`traffic_int_bit()`].
    fn general_int_status(&self) -> u64;

    /// The adapter status; reads as all ones once the PCI slot is frozen.
    fn adapter_status(&self) -> u64;

    /// Masks or unmasks every interrupt of the device at once.
    fn set_general_int_mask(&mut self, masked: bool);

    /// Bitmask of vpaths assigned to this function, vpath `n` at MSB-0 bit `n`.
    fn vpath_assignments(&self) -> u64;

    /// Hands out the register objects of vpath `vp_id`.
    fn vpath_registers(&mut self, vp_id: usize) -> Result<VpathRegisterSet, &'static str>;

    /// Hands out the MSI-X vector table. Called once, when the device is opened.
    fn msix_registers(&mut self) -> Result<Box<dyn MsixRegisters>, &'static str>;
}


/// Set in the general interrupt status when any vpath has an alarm pending.
pub const GENERAL_INT_STATUS_ALARM: u64 = mbit(0);

/// The traffic interrupt bit of vpath `vp_id` in the general interrupt status.
pub const fn traffic_int_bit(vp_id: usize) -> u64 {
    mbit(vp_id + 3)
}

/// Every traffic interrupt bit of the general interrupt status.
pub const TRAFFIC_INT_MASK: u64 = traffic_int_mask();

const fn traffic_int_mask() -> u64 {
    let mut mask = 0;
    let mut vp_id = 0;
    while vp_id < MAX_VIRTUAL_PATHS {
        mask |= traffic_int_bit(vp_id);
        vp_id += 1;
    }
    mask
}

/// Returns true if the vpath assignment mask contains `vp_id`.
pub fn is_assigned(assignments: u64, vp_id: usize) -> bool {
    vp_id < 64 && assignments.get_bit(bit(vp_id))
}

bitflags! {
    /// Bits of the per-vpath alarm status register.
    pub struct VpathAlarms: u64 {
        /// System error on the PCI bus.
        const PCI_SERR          = mbit(0);
        /// Uncorrectable ECC error in the programmable interface.
        const PIC_ECC_ERR       = mbit(1);
        /// Uncorrectable ECC error in receive descriptor memory.
        const RING_RXD_ECC_ERR  = mbit(2);
        /// Malformed receive descriptor found by the adapter.
        const RING_RXD_ERR      = mbit(3);
        /// Transmit DMA engine error.
        const FIFO_DMA_ERR      = mbit(4);
        /// More receive doorbells than the adapter could hold.
        const RXD_DOORBELL_OVFL = mbit(5);
        /// Receive write-DMA error.
        const WRDMA_ERR         = mbit(6);
        /// Transmit doorbell dropped.
        const TXDL_DOORBELL_OVFL = mbit(7);
        const LINK_UP           = mbit(8);
        const LINK_DOWN         = mbit(9);
    }
}
