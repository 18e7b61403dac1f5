//! Receive and transmit descriptor layouts of the X3100 (vxge) 10GbE adapters.
//!
//! Every descriptor is an array of 64-bit words that the adapter reads and writes over DMA.
//! The adapter documents its fields with MSB-0 bit numbers (bit 0 is the most significant bit
//! of the word), so all field offsets in this crate are written in that convention and
//! translated to `bit_field` ranges through [`field()`] and [`bit()`].
//!
//! The crate only knows about the binary contract with the adapter.
//! Ownership bookkeeping, doorbells and callbacks live in the `vxge` crate.

#![no_std]

extern crate volatile;
extern crate bit_field;
extern crate num_enum;
#[macro_use] extern crate bitflags;
#[macro_use] extern crate static_assertions;

pub mod rxd;
pub mod txd;

#[cfg(test)]
mod test;

use core::fmt;
use core::ops::Range;

pub use rxd::*;
pub use txd::*;


/// The address of a buffer or descriptor as seen by the adapter's DMA engine.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct DmaAddress(u64);

impl DmaAddress {
    pub const fn new(addr: u64) -> DmaAddress {
        DmaAddress(addr)
    }

    pub const fn zero() -> DmaAddress {
        DmaAddress(0)
    }

    pub const fn value(&self) -> u64 {
        self.0
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Returns the address `offset` bytes past this one.
    pub const fn offset(&self, offset: u64) -> DmaAddress {
        DmaAddress(self.0 + offset)
    }
}

impl fmt::Debug for DmaAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "DmaAddress({:#X})", self.0)
    }
}

impl fmt::LowerHex for DmaAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}


/// Converts an MSB-0 field (`loc` is the number of its most significant bit, `width` its size)
/// into the LSB-0 bit range used by `BitField`.
pub const fn field(loc: usize, width: usize) -> Range<usize> {
    (64 - loc - width)..(64 - loc)
}

/// Converts an MSB-0 bit number into an LSB-0 bit index.
pub const fn bit(loc: usize) -> usize {
    63 - loc
}

/// The value of the single MSB-0 bit `loc`, i.e. the adapter's `mBIT(loc)`.
pub const fn mbit(loc: usize) -> u64 {
    1u64 << bit(loc)
}


/// Ownership bit (MSB-0 bit 7 of control_0), common to receive and transmit descriptors.
/// When set, the adapter owns the descriptor.
pub const OWN_ADAPTER: usize = 7;
/// Transfer code (MSB-0 bits 12..15 of control_0), common to receive and transmit descriptors.
pub const TCODE: Range<usize> = field(12, 4);

/// Size of one descriptor block in bytes.
pub const DESCRIPTOR_BLOCK_SIZE: usize = 4096;
/// The last bytes of every descriptor block hold the link to the next block.
pub const DESCRIPTOR_BLOCK_LINK_SIZE: usize = 16;


/// A trait for functionalities that all receive descriptors must support,
/// regardless of their buffer mode.
pub trait RxDescriptor {
    /// Clears every field of the descriptor except the host control word.
    fn init(&mut self);

    /// The buffer mode of this layout.
    fn buffer_mode(&self) -> BufferMode;

    /// Returns true if the adapter currently owns this descriptor.
    fn owned_by_adapter(&self) -> bool;

    /// Hands the descriptor to the adapter (`adapter = true`) or takes it back.
    fn set_owner(&mut self, adapter: bool);

    /// The raw transfer code written by the adapter on completion.
    fn transfer_code(&self) -> u8;

    /// The opaque software-only scratch word, never touched by the adapter.
    fn host_control(&self) -> u64;

    fn set_host_control(&mut self, value: u64);

    /// Sets buffer `index` of this descriptor.
    ///
    /// # Arguments
    /// * `index`: which buffer of the descriptor to set, less than `buffer_mode().buffer_count()`.
    /// * `addr`: the DMA address of the receive buffer.
    /// * `size`: the size of the receive buffer in bytes, at most [`RXD_MAX_BUFFER_SIZE`].
    fn set_buffer(&mut self, index: usize, addr: DmaAddress, size: u16) -> Result<(), &'static str>;

    /// Returns the address and size of buffer `index`.
    /// After completion the size is the number of bytes the adapter wrote into the buffer.
    fn buffer(&self, index: usize) -> Option<(DmaAddress, u16)>;

    /// Decodes the completion metadata of the descriptor.
    /// Only meaningful once ownership has returned to the host.
    fn info(&self) -> RxdInfo;
}

/// A trait for functionalities that all transmit descriptors must support.
pub trait TxDescriptor {
    /// Clears every field of the descriptor except the host control word.
    fn init(&mut self);

    /// Returns true if the adapter currently owns this descriptor.
    fn owned_by_adapter(&self) -> bool;

    /// Hands the descriptor to the adapter (`adapter = true`) or takes it back.
    fn set_owner(&mut self, adapter: bool);

    /// The raw transfer code written by the adapter on completion.
    fn transfer_code(&self) -> u8;

    /// Sets the buffer and its gather code.
    fn set_buffer(&mut self, addr: DmaAddress, size: u16, gather: GatherCode);

    fn buffer(&self) -> (DmaAddress, u16);

    fn gather_code(&self) -> GatherCode;
}
