//! The transmit descriptor (TxD).
//!
//! A frame is sent as a transmit descriptor list (TxDL): one TxD per physically contiguous
//! fragment, tagged with gather codes that mark the first and last fragment.
//! Offload settings (checksum, LSO, VLAN insertion) are only honored on the first TxD of a list.

use core::fmt;
use core::ops::Range;
use volatile::Volatile;
use bit_field::BitField;
use num_enum::TryFromPrimitive;
use crate::{field, bit, DmaAddress, TxDescriptor, OWN_ADAPTER, TCODE, TcodeClass};


// control_0
pub const TXD_HOST_STEER:       Range<usize> = field(16, 2);
pub const TXD_GATHER_CODE:      Range<usize> = field(22, 2);
pub const TXD_LSO_FRM_ENCAP:    Range<usize> = field(28, 2);
pub const TXD_LSO_EN:           usize = 30;
pub const TXD_LSO_MSS:          Range<usize> = field(34, 14);
pub const TXD_BUFFER_SIZE:      Range<usize> = field(48, 16);
/// Overlaps the MSS and buffer size fields; valid only after completion of an LSO list.
pub const TXD_LSO_BYTES_SENT:   Range<usize> = field(32, 32);

// control_1
pub const TXD_TX_CKO_IPV4_EN:   usize = 5;
pub const TXD_TX_CKO_TCP_EN:    usize = 6;
pub const TXD_TX_CKO_UDP_EN:    usize = 7;
pub const TXD_TX_VLAN_ENABLE:   usize = 15;
pub const TXD_TX_VLAN_TAG:      Range<usize> = field(16, 16);
pub const TXD_INT_NUMBER:       Range<usize> = field(34, 6);
pub const TXD_NO_BW_LIMIT:      usize = 43;
pub const TXD_INT_TYPE_PER_LIST: usize = 46;
pub const TXD_INT_TYPE_UTILZ:   usize = 47;

/// The largest MSS the 14-bit LSO field can carry.
pub const TXD_MAX_LSO_MSS: u16 = 0x3FFF;
/// The largest interrupt number the 6-bit field can carry.
pub const TXD_MAX_INT_NUMBER: u8 = 0x3F;


/// The transfer codes a transmit descriptor list can complete with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum FifoTcode {
    Ok              = 0x0,
    PciReadCorrupt  = 0x1,
    PciReadFail     = 0x2,
    InvalidMss      = 0x3,
    LsoError        = 0x4,
    Unused          = 0x7,
    MultiError      = 0x8,
}

impl FifoTcode {
    pub fn class(&self) -> TcodeClass {
        match self {
            FifoTcode::Ok => TcodeClass::Ok,
            FifoTcode::PciReadCorrupt
            | FifoTcode::PciReadFail
            | FifoTcode::InvalidMss
            | FifoTcode::LsoError
            | FifoTcode::Unused => TcodeClass::FrameError,
            FifoTcode::MultiError => TcodeClass::VpathFatal,
        }
    }
}

/// Position of a TxD within its list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum GatherCode {
    Middle    = 0x0,
    Last      = 0x1,
    First     = 0x2,
    FirstLast = 0x3,
}

impl GatherCode {
    /// The gather code of fragment `index` in a list of `count` fragments.
    pub fn for_position(index: usize, count: usize) -> GatherCode {
        match (index == 0, index + 1 == count) {
            (true, true)   => GatherCode::FirstLast,
            (true, false)  => GatherCode::First,
            (false, true)  => GatherCode::Last,
            (false, false) => GatherCode::Middle,
        }
    }

    /// Returns `Ok` if `codes` is either `[FirstLast]` or `[First, Middle*, Last]`.
    pub fn check_sequence(codes: &[GatherCode]) -> Result<(), &'static str> {
        match codes {
            [] => Err("transmit list has no fragments"),
            [GatherCode::FirstLast] => Ok(()),
            [GatherCode::First, middle @ .., GatherCode::Last] => {
                if middle.iter().all(|c| *c == GatherCode::Middle) {
                    Ok(())
                } else {
                    Err("transmit list has a misplaced gather code between its first and last fragment")
                }
            }
            _ => Err("transmit list does not start with FIRST and end with LAST"),
        }
    }
}

/// Ethernet encapsulation the adapter assumes when segmenting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum LsoEncap {
    Auto = 0,
    Llc  = 1,
    Snap = 2,
    Dix  = 3,
}

/// Which wire port(s) a frame leaves on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum HostSteer {
    Normal = 0,
    Port1  = 1,
    Port0  = 2,
    Both   = 3,
}

/// The kind of completion interrupt a transmit list raises.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxInterruptType {
    /// Interrupt once this list completes.
    PerList,
    /// Interrupt based on fifo utilization.
    Utilization,
}

bitflags! {
    /// Checksum offloads requested for a transmit list.
    pub struct ChecksumOffload: u8 {
        const IPV4 = 0x1;
        const TCP  = 0x2;
        const UDP  = 0x4;
    }
}


/// A transmit descriptor. One per fragment of a transmit descriptor list.
#[repr(C)]
pub struct Txd {
    pub control_0:      Volatile<u64>,
    pub control_1:      Volatile<u64>,
    pub buffer_pointer: Volatile<u64>,
    /// Software-only scratch word, returned unchanged on completion.
    pub host_control:   Volatile<u64>,
}
const_assert_eq!(core::mem::size_of::<Txd>(), 32);

impl Txd {
    pub fn set_checksum_offload(&mut self, flags: ChecksumOffload) {
        self.control_1.update(|c| {
            c.set_bit(bit(TXD_TX_CKO_IPV4_EN), flags.contains(ChecksumOffload::IPV4));
            c.set_bit(bit(TXD_TX_CKO_TCP_EN), flags.contains(ChecksumOffload::TCP));
            c.set_bit(bit(TXD_TX_CKO_UDP_EN), flags.contains(ChecksumOffload::UDP));
        });
    }

    pub fn checksum_offload(&self) -> ChecksumOffload {
        let c = self.control_1.read();
        let mut flags = ChecksumOffload::empty();
        flags.set(ChecksumOffload::IPV4, c.get_bit(bit(TXD_TX_CKO_IPV4_EN)));
        flags.set(ChecksumOffload::TCP, c.get_bit(bit(TXD_TX_CKO_TCP_EN)));
        flags.set(ChecksumOffload::UDP, c.get_bit(bit(TXD_TX_CKO_UDP_EN)));
        flags
    }

    /// Asks the adapter to insert `tag` as an 802.1Q tag.
    pub fn set_vlan(&mut self, tag: u16) {
        self.control_1.update(|c| {
            c.set_bit(bit(TXD_TX_VLAN_ENABLE), true);
            c.set_bits(TXD_TX_VLAN_TAG, tag as u64);
        });
    }

    pub fn vlan(&self) -> Option<u16> {
        let c = self.control_1.read();
        if c.get_bit(bit(TXD_TX_VLAN_ENABLE)) {
            Some(c.get_bits(TXD_TX_VLAN_TAG) as u16)
        } else {
            None
        }
    }

    pub fn set_lso(&mut self, encap: LsoEncap, mss: u16) -> Result<(), &'static str> {
        if mss > TXD_MAX_LSO_MSS {
            return Err("LSO MSS does not fit in a 14-bit field");
        }
        self.control_0.update(|c| {
            c.set_bits(TXD_LSO_FRM_ENCAP, encap as u64);
            c.set_bit(bit(TXD_LSO_EN), true);
            c.set_bits(TXD_LSO_MSS, mss as u64);
        });
        Ok(())
    }

    /// Returns the encapsulation and MSS if LSO is enabled on this descriptor.
    pub fn lso(&self) -> Option<(LsoEncap, u16)> {
        let c = self.control_0.read();
        if !c.get_bit(bit(TXD_LSO_EN)) {
            return None;
        }
        let encap = LsoEncap::try_from(c.get_bits(TXD_LSO_FRM_ENCAP) as u8).unwrap_or(LsoEncap::Auto);
        Some((encap, c.get_bits(TXD_LSO_MSS) as u16))
    }

    /// Number of payload bytes the adapter sent for an LSO list; read after completion.
    pub fn lso_bytes_sent(&self) -> u32 {
        self.control_0.read().get_bits(TXD_LSO_BYTES_SENT) as u32
    }

    pub fn set_host_steer(&mut self, steer: HostSteer) {
        self.control_0.update(|c| { c.set_bits(TXD_HOST_STEER, steer as u64); });
    }

    pub fn host_steer(&self) -> HostSteer {
        HostSteer::try_from(self.control_0.read().get_bits(TXD_HOST_STEER) as u8).unwrap_or(HostSteer::Normal)
    }

    pub fn set_interrupt_number(&mut self, number: u8) -> Result<(), &'static str> {
        if number > TXD_MAX_INT_NUMBER {
            return Err("transmit interrupt number does not fit in a 6-bit field");
        }
        self.control_1.update(|c| { c.set_bits(TXD_INT_NUMBER, number as u64); });
        Ok(())
    }

    pub fn interrupt_number(&self) -> u8 {
        self.control_1.read().get_bits(TXD_INT_NUMBER) as u8
    }

    pub fn set_interrupt_type(&mut self, int_type: TxInterruptType) {
        self.control_1.update(|c| {
            c.set_bit(bit(TXD_INT_TYPE_PER_LIST), int_type == TxInterruptType::PerList);
            c.set_bit(bit(TXD_INT_TYPE_UTILZ), int_type == TxInterruptType::Utilization);
        });
    }

    pub fn interrupt_type(&self) -> Option<TxInterruptType> {
        let c = self.control_1.read();
        if c.get_bit(bit(TXD_INT_TYPE_PER_LIST)) {
            Some(TxInterruptType::PerList)
        } else if c.get_bit(bit(TXD_INT_TYPE_UTILZ)) {
            Some(TxInterruptType::Utilization)
        } else {
            None
        }
    }

    pub fn set_no_bandwidth_limit(&mut self, enable: bool) {
        self.control_1.update(|c| { c.set_bit(bit(TXD_NO_BW_LIMIT), enable); });
    }
}

impl TxDescriptor for Txd {
    fn init(&mut self) {
        self.control_0.write(0);
        self.control_1.write(0);
        self.buffer_pointer.write(0);
    }

    fn owned_by_adapter(&self) -> bool {
        self.control_0.read().get_bit(bit(OWN_ADAPTER))
    }

    fn set_owner(&mut self, adapter: bool) {
        self.control_0.update(|c| { c.set_bit(bit(OWN_ADAPTER), adapter); });
    }

    fn transfer_code(&self) -> u8 {
        self.control_0.read().get_bits(TCODE) as u8
    }

    fn set_buffer(&mut self, addr: DmaAddress, size: u16, gather: GatherCode) {
        self.buffer_pointer.write(addr.value());
        self.control_0.update(|c| {
            c.set_bits(TXD_GATHER_CODE, gather as u64);
            c.set_bits(TXD_BUFFER_SIZE, size as u64);
        });
    }

    fn buffer(&self) -> (DmaAddress, u16) {
        (DmaAddress::new(self.buffer_pointer.read()), self.control_0.read().get_bits(TXD_BUFFER_SIZE) as u16)
    }

    fn gather_code(&self) -> GatherCode {
        // every 2-bit value is a valid gather code
        GatherCode::try_from(self.control_0.read().get_bits(TXD_GATHER_CODE) as u8).unwrap_or(GatherCode::Middle)
    }
}

impl fmt::Debug for Txd {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{control_0: {:#018X}, control_1: {:#018X}, buffer: {:#X}, host_control: {:#X}}}",
            self.control_0.read(), self.control_1.read(), self.buffer_pointer.read(), self.host_control.read())
    }
}
