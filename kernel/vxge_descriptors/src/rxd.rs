//! Receive descriptors (RxDs) in 1-, 3- and 5-buffer mode.
//!
//! All three layouts share the same `control_0` word, which the adapter fills in on completion.
//! They differ in how many buffers they carry and where the buffer sizes, the VLAN tag
//! and the RTH (RSS) hash value are packed.

use core::fmt;
use core::ops::Range;
use volatile::Volatile;
use bit_field::BitField;
use num_enum::TryFromPrimitive;
use crate::{field, bit, DmaAddress, RxDescriptor, OWN_ADAPTER, TCODE, DESCRIPTOR_BLOCK_SIZE, DESCRIPTOR_BLOCK_LINK_SIZE};


/// The largest buffer size a receive descriptor can describe (14-bit size fields).
pub const RXD_MAX_BUFFER_SIZE: u16 = 0x3FFF;

// control_0, identical in every buffer mode
pub const RXD_RTH_BUCKET:           Range<usize> = field(0, 7);
pub const RXD_FAST_PATH_ELIGIBLE:   usize = 8;
pub const RXD_L3_CKSUM_CORRECT:     usize = 9;
pub const RXD_L4_CKSUM_CORRECT:     usize = 10;
pub const RXD_SYN:                  usize = 16;
pub const RXD_IS_ICMP:              usize = 17;
pub const RXD_RTH_SPDM_HIT:         usize = 18;
pub const RXD_RTH_IT_HIT:           usize = 19;
pub const RXD_RTH_HASH_TYPE:        Range<usize> = field(20, 4);
pub const RXD_IS_VLAN:              usize = 24;
pub const RXD_ETHER_ENCAP:          Range<usize> = field(25, 2);
pub const RXD_FRAME_PROTO:          Range<usize> = field(27, 5);
pub const RXD_L3_CKSUM:             Range<usize> = field(32, 16);
pub const RXD_L4_CKSUM:             Range<usize> = field(48, 16);

// control_1
/// 1-buffer mode: set by the host on the last descriptor handed to the adapter.
pub const RXD_LIST_TAIL_OWN_ADAPTER: usize = 0;
/// 3/5-buffer mode: the adapter found no room for the frame.
pub const RXD_BUFFER_EMPTY:         usize = 0;
pub const RXD_BUFFER0_SIZE:         Range<usize> = field(2, 14);
pub const RXD_BUFFER1_SIZE:         Range<usize> = field(18, 14);
pub const RXD_BUFFER2_SIZE:         Range<usize> = field(34, 14);
/// 1-buffer mode only; the 3/5-buffer modes report the hash in `buffer0_ptr` instead.
pub const RXD_1_RTH_HASH_VAL:       Range<usize> = field(16, 32);
pub const RXD_VLAN_TAG:             Range<usize> = field(48, 16);

// first word of a 5-buffer descriptor: host_control in the high half, control_2 in the low half
pub const RXD_5_HOST_CONTROL:       Range<usize> = field(0, 32);
pub const RXD_5_BUFFER3_SIZE:       Range<usize> = field(34, 14);
pub const RXD_5_BUFFER4_SIZE:       Range<usize> = field(50, 14);

/// In 3/5-buffer mode with RTH enabled, the adapter overwrites `buffer0_ptr` on completion:
/// bits 0..31 become zero and bits 32..63 carry the hash value.
pub const RXD_3_5_RTH_HASH_VAL:     Range<usize> = field(32, 32);


/// The receive buffer mode of a ring.
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum BufferMode {
    /// The whole frame lands in a single buffer.
    One   = 1,
    /// Headers in buffer 0, payload split across buffers 1 and 2.
    Three = 3,
    /// Headers in buffer 0, payload split across buffers 1 to 4.
    Five  = 5,
}

impl BufferMode {
    pub const fn buffer_count(&self) -> usize {
        *self as usize
    }

    /// Size in bytes of one descriptor of this mode.
    pub const fn descriptor_size(&self) -> usize {
        match self {
            BufferMode::One   => core::mem::size_of::<Rxd1>(),
            BufferMode::Three => core::mem::size_of::<Rxd3>(),
            BufferMode::Five  => core::mem::size_of::<Rxd5>(),
        }
    }

    /// Number of descriptors that fit in one descriptor block.
    pub const fn descriptors_per_block(&self) -> usize {
        (DESCRIPTOR_BLOCK_SIZE - DESCRIPTOR_BLOCK_LINK_SIZE) / self.descriptor_size()
    }
}

impl Default for BufferMode {
    fn default() -> Self {
        BufferMode::One
    }
}


/// The transfer codes a receive descriptor can complete with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum RingTcode {
    Ok                  = 0x0,
    L3CksumMismatch     = 0x1,
    L4CksumMismatch     = 0x2,
    L3L4CksumMismatch   = 0x3,
    /// The L3 header could not be parsed; the frame is still delivered.
    L3PacketError       = 0x5,
    /// FCS or other L2 frame integrity error.
    L2FrameError        = 0x6,
    /// The frame did not fit the posted buffers.
    BufferSizeError     = 0x7,
    InternalEccError    = 0x8,
    /// Frame overflowed from buffer 0 into buffer 1; the data is intact.
    BenignOverflow      = 0x9,
    ZeroLengthBuffer    = 0xA,
    FrameDrop           = 0xC,
    Unused              = 0xE,
    MultiError          = 0xF,
}

/// How the caller should treat a completed descriptor, derived from its transfer code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TcodeClass {
    Ok,
    /// Deliver the frame; the anomaly does not affect its content.
    Benign,
    /// Drop the frame; the queue keeps running.
    FrameError,
    /// The vpath needs a reset before it can be trusted again.
    VpathFatal,
}

impl TcodeClass {
    pub fn is_fatal(&self) -> bool {
        *self == TcodeClass::VpathFatal
    }
}

impl RingTcode {
    pub fn class(&self) -> TcodeClass {
        match self {
            RingTcode::Ok => TcodeClass::Ok,
            RingTcode::BenignOverflow
            | RingTcode::L3PacketError => TcodeClass::Benign,
            RingTcode::L3CksumMismatch
            | RingTcode::L4CksumMismatch
            | RingTcode::L3L4CksumMismatch
            | RingTcode::L2FrameError
            | RingTcode::BufferSizeError
            | RingTcode::ZeroLengthBuffer
            | RingTcode::Unused => TcodeClass::FrameError,
            RingTcode::InternalEccError
            | RingTcode::FrameDrop
            | RingTcode::MultiError => TcodeClass::VpathFatal,
        }
    }
}


/// The receive hash type reported in `control_0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum RthHashType {
    None      = 0,
    TcpIpv4   = 1,
    UdpIpv4   = 2,
    Ipv4      = 3,
    TcpIpv6   = 4,
    UdpIpv6   = 5,
    Ipv6      = 6,
    TcpIpv6Ex = 7,
    UdpIpv6Ex = 8,
    Ipv6Ex    = 9,
}

/// Ethernet encapsulation of a received frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum FrameType {
    Dix  = 0,
    Llc  = 1,
    Snap = 2,
    Ipx  = 3,
}

bitflags! {
    /// Protocol flags of a received frame.
    pub struct FrameProto: u8 {
        const VLAN_TAGGED = 0x80;
        const IPV4        = 0x10;
        const IPV6        = 0x08;
        const IP_FRAG     = 0x04;
        const TCP         = 0x02;
        const UDP         = 0x01;
        const TCP_OR_UDP  = Self::TCP.bits | Self::UDP.bits;
    }
}


/// Completion metadata of a receive descriptor, decoded from its control words.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RxdInfo {
    pub syn: bool,
    pub is_icmp: bool,
    pub fast_path_eligible: bool,
    pub l3_checksum_valid: bool,
    pub l3_checksum: u16,
    pub l4_checksum_valid: bool,
    pub l4_checksum: u16,
    pub frame: FrameType,
    pub proto: FrameProto,
    pub is_vlan: bool,
    /// The full 16-bit tag control information; see [`RxdInfo::vlan_id()`].
    pub vlan: u16,
    pub rth_bucket: u8,
    pub rth_it_hit: bool,
    pub rth_spdm_hit: bool,
    /// Raw hash type; see [`RxdInfo::hash_type()`].
    pub rth_hash_type: u8,
    pub rth_value: u32,
}

impl RxdInfo {
    /// The 12-bit VLAN identifier.
    pub fn vlan_id(&self) -> u16 {
        self.vlan & 0x0FFF
    }

    pub fn hash_type(&self) -> Option<RthHashType> {
        RthHashType::try_from(self.rth_hash_type).ok()
    }

    /// Decodes the fields common to every buffer mode.
    fn decode(control_0: u64, control_1: u64, rth_value: u32) -> RxdInfo {
        let is_vlan = control_0.get_bit(bit(RXD_IS_VLAN));
        let mut proto = FrameProto::from_bits_truncate(control_0.get_bits(RXD_FRAME_PROTO) as u8);
        if is_vlan {
            proto |= FrameProto::VLAN_TAGGED;
        }
        RxdInfo {
            syn:                control_0.get_bit(bit(RXD_SYN)),
            is_icmp:            control_0.get_bit(bit(RXD_IS_ICMP)),
            fast_path_eligible: control_0.get_bit(bit(RXD_FAST_PATH_ELIGIBLE)),
            l3_checksum_valid:  control_0.get_bit(bit(RXD_L3_CKSUM_CORRECT)),
            l3_checksum:        control_0.get_bits(RXD_L3_CKSUM) as u16,
            l4_checksum_valid:  control_0.get_bit(bit(RXD_L4_CKSUM_CORRECT)),
            l4_checksum:        control_0.get_bits(RXD_L4_CKSUM) as u16,
            frame:              FrameType::try_from(control_0.get_bits(RXD_ETHER_ENCAP) as u8).unwrap_or(FrameType::Dix),
            proto,
            is_vlan,
            vlan:               control_1.get_bits(RXD_VLAN_TAG) as u16,
            rth_bucket:         control_0.get_bits(RXD_RTH_BUCKET) as u8,
            rth_it_hit:         control_0.get_bit(bit(RXD_RTH_IT_HIT)),
            rth_spdm_hit:       control_0.get_bit(bit(RXD_RTH_SPDM_HIT)),
            rth_hash_type:      control_0.get_bits(RXD_RTH_HASH_TYPE) as u8,
            rth_value,
        }
    }
}


/// Completion metadata tagged with the buffer mode it was decoded from,
/// together with the buffers the adapter filled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RxdMetadata {
    OneBuffer   { info: RxdInfo, buffer: (DmaAddress, u16) },
    ThreeBuffer { info: RxdInfo, buffers: [(DmaAddress, u16); 3] },
    FiveBuffer  { info: RxdInfo, buffers: [(DmaAddress, u16); 5] },
}

impl RxdMetadata {
    /// Decodes a completed descriptor of any mode.
    pub fn decode(rxd: &dyn RxDescriptor) -> RxdMetadata {
        let info = rxd.info();
        let get = |i: usize| rxd.buffer(i).unwrap_or((DmaAddress::zero(), 0));
        match rxd.buffer_mode() {
            BufferMode::One   => RxdMetadata::OneBuffer { info, buffer: get(0) },
            BufferMode::Three => RxdMetadata::ThreeBuffer { info, buffers: [get(0), get(1), get(2)] },
            BufferMode::Five  => RxdMetadata::FiveBuffer { info, buffers: [get(0), get(1), get(2), get(3), get(4)] },
        }
    }

    pub fn info(&self) -> &RxdInfo {
        match self {
            RxdMetadata::OneBuffer { info, .. }
            | RxdMetadata::ThreeBuffer { info, .. }
            | RxdMetadata::FiveBuffer { info, .. } => info,
        }
    }

    /// Total number of bytes received across all buffers.
    pub fn received_len(&self) -> usize {
        match self {
            RxdMetadata::OneBuffer { buffer, .. } => buffer.1 as usize,
            RxdMetadata::ThreeBuffer { buffers, .. } => buffers.iter().map(|b| b.1 as usize).sum(),
            RxdMetadata::FiveBuffer { buffers, .. } => buffers.iter().map(|b| b.1 as usize).sum(),
        }
    }
}


fn check_size(size: u16) -> Result<u64, &'static str> {
    if size > RXD_MAX_BUFFER_SIZE {
        return Err("receive buffer size does not fit in a 14-bit size field");
    }
    Ok(size as u64)
}

fn set_owner_bit(control_0: &mut Volatile<u64>, adapter: bool) {
    control_0.update(|c| { c.set_bit(bit(OWN_ADAPTER), adapter); });
}


/// A receive descriptor in 1-buffer mode.
#[repr(C)]
pub struct Rxd1 {
    pub host_control:   Volatile<u64>,
    pub control_0:      Volatile<u64>,
    pub control_1:      Volatile<u64>,
    pub buffer0_ptr:    Volatile<u64>,
}
const_assert_eq!(core::mem::size_of::<Rxd1>(), 32);

impl RxDescriptor for Rxd1 {
    fn init(&mut self) {
        self.control_0.write(0);
        self.control_1.write(0);
        self.buffer0_ptr.write(0);
    }

    fn buffer_mode(&self) -> BufferMode {
        BufferMode::One
    }

    fn owned_by_adapter(&self) -> bool {
        self.control_0.read().get_bit(bit(OWN_ADAPTER))
    }

    fn set_owner(&mut self, adapter: bool) {
        set_owner_bit(&mut self.control_0, adapter);
    }

    fn transfer_code(&self) -> u8 {
        self.control_0.read().get_bits(TCODE) as u8
    }

    fn host_control(&self) -> u64 {
        self.host_control.read()
    }

    fn set_host_control(&mut self, value: u64) {
        self.host_control.write(value);
    }

    fn set_buffer(&mut self, index: usize, addr: DmaAddress, size: u16) -> Result<(), &'static str> {
        if index != 0 {
            return Err("1-buffer receive descriptor only has buffer 0");
        }
        let size = check_size(size)?;
        self.buffer0_ptr.write(addr.value());
        self.control_1.update(|c| { c.set_bits(RXD_BUFFER0_SIZE, size); });
        Ok(())
    }

    fn buffer(&self, index: usize) -> Option<(DmaAddress, u16)> {
        match index {
            0 => Some((DmaAddress::new(self.buffer0_ptr.read()), self.control_1.read().get_bits(RXD_BUFFER0_SIZE) as u16)),
            _ => None,
        }
    }

    fn info(&self) -> RxdInfo {
        let control_1 = self.control_1.read();
        RxdInfo::decode(self.control_0.read(), control_1, control_1.get_bits(RXD_1_RTH_HASH_VAL) as u32)
    }
}

impl fmt::Debug for Rxd1 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{host_control: {:#X}, control_0: {:#018X}, control_1: {:#018X}, buffer0: {:#X}}}",
            self.host_control.read(), self.control_0.read(), self.control_1.read(), self.buffer0_ptr.read())
    }
}


/// A receive descriptor in 3-buffer mode.
#[repr(C)]
pub struct Rxd3 {
    pub host_control:   Volatile<u64>,
    pub control_0:      Volatile<u64>,
    pub control_1:      Volatile<u64>,
    pub buffer0_ptr:    Volatile<u64>,
    pub buffer1_ptr:    Volatile<u64>,
    pub buffer2_ptr:    Volatile<u64>,
}
const_assert_eq!(core::mem::size_of::<Rxd3>(), 48);

impl RxDescriptor for Rxd3 {
    fn init(&mut self) {
        self.control_0.write(0);
        self.control_1.write(0);
        self.buffer0_ptr.write(0);
        self.buffer1_ptr.write(0);
        self.buffer2_ptr.write(0);
    }

    fn buffer_mode(&self) -> BufferMode {
        BufferMode::Three
    }

    fn owned_by_adapter(&self) -> bool {
        self.control_0.read().get_bit(bit(OWN_ADAPTER))
    }

    fn set_owner(&mut self, adapter: bool) {
        set_owner_bit(&mut self.control_0, adapter);
    }

    fn transfer_code(&self) -> u8 {
        self.control_0.read().get_bits(TCODE) as u8
    }

    fn host_control(&self) -> u64 {
        self.host_control.read()
    }

    fn set_host_control(&mut self, value: u64) {
        self.host_control.write(value);
    }

    fn set_buffer(&mut self, index: usize, addr: DmaAddress, size: u16) -> Result<(), &'static str> {
        let size = check_size(size)?;
        let (ptr, range) = match index {
            0 => (&mut self.buffer0_ptr, RXD_BUFFER0_SIZE),
            1 => (&mut self.buffer1_ptr, RXD_BUFFER1_SIZE),
            2 => (&mut self.buffer2_ptr, RXD_BUFFER2_SIZE),
            _ => return Err("3-buffer receive descriptor only has buffers 0 to 2"),
        };
        ptr.write(addr.value());
        self.control_1.update(|c| { c.set_bits(range, size); });
        Ok(())
    }

    fn buffer(&self, index: usize) -> Option<(DmaAddress, u16)> {
        let control_1 = self.control_1.read();
        let (ptr, range) = match index {
            0 => (&self.buffer0_ptr, RXD_BUFFER0_SIZE),
            1 => (&self.buffer1_ptr, RXD_BUFFER1_SIZE),
            2 => (&self.buffer2_ptr, RXD_BUFFER2_SIZE),
            _ => return None,
        };
        Some((DmaAddress::new(ptr.read()), control_1.get_bits(range) as u16))
    }

    fn info(&self) -> RxdInfo {
        RxdInfo::decode(self.control_0.read(), self.control_1.read(), self.buffer0_ptr.read().get_bits(RXD_3_5_RTH_HASH_VAL) as u32)
    }
}

impl fmt::Debug for Rxd3 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Rxd3")
            .field("host_control", &self.host_control.read())
            .field("control_0", &self.control_0.read())
            .field("control_1", &self.control_1.read())
            .field("buffers", &[self.buffer0_ptr.read(), self.buffer1_ptr.read(), self.buffer2_ptr.read()])
            .finish()
    }
}


/// A receive descriptor in 5-buffer mode.
///
/// The first word packs a 32-bit host control value (high half) together with
/// `control_2` (low half), which holds the sizes of buffers 3 and 4.
#[repr(C)]
pub struct Rxd5 {
    pub host_control_2: Volatile<u64>,
    pub control_0:      Volatile<u64>,
    pub control_1:      Volatile<u64>,
    pub buffer0_ptr:    Volatile<u64>,
    pub buffer1_ptr:    Volatile<u64>,
    pub buffer2_ptr:    Volatile<u64>,
    pub buffer3_ptr:    Volatile<u64>,
    pub buffer4_ptr:    Volatile<u64>,
}
const_assert_eq!(core::mem::size_of::<Rxd5>(), 64);

impl Rxd5 {
    /// The `control_2` half of the first word.
    pub fn control_2(&self) -> u32 {
        self.host_control_2.read() as u32
    }
}

impl RxDescriptor for Rxd5 {
    fn init(&mut self) {
        self.host_control_2.update(|w| { w.set_bits(0..32, 0); });
        self.control_0.write(0);
        self.control_1.write(0);
        self.buffer0_ptr.write(0);
        self.buffer1_ptr.write(0);
        self.buffer2_ptr.write(0);
        self.buffer3_ptr.write(0);
        self.buffer4_ptr.write(0);
    }

    fn buffer_mode(&self) -> BufferMode {
        BufferMode::Five
    }

    fn owned_by_adapter(&self) -> bool {
        self.control_0.read().get_bit(bit(OWN_ADAPTER))
    }

    fn set_owner(&mut self, adapter: bool) {
        set_owner_bit(&mut self.control_0, adapter);
    }

    fn transfer_code(&self) -> u8 {
        self.control_0.read().get_bits(TCODE) as u8
    }

    /// Only 32 bits of host control exist in this mode.
    fn host_control(&self) -> u64 {
        self.host_control_2.read().get_bits(RXD_5_HOST_CONTROL)
    }

    fn set_host_control(&mut self, value: u64) {
        self.host_control_2.update(|w| { w.set_bits(RXD_5_HOST_CONTROL, value & 0xFFFF_FFFF); });
    }

    fn set_buffer(&mut self, index: usize, addr: DmaAddress, size: u16) -> Result<(), &'static str> {
        let size = check_size(size)?;
        match index {
            0 | 1 | 2 => {
                let (ptr, range) = match index {
                    0 => (&mut self.buffer0_ptr, RXD_BUFFER0_SIZE),
                    1 => (&mut self.buffer1_ptr, RXD_BUFFER1_SIZE),
                    _ => (&mut self.buffer2_ptr, RXD_BUFFER2_SIZE),
                };
                ptr.write(addr.value());
                self.control_1.update(|c| { c.set_bits(range, size); });
            }
            3 => {
                self.buffer3_ptr.write(addr.value());
                self.host_control_2.update(|w| { w.set_bits(RXD_5_BUFFER3_SIZE, size); });
            }
            4 => {
                self.buffer4_ptr.write(addr.value());
                self.host_control_2.update(|w| { w.set_bits(RXD_5_BUFFER4_SIZE, size); });
            }
            _ => return Err("5-buffer receive descriptor only has buffers 0 to 4"),
        }
        Ok(())
    }

    fn buffer(&self, index: usize) -> Option<(DmaAddress, u16)> {
        let control_1 = self.control_1.read();
        let word_0 = self.host_control_2.read();
        let (ptr, size) = match index {
            0 => (&self.buffer0_ptr, control_1.get_bits(RXD_BUFFER0_SIZE)),
            1 => (&self.buffer1_ptr, control_1.get_bits(RXD_BUFFER1_SIZE)),
            2 => (&self.buffer2_ptr, control_1.get_bits(RXD_BUFFER2_SIZE)),
            3 => (&self.buffer3_ptr, word_0.get_bits(RXD_5_BUFFER3_SIZE)),
            4 => (&self.buffer4_ptr, word_0.get_bits(RXD_5_BUFFER4_SIZE)),
            _ => return None,
        };
        Some((DmaAddress::new(ptr.read()), size as u16))
    }

    fn info(&self) -> RxdInfo {
        RxdInfo::decode(self.control_0.read(), self.control_1.read(), self.buffer0_ptr.read().get_bits(RXD_3_5_RTH_HASH_VAL) as u32)
    }
}

impl fmt::Debug for Rxd5 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Rxd5")
            .field("host_control", &self.host_control())
            .field("control_0", &self.control_0.read())
            .field("control_1", &self.control_1.read())
            .field("control_2", &self.control_2())
            .field("buffers", &[
                self.buffer0_ptr.read(), self.buffer1_ptr.read(), self.buffer2_ptr.read(),
                self.buffer3_ptr.read(), self.buffer4_ptr.read(),
            ])
            .finish()
    }
}
