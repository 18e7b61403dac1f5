//! Tests for the descriptor layouts.

extern crate std;

use super::*;
use volatile::Volatile;

fn rxd1() -> Rxd1 {
    Rxd1 {
        host_control: Volatile::new(0),
        control_0: Volatile::new(0),
        control_1: Volatile::new(0),
        buffer0_ptr: Volatile::new(0),
    }
}

fn rxd3() -> Rxd3 {
    Rxd3 {
        host_control: Volatile::new(0),
        control_0: Volatile::new(0),
        control_1: Volatile::new(0),
        buffer0_ptr: Volatile::new(0),
        buffer1_ptr: Volatile::new(0),
        buffer2_ptr: Volatile::new(0),
    }
}

fn rxd5() -> Rxd5 {
    Rxd5 {
        host_control_2: Volatile::new(0),
        control_0: Volatile::new(0),
        control_1: Volatile::new(0),
        buffer0_ptr: Volatile::new(0),
        buffer1_ptr: Volatile::new(0),
        buffer2_ptr: Volatile::new(0),
        buffer3_ptr: Volatile::new(0),
        buffer4_ptr: Volatile::new(0),
    }
}

fn txd() -> Txd {
    Txd {
        control_0: Volatile::new(0),
        control_1: Volatile::new(0),
        buffer_pointer: Volatile::new(0),
        host_control: Volatile::new(0),
    }
}

#[test]
fn msb0_conversions() {
    assert_eq!(mbit(0), 0x8000_0000_0000_0000);
    assert_eq!(mbit(7), 1 << 56);
    assert_eq!(mbit(63), 1);
    assert_eq!(field(12, 4), 48..52);
    assert_eq!(field(48, 16), 0..16);
    assert_eq!(bit(OWN_ADAPTER), 56);
}

#[test]
fn descriptors_per_block() {
    assert_eq!(BufferMode::One.descriptors_per_block(), 127);
    assert_eq!(BufferMode::Three.descriptors_per_block(), 85);
    assert_eq!(BufferMode::Five.descriptors_per_block(), 63);
    assert_eq!(BufferMode::try_from(3u8), Ok(BufferMode::Three));
    assert!(BufferMode::try_from(2u8).is_err());
}

#[test]
fn rxd1_buffer_and_owner_bits() {
    let mut rxd = rxd1();
    rxd.set_buffer(0, DmaAddress::new(0x1234_5678_9000), 1518).unwrap();
    assert_eq!(rxd.buffer(0), Some((DmaAddress::new(0x1234_5678_9000), 1518)));
    assert_eq!(rxd.buffer(1), None);
    // buffer-0 size lives at MSB-0 bits 2..15
    assert_eq!(rxd.control_1.read(), (1518u64) << 48);

    rxd.set_owner(true);
    assert!(rxd.owned_by_adapter());
    assert_eq!(rxd.control_0.read(), mbit(7));
    rxd.set_owner(false);
    assert!(!rxd.owned_by_adapter());

    assert!(rxd.set_buffer(0, DmaAddress::new(0x1000), RXD_MAX_BUFFER_SIZE + 1).is_err());
    assert!(rxd.set_buffer(1, DmaAddress::new(0x1000), 64).is_err());
}

#[test]
fn rxd1_info_decode() {
    let mut rxd = rxd1();
    let control_0 = (0x5u64 << bit(6))            // rth bucket
        | mbit(RXD_FAST_PATH_ELIGIBLE)
        | mbit(RXD_L3_CKSUM_CORRECT)
        | mbit(RXD_L4_CKSUM_CORRECT)
        | (0x9u64 << bit(15))                      // tcode
        | mbit(RXD_SYN)
        | mbit(RXD_RTH_IT_HIT)
        | (RthHashType::TcpIpv4 as u64) << bit(23)
        | mbit(RXD_IS_VLAN)
        | (FrameType::Snap as u64) << bit(26)
        | mbit(27) | mbit(30)                      // IPv4 + TCP
        | (0xBEEFu64 << 16)
        | 0xCAFE;
    rxd.control_0.write(control_0);
    rxd.control_1.write((0x1122_3344u64 << bit(47)) | 0x2064);

    let info = rxd.info();
    assert_eq!(rxd.transfer_code(), 0x9);
    assert_eq!(info.rth_bucket, 5);
    assert!(info.fast_path_eligible && info.l3_checksum_valid && info.l4_checksum_valid);
    assert!(info.syn && !info.is_icmp);
    assert!(info.rth_it_hit && !info.rth_spdm_hit);
    assert_eq!(info.hash_type(), Some(RthHashType::TcpIpv4));
    assert!(info.is_vlan);
    assert_eq!(info.frame, FrameType::Snap);
    assert_eq!(info.proto, FrameProto::IPV4 | FrameProto::TCP | FrameProto::VLAN_TAGGED);
    assert_eq!(info.l3_checksum, 0xBEEF);
    assert_eq!(info.l4_checksum, 0xCAFE);
    assert_eq!(info.rth_value, 0x1122_3344);
    assert_eq!(info.vlan, 0x2064);
    assert_eq!(info.vlan_id(), 0x064);
}

#[test]
fn rxd3_rss_overwrite_of_buffer0() {
    let mut rxd = rxd3();
    let bufs = [(0x10_0000u64, 128u16), (0x20_0000, 4096), (0x30_0000, 9000)];
    for (i, (addr, size)) in bufs.iter().enumerate() {
        rxd.set_buffer(i, DmaAddress::new(*addr), *size).unwrap();
    }
    for (i, (addr, size)) in bufs.iter().enumerate() {
        assert_eq!(rxd.buffer(i), Some((DmaAddress::new(*addr), *size)));
    }

    // the adapter replaces buffer0_ptr: bits 0..31 zero, bits 32..63 the hash
    rxd.buffer0_ptr.write(0xDEAD_BEEF);
    let ptr = rxd.buffer0_ptr.read();
    assert_eq!(ptr >> 32, 0);
    assert_eq!(ptr as u32, 0xDEAD_BEEF);
    assert_eq!(rxd.info().rth_value, 0xDEAD_BEEF);
    // the other buffers are untouched
    assert_eq!(rxd.buffer(1), Some((DmaAddress::new(0x20_0000), 4096)));
}

#[test]
fn rxd5_buffers_and_host_control() {
    let mut rxd = rxd5();
    rxd.set_host_control(0xAABB_CCDD);
    for i in 0..5 {
        rxd.set_buffer(i, DmaAddress::new(0x1000 * (i as u64 + 1)), 100 + i as u16).unwrap();
    }
    for i in 0..5 {
        assert_eq!(rxd.buffer(i), Some((DmaAddress::new(0x1000 * (i as u64 + 1)), 100 + i as u16)));
    }
    assert_eq!(rxd.host_control(), 0xAABB_CCDD);
    // control_2 carries buffer-3 size at word bits 34..47 and buffer-4 size at 50..63
    assert_eq!(rxd.control_2(), (103 << 16) | 104);

    rxd.init();
    assert_eq!(rxd.host_control(), 0xAABB_CCDD);
    assert_eq!(rxd.control_2(), 0);
    assert!(rxd.set_buffer(5, DmaAddress::new(0x1000), 1).is_err());
}

#[test]
fn metadata_is_tagged_by_mode() {
    let mut rxd = rxd3();
    rxd.set_buffer(0, DmaAddress::new(0x100), 64).unwrap();
    rxd.set_buffer(1, DmaAddress::new(0x200), 1000).unwrap();
    rxd.set_buffer(2, DmaAddress::new(0x300), 0).unwrap();
    match RxdMetadata::decode(&rxd) {
        md @ RxdMetadata::ThreeBuffer { .. } => assert_eq!(md.received_len(), 1064),
        other => panic!("wrong variant {:?}", other),
    }
}

#[test]
fn ring_tcode_classes() {
    assert_eq!(RingTcode::try_from(0x8u8).unwrap().class(), TcodeClass::VpathFatal);
    assert_eq!(RingTcode::try_from(0x9u8).unwrap().class(), TcodeClass::Benign);
    assert_eq!(RingTcode::try_from(0xFu8).unwrap().class(), TcodeClass::VpathFatal);
    assert_eq!(RingTcode::try_from(0x2u8).unwrap().class(), TcodeClass::FrameError);
    assert!(RingTcode::try_from(0x4u8).is_err());
    assert_eq!(FifoTcode::try_from(0x8u8).unwrap().class(), TcodeClass::VpathFatal);
    assert_eq!(FifoTcode::try_from(0x3u8).unwrap().class(), TcodeClass::FrameError);
}

#[test]
fn gather_sequences() {
    use GatherCode::*;
    assert!(GatherCode::check_sequence(&[FirstLast]).is_ok());
    assert!(GatherCode::check_sequence(&[First, Last]).is_ok());
    assert!(GatherCode::check_sequence(&[First, Middle, Middle, Last]).is_ok());
    assert!(GatherCode::check_sequence(&[]).is_err());
    assert!(GatherCode::check_sequence(&[First]).is_err());
    assert!(GatherCode::check_sequence(&[Last, First]).is_err());
    assert!(GatherCode::check_sequence(&[First, FirstLast, Last]).is_err());
    assert!(GatherCode::check_sequence(&[First, Last, Last]).is_err());

    let codes: std::vec::Vec<GatherCode> = (0..4).map(|i| GatherCode::for_position(i, 4)).collect();
    assert_eq!(codes, [First, Middle, Middle, Last]);
    assert_eq!(GatherCode::for_position(0, 1), FirstLast);
}

#[test]
fn txd_control_fields() {
    let mut txd = txd();
    txd.set_buffer(DmaAddress::new(0xABC000), 1514, GatherCode::First);
    txd.set_lso(LsoEncap::Dix, 1460).unwrap();
    txd.set_host_steer(HostSteer::Port0);
    txd.set_owner(true);

    let c0 = txd.control_0.read();
    assert_eq!(c0, mbit(7) | (2 << bit(17)) | (0x2 << bit(23)) | (0x3 << bit(29)) | mbit(30) | (1460 << 16) | 1514);
    assert_eq!(txd.gather_code(), GatherCode::First);
    assert_eq!(txd.lso(), Some((LsoEncap::Dix, 1460)));
    assert_eq!(txd.host_steer(), HostSteer::Port0);
    assert_eq!(txd.buffer(), (DmaAddress::new(0xABC000), 1514));
    assert!(txd.set_lso(LsoEncap::Auto, TXD_MAX_LSO_MSS + 1).is_err());

    txd.set_checksum_offload(ChecksumOffload::IPV4 | ChecksumOffload::UDP);
    txd.set_vlan(0x0123);
    txd.set_interrupt_number(17).unwrap();
    txd.set_interrupt_type(TxInterruptType::PerList);
    txd.set_no_bandwidth_limit(true);
    let c1 = txd.control_1.read();
    assert_eq!(c1, mbit(5) | mbit(7) | mbit(15) | (0x0123 << 32) | (17 << bit(39)) | mbit(43) | mbit(46));
    assert_eq!(txd.checksum_offload(), ChecksumOffload::IPV4 | ChecksumOffload::UDP);
    assert_eq!(txd.vlan(), Some(0x0123));
    assert_eq!(txd.interrupt_number(), 17);
    assert_eq!(txd.interrupt_type(), Some(TxInterruptType::PerList));
    assert!(txd.set_interrupt_number(64).is_err());
}

#[test]
fn txd_lso_bytes_sent_after_completion() {
    let mut txd = txd();
    txd.host_control.write(0x5555);
    txd.set_buffer(DmaAddress::new(0x1000), 64, GatherCode::FirstLast);
    // on completion the adapter reuses bits 32..63 for the byte count
    txd.control_0.update(|c| *c = (*c & !0xFFFF_FFFF) | 64_000);
    assert_eq!(txd.lso_bytes_sent(), 64_000);
    txd.init();
    assert_eq!(txd.control_0.read(), 0);
    assert_eq!(txd.host_control.read(), 0x5555);
}
