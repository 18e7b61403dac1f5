//! A software model of the adapter for tests.
//!
//! Descriptor memory comes from the heap with physical address == virtual address, so the
//! model can "DMA" into a descriptor by dereferencing its address. Every register write is
//! recorded in a shared [`HwState`] that tests inspect and tweak.

extern crate std;

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use spin::Mutex;
use bit_field::BitField;
use vxge_descriptors::*;
use crate::dma::{DmaAllocator, DmaMemory};
use crate::regs::*;


pub struct HeapDma {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the region is exclusively owned by this object.
unsafe impl Send for HeapDma {}

impl DmaMemory for HeapDma {
    fn virt_addr(&self) -> NonNull<u8> {
        self.ptr
    }
    fn phys_addr(&self) -> DmaAddress {
        DmaAddress::new(self.ptr.as_ptr() as u64)
    }
    fn size_in_bytes(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for HeapDma {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

/// Hands out page-aligned heap memory, failing once `limit` allocations were made.
pub struct TestAllocator {
    allocations: AtomicUsize,
    limit: usize,
}

impl TestAllocator {
    pub fn new() -> TestAllocator {
        TestAllocator::failing_after(usize::MAX)
    }

    pub fn failing_after(limit: usize) -> TestAllocator {
        TestAllocator { allocations: AtomicUsize::new(0), limit }
    }

    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }
}

impl DmaAllocator for TestAllocator {
    fn allocate(&self, size_in_bytes: usize) -> Result<Box<dyn DmaMemory>, &'static str> {
        if self.allocations.fetch_add(1, Ordering::SeqCst) >= self.limit {
            return Err("test allocator exhausted");
        }
        let layout = Layout::from_size_align(size_in_bytes, 4096).map_err(|_| "bad layout")?;
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) }).ok_or("out of heap memory")?;
        Ok(Box::new(HeapDma { ptr, layout }))
    }
}


/// Everything the driver wrote to the model, and what the model reports back.
#[derive(Default)]
pub struct HwState {
    pub assignments: u64,
    pub general_int_status: u64,
    pub adapter_status: u64,
    pub general_int_masked: bool,
    pub general_int_mask_writes: usize,
    pub ring_base: BTreeMap<usize, DmaAddress>,
    pub rxd_doorbells: Vec<(usize, u32)>,
    pub txdl_doorbells: Vec<(usize, DmaAddress, u32)>,
    pub fifo_doorbell_resets: usize,
    pub tim_masked: BTreeMap<(usize, usize), bool>,
    pub tim_cleared: Vec<(usize, usize)>,
    pub alarm_masked: BTreeMap<usize, bool>,
    pub alarm_status: BTreeMap<usize, u64>,
    pub alarms_cleared: Vec<(usize, u64)>,
    pub refuse_reset: bool,
    /// How many more times `reset_in_progress()` reports true, per vpath.
    pub reset_busy_polls: BTreeMap<usize, u32>,
    pub reset_requests: usize,
    pub msix_bindings: Vec<(usize, usize, usize)>,
    pub msix_masked: BTreeMap<usize, bool>,
    pub msix_cleared: Vec<usize>,
}

pub type Hw = Arc<Mutex<HwState>>;

/// A model with vpaths `vp_ids` assigned to the function.
pub fn new_hw(vp_ids: &[usize]) -> Hw {
    let assignments = vp_ids.iter().fold(0, |acc, v| acc | mbit(*v));
    Arc::new(Mutex::new(HwState { assignments, ..Default::default() }))
}

struct TestRingRegs { vp_id: usize, hw: Hw }

impl RingRegisters for TestRingRegs {
    fn set_ring_base(&mut self, first_block: DmaAddress) {
        self.hw.lock().ring_base.insert(self.vp_id, first_block);
    }
    fn rxd_doorbell(&mut self, count: u32) {
        self.hw.lock().rxd_doorbells.push((self.vp_id, count));
    }
}

struct TestFifoRegs { vp_id: usize, hw: Hw }

impl FifoRegisters for TestFifoRegs {
    fn txdl_doorbell(&mut self, txdl: DmaAddress, num_txds: u32) {
        self.hw.lock().txdl_doorbells.push((self.vp_id, txdl, num_txds));
    }
    fn doorbell_reset(&mut self) {
        self.hw.lock().fifo_doorbell_resets += 1;
    }
}

struct TestVpathRegs { vp_id: usize, hw: Hw }

impl VpathRegisters for TestVpathRegs {
    fn request_reset(&mut self) -> bool {
        let mut hw = self.hw.lock();
        hw.reset_requests += 1;
        !hw.refuse_reset
    }
    fn reset_in_progress(&self) -> bool {
        let mut hw = self.hw.lock();
        match hw.reset_busy_polls.get_mut(&self.vp_id) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }
    fn clear_reset(&mut self) {}
    fn set_tim_mask(&mut self, source: TimSource, masked: bool) {
        self.hw.lock().tim_masked.insert((self.vp_id, source as usize), masked);
    }
    fn clear_tim(&mut self, source: TimSource) {
        self.hw.lock().tim_cleared.push((self.vp_id, source as usize));
    }
    fn set_alarm_mask(&mut self, masked: bool) {
        self.hw.lock().alarm_masked.insert(self.vp_id, masked);
    }
    fn alarm_status(&self) -> u64 {
        self.hw.lock().alarm_status.get(&self.vp_id).copied().unwrap_or(0)
    }
    fn clear_alarms(&mut self, bits: u64) {
        let mut hw = self.hw.lock();
        hw.alarms_cleared.push((self.vp_id, bits));
        if let Some(status) = hw.alarm_status.get_mut(&self.vp_id) {
            *status &= !bits;
        }
    }
}

struct TestMsixRegs { hw: Hw }

impl MsixRegisters for TestMsixRegs {
    fn bind(&mut self, vp_id: usize, source: usize, vector: usize) {
        self.hw.lock().msix_bindings.push((vp_id, source, vector));
    }
    fn set_mask(&mut self, vector: usize, masked: bool) {
        self.hw.lock().msix_masked.insert(vector, masked);
    }
    fn clear(&mut self, vector: usize) {
        self.hw.lock().msix_cleared.push(vector);
    }
}

pub fn vpath_regs(hw: &Hw, vp_id: usize) -> VpathRegisterSet {
    VpathRegisterSet {
        ring: Box::new(TestRingRegs { vp_id, hw: hw.clone() }),
        fifo: Box::new(TestFifoRegs { vp_id, hw: hw.clone() }),
        vpath: Box::new(TestVpathRegs { vp_id, hw: hw.clone() }),
    }
}

pub struct TestDeviceRegs { hw: Hw }

pub fn device_regs(hw: &Hw) -> Box<dyn DeviceRegisters> {
    Box::new(TestDeviceRegs { hw: hw.clone() })
}

impl DeviceRegisters for TestDeviceRegs {
    fn general_int_status(&self) -> u64 {
        self.hw.lock().general_int_status
    }
    fn adapter_status(&self) -> u64 {
        self.hw.lock().adapter_status
    }
    fn set_general_int_mask(&mut self, masked: bool) {
        let mut hw = self.hw.lock();
        hw.general_int_masked = masked;
        hw.general_int_mask_writes += 1;
    }
    fn vpath_assignments(&self) -> u64 {
        self.hw.lock().assignments
    }
    fn vpath_registers(&mut self, vp_id: usize) -> Result<VpathRegisterSet, &'static str> {
        Ok(vpath_regs(&self.hw, vp_id))
    }
    fn msix_registers(&mut self) -> Result<Box<dyn MsixRegisters>, &'static str> {
        Ok(Box::new(TestMsixRegs { hw: self.hw.clone() }))
    }
}


/// Returns the receive descriptor at `addr`.
///
/// # Safety
/// `addr` must be the address of a live descriptor of buffer mode `mode` from a [`TestAllocator`].
pub unsafe fn rxd_at<'a>(addr: DmaAddress, mode: BufferMode) -> &'a mut dyn RxDescriptor {
    match mode {
        BufferMode::One   => &mut *(addr.value() as *mut Rxd1),
        BufferMode::Three => &mut *(addr.value() as *mut Rxd3),
        BufferMode::Five  => &mut *(addr.value() as *mut Rxd5),
    }
}

/// Plays the adapter completing the receive descriptor at `addr`: writes the received sizes,
/// the transfer code and optionally an RSS hash, then returns ownership to the host.
pub fn complete_rxd(addr: DmaAddress, mode: BufferMode, tcode: u8, sizes: &[u16], rss_hash: Option<u32>) {
    {
        let rxd = unsafe { rxd_at(addr, mode) };
        assert!(rxd.owned_by_adapter(), "adapter completed a descriptor it does not own");
        for (i, size) in sizes.iter().enumerate() {
            let (buffer, _) = rxd.buffer(i).expect("no such buffer");
            rxd.set_buffer(i, buffer, *size).expect("bad size");
        }
    }
    // control_0, control_1 and buffer0_ptr sit at the same offsets in every layout
    let rxd1 = unsafe { &mut *(addr.value() as *mut Rxd1) };
    if let Some(hash) = rss_hash {
        match mode {
            BufferMode::One => rxd1.control_1.update(|c| { c.set_bits(RXD_1_RTH_HASH_VAL, hash as u64); }),
            BufferMode::Three | BufferMode::Five => rxd1.buffer0_ptr.write(hash as u64),
        }
    }
    rxd1.control_0.update(|c| {
        c.set_bits(TCODE, tcode as u64);
        c.set_bit(bit(OWN_ADAPTER), false);
    });
}

/// Plays the adapter returning TxD `frag` of the list at `txdl`.
/// The transfer code is written into the first TxD.
pub fn complete_txd(txdl: DmaAddress, frag: usize, tcode: u8) {
    let first = txdl.value() as *mut Txd;
    unsafe {
        let txd = &mut *first.add(frag);
        assert!(txd.owned_by_adapter(), "adapter completed a TxD it does not own");
        if frag == 0 {
            txd.control_0.update(|c| { c.set_bits(TCODE, tcode as u64); });
        }
        txd.set_owner(false);
    }
}

/// Returns TxD `frag` of the list at `txdl`.
pub fn txd_at<'a>(txdl: DmaAddress, frag: usize) -> &'a mut Txd {
    unsafe { &mut *(txdl.value() as *mut Txd).add(frag) }
}
