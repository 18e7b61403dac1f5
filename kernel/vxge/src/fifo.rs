//! The transmit fifo of a vpath.
//!
//! Each entry of the fifo is a transmit descriptor list (TxDL) of up to `max_frags` TxDs,
//! one per fragment. A list usually carries one frame; [`Fifo::new_frame_set()`] starts
//! another frame in the same list. Lists are handed to the adapter one doorbell at a time
//! and complete in the order they were posted.
//!
//! When `max_aligned_frags` is configured, every list also owns an aligned area of
//! `max_aligned_frags` slots of `alignment_size` bytes. The misaligned head of a buffer can be
//! copied there with [`Fifo::buffer_set_aligned()`], and small buffers can be gathered into one
//! contiguous fragment with [`Fifo::buffer_append()`] and [`Fifo::buffer_finalize()`].

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{fence, Ordering};
use vxge_descriptors::{
    ChecksumOffload, DmaAddress, FifoTcode, GatherCode, HostSteer, LsoEncap, TcodeClass,
    TxDescriptor, TxInterruptType, Txd,
};
use crate::config::FifoConfig;
use crate::descriptor_list::{DescriptorList, DescriptorState};
use crate::dma::{DescriptorArena, DmaAllocator};
use crate::error::{VxgeError, contract_violation};
use crate::regs::FifoRegisters;
use crate::ring::PollStatus;


/// Identifies a transmit descriptor list of a fifo by its index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TxdlHandle(usize);

impl TxdlHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Called for every completed list with the raw transfer code of its first TxD.
/// The callback is expected to release the fragments and free the list.
pub type FifoCallback<T> = Box<dyn FnMut(&mut Fifo<T>, TxdlHandle, u8) -> Result<(), VxgeError> + Send>;
/// Called for every outstanding list when the fifo is torn down.
pub type TxdlTerm<T> = Box<dyn FnMut(TxdlHandle, &mut T, DescriptorState, bool) + Send>;

/// Returns how many leading bytes of a buffer at `addr` should be copied to the aligned
/// area, or 0 if the buffer is already aligned to `alignment`.
///
/// Buffers larger than `copy_size` only give up the bytes up to the next `copy_size` boundary.
/// `alignment` and `copy_size` must be powers of two.
pub fn check_alignment(addr: DmaAddress, size: usize, alignment: usize, copy_size: usize) -> usize {
    if alignment == 0 || addr.value() & (alignment as u64 - 1) == 0 {
        return 0;
    }
    if copy_size > 0 && size > copy_size {
        copy_size - (addr.value() & (copy_size as u64 - 1)) as usize
    } else {
        size
    }
}

/// Where a list stands in its aligned area.
#[derive(Clone, Copy, Debug, Default)]
struct AlignCursor {
    /// Fragments set from the aligned area so far.
    used_frags: usize,
    /// Offset of the next free byte of the area.
    start: usize,
    /// Bytes appended at `start` and not yet finalized.
    appended: usize,
}

/// The callbacks registered with a fifo when its vpath is opened.
pub struct FifoAttr<T> {
    pub callback: Option<FifoCallback<T>>,
    pub txdl_term: Option<TxdlTerm<T>>,
}

impl<T> Default for FifoAttr<T> {
    fn default() -> Self {
        FifoAttr { callback: None, txdl_term: None }
    }
}


/// A transmit fifo. `T` is the caller's per-list private data.
pub struct Fifo<T> {
    vp_id: usize,
    config: FifoConfig,
    arena: DescriptorArena,
    list: DescriptorList,
    private: Vec<T>,
    /// Number of fragments set on each list.
    frags: Vec<usize>,
    /// Per list, the index of the first TxD of every frame, starting with 0.
    frame_starts: Vec<Vec<usize>>,
    /// Aligned areas, one item per list.
    aligned: Option<DescriptorArena>,
    align: Vec<AlignCursor>,
    regs: Box<dyn FifoRegisters>,
    attr: FifoAttr<T>,
    fatal_tcode: Option<u8>,
    open: bool,
}

impl<T> Fifo<T> {
    pub(crate) fn new(
        vp_id: usize,
        config: &FifoConfig,
        attr: FifoAttr<T>,
        regs: Box<dyn FifoRegisters>,
        allocator: &dyn DmaAllocator,
    ) -> Result<Fifo<T>, VxgeError>
        where T: Default
    {
        config.validate()?;
        let len = config.fifo_length;
        let txdl_size = config.max_frags * core::mem::size_of::<Txd>();
        let arena = DescriptorArena::new(allocator, len, txdl_size, false)?;
        let aligned = match config.aligned_area_size() {
            0 => None,
            size => Some(DescriptorArena::new(allocator, len, (size + 7) & !7, false)?),
        };

        let mut private = Vec::with_capacity(len);
        private.resize_with(len, T::default);
        let fifo = Fifo {
            vp_id,
            config: *config,
            arena,
            list: DescriptorList::new(len),
            private,
            frags: alloc::vec![0; len],
            frame_starts: alloc::vec![alloc::vec![0]; len],
            aligned,
            align: alloc::vec![AlignCursor::default(); len],
            regs,
            attr,
            fatal_tcode: None,
            open: true,
        };
        debug!("vxge: vpath {} fifo: {} lists of up to {} fragments, {} aligned", vp_id, len, config.max_frags, config.max_aligned_frags);
        Ok(fifo)
    }

    fn txd_ptr(&self, list: usize, frag: usize) -> Result<*mut Txd, VxgeError> {
        if frag >= self.config.max_frags {
            return Err(contract_violation("fragment index exceeds the fifo's max_frags"));
        }
        let first = self.arena.item_ptr::<Txd>(list)
            .ok_or_else(|| contract_violation("transmit list index out of range"))?;
        // SAFETY: every list spans `max_frags` consecutive TxDs.
        Ok(unsafe { first.add(frag) })
    }

    fn txd(&self, list: usize, frag: usize) -> Result<&Txd, VxgeError> {
        // SAFETY: the TxD lives in this fifo's arena.
        self.txd_ptr(list, frag).map(|p| unsafe { &*p })
    }

    fn txd_mut(&mut self, list: usize, frag: usize) -> Result<&mut Txd, VxgeError> {
        // SAFETY: as above, and `&mut self` guarantees no other host reference exists.
        self.txd_ptr(list, frag).map(|p| unsafe { &mut *p })
    }

    fn ensure_open(&self) -> Result<(), VxgeError> {
        if self.open { Ok(()) } else { Err(VxgeError::VpathNotOpen) }
    }

    fn expect_reserved(&self, handle: TxdlHandle) -> Result<(), VxgeError> {
        self.ensure_open()?;
        match self.list.state(handle.0) {
            Some(DescriptorState::Reserved) => Ok(()),
            _ => Err(contract_violation("transmit list is not reserved")),
        }
    }

    /// Index of the first TxD of the frame being built in list `index`.
    fn current_frame_start(&self, index: usize) -> usize {
        self.frame_starts[index].last().copied().unwrap_or(0)
    }

    /// The first TxD of the frame being built in a reserved list,
    /// which carries the per-frame offload settings.
    fn first_txd_mut(&mut self, handle: TxdlHandle) -> Result<&mut Txd, VxgeError> {
        self.expect_reserved(handle)?;
        let start = self.current_frame_start(handle.0);
        self.txd_mut(handle.0, start)
    }

    /// Claims a free transmit list and returns it together with its private data.
    pub fn reserve(&mut self) -> Result<(TxdlHandle, &mut T), VxgeError> {
        self.ensure_open()?;
        let index = self.list.reserve().ok_or(VxgeError::OutOfDescriptors)?;
        self.frags[index] = 0;
        self.frame_starts[index].clear();
        self.frame_starts[index].push(0);
        self.align[index] = AlignCursor::default();
        let first = self.txd_mut(index, 0)?;
        first.init();
        first.host_control.write(index as u64);
        Ok((TxdlHandle(index), &mut self.private[index]))
    }

    /// Sets fragment `frag_index` of a reserved list.
    /// Fragments must be filled without gaps, starting at index 0.
    pub fn set_fragment(&mut self, handle: TxdlHandle, frag_index: usize, addr: DmaAddress, size: u16) -> Result<(), VxgeError> {
        self.expect_reserved(handle)?;
        let count = self.frags[handle.0];
        if frag_index > count {
            return Err(contract_violation("transmit fragments must be set without gaps"));
        }
        let frame_start = self.frame_starts[handle.0].contains(&frag_index);
        let txd = self.txd_mut(handle.0, frag_index)?;
        if !frame_start {
            txd.init();
        }
        let gather = if frame_start { GatherCode::First } else { GatherCode::Middle };
        txd.set_buffer(addr, size, gather);
        if frag_index == count {
            self.frags[handle.0] = count + 1;
        }
        Ok(())
    }

    /// Sets the next unset fragment of a reserved list and returns its index.
    pub fn append_fragment(&mut self, handle: TxdlHandle, addr: DmaAddress, size: u16) -> Result<usize, VxgeError> {
        self.expect_reserved(handle)?;
        let index = self.frags[handle.0];
        self.set_fragment(handle, index, addr, size)?;
        Ok(index)
    }

    pub fn fragment_count(&self, handle: TxdlHandle) -> usize {
        self.frags.get(handle.0).copied().unwrap_or(0)
    }

    /// Ends the frame being built in a reserved list; the next fragment starts a new frame.
    /// Offload setters apply to the new frame from now on.
    pub fn new_frame_set(&mut self, handle: TxdlHandle) -> Result<(), VxgeError> {
        self.expect_reserved(handle)?;
        let count = self.frags[handle.0];
        if count == self.current_frame_start(handle.0) {
            return Err(contract_violation("the current frame has no fragments"));
        }
        if count >= self.config.max_frags {
            return Err(contract_violation("no TxD left for another frame in the transmit list"));
        }
        self.txd_mut(handle.0, count)?.init();
        self.frame_starts[handle.0].push(count);
        Ok(())
    }

    /// Number of frames in a reserved or completed list.
    pub fn frame_count(&self, handle: TxdlHandle) -> usize {
        self.frame_starts.get(handle.0).map(|f| f.len()).unwrap_or(0)
    }

    /// The aligned area of list `index`: its host pointer, adapter address and size.
    fn aligned_area(&self, index: usize) -> Result<(*mut u8, DmaAddress, usize), VxgeError> {
        let arena = self.aligned.as_ref()
            .ok_or_else(|| contract_violation("the fifo has no aligned areas"))?;
        match (arena.item_ptr::<u8>(index), arena.dma_address(index)) {
            (Some(ptr), Some(addr)) => Ok((ptr, addr, self.config.aligned_area_size())),
            _ => Err(contract_violation("transmit list index out of range")),
        }
    }

    /// Sets fragment `frag_index` from a buffer whose first `misaligned_size` bytes are not
    /// suitably aligned for the adapter.
    ///
    /// Those bytes are copied into the next slot of the list's aligned area and become fragment
    /// `frag_index`. The rest of the buffer, if any, is set as fragment `frag_index + 1`
    /// straight from `addr`. `data` is the host view of the whole buffer at `addr`.
    /// Returns the number of fragments used.
    pub fn buffer_set_aligned(
        &mut self,
        handle: TxdlHandle,
        frag_index: usize,
        data: &[u8],
        addr: DmaAddress,
        misaligned_size: usize,
    ) -> Result<usize, VxgeError> {
        self.expect_reserved(handle)?;
        let alignment = self.config.alignment_size;
        if misaligned_size == 0 || misaligned_size > data.len() || misaligned_size > alignment {
            return Err(contract_violation("misaligned size must be non-zero and fit in one aligned slot"));
        }
        let remaining = data.len() - misaligned_size;
        if remaining > u16::MAX as usize || misaligned_size > u16::MAX as usize {
            return Err(contract_violation("transmit buffer is larger than a TxD can describe"));
        }
        let used = if remaining > 0 { 2 } else { 1 };
        if frag_index + used > self.config.max_frags {
            return Err(contract_violation("fragment index exceeds the fifo's max_frags"));
        }
        let cursor = self.align[handle.0];
        if cursor.appended != 0 {
            return Err(contract_violation("appended data is waiting for buffer_finalize"));
        }
        let (area, area_addr, area_size) = self.aligned_area(handle.0)?;
        if cursor.used_frags >= self.config.max_aligned_frags || cursor.start + misaligned_size > area_size {
            return Err(VxgeError::OutOfAlignedFrags);
        }
        // SAFETY: the slot lies within this list's aligned area, which the adapter does not
        // read until the list is posted.
        unsafe { core::ptr::copy_nonoverlapping(data.as_ptr(), area.add(cursor.start), misaligned_size); }
        self.set_fragment(handle, frag_index, area_addr.offset(cursor.start as u64), misaligned_size as u16)?;
        if remaining > 0 {
            self.set_fragment(handle, frag_index + 1, addr.offset(misaligned_size as u64), remaining as u16)?;
        }
        self.align[handle.0] = AlignCursor {
            used_frags: cursor.used_frags + 1,
            start: cursor.start + alignment,
            appended: 0,
        };
        Ok(used)
    }

    /// Copies `data` to the end of the buffer being gathered in the list's aligned area.
    /// [`Fifo::buffer_finalize()`] turns everything appended so far into one fragment.
    pub fn buffer_append(&mut self, handle: TxdlHandle, data: &[u8]) -> Result<(), VxgeError> {
        self.expect_reserved(handle)?;
        let cursor = self.align[handle.0];
        let (area, _, area_size) = self.aligned_area(handle.0)?;
        if cursor.used_frags >= self.config.max_aligned_frags
            || cursor.start + cursor.appended + data.len() > area_size
        {
            return Err(VxgeError::OutOfAlignedFrags);
        }
        if cursor.appended + data.len() > u16::MAX as usize {
            return Err(contract_violation("gathered buffer is larger than a TxD can describe"));
        }
        // SAFETY: as in `buffer_set_aligned()`, bounds checked against the area size above.
        unsafe {
            core::ptr::copy_nonoverlapping(data.as_ptr(), area.add(cursor.start + cursor.appended), data.len());
        }
        self.align[handle.0].appended += data.len();
        Ok(())
    }

    /// Sets fragment `frag_index` to the buffer gathered by [`Fifo::buffer_append()`].
    pub fn buffer_finalize(&mut self, handle: TxdlHandle, frag_index: usize) -> Result<(), VxgeError> {
        self.expect_reserved(handle)?;
        let cursor = self.align[handle.0];
        if cursor.appended == 0 {
            return Err(contract_violation("no appended data to finalize"));
        }
        let (_, area_addr, _) = self.aligned_area(handle.0)?;
        self.set_fragment(handle, frag_index, area_addr.offset(cursor.start as u64), cursor.appended as u16)?;
        let alignment = self.config.alignment_size;
        self.align[handle.0] = AlignCursor {
            used_frags: cursor.used_frags + 1,
            start: (cursor.start + cursor.appended + alignment - 1) / alignment * alignment,
            appended: 0,
        };
        Ok(())
    }

    pub fn set_checksum_offload(&mut self, handle: TxdlHandle, flags: ChecksumOffload) -> Result<(), VxgeError> {
        self.first_txd_mut(handle)?.set_checksum_offload(flags);
        Ok(())
    }

    pub fn set_lso(&mut self, handle: TxdlHandle, encap: LsoEncap, mss: u16) -> Result<(), VxgeError> {
        self.first_txd_mut(handle)?.set_lso(encap, mss).map_err(contract_violation)
    }

    /// Asks the adapter to insert the 802.1Q `tag` into the frame.
    pub fn set_vlan(&mut self, handle: TxdlHandle, tag: u16) -> Result<(), VxgeError> {
        self.first_txd_mut(handle)?.set_vlan(tag);
        Ok(())
    }

    pub fn set_host_steer(&mut self, handle: TxdlHandle, steer: HostSteer) -> Result<(), VxgeError> {
        self.first_txd_mut(handle)?.set_host_steer(steer);
        Ok(())
    }

    pub fn set_interrupt_type(&mut self, handle: TxdlHandle, int_type: TxInterruptType) -> Result<(), VxgeError> {
        self.first_txd_mut(handle)?.set_interrupt_type(int_type);
        Ok(())
    }

    pub fn set_interrupt_number(&mut self, handle: TxdlHandle, number: u8) -> Result<(), VxgeError> {
        self.first_txd_mut(handle)?.set_interrupt_number(number).map_err(contract_violation)
    }

    pub fn set_no_bandwidth_limit(&mut self, handle: TxdlHandle, enable: bool) -> Result<(), VxgeError> {
        self.first_txd_mut(handle)?.set_no_bandwidth_limit(enable);
        Ok(())
    }

    /// Writes the gather codes of every frame of list `index`, then checks them.
    fn finalize_gather_codes(&mut self, index: usize, count: usize) -> Result<(), VxgeError> {
        let starts = core::mem::take(&mut self.frame_starts[index]);
        let mut result = Ok(());
        let mut gathers = Vec::with_capacity(count);
        for (n, start) in starts.iter().copied().enumerate() {
            let end = starts.get(n + 1).copied().unwrap_or(count);
            gathers.clear();
            for i in start..end {
                let txd = match self.txd_mut(index, i) {
                    Ok(txd) => txd,
                    Err(e) => { result = Err(e); break; }
                };
                let (addr, size) = txd.buffer();
                txd.set_buffer(addr, size, GatherCode::for_position(i - start, end - start));
                gathers.push(txd.gather_code());
            }
            if result.is_ok() {
                result = GatherCode::check_sequence(&gathers).map_err(contract_violation);
            }
            if result.is_err() {
                break;
            }
        }
        self.frame_starts[index] = starts;
        result
    }

    /// Hands a reserved list to the adapter and rings the fifo doorbell.
    ///
    /// The ownership bit of the first TxD is written last, after a write fence,
    /// since the adapter starts fetching the list as soon as it sees that bit.
    pub fn post(&mut self, handle: TxdlHandle) -> Result<(), VxgeError> {
        self.expect_reserved(handle)?;
        let count = self.frags[handle.0];
        self.finalize_gather_codes(handle.0, count)?;
        if self.align[handle.0].appended != 0 {
            return Err(contract_violation("appended data was never finalized"));
        }

        let config = self.config;
        let first = self.txd_mut(handle.0, 0)?;
        if first.interrupt_type().is_none() {
            if let Some(int_type) = config.interrupt_type {
                first.set_interrupt_type(int_type);
            }
        }
        if config.no_bandwidth_limit {
            first.set_no_bandwidth_limit(true);
        }

        let txdl = self.arena.dma_address(handle.0)
            .ok_or_else(|| contract_violation("transmit list index out of range"))?;
        self.list.post(handle.0).map_err(contract_violation)?;
        for i in 1..count {
            self.txd_mut(handle.0, i)?.set_owner(true);
        }
        fence(Ordering::Release);
        self.txd_mut(handle.0, 0)?.set_owner(true);
        fence(Ordering::Release);
        self.regs.txdl_doorbell(txdl, count as u32);
        Ok(())
    }

    /// Returns true if the adapter has returned both the first and the last TxD
    /// of the oldest posted list.
    pub fn is_next_completed(&self) -> bool {
        let index = match self.list.oldest_posted() {
            Some(index) => index,
            None => return false,
        };
        let last = self.frags[index].saturating_sub(1);
        match (self.txd(index, 0), self.txd(index, last)) {
            (Ok(first), Ok(last)) => !first.owned_by_adapter() && !last.owned_by_adapter(),
            _ => false,
        }
    }

    /// Takes the oldest posted list if the adapter has returned it,
    /// with its private data and the raw transfer code of its first TxD.
    pub fn next_completed(&mut self) -> Result<(TxdlHandle, &mut T, u8), VxgeError> {
        self.ensure_open()?;
        if !self.is_next_completed() {
            return Err(VxgeError::NoMoreCompletedDescriptors);
        }
        fence(Ordering::Acquire);
        let index = self.list.complete_oldest().ok_or(VxgeError::NoMoreCompletedDescriptors)?;
        let tcode = self.txd(index, 0)?.transfer_code();
        if FifoTcode::try_from(tcode).map(|t| t.class().is_fatal()).unwrap_or(false) {
            self.fatal_tcode = Some(tcode);
        }
        Ok((TxdlHandle(index), &mut self.private[index], tcode))
    }

    /// Classifies the transfer code of a completed list.
    pub fn handle_transfer_code(&self, handle: TxdlHandle, tcode: u8) -> TcodeClass {
        let class = match FifoTcode::try_from(tcode) {
            Ok(t) => t.class(),
            Err(_) => {
                warn!("vxge: vpath {} txdl {}: unknown transfer code {:#x}", self.vp_id, handle.0, tcode);
                TcodeClass::FrameError
            }
        };
        match class {
            TcodeClass::Ok | TcodeClass::Benign => {}
            TcodeClass::FrameError => warn!("vxge: vpath {} txdl {}: transmit error, transfer code {:#x}", self.vp_id, handle.0, tcode),
            TcodeClass::VpathFatal => error!("vxge: vpath {} txdl {}: fatal transfer code {:#x}", self.vp_id, handle.0, tcode),
        }
        class
    }

    /// Number of payload bytes the adapter sent for a completed LSO list.
    pub fn lso_bytes_sent(&self, handle: TxdlHandle) -> Result<u32, VxgeError> {
        self.ensure_open()?;
        match self.list.state(handle.0) {
            Some(DescriptorState::Completed) => Ok(self.txd(handle.0, 0)?.lso_bytes_sent()),
            _ => Err(contract_violation("LSO bytes are only valid on a completed transmit list")),
        }
    }

    /// Returns the buffers of every fragment of a reserved or completed list.
    pub fn fragments(&self, handle: TxdlHandle) -> Result<Vec<(DmaAddress, u16)>, VxgeError> {
        self.ensure_open()?;
        match self.list.state(handle.0) {
            Some(DescriptorState::Reserved) | Some(DescriptorState::Completed) => {}
            _ => return Err(contract_violation("transmit list is owned by the adapter")),
        }
        (0..self.frags[handle.0]).map(|i| self.txd(handle.0, i).map(|t| t.buffer())).collect()
    }

    /// Returns a reserved or completed list to the free list.
    pub fn free(&mut self, handle: TxdlHandle) -> Result<(), VxgeError> {
        self.ensure_open()?;
        self.list.free(handle.0).map_err(contract_violation)
    }

    pub fn private(&self, handle: TxdlHandle) -> Option<&T> {
        self.private.get(handle.0)
    }

    pub fn private_mut(&mut self, handle: TxdlHandle) -> Option<&mut T> {
        self.private.get_mut(handle.0)
    }

    /// Feeds up to `budget` completed lists to the registered callback.
    pub fn poll(&mut self, budget: usize) -> Result<PollStatus, VxgeError> {
        self.ensure_open()?;
        let mut callback = match self.attr.callback.take() {
            Some(cb) => cb,
            None => return Ok(if self.is_next_completed() { PollStatus::CompletionsRemain } else { PollStatus::Done }),
        };
        let mut result = Ok(PollStatus::Done);
        let mut count = 0;
        while count < budget {
            match self.next_completed().map(|(handle, _, tcode)| (handle, tcode)) {
                Ok((handle, tcode)) => {
                    count += 1;
                    if let Err(e) = callback(self, handle, tcode) {
                        result = Err(e);
                        break;
                    }
                }
                Err(VxgeError::NoMoreCompletedDescriptors) => break,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        self.attr.callback = Some(callback);
        if result.is_ok() && count == budget && self.is_next_completed() {
            result = Ok(PollStatus::CompletionsRemain);
        }
        result
    }

    /// Forcibly takes back every reserved, posted or completed list, handing each to
    /// the `txdl_term` callback.
    pub fn terminate(&mut self, reopen: bool) {
        if !self.open {
            return;
        }
        let mut term = self.attr.txdl_term.take();
        let max_frags = self.config.max_frags;
        let Fifo { list, private, arena, frags, .. } = self;
        let mut terminated = 0;
        list.terminate_all(|index, state| {
            if let Some(first) = arena.item_ptr::<Txd>(index) {
                for i in 0..frags[index].min(max_frags) {
                    // SAFETY: the list belongs to this fifo; reclaiming it from the adapter.
                    unsafe { (*first.add(i)).set_owner(false); }
                }
            }
            frags[index] = 0;
            if let Some(term) = term.as_mut() {
                term(TxdlHandle(index), &mut private[index], state, reopen);
            }
            terminated += 1;
        });
        self.attr.txdl_term = term;
        if terminated > 0 {
            debug!("vxge: vpath {} fifo terminated {} outstanding lists", self.vp_id, terminated);
        }
    }

    /// Discards the adapter's doorbell state for this fifo.
    pub fn doorbell_reset(&mut self) {
        self.regs.doorbell_reset();
    }

    /// Terminates all outstanding lists and returns the descriptor memory.
    pub(crate) fn release(&mut self) {
        self.terminate(false);
        self.arena.release();
        self.aligned = None;
        self.open = false;
    }

    pub(crate) fn take_fatal_tcode(&mut self) -> Option<u8> {
        self.fatal_tcode.take()
    }

    pub fn vp_id(&self) -> usize {
        self.vp_id
    }

    /// The number of lists in the fifo.
    pub fn depth(&self) -> usize {
        self.list.len()
    }

    pub fn max_frags(&self) -> usize {
        self.config.max_frags
    }

    pub fn free_count(&self) -> usize {
        self.list.free_count()
    }

    pub fn posted_count(&self) -> usize {
        self.list.posted_count()
    }

    pub fn outstanding(&self) -> usize {
        self.list.outstanding()
    }

    pub fn state(&self, handle: TxdlHandle) -> Option<DescriptorState> {
        self.list.state(handle.0)
    }

    /// The address the adapter uses to reach the first TxD of this list.
    pub fn txdl_dma_address(&self, handle: TxdlHandle) -> Option<DmaAddress> {
        self.arena.dma_address(handle.0)
    }
}

impl<T> Drop for Fifo<T> {
    fn drop(&mut self) {
        self.release();
    }
}
