//! The receive ring of a vpath.
//!
//! A ring is an array of receive descriptors in one buffer mode, spread over linked
//! descriptor blocks. The host reserves a descriptor, attaches buffers to it and posts it;
//! the adapter fills the buffers and hands the descriptor back, and the host picks up
//! completions strictly in the order it posted them.
//!
//! Posting is split into steps so that many descriptors can be handed over with one doorbell:
//! [`Ring::pre_post()`] queues a descriptor, [`Ring::post_post_wmb()`] flips its ownership bit
//! after a write fence, and [`Ring::post_post_db()`] rings the doorbell for everything
//! handed over since the last doorbell. [`Ring::post()`] does the first two in one call.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{fence, Ordering};
use vxge_descriptors::{
    BufferMode, DmaAddress, RxDescriptor, RxdInfo, RxdMetadata, RingTcode, TcodeClass,
    Rxd1, Rxd3, Rxd5,
};
use crate::config::RingConfig;
use crate::descriptor_list::{DescriptorList, DescriptorState};
use crate::dma::{DescriptorArena, DmaAllocator};
use crate::error::{VxgeError, contract_violation};
use crate::regs::RingRegisters;


/// Identifies a receive descriptor of a ring by its index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RxdHandle(usize);

impl RxdHandle {
    pub fn index(&self) -> usize {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_index(index: usize) -> RxdHandle {
        RxdHandle(index)
    }
}

/// Called for every completed descriptor with its raw transfer code.
/// The callback is expected to free or otherwise recycle the descriptor.
pub type RingCallback<R> = Box<dyn FnMut(&mut Ring<R>, RxdHandle, u8) -> Result<(), VxgeError> + Send>;
/// Called for a freshly reserved descriptor when the ring is (re)filled;
/// it must attach buffers. The `bool` is true when the ring is reopened after a reset.
pub type RxdInit<R> = Box<dyn FnMut(&mut Ring<R>, RxdHandle, bool) -> Result<(), VxgeError> + Send>;
/// Called for every outstanding descriptor when the ring is torn down,
/// so the caller can release the buffers it attached.
pub type RxdTerm<R> = Box<dyn FnMut(RxdHandle, &mut R, DescriptorState, bool) + Send>;

/// The callbacks registered with a ring when its vpath is opened.
pub struct RingAttr<R> {
    pub callback: Option<RingCallback<R>>,
    pub rxd_init: Option<RxdInit<R>>,
    pub rxd_term: Option<RxdTerm<R>>,
}

impl<R> Default for RingAttr<R> {
    fn default() -> Self {
        RingAttr { callback: None, rxd_init: None, rxd_term: None }
    }
}

/// The outcome of draining completions with a bounded budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollStatus {
    /// No completed descriptor is left.
    Done,
    /// The budget ran out while completed descriptors were still waiting.
    CompletionsRemain,
}


/// A receive ring. `R` is the caller's per-descriptor private data.
pub struct Ring<R> {
    vp_id: usize,
    config: RingConfig,
    arena: DescriptorArena,
    list: DescriptorList,
    /// Caller-owned private data, indexed like the descriptors.
    private: Vec<R>,
    /// Whether the ownership bit of a posted descriptor has been handed to the adapter.
    in_hw: Vec<bool>,
    regs: Box<dyn RingRegisters>,
    attr: RingAttr<R>,
    /// Descriptors handed to the adapter since the last doorbell.
    pending_doorbell: u32,
    fatal_tcode: Option<u8>,
    open: bool,
}

impl<R> Ring<R> {
    pub(crate) fn new(
        vp_id: usize,
        config: &RingConfig,
        attr: RingAttr<R>,
        mut regs: Box<dyn RingRegisters>,
        allocator: &dyn DmaAllocator,
    ) -> Result<Ring<R>, VxgeError>
        where R: Default
    {
        config.validate()?;
        let len = config.ring_length;
        let arena = DescriptorArena::new(allocator, len, config.buffer_mode.descriptor_size(), true)?;
        regs.set_ring_base(arena.base_address());

        let mut private = Vec::with_capacity(len);
        private.resize_with(len, R::default);
        let mut ring = Ring {
            vp_id,
            config: *config,
            arena,
            list: DescriptorList::new(len),
            private,
            in_hw: alloc::vec![false; len],
            regs,
            attr,
            pending_doorbell: 0,
            fatal_tcode: None,
            open: true,
        };
        for index in 0..len {
            let rxd = ring.rxd_mut(index)?;
            rxd.init();
            rxd.set_host_control(index as u64);
        }
        debug!("vxge: vpath {} ring: {} descriptors in {:?} buffer mode, {} blocks",
            vp_id, len, config.buffer_mode, ring.arena.block_count());
        Ok(ring)
    }

    fn rxd_ptr(&self, index: usize) -> Result<*mut dyn RxDescriptor, VxgeError> {
        let ptr: Option<*mut dyn RxDescriptor> = match self.config.buffer_mode {
            BufferMode::One   => self.arena.item_ptr::<Rxd1>(index).map(|p| p as *mut dyn RxDescriptor),
            BufferMode::Three => self.arena.item_ptr::<Rxd3>(index).map(|p| p as *mut dyn RxDescriptor),
            BufferMode::Five  => self.arena.item_ptr::<Rxd5>(index).map(|p| p as *mut dyn RxDescriptor),
        };
        ptr.ok_or_else(|| contract_violation("receive descriptor index out of range"))
    }

    fn rxd(&self, index: usize) -> Result<&dyn RxDescriptor, VxgeError> {
        // SAFETY: the pointer targets a live descriptor owned by this ring's arena.
        self.rxd_ptr(index).map(|p| unsafe { &*p })
    }

    fn rxd_mut(&mut self, index: usize) -> Result<&mut dyn RxDescriptor, VxgeError> {
        // SAFETY: as above, and `&mut self` guarantees no other host reference exists.
        self.rxd_ptr(index).map(|p| unsafe { &mut *p })
    }

    fn ensure_open(&self) -> Result<(), VxgeError> {
        if self.open { Ok(()) } else { Err(VxgeError::VpathNotOpen) }
    }

    fn expect_state(&self, handle: RxdHandle, allowed: &[DescriptorState], msg: &'static str) -> Result<(), VxgeError> {
        self.ensure_open()?;
        match self.list.state(handle.0) {
            Some(state) if allowed.contains(&state) => Ok(()),
            _ => Err(contract_violation(msg)),
        }
    }

    /// Claims a free descriptor and returns it together with its private data.
    pub fn reserve(&mut self) -> Result<(RxdHandle, &mut R), VxgeError> {
        self.ensure_open()?;
        let index = self.list.reserve().ok_or(VxgeError::OutOfDescriptors)?;
        self.rxd_mut(index)?.init();
        Ok((RxdHandle(index), &mut self.private[index]))
    }

    /// Attaches buffers to a reserved descriptor: exactly one `(address, size)` pair
    /// per buffer of the ring's buffer mode.
    pub fn set_buffers(&mut self, handle: RxdHandle, buffers: &[(DmaAddress, u16)]) -> Result<(), VxgeError> {
        self.expect_state(handle, &[DescriptorState::Reserved], "buffers can only be set on a reserved receive descriptor")?;
        if buffers.len() != self.config.buffer_mode.buffer_count() {
            return Err(contract_violation("number of receive buffers does not match the buffer mode"));
        }
        let rxd = self.rxd_mut(handle.0)?;
        for (i, (addr, size)) in buffers.iter().enumerate() {
            rxd.set_buffer(i, *addr, *size).map_err(contract_violation)?;
        }
        Ok(())
    }

    /// Returns the buffers and completion metadata of a reserved or completed descriptor.
    pub fn metadata(&self, handle: RxdHandle) -> Result<RxdMetadata, VxgeError> {
        self.expect_state(handle, &[DescriptorState::Reserved, DescriptorState::Completed],
            "receive descriptor is owned by the adapter")?;
        Ok(RxdMetadata::decode(self.rxd(handle.0)?))
    }

    /// Decodes checksum, hash, VLAN and protocol information of a completed descriptor.
    pub fn decode_rxd_info(&self, handle: RxdHandle) -> Result<RxdInfo, VxgeError> {
        self.expect_state(handle, &[DescriptorState::Completed], "receive descriptor has not completed")?;
        Ok(self.rxd(handle.0)?.info())
    }

    /// Queues a reserved descriptor for posting without handing it to the adapter yet.
    pub fn pre_post(&mut self, handle: RxdHandle) -> Result<(), VxgeError> {
        self.ensure_open()?;
        self.list.post(handle.0).map_err(contract_violation)
    }

    /// Hands a pre-posted descriptor to the adapter.
    pub fn post_post(&mut self, handle: RxdHandle) -> Result<(), VxgeError> {
        self.expect_state(handle, &[DescriptorState::Posted], "receive descriptor was not pre-posted")?;
        if self.in_hw[handle.0] {
            return Err(contract_violation("receive descriptor is already owned by the adapter"));
        }
        self.rxd_mut(handle.0)?.set_owner(true);
        self.in_hw[handle.0] = true;
        self.pending_doorbell += 1;
        Ok(())
    }

    /// Like [`Ring::post_post()`], with a write fence so the adapter never sees the
    /// ownership bit before the rest of the descriptor.
    pub fn post_post_wmb(&mut self, handle: RxdHandle) -> Result<(), VxgeError> {
        fence(Ordering::Release);
        self.post_post(handle)
    }

    /// Rings the doorbell for every descriptor handed over since the last doorbell.
    pub fn post_post_db(&mut self) {
        if self.pending_doorbell == 0 {
            return;
        }
        fence(Ordering::Release);
        self.regs.rxd_doorbell(self.pending_doorbell);
        self.pending_doorbell = 0;
    }

    /// Posts a reserved descriptor. The adapter only notices it after the next doorbell.
    pub fn post(&mut self, handle: RxdHandle) -> Result<(), VxgeError> {
        self.pre_post(handle)?;
        self.post_post_wmb(handle)
    }

    /// Returns true if the oldest posted descriptor has been returned by the adapter.
    pub fn is_next_completed(&self) -> bool {
        match self.list.oldest_posted() {
            Some(index) => self.in_hw[index] && self.rxd(index).map(|r| !r.owned_by_adapter()).unwrap_or(false),
            None => false,
        }
    }

    /// Takes the oldest posted descriptor if the adapter has returned it,
    /// with its private data and raw transfer code.
    pub fn next_completed(&mut self) -> Result<(RxdHandle, &mut R, u8), VxgeError> {
        self.ensure_open()?;
        if !self.is_next_completed() {
            return Err(VxgeError::NoMoreCompletedDescriptors);
        }
        fence(Ordering::Acquire);
        let index = self.list.complete_oldest().ok_or(VxgeError::NoMoreCompletedDescriptors)?;
        self.in_hw[index] = false;
        let rxd = self.rxd(index)?;
        debug_assert_eq!(rxd.host_control() as usize, index);
        let tcode = rxd.transfer_code();
        if RingTcode::try_from(tcode).map(|t| t.class().is_fatal()).unwrap_or(false) {
            self.fatal_tcode = Some(tcode);
        }
        Ok((RxdHandle(index), &mut self.private[index], tcode))
    }

    /// Classifies the transfer code of a completed descriptor.
    pub fn handle_transfer_code(&self, handle: RxdHandle, tcode: u8) -> TcodeClass {
        let class = match RingTcode::try_from(tcode) {
            Ok(t) => t.class(),
            Err(_) => {
                warn!("vxge: vpath {} rxd {}: unknown transfer code {:#x}", self.vp_id, handle.0, tcode);
                TcodeClass::FrameError
            }
        };
        match class {
            TcodeClass::Ok => {}
            TcodeClass::Benign => debug!("vxge: vpath {} rxd {}: benign transfer code {:#x}", self.vp_id, handle.0, tcode),
            TcodeClass::FrameError => warn!("vxge: vpath {} rxd {}: frame error, transfer code {:#x}", self.vp_id, handle.0, tcode),
            TcodeClass::VpathFatal => error!("vxge: vpath {} rxd {}: fatal transfer code {:#x}", self.vp_id, handle.0, tcode),
        }
        class
    }

    /// Returns a reserved or completed descriptor to the free list.
    pub fn free(&mut self, handle: RxdHandle) -> Result<(), VxgeError> {
        self.ensure_open()?;
        self.list.free(handle.0).map_err(contract_violation)
    }

    pub fn private(&self, handle: RxdHandle) -> Option<&R> {
        self.private.get(handle.0)
    }

    pub fn private_mut(&mut self, handle: RxdHandle) -> Option<&mut R> {
        self.private.get_mut(handle.0)
    }

    /// Feeds up to `budget` completed descriptors to the registered callback, but never more
    /// than the ring's `indicate_max_pkts`, then rings the doorbell for anything the callback reposted.
    pub fn poll(&mut self, budget: usize) -> Result<PollStatus, VxgeError> {
        self.ensure_open()?;
        let budget = budget.min(self.config.indicate_max_pkts);
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
        self.post_post_db();
        if result.is_ok() && count == budget && self.is_next_completed() {
            result = Ok(PollStatus::CompletionsRemain);
        }
        result
    }

    /// Fills every free descriptor through the `rxd_init` callback and posts it.
    /// Returns the number of descriptors posted.
    pub fn replenish(&mut self, reopen: bool) -> Result<usize, VxgeError> {
        self.ensure_open()?;
        let mut init = match self.attr.rxd_init.take() {
            Some(init) => init,
            None => return Ok(0),
        };
        let mut posted = 0;
        let mut result = Ok(());
        while self.list.free_count() > 0 {
            let handle = match self.reserve().map(|(handle, _)| handle) {
                Ok(handle) => handle,
                Err(e) => { result = Err(e); break; }
            };
            if let Err(e) = init(self, handle, reopen).and_then(|_| self.post(handle)) {
                error!("vxge: vpath {} failed to initialize rxd {}: {}", self.vp_id, handle.0, e);
                if self.list.state(handle.0) == Some(DescriptorState::Reserved) {
                    if let Err(e) = self.list.free(handle.0) {
                        warn!("vxge: vpath {} could not free rxd {}: {}", self.vp_id, handle.0, e);
                    }
                }
                result = Err(e);
                break;
            }
            posted += 1;
        }
        self.attr.rxd_init = Some(init);
        self.post_post_db();
        result.map(|_| posted)
    }

    /// Forcibly takes back every reserved, posted or completed descriptor, handing each to
    /// the `rxd_term` callback. This is the cancellation path for teardown and reset.
    pub fn terminate(&mut self, reopen: bool) {
        if !self.open {
            return;
        }
        let mut term = self.attr.rxd_term.take();
        let mode = self.config.buffer_mode;
        let Ring { list, private, arena, in_hw, .. } = self;
        let mut terminated = 0;
        list.terminate_all(|index, state| {
            let ptr: Option<*mut dyn RxDescriptor> = match mode {
                BufferMode::One   => arena.item_ptr::<Rxd1>(index).map(|p| p as *mut dyn RxDescriptor),
                BufferMode::Three => arena.item_ptr::<Rxd3>(index).map(|p| p as *mut dyn RxDescriptor),
                BufferMode::Five  => arena.item_ptr::<Rxd5>(index).map(|p| p as *mut dyn RxDescriptor),
            };
            if let Some(p) = ptr {
                // SAFETY: the descriptor belongs to this ring; reclaiming it from the adapter.
                unsafe { (*p).set_owner(false); }
            }
            in_hw[index] = false;
            if let Some(term) = term.as_mut() {
                term(RxdHandle(index), &mut private[index], state, reopen);
            }
            terminated += 1;
        });
        self.attr.rxd_term = term;
        self.pending_doorbell = 0;
        if terminated > 0 {
            debug!("vxge: vpath {} ring terminated {} outstanding descriptors", self.vp_id, terminated);
        }
    }

    /// Terminates all outstanding descriptors and returns the descriptor memory.
    pub(crate) fn release(&mut self) {
        self.terminate(false);
        self.arena.release();
        self.open = false;
    }

    /// Returns and clears the fatal transfer code seen since the last call, if any.
    pub(crate) fn take_fatal_tcode(&mut self) -> Option<u8> {
        self.fatal_tcode.take()
    }

    pub fn vp_id(&self) -> usize {
        self.vp_id
    }

    pub fn buffer_mode(&self) -> BufferMode {
        self.config.buffer_mode
    }

    /// The number of descriptors in the ring.
    pub fn depth(&self) -> usize {
        self.list.len()
    }

    pub fn rxds_per_block(&self) -> usize {
        self.arena.items_per_block()
    }

    pub fn free_count(&self) -> usize {
        self.list.free_count()
    }

    pub fn posted_count(&self) -> usize {
        self.list.posted_count()
    }

    /// Reserved, posted and completed descriptors.
    pub fn outstanding(&self) -> usize {
        self.list.outstanding()
    }

    pub fn state(&self, handle: RxdHandle) -> Option<DescriptorState> {
        self.list.state(handle.0)
    }

    /// The address the adapter uses to reach this descriptor.
    pub fn rxd_dma_address(&self, handle: RxdHandle) -> Option<DmaAddress> {
        self.arena.dma_address(handle.0)
    }
}

impl<R> Drop for Ring<R> {
    fn drop(&mut self) {
        self.release();
    }
}
