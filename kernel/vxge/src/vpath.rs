//! A virtual path: one receive ring, one transmit fifo and the interrupt resources
//! that go with them, partitioned off by the adapter.
//!
//! A vpath is opened with the callbacks of its ring and fifo, admitted into service with
//! [`Vpath::enable()`], and can be reset without disturbing the other vpaths of the device.
//! Reset is asynchronous: [`Vpath::reset()`] issues the request and the caller keeps calling
//! [`Vpath::reset_poll()`] until it stops returning [`VxgeError::ResetPending`].

use alloc::boxed::Box;
use alloc::sync::Arc;
use crate::config::{self, VpathConfig, VPATH_MSIX_MAX};
use crate::dma::DmaAllocator;
use crate::error::{VxgeError, contract_violation};
use crate::fifo::{Fifo, FifoAttr};
use crate::interrupts::{InterruptMode, InterruptRouter};
use crate::regs::{TimSource, VpathAlarms, VpathRegisterSet, VpathRegisters};
use crate::ring::{PollStatus, Ring, RingAttr};


/// The lifecycle state of a vpath.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VpathState {
    Closed,
    /// Descriptor memory is set up but the vpath is not in service.
    Open,
    /// In service; interrupt handlers drain it.
    Enabled,
    /// A reset was requested and has not completed.
    ResetPending,
    /// A fatal error was seen; only a reset or close is accepted.
    Dead,
}

/// How serious the alarms found by [`Vpath::alarm_process()`] are.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlarmClass {
    None,
    /// Logged and cleared; traffic continues.
    Recoverable,
    /// The vpath must be reset.
    VpathFatal,
    /// The whole device is unusable.
    DeviceFatal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AlarmReport {
    pub class: AlarmClass,
    /// The alarm bits that were set, including link changes.
    pub alarms: VpathAlarms,
}

/// Outstanding descriptor counts of a vpath.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ObjCounts {
    pub ring_outstanding: usize,
    pub ring_posted: usize,
    pub fifo_outstanding: usize,
    pub fifo_posted: usize,
}

/// The callbacks of a vpath's ring and fifo.
pub struct VpathAttr<R, T> {
    pub ring: RingAttr<R>,
    pub fifo: FifoAttr<T>,
}

impl<R, T> Default for VpathAttr<R, T> {
    fn default() -> Self {
        VpathAttr { ring: RingAttr::default(), fifo: FifoAttr::default() }
    }
}

const VPATH_FATAL_ALARMS: VpathAlarms = VpathAlarms::from_bits_truncate(
    VpathAlarms::PIC_ECC_ERR.bits()
    | VpathAlarms::RING_RXD_ECC_ERR.bits()
    | VpathAlarms::FIFO_DMA_ERR.bits()
    | VpathAlarms::WRDMA_ERR.bits()
);
const RECOVERABLE_ALARMS: VpathAlarms = VpathAlarms::from_bits_truncate(
    VpathAlarms::RING_RXD_ERR.bits()
    | VpathAlarms::RXD_DOORBELL_OVFL.bits()
    | VpathAlarms::TXDL_DOORBELL_OVFL.bits()
);


/// A virtual path. `R` and `T` are the caller's private data per receive descriptor
/// and per transmit list.
pub struct Vpath<R, T> {
    vp_id: usize,
    config: VpathConfig,
    state: VpathState,
    ring: Ring<R>,
    fifo: Fifo<T>,
    regs: Box<dyn VpathRegisters>,
    router: Arc<InterruptRouter>,
    reset_polls: u32,
}

impl<R, T> Vpath<R, T> {
    /// Allocates the descriptor memory of the ring and fifo, registers the callbacks,
    /// and fills the ring through its `rxd_init` callback.
    /// The vpath is left in the `Open` state with all its interrupts masked.
    pub(crate) fn open(
        vp_id: usize,
        config: &VpathConfig,
        attr: VpathAttr<R, T>,
        regs: VpathRegisterSet,
        allocator: &dyn DmaAllocator,
        router: Arc<InterruptRouter>,
    ) -> Result<Vpath<R, T>, VxgeError>
        where R: Default, T: Default
    {
        config.validate()?;
        let VpathRegisterSet { ring: ring_regs, fifo: fifo_regs, vpath: vpath_regs } = regs;
        let ring = Ring::new(vp_id, &config.ring, attr.ring, ring_regs, allocator)?;
        let fifo = Fifo::new(vp_id, &config.fifo, attr.fifo, fifo_regs, allocator)?;
        let mut vpath = Vpath {
            vp_id,
            config: *config,
            state: VpathState::Open,
            ring,
            fifo,
            regs: vpath_regs,
            router,
            reset_polls: 0,
        };
        vpath.intr_disable();
        if let Err(e) = vpath.ring.replenish(false) {
            vpath.close();
            return Err(e);
        }
        debug!("vxge: vpath {} opened", vp_id);
        Ok(vpath)
    }

    pub fn vp_id(&self) -> usize {
        self.vp_id
    }

    pub fn state(&self) -> VpathState {
        self.state
    }

    pub fn config(&self) -> &VpathConfig {
        &self.config
    }

    fn ensure_open(&self) -> Result<(), VxgeError> {
        match self.state {
            VpathState::Closed => Err(VxgeError::VpathNotOpen),
            _ => Ok(()),
        }
    }

    /// Admits the vpath into service.
    pub fn enable(&mut self) -> Result<(), VxgeError> {
        match self.state {
            VpathState::Open | VpathState::Enabled => {
                self.state = VpathState::Enabled;
                debug!("vxge: vpath {} enabled", self.vp_id);
                Ok(())
            }
            VpathState::ResetPending => Err(VxgeError::ResetPending),
            VpathState::Dead => Err(VxgeError::Critical),
            VpathState::Closed => Err(VxgeError::VpathNotOpen),
        }
    }

    /// Masks the vpath's interrupts, terminates every outstanding descriptor through the term
    /// callbacks and releases the descriptor memory and MSI-X vectors.
    /// Closing a closed vpath does nothing. Dropping an open vpath closes it.
    pub fn close(&mut self) {
        if self.state == VpathState::Closed {
            return;
        }
        self.intr_disable();
        self.router.release(self.vp_id);
        self.abandon();
        debug!("vxge: vpath {} closed", self.vp_id);
    }

    /// Like [`Vpath::close()`], without any register access.
    pub(crate) fn abandon(&mut self) {
        if self.state == VpathState::Closed {
            return;
        }
        self.ring.release();
        self.fifo.release();
        self.state = VpathState::Closed;
    }

    /// Asks the adapter to reset the vpath. Traffic stops until [`Vpath::reset_poll()`]
    /// reports completion and the vpath is enabled again.
    pub fn reset(&mut self) -> Result<(), VxgeError> {
        self.ensure_open()?;
        self.intr_disable();
        if !self.regs.request_reset() {
            error!("vxge: vpath {} reset request was refused", self.vp_id);
            return Err(VxgeError::ResetFailed);
        }
        self.state = VpathState::ResetPending;
        self.reset_polls = 0;
        debug!("vxge: vpath {} reset requested", self.vp_id);
        Ok(())
    }

    /// Checks on a pending reset without blocking.
    ///
    /// Returns `ResetPending` while the adapter is still busy, and `TimeOut` once
    /// `reset_poll_limit` polls went by without completion. On completion the ring and fifo
    /// are emptied through their term callbacks, the ring is refilled, and the vpath is
    /// left `Open`.
    pub fn reset_poll(&mut self) -> Result<(), VxgeError> {
        if self.state != VpathState::ResetPending {
            return Err(contract_violation("reset_poll called without a pending reset"));
        }
        if self.regs.reset_in_progress() {
            self.reset_polls += 1;
            if self.reset_polls >= self.config.reset_poll_limit {
                error!("vxge: vpath {} reset did not complete after {} polls", self.vp_id, self.reset_polls);
                self.state = VpathState::Dead;
                return Err(VxgeError::TimeOut);
            }
            return Err(VxgeError::ResetPending);
        }
        self.regs.clear_reset();
        self.ring.terminate(true);
        self.fifo.terminate(true);
        self.fifo.doorbell_reset();
        self.ring.take_fatal_tcode();
        self.fifo.take_fatal_tcode();
        self.state = VpathState::Open;
        self.ring.replenish(true)?;
        debug!("vxge: vpath {} reset complete after {} polls", self.vp_id, self.reset_polls);
        Ok(())
    }

    /// Reads the alarm status of the vpath and classifies it.
    /// Unless `skip_alarms` is set, the reported alarms are cleared.
    pub fn alarm_process(&mut self, skip_alarms: bool) -> Result<AlarmReport, VxgeError> {
        self.ensure_open()?;
        let status = self.regs.alarm_status();
        if status == u64::MAX {
            error!("vxge: vpath {} alarm status reads all ones, slot freeze", self.vp_id);
            self.state = VpathState::Dead;
            return Ok(AlarmReport { class: AlarmClass::DeviceFatal, alarms: VpathAlarms::all() });
        }
        let alarms = VpathAlarms::from_bits_truncate(status);
        let mut class = AlarmClass::None;
        if alarms.contains(VpathAlarms::PCI_SERR) {
            error!("vxge: vpath {} PCI system error", self.vp_id);
            class = AlarmClass::DeviceFatal;
        } else if alarms.intersects(VPATH_FATAL_ALARMS) {
            error!("vxge: vpath {} fatal alarm {:?}", self.vp_id, alarms & VPATH_FATAL_ALARMS);
            class = AlarmClass::VpathFatal;
        } else if alarms.intersects(RECOVERABLE_ALARMS) {
            warn!("vxge: vpath {} recoverable alarm {:?}", self.vp_id, alarms & RECOVERABLE_ALARMS);
            class = AlarmClass::Recoverable;
        }
        let ring_tcode = self.ring.take_fatal_tcode();
        let fifo_tcode = self.fifo.take_fatal_tcode();
        if (ring_tcode.is_some() || fifo_tcode.is_some()) && class < AlarmClass::VpathFatal {
            error!("vxge: vpath {} fatal transfer code (rx {:?}, tx {:?})", self.vp_id, ring_tcode, fifo_tcode);
            class = AlarmClass::VpathFatal;
        }
        if class >= AlarmClass::VpathFatal {
            self.state = VpathState::Dead;
        }
        if !skip_alarms && status != 0 {
            self.regs.clear_alarms(status);
        }
        Ok(AlarmReport { class, alarms })
    }

    fn set_tim_mask(&mut self, sources: &[TimSource], masked: bool) -> Result<(), VxgeError> {
        self.ensure_open()?;
        for source in sources {
            self.regs.set_tim_mask(*source, masked);
        }
        Ok(())
    }

    pub fn mask_tx(&mut self) -> Result<(), VxgeError> {
        self.set_tim_mask(&[TimSource::Tx], true)
    }

    pub fn unmask_tx(&mut self) -> Result<(), VxgeError> {
        self.set_tim_mask(&[TimSource::Tx], false)
    }

    pub fn mask_rx(&mut self) -> Result<(), VxgeError> {
        self.set_tim_mask(&[TimSource::Rx], true)
    }

    pub fn unmask_rx(&mut self) -> Result<(), VxgeError> {
        self.set_tim_mask(&[TimSource::Rx], false)
    }

    pub fn mask_tx_rx(&mut self) -> Result<(), VxgeError> {
        self.set_tim_mask(&[TimSource::Tx, TimSource::Rx], true)
    }

    pub fn unmask_tx_rx(&mut self) -> Result<(), VxgeError> {
        self.set_tim_mask(&[TimSource::Tx, TimSource::Rx], false)
    }

    fn clear_tim(&mut self, sources: &[TimSource]) -> Result<(), VxgeError> {
        self.ensure_open()?;
        for source in sources {
            self.regs.clear_tim(*source);
        }
        Ok(())
    }

    pub fn clear_tx(&mut self) -> Result<(), VxgeError> {
        self.clear_tim(&[TimSource::Tx])
    }

    pub fn clear_rx(&mut self) -> Result<(), VxgeError> {
        self.clear_tim(&[TimSource::Rx])
    }

    pub fn clear_tx_rx(&mut self) -> Result<(), VxgeError> {
        self.clear_tim(&[TimSource::Tx, TimSource::Rx])
    }

    /// Unmasks the traffic and alarm interrupts of the vpath.
    pub fn intr_enable(&mut self) {
        if self.state == VpathState::Closed {
            return;
        }
        for source in [TimSource::Tx, TimSource::Rx] {
            self.regs.set_tim_mask(source, false);
        }
        self.regs.set_alarm_mask(false);
        if self.msix_mode() == InterruptMode::Msix {
            if let Err(e) = self.router.unmask_all(self.vp_id) {
                warn!("vxge: vpath {} failed to unmask its MSI-X vectors: {}", self.vp_id, e);
            }
        }
    }

    /// Masks every interrupt source of the vpath.
    pub fn intr_disable(&mut self) {
        if self.state == VpathState::Closed {
            return;
        }
        for source in [TimSource::Tx, TimSource::Rx, TimSource::Einta, TimSource::Bmap] {
            self.regs.set_tim_mask(source, true);
        }
        self.regs.set_alarm_mask(true);
        if self.msix_mode() == InterruptMode::Msix {
            if let Err(e) = self.router.mask_all(self.vp_id) {
                warn!("vxge: vpath {} failed to mask its MSI-X vectors: {}", self.vp_id, e);
            }
        }
    }

    /// Steers the TIM sources (Tx, Rx, Einta, Bmap) and the alarm of this vpath
    /// to vectors of its MSI-X window, given as vpath-local ids.
    pub fn msix_set(&mut self, tim_ids: [usize; VPATH_MSIX_MAX], alarm_id: usize) -> Result<(), VxgeError> {
        self.ensure_open()?;
        self.router.set(self.vp_id, tim_ids, alarm_id)
    }

    pub fn msix_mask(&self, vector: usize) -> Result<(), VxgeError> {
        self.ensure_open()?;
        self.router.mask(self.vp_id, vector)
    }

    pub fn msix_unmask(&self, vector: usize) -> Result<(), VxgeError> {
        self.ensure_open()?;
        self.router.unmask(self.vp_id, vector)
    }

    pub fn msix_clear(&self, vector: usize) -> Result<(), VxgeError> {
        self.ensure_open()?;
        self.router.clear(self.vp_id, vector)
    }

    pub fn msix_mask_all(&self) -> Result<(), VxgeError> {
        self.ensure_open()?;
        self.router.mask_all(self.vp_id)
    }

    pub fn msix_unmask_all(&self) -> Result<(), VxgeError> {
        self.ensure_open()?;
        self.router.unmask_all(self.vp_id)
    }

    pub fn msix_mode(&self) -> InterruptMode {
        self.router.mode(self.vp_id)
    }

    /// Drains up to `budget` receive completions through the ring callback.
    /// A fatal transfer code puts the vpath in the `Dead` state and returns `Critical`.
    pub fn poll_rx(&mut self, budget: usize) -> Result<PollStatus, VxgeError> {
        self.ensure_open()?;
        let status = self.ring.poll(budget)?;
        if let Some(tcode) = self.ring.take_fatal_tcode() {
            error!("vxge: vpath {} ring reported fatal transfer code {:#x}", self.vp_id, tcode);
            self.state = VpathState::Dead;
            return Err(VxgeError::Critical);
        }
        Ok(status)
    }

    /// Drains up to `budget` transmit completions through the fifo callback.
    pub fn poll_tx(&mut self, budget: usize) -> Result<PollStatus, VxgeError> {
        self.ensure_open()?;
        let status = self.fifo.poll(budget)?;
        if let Some(tcode) = self.fifo.take_fatal_tcode() {
            error!("vxge: vpath {} fifo reported fatal transfer code {:#x}", self.vp_id, tcode);
            self.state = VpathState::Dead;
            return Err(VxgeError::Critical);
        }
        Ok(status)
    }

    pub fn mtu_check(&self, mtu: u32) -> Result<(), VxgeError> {
        config::mtu_check(mtu)
    }

    pub fn obj_counts(&self) -> ObjCounts {
        ObjCounts {
            ring_outstanding: self.ring.outstanding(),
            ring_posted: self.ring.posted_count(),
            fifo_outstanding: self.fifo.outstanding(),
            fifo_posted: self.fifo.posted_count(),
        }
    }

    pub fn ring(&mut self) -> Result<&mut Ring<R>, VxgeError> {
        self.ensure_open()?;
        Ok(&mut self.ring)
    }

    pub fn fifo(&mut self) -> Result<&mut Fifo<T>, VxgeError> {
        self.ensure_open()?;
        Ok(&mut self.fifo)
    }
}

impl<R, T> Drop for Vpath<R, T> {
    fn drop(&mut self) {
        self.close();
    }
}
