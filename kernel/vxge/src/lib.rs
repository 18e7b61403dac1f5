//! The data-path core of the X3100 (vxge) 10GbE adapter driver.
//!
//! The adapter partitions its queues into virtual paths ([`Vpath`]), each with one receive
//! [`Ring`] and one transmit [`Fifo`]. The [`Device`] owns the vpaths assigned to this
//! function, routes line and MSI-X interrupts to them, and tracks device-fatal conditions.
//!
//! Bus access and memory mapping stay outside this crate: the adapter's registers are reached
//! through the traits in [`regs`], and descriptor memory is obtained from a [`DmaAllocator`].
//!
//! Interrupt handling follows the adapter's two-phase scheme:
//! [`Device::begin_irq()`] claims and masks the interrupt and processes alarms, and
//! [`Device::continue_irq()`] drains the rings and fifos of the vpaths that raised it.
//! Only one context at a time may run `continue_irq()`; another caller gets [`VxgeError::Busy`]
//! and its reason is left for the running one. Interrupt paths never wait for a vpath held by
//! a polling context: that vpath's traffic is deferred to the next `continue_irq()` and its
//! interrupt is left unacknowledged.
//!
//! Dropping a [`Device`] terminates it, handing every outstanding descriptor back through
//! the term callbacks.

#![no_std]

extern crate alloc;
#[macro_use] extern crate log;
#[macro_use] extern crate bitflags;
extern crate spin;
extern crate bit_field;
extern crate num_enum;
pub extern crate vxge_descriptors;

pub mod error;
pub mod config;
pub mod dma;
pub mod regs;
pub mod ring;
pub mod fifo;
pub mod vpath;
pub mod interrupts;
mod descriptor_list;

#[cfg(test)]
mod test_hw;

use core::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::{Mutex, MutexGuard};
use num_enum::TryFromPrimitive;

pub use vxge_descriptors as descriptors;
pub use error::VxgeError;
pub use config::{DeviceConfig, VpathConfig, RingConfig, FifoConfig, MAX_VIRTUAL_PATHS, VPATH_MSIX_MAX};
pub use descriptor_list::DescriptorState;
pub use dma::{DmaAllocator, DmaMemory};
pub use ring::{Ring, RingAttr, RxdHandle, PollStatus};
pub use fifo::{Fifo, FifoAttr, TxdlHandle};
pub use vpath::{Vpath, VpathAttr, VpathState, AlarmClass, AlarmReport, ObjCounts};
pub use interrupts::{InterruptRouter, InterruptMode, MsixSources};
use regs::{DeviceRegisters, VpathAlarms, GENERAL_INT_STATUS_ALARM, TRAFFIC_INT_MASK, traffic_int_bit, is_assigned};


/// The lifecycle state of a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum DeviceState {
    Active      = 0,
    /// Being torn down; interrupts are no longer claimed.
    Terminating = 1,
    /// A device-fatal error was seen; registers are no longer touched.
    Dead        = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum LinkState {
    Unknown = 0,
    Up      = 1,
    Down    = 2,
}

/// Notifications for the upper-layer driver. Called from interrupt context.
#[derive(Default)]
pub struct UldCallbacks {
    pub link_up: Option<Box<dyn Fn() + Send + Sync>>,
    pub link_down: Option<Box<dyn Fn() + Send + Sync>>,
    /// A critical error, with the vpath it occurred on or `None` for the whole device.
    pub crit_err: Option<Box<dyn Fn(Option<usize>, VxgeError) + Send + Sync>>,
}

/// Returns true if `reason`, as returned by [`Device::begin_irq()`],
/// carries a traffic interrupt of vpath `vp_id`.
pub fn is_traffic_interrupt(reason: u64, vp_id: usize) -> bool {
    vp_id < MAX_VIRTUAL_PATHS && reason & traffic_int_bit(vp_id) != 0
}


/// An X3100 adapter function and the vpaths assigned to it.
pub struct Device<R, T> {
    regs: Mutex<Box<dyn DeviceRegisters>>,
    config: DeviceConfig,
    assignments: u64,
    vpaths: Vec<Mutex<Option<Vpath<R, T>>>>,
    router: Arc<InterruptRouter>,
    /// Held for the duration of `continue_irq()`.
    irq_token: Mutex<()>,
    /// Traffic interrupt bits not yet drained by `continue_irq()`.
    pending_irq: AtomicU64,
    state: AtomicU8,
    link: AtomicU8,
    uld: UldCallbacks,
}

impl<R, T> Device<R, T> {
    /// Takes over the adapter function behind `regs`.
    /// Every interrupt stays masked until [`Device::intr_enable()`].
    pub fn open(mut regs: Box<dyn DeviceRegisters>, config: DeviceConfig, uld: UldCallbacks) -> Result<Device<R, T>, VxgeError> {
        config.validate()?;
        if regs.adapter_status() == u64::MAX {
            error!("vxge: adapter status reads all ones, slot freeze");
            return Err(VxgeError::SlotFreeze);
        }
        let assignments = regs.vpath_assignments();
        let msix = if config.msix_vectors > 0 {
            Some(regs.msix_registers().map_err(|e| {
                error!("vxge: failed to get the MSI-X table: {}", e);
                VxgeError::InvalidConfig(e)
            })?)
        } else {
            None
        };
        regs.set_general_int_mask(true);

        let router = Arc::new(InterruptRouter::new(msix, config.msix_vectors));
        let mut vpaths = Vec::with_capacity(MAX_VIRTUAL_PATHS);
        vpaths.resize_with(MAX_VIRTUAL_PATHS, || Mutex::new(None));
        let assigned = (0..MAX_VIRTUAL_PATHS).filter(|v| is_assigned(assignments, *v)).count();
        info!("vxge: device opened with {} assigned vpaths, {} MSI-X vectors", assigned, router.max_vectors());

        Ok(Device {
            regs: Mutex::new(regs),
            config,
            assignments,
            vpaths,
            router,
            irq_token: Mutex::new(()),
            pending_irq: AtomicU64::new(0),
            state: AtomicU8::new(DeviceState::Active as u8),
            link: AtomicU8::new(LinkState::Unknown as u8),
            uld,
        })
    }

    pub fn state(&self) -> DeviceState {
        DeviceState::try_from(self.state.load(Ordering::Acquire)).unwrap_or(DeviceState::Dead)
    }

    fn ensure_alive(&self) -> Result<(), VxgeError> {
        match self.state() {
            DeviceState::Dead => Err(VxgeError::DeviceDead),
            _ => Ok(()),
        }
    }

    /// Declares the device dead. From now on no register is accessed.
    fn mark_dead(&self, reason: VxgeError) {
        let prev = self.state.swap(DeviceState::Dead as u8, Ordering::AcqRel);
        if prev != DeviceState::Dead as u8 {
            error!("vxge: device is dead: {}", reason);
            if let Some(crit_err) = self.uld.crit_err.as_ref() {
                crit_err(None, reason);
            }
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<InterruptRouter> {
        &self.router
    }

    /// Returns true if vpath `vp_id` is assigned to this function.
    pub fn is_vpath_assigned(&self, vp_id: usize) -> bool {
        vp_id < MAX_VIRTUAL_PATHS && is_assigned(self.assignments, vp_id)
    }

    /// Opens vpath `vp_id` with the configuration from [`DeviceConfig::vpaths`].
    pub fn open_vpath(&self, vp_id: usize, attr: VpathAttr<R, T>, allocator: &dyn DmaAllocator) -> Result<(), VxgeError>
        where R: Default, T: Default
    {
        self.ensure_alive()?;
        if !self.is_vpath_assigned(vp_id) {
            warn!("vxge: vpath {} is not assigned to this function", vp_id);
            return Err(VxgeError::VpathNotAvailable);
        }
        let mut slot = self.vpaths[vp_id].lock();
        if slot.as_ref().map(|v| v.state() != VpathState::Closed).unwrap_or(false) {
            return Err(error::contract_violation("vpath is already open"));
        }
        let regs = self.regs.lock().vpath_registers(vp_id).map_err(|e| {
            error!("vxge: no registers for vpath {}: {}", vp_id, e);
            VxgeError::VpathNotAvailable
        })?;
        let vpath = Vpath::open(vp_id, &self.config.vpaths[vp_id], attr, regs, allocator, Arc::clone(&self.router))?;
        *slot = Some(vpath);
        Ok(())
    }

    /// Closes vpath `vp_id`, terminating its outstanding descriptors.
    /// Closing a vpath that is not open does nothing.
    pub fn close_vpath(&self, vp_id: usize) -> Result<(), VxgeError> {
        let slot = self.vpaths.get(vp_id).ok_or(VxgeError::VpathNotAvailable)?;
        if let Some(mut vpath) = slot.lock().take() {
            if self.state() == DeviceState::Dead {
                vpath.abandon();
            } else {
                vpath.close();
            }
        }
        Ok(())
    }

    /// Locks the slot of vpath `vp_id`, which holds the vpath while it is open.
    pub fn vpath(&self, vp_id: usize) -> Result<MutexGuard<'_, Option<Vpath<R, T>>>, VxgeError> {
        self.ensure_alive()?;
        self.vpaths.get(vp_id).map(|s| s.lock()).ok_or(VxgeError::VpathNotAvailable)
    }

    /// Runs `f` on open vpath `vp_id`.
    pub fn with_vpath<F, U>(&self, vp_id: usize, f: F) -> Result<U, VxgeError>
        where F: FnOnce(&mut Vpath<R, T>) -> U
    {
        let mut slot = self.vpath(vp_id)?;
        match slot.as_mut() {
            Some(vpath) if vpath.state() != VpathState::Closed => Ok(f(vpath)),
            _ => Err(VxgeError::VpathNotOpen),
        }
    }

    /// Runs `f` on every open vpath, returning the first error after visiting all of them.
    fn for_each_vpath<F>(&self, mut f: F) -> Result<(), VxgeError>
        where F: FnMut(&mut Vpath<R, T>) -> Result<(), VxgeError>
    {
        self.ensure_alive()?;
        let mut result = Ok(());
        for slot in self.vpaths.iter() {
            if let Some(vpath) = slot.lock().as_mut() {
                if vpath.state() == VpathState::Closed {
                    continue;
                }
                if let Err(e) = f(vpath) {
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
        }
        result
    }

    /// Checks the adapter status. An all-ones read means the slot is frozen,
    /// and the device is declared dead.
    pub fn status(&self) -> Result<(), VxgeError> {
        self.ensure_alive()?;
        let status = self.regs.lock().adapter_status();
        if status == u64::MAX {
            self.mark_dead(VxgeError::SlotFreeze);
            return Err(VxgeError::SlotFreeze);
        }
        Ok(())
    }

    /// The first half of interrupt handling.
    ///
    /// Reads the general interrupt status and returns `WrongIrq` without touching the
    /// interrupt mask if this device did not raise the interrupt. Otherwise the device is
    /// masked, pending alarms are processed unless `skip_alarms` is set,
    /// and the status is returned as the reason for [`Device::continue_irq()`].
    pub fn begin_irq(&self, skip_alarms: bool) -> Result<u64, VxgeError> {
        match self.state() {
            DeviceState::Dead => return Err(VxgeError::DeviceDead),
            DeviceState::Terminating => return Err(VxgeError::WrongIrq),
            DeviceState::Active => {}
        }
        let status = {
            let mut regs = self.regs.lock();
            let status = regs.general_int_status();
            if status == 0 {
                trace!("vxge: interrupt not raised by this device");
                return Err(VxgeError::WrongIrq);
            }
            if status == u64::MAX {
                drop(regs);
                self.mark_dead(VxgeError::SlotFreeze);
                return Err(VxgeError::SlotFreeze);
            }
            regs.set_general_int_mask(true);
            status
        };
        if status & GENERAL_INT_STATUS_ALARM != 0 && !skip_alarms {
            self.process_alarms()?;
        }
        Ok(status)
    }

    /// The second half of interrupt handling: drains the ring and fifo of every enabled
    /// vpath whose traffic bit is set in `reason`, then unmasks the device.
    ///
    /// If another context is already in `continue_irq()`, `reason` is handed to it and
    /// `Busy` is returned. Traffic of a vpath currently held by a poller stays pending
    /// for the next call.
    pub fn continue_irq(&self, reason: u64) -> Result<(), VxgeError> {
        self.ensure_alive()?;
        self.pending_irq.fetch_or(reason & TRAFFIC_INT_MASK, Ordering::AcqRel);
        let _token = self.irq_token.try_lock().ok_or(VxgeError::Busy)?;
        let mut deferred = 0;
        loop {
            let pending = self.pending_irq.swap(0, Ordering::AcqRel);
            if pending == 0 {
                break;
            }
            for vp_id in 0..MAX_VIRTUAL_PATHS {
                if is_traffic_interrupt(pending, vp_id) && !self.drain_vpath(vp_id) {
                    deferred |= traffic_int_bit(vp_id);
                }
            }
        }
        if deferred != 0 {
            self.pending_irq.fetch_or(deferred, Ordering::AcqRel);
        }
        if self.state() == DeviceState::Active {
            self.regs.lock().set_general_int_mask(false);
        }
        Ok(())
    }

    /// Traffic interrupt bits waiting for the next [`Device::continue_irq()`].
    pub fn pending_irq(&self) -> u64 {
        self.pending_irq.load(Ordering::Acquire)
    }

    /// Handles a line interrupt: [`Device::begin_irq()`] followed by [`Device::continue_irq()`].
    pub fn handle_irq(&self, skip_alarms: bool) -> Result<(), VxgeError> {
        let reason = self.begin_irq(skip_alarms)?;
        self.continue_irq(reason)
    }

    /// Handles an interrupt on MSI-X `vector`.
    ///
    /// A traffic vector is masked while the owning vpath is drained;
    /// an alarm vector runs the vpath's alarm processing.
    pub fn handle_msix(&self, vector: usize) -> Result<(), VxgeError> {
        match self.state() {
            DeviceState::Dead => return Err(VxgeError::DeviceDead),
            DeviceState::Terminating => return Err(VxgeError::WrongIrq),
            DeviceState::Active => {}
        }
        let (vp_id, sources) = self.router.lookup(vector).ok_or(VxgeError::WrongIrq)?;
        let mut handled = true;
        if sources.contains(MsixSources::ALARM) {
            self.router.mask(vp_id, vector)?;
            handled &= self.process_vpath_alarms(vp_id)?;
        }
        if sources.intersects(MsixSources::TX | MsixSources::RX) {
            self.router.mask(vp_id, vector)?;
            handled &= self.drain_vpath(vp_id);
        }
        if self.state() == DeviceState::Active {
            // an unacknowledged vector fires again once unmasked
            if handled {
                self.router.clear(vp_id, vector)?;
            }
            self.router.unmask(vp_id, vector)?;
        }
        Ok(())
    }

    /// Drains vpath `vp_id` if it is enabled.
    /// Returns false without waiting if another context holds the vpath.
    fn drain_vpath(&self, vp_id: usize) -> bool {
        let budget = self.config.irq_budget;
        let mut critical = false;
        {
            let mut slot = match self.vpaths[vp_id].try_lock() {
                Some(slot) => slot,
                None => {
                    trace!("vxge: vpath {} is held elsewhere, deferring its traffic", vp_id);
                    return false;
                }
            };
            let vpath = match slot.as_mut() {
                Some(vpath) if vpath.state() == VpathState::Enabled => vpath,
                _ => return true,
            };
            if let Err(e) = vpath.clear_tx_rx() {
                warn!("vxge: vpath {} failed to acknowledge its traffic interrupts: {}", vp_id, e);
            }
            let rx = vpath.poll_rx(budget);
            let tx = if rx == Err(VxgeError::Critical) { Ok(PollStatus::Done) } else { vpath.poll_tx(budget) };
            for result in [rx, tx] {
                match result {
                    Ok(PollStatus::CompletionsRemain) => trace!("vxge: vpath {} has completions left", vp_id),
                    Ok(PollStatus::Done) => {}
                    Err(VxgeError::Critical) => critical = true,
                    Err(e) => warn!("vxge: vpath {} completion callback failed: {}", vp_id, e),
                }
            }
        }
        if critical {
            if let Some(crit_err) = self.uld.crit_err.as_ref() {
                crit_err(Some(vp_id), VxgeError::Critical);
            }
        }
        true
    }

    /// Runs alarm processing on every open vpath.
    fn process_alarms(&self) -> Result<(), VxgeError> {
        for vp_id in 0..MAX_VIRTUAL_PATHS {
            self.process_vpath_alarms(vp_id)?;
        }
        Ok(())
    }

    /// Processes the alarms of vpath `vp_id`. Returns `Ok(false)` without waiting if another
    /// context holds the vpath; its alarms stay uncleared and are raised again.
    fn process_vpath_alarms(&self, vp_id: usize) -> Result<bool, VxgeError> {
        let report = {
            let mut slot = match self.vpaths[vp_id].try_lock() {
                Some(slot) => slot,
                None => {
                    trace!("vxge: vpath {} is held elsewhere, leaving its alarms pending", vp_id);
                    return Ok(false);
                }
            };
            match slot.as_mut() {
                Some(vpath) if vpath.state() != VpathState::Closed => vpath.alarm_process(false)?,
                _ => return Ok(true),
            }
        };
        if report.alarms.contains(VpathAlarms::LINK_DOWN) {
            self.set_link_state(LinkState::Down);
        } else if report.alarms.contains(VpathAlarms::LINK_UP) {
            self.set_link_state(LinkState::Up);
        }
        match report.class {
            AlarmClass::DeviceFatal => {
                self.mark_dead(VxgeError::Critical);
                Err(VxgeError::Critical)
            }
            AlarmClass::VpathFatal => {
                if let Some(crit_err) = self.uld.crit_err.as_ref() {
                    crit_err(Some(vp_id), VxgeError::Critical);
                }
                Ok(true)
            }
            AlarmClass::Recoverable | AlarmClass::None => Ok(true),
        }
    }

    /// Masks every interrupt of the device.
    pub fn mask_all(&self) -> Result<(), VxgeError> {
        self.ensure_alive()?;
        self.regs.lock().set_general_int_mask(true);
        Ok(())
    }

    pub fn unmask_all(&self) -> Result<(), VxgeError> {
        self.ensure_alive()?;
        self.regs.lock().set_general_int_mask(false);
        Ok(())
    }

    pub fn mask_tx(&self) -> Result<(), VxgeError> {
        self.for_each_vpath(|v| v.mask_tx())
    }

    pub fn unmask_tx(&self) -> Result<(), VxgeError> {
        self.for_each_vpath(|v| v.unmask_tx())
    }

    pub fn mask_rx(&self) -> Result<(), VxgeError> {
        self.for_each_vpath(|v| v.mask_rx())
    }

    pub fn unmask_rx(&self) -> Result<(), VxgeError> {
        self.for_each_vpath(|v| v.unmask_rx())
    }

    pub fn mask_tx_rx(&self) -> Result<(), VxgeError> {
        self.for_each_vpath(|v| v.mask_tx_rx())
    }

    pub fn unmask_tx_rx(&self) -> Result<(), VxgeError> {
        self.for_each_vpath(|v| v.unmask_tx_rx())
    }

    pub fn clear_tx(&self) -> Result<(), VxgeError> {
        self.for_each_vpath(|v| v.clear_tx())
    }

    pub fn clear_rx(&self) -> Result<(), VxgeError> {
        self.for_each_vpath(|v| v.clear_rx())
    }

    pub fn clear_tx_rx(&self) -> Result<(), VxgeError> {
        self.for_each_vpath(|v| v.clear_tx_rx())
    }

    /// Enables the interrupts of every open vpath, then unmasks the device.
    pub fn intr_enable(&self) -> Result<(), VxgeError> {
        self.for_each_vpath(|v| { v.intr_enable(); Ok(()) })?;
        self.unmask_all()
    }

    /// Masks the device, then disables the interrupts of every open vpath.
    pub fn intr_disable(&self) -> Result<(), VxgeError> {
        self.mask_all()?;
        self.for_each_vpath(|v| { v.intr_disable(); Ok(()) })
    }

    /// Requests a reset of every open vpath.
    pub fn reset(&self) -> Result<(), VxgeError> {
        self.for_each_vpath(|v| v.reset())
    }

    /// Polls every vpath with a pending reset. Returns `ResetPending` while any is still
    /// resetting, or the first error a vpath reported.
    pub fn reset_poll(&self) -> Result<(), VxgeError> {
        let mut pending = false;
        self.for_each_vpath(|v| {
            if v.state() != VpathState::ResetPending {
                return Ok(());
            }
            match v.reset_poll() {
                Err(VxgeError::ResetPending) => {
                    pending = true;
                    Ok(())
                }
                other => other,
            }
        })?;
        if pending { Err(VxgeError::ResetPending) } else { Ok(()) }
    }

    /// Stops claiming interrupts and closes every vpath.
    pub fn terminate(&self) {
        let dead = self.state() == DeviceState::Dead;
        if !dead {
            self.state.store(DeviceState::Terminating as u8, Ordering::Release);
            self.regs.lock().set_general_int_mask(true);
        }
        for slot in self.vpaths.iter() {
            if let Some(mut vpath) = slot.lock().take() {
                if dead { vpath.abandon(); } else { vpath.close(); }
            }
        }
        debug!("vxge: device terminated");
    }

    pub fn link_state(&self) -> LinkState {
        LinkState::try_from(self.link.load(Ordering::Acquire)).unwrap_or(LinkState::Unknown)
    }

    /// Records a new link state, notifying the upper-layer driver if it changed.
    pub fn set_link_state(&self, state: LinkState) {
        let prev = self.link.swap(state as u8, Ordering::AcqRel);
        if prev == state as u8 {
            return;
        }
        info!("vxge: link {:?}", state);
        let callback = match state {
            LinkState::Up => self.uld.link_up.as_ref(),
            LinkState::Down => self.uld.link_down.as_ref(),
            LinkState::Unknown => None,
        };
        if let Some(callback) = callback {
            callback();
        }
    }
}

impl<R, T> Drop for Device<R, T> {
    fn drop(&mut self) {
        self.terminate();
    }
}
