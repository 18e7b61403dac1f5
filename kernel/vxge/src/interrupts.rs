//! MSI-X vector bookkeeping shared by all vpaths of a device.
//!
//! Each vpath owns a window of [`VPATH_MSIX_MAX`] consecutive vectors starting at
//! `vp_id * VPATH_MSIX_MAX`. The router is the only writer of the MSI-X table;
//! vpaths go through it to bind, mask, unmask and acknowledge their vectors.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::ops::Range;
use spin::Mutex;
use crate::config::VPATH_MSIX_MAX;
use crate::error::VxgeError;
use crate::regs::{MsixRegisters, TimSource};


/// Source number used when binding the alarm interrupt of a vpath.
pub const ALARM_SOURCE: usize = VPATH_MSIX_MAX;

bitflags! {
    /// The interrupt sources of a vpath that are steered to one vector.
    #[derive(Default)]
    pub struct MsixSources: u8 {
        const TX    = 1 << TimSource::Tx as u8;
        const RX    = 1 << TimSource::Rx as u8;
        const EINTA = 1 << TimSource::Einta as u8;
        const BMAP  = 1 << TimSource::Bmap as u8;
        const ALARM = 1 << ALARM_SOURCE as u8;
    }
}

impl MsixSources {
    fn from_tim(source: TimSource) -> MsixSources {
        MsixSources::from_bits_truncate(1 << source as u8)
    }
}

/// How a vpath's interrupts reach the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterruptMode {
    /// Through the shared line interrupt and the general interrupt status.
    Line,
    /// Through the vpath's own MSI-X vectors.
    Msix,
}

/// The vectors of the vpath window `vp_id`.
pub fn vpath_window(vp_id: usize) -> Range<usize> {
    let base = vp_id * VPATH_MSIX_MAX;
    base..base + VPATH_MSIX_MAX
}

#[derive(Clone, Copy, Debug, Default)]
struct VectorState {
    sources: MsixSources,
    masked: bool,
}

struct MsixTable {
    regs: Option<Box<dyn MsixRegisters>>,
    vectors: Vec<VectorState>,
}

/// Owns the MSI-X table state of a device.
pub struct InterruptRouter {
    table: Mutex<MsixTable>,
    max_vectors: usize,
}

impl InterruptRouter {
    /// Creates a router for a table of `max_vectors` vectors.
    /// With no register object the device uses line interrupts only.
    pub fn new(regs: Option<Box<dyn MsixRegisters>>, max_vectors: usize) -> InterruptRouter {
        let max_vectors = if regs.is_some() { max_vectors } else { 0 };
        InterruptRouter {
            table: Mutex::new(MsixTable {
                regs,
                vectors: alloc::vec![VectorState { sources: MsixSources::empty(), masked: true }; max_vectors],
            }),
            max_vectors,
        }
    }

    pub fn max_vectors(&self) -> usize {
        self.max_vectors
    }

    fn check(&self, vp_id: usize, vector: usize) -> Result<(), VxgeError> {
        if vector < self.max_vectors && vpath_window(vp_id).contains(&vector) {
            Ok(())
        } else {
            warn!("vxge: vpath {} cannot use MSI-X vector {}", vp_id, vector);
            Err(VxgeError::InvalidVector)
        }
    }

    /// Steers the four TIM sources and the alarm of vpath `vp_id` to vectors of its window.
    /// Every id is vpath-local, less than [`VPATH_MSIX_MAX`]. The bound vectors start out masked.
    pub fn set(&self, vp_id: usize, tim_ids: [usize; VPATH_MSIX_MAX], alarm_id: usize) -> Result<(), VxgeError> {
        let base = vp_id * VPATH_MSIX_MAX;
        for id in tim_ids.iter().chain(core::iter::once(&alarm_id)) {
            if *id >= VPATH_MSIX_MAX {
                return Err(VxgeError::InvalidVector);
            }
            self.check(vp_id, base + id)?;
        }

        let mut table = self.table.lock();
        let MsixTable { regs, vectors } = &mut *table;
        let regs = regs.as_mut().ok_or(VxgeError::InvalidVector)?;
        for vector in vpath_window(vp_id) {
            if let Some(state) = vectors.get_mut(vector) {
                state.sources = MsixSources::empty();
            }
        }
        let sources = [TimSource::Tx, TimSource::Rx, TimSource::Einta, TimSource::Bmap];
        for (source, id) in sources.iter().zip(tim_ids.iter()) {
            let vector = base + id;
            regs.bind(vp_id, *source as usize, vector);
            vectors[vector].sources |= MsixSources::from_tim(*source);
        }
        regs.bind(vp_id, ALARM_SOURCE, base + alarm_id);
        vectors[base + alarm_id].sources |= MsixSources::ALARM;

        for vector in vpath_window(vp_id) {
            if !vectors[vector].sources.is_empty() {
                regs.set_mask(vector, true);
                vectors[vector].masked = true;
            }
        }
        debug!("vxge: vpath {} MSI-X vectors {:?} bound", vp_id, vpath_window(vp_id));
        Ok(())
    }

    fn with_vector<F>(&self, vp_id: usize, vector: usize, f: F) -> Result<(), VxgeError>
        where F: FnOnce(&mut Box<dyn MsixRegisters>, &mut VectorState)
    {
        self.check(vp_id, vector)?;
        let mut table = self.table.lock();
        let MsixTable { regs, vectors } = &mut *table;
        match (regs.as_mut(), vectors.get_mut(vector)) {
            (Some(regs), Some(state)) => {
                f(regs, state);
                Ok(())
            }
            _ => Err(VxgeError::InvalidVector),
        }
    }

    pub fn mask(&self, vp_id: usize, vector: usize) -> Result<(), VxgeError> {
        self.with_vector(vp_id, vector, |regs, state| {
            regs.set_mask(vector, true);
            state.masked = true;
        })
    }

    pub fn unmask(&self, vp_id: usize, vector: usize) -> Result<(), VxgeError> {
        self.with_vector(vp_id, vector, |regs, state| {
            regs.set_mask(vector, false);
            state.masked = false;
        })
    }

    /// Acknowledges a pending interrupt on `vector`.
    pub fn clear(&self, vp_id: usize, vector: usize) -> Result<(), VxgeError> {
        self.with_vector(vp_id, vector, |regs, _| regs.clear(vector))
    }

    fn set_window_mask(&self, vp_id: usize, masked: bool) -> Result<(), VxgeError> {
        let mut table = self.table.lock();
        let MsixTable { regs, vectors } = &mut *table;
        let regs = regs.as_mut().ok_or(VxgeError::InvalidVector)?;
        for vector in vpath_window(vp_id) {
            if let Some(state) = vectors.get_mut(vector) {
                if !state.sources.is_empty() {
                    regs.set_mask(vector, masked);
                    state.masked = masked;
                }
            }
        }
        Ok(())
    }

    /// Masks every bound vector of vpath `vp_id`.
    pub fn mask_all(&self, vp_id: usize) -> Result<(), VxgeError> {
        self.set_window_mask(vp_id, true)
    }

    pub fn unmask_all(&self, vp_id: usize) -> Result<(), VxgeError> {
        self.set_window_mask(vp_id, false)
    }

    /// Masks and unbinds every vector of vpath `vp_id`.
    pub(crate) fn release(&self, vp_id: usize) {
        let mut table = self.table.lock();
        let MsixTable { regs, vectors } = &mut *table;
        for vector in vpath_window(vp_id) {
            if let Some(state) = vectors.get_mut(vector) {
                if state.sources.is_empty() {
                    continue;
                }
                if let Some(regs) = regs.as_mut() {
                    regs.set_mask(vector, true);
                }
                *state = VectorState { sources: MsixSources::empty(), masked: true };
            }
        }
    }

    /// Returns the vpath that owns `vector` and the sources bound to it, if it is bound.
    pub fn lookup(&self, vector: usize) -> Option<(usize, MsixSources)> {
        let table = self.table.lock();
        let state = table.vectors.get(vector)?;
        if state.sources.is_empty() {
            None
        } else {
            Some((vector / VPATH_MSIX_MAX, state.sources))
        }
    }

    pub fn is_masked(&self, vector: usize) -> Option<bool> {
        self.table.lock().vectors.get(vector).map(|s| s.masked)
    }

    /// The interrupt mode of vpath `vp_id`: MSI-X once its vectors have been bound.
    pub fn mode(&self, vp_id: usize) -> InterruptMode {
        let table = self.table.lock();
        let bound = vpath_window(vp_id)
            .filter_map(|v| table.vectors.get(v))
            .any(|s| !s.sources.is_empty());
        if bound { InterruptMode::Msix } else { InterruptMode::Line }
    }
}
