//! Platform-level interrupt controller: routes external device IRQs to
//! hart contexts by priority/threshold/enable, with claim/complete.
//!
//! No equivalent exists elsewhere in this workspace's reference code (it is
//! M-mode-only with a single external-interrupt flag,
//! `riscvemu/src/hart/m_mode.rs`'s `meip`/`meie`); grounded in
//! `original_source/include/device/plic.h` / `src/device/plic.cc` for the
//! register layout and claim/complete semantics, expressed as a single
//! `Mutex`-guarded state struct, matching the lock-per-shared-resource
//! policy `riscvemu/src/hart/memory.rs` already uses for its UART FIFOs.

use std::sync::Mutex;

use crate::bus::{BusError, Device};

const PRIORITY_BASE: u64 = 0x0;
const PENDING_BASE: u64 = 0x1000;
const ENABLE_BASE: u64 = 0x2000;
const ENABLE_STRIDE: u64 = 0x80;
const CONTEXT_BASE: u64 = 0x20_0000;
const CONTEXT_STRIDE: u64 = 0x1000;
const CONTEXT_THRESHOLD_OFFSET: u64 = 0;
const CONTEXT_CLAIM_OFFSET: u64 = 4;

struct ContextState {
    threshold: u32,
    /// Bit `src` set means source `src` is enabled for this context.
    enable: Vec<bool>,
    /// Bit `src` set means source `src` is currently claimed (being
    /// serviced) by this context and is excluded from selection.
    claimed: Vec<bool>,
    last_claim: u32,
}

impl ContextState {
    fn new(num_sources: usize) -> Self {
        Self {
            threshold: 0,
            enable: vec![false; num_sources + 1],
            claimed: vec![false; num_sources + 1],
            last_claim: 0,
        }
    }
}

struct PlicState {
    priority: Vec<u32>,
    pending: Vec<bool>,
    contexts: Vec<ContextState>,
}

impl PlicState {
    /// Among sources whose pending bit is set, enable bit is set, claimed
    /// bit is clear, and priority >= the context's threshold, choose the
    /// source with the greatest priority, breaking ties by lowest id.
    /// Returns 0 if no source qualifies.
    fn best_pending(&self, ctx: usize) -> u32 {
        let context = &self.contexts[ctx];
        let mut best: Option<(u32, usize)> = None;
        for src in 1..self.priority.len() {
            let priority = self.priority[src];
            if priority == 0 || priority < context.threshold {
                continue;
            }
            if !self.pending[src] || !context.enable[src] || context.claimed[src] {
                continue;
            }
            match best {
                Some((best_priority, _)) if priority <= best_priority => {}
                _ => best = Some((priority, src)),
            }
        }
        best.map(|(_, src)| src as u32).unwrap_or(0)
    }
}

pub struct Plic {
    state: Mutex<PlicState>,
}

impl Plic {
    pub fn new(num_sources: usize, num_contexts: usize) -> Self {
        Self {
            state: Mutex::new(PlicState {
                priority: vec![0; num_sources + 1],
                pending: vec![false; num_sources + 1],
                contexts: (0..num_contexts)
                    .map(|_| ContextState::new(num_sources))
                    .collect(),
            }),
        }
    }

    /// Set or clear the pending bit for an external source line.
    pub fn update_ext(&self, src: usize, level: bool) {
        let mut state = self.state.lock().unwrap();
        if src < state.pending.len() {
            state.pending[src] = level;
        }
    }

    /// Run best-pending selection for `ctx`, record it as that context's
    /// claim, and return whether it is non-zero.
    pub fn get_interrupt(&self, ctx: usize) -> bool {
        let mut state = self.state.lock().unwrap();
        let claim = state.best_pending(ctx);
        state.contexts[ctx].last_claim = claim;
        claim != 0
    }
}

impl Device for Plic {
    fn load(&self, offset: u64, width: u8) -> Result<u64, BusError> {
        if width != 4 {
            return Err(BusError::CrossesDeviceBoundary { addr: offset, width });
        }
        let mut state = self.state.lock().unwrap();
        if offset < PENDING_BASE {
            let src = (offset / 4) as usize;
            return Ok(*state.priority.get(src).ok_or(BusError::Unmapped(offset))? as u64);
        }
        if (PENDING_BASE..ENABLE_BASE).contains(&offset) {
            let word = ((offset - PENDING_BASE) / 4) as usize;
            let mut value = 0u32;
            for bit in 0..32 {
                let src = word * 32 + bit;
                if state.pending.get(src).copied().unwrap_or(false) {
                    value |= 1 << bit;
                }
            }
            return Ok(value as u64);
        }
        if (ENABLE_BASE..CONTEXT_BASE).contains(&offset) {
            let ctx = ((offset - ENABLE_BASE) / ENABLE_STRIDE) as usize;
            let word = (((offset - ENABLE_BASE) % ENABLE_STRIDE) / 4) as usize;
            let context = state.contexts.get(ctx).ok_or(BusError::Unmapped(offset))?;
            let mut value = 0u32;
            for bit in 0..32 {
                let src = word * 32 + bit;
                if context.enable.get(src).copied().unwrap_or(false) {
                    value |= 1 << bit;
                }
            }
            return Ok(value as u64);
        }
        if offset >= CONTEXT_BASE {
            let ctx = ((offset - CONTEXT_BASE) / CONTEXT_STRIDE) as usize;
            let reg_offset = (offset - CONTEXT_BASE) % CONTEXT_STRIDE;
            if ctx >= state.contexts.len() {
                return Err(BusError::Unmapped(offset));
            }
            return match reg_offset {
                CONTEXT_THRESHOLD_OFFSET => Ok(state.contexts[ctx].threshold as u64),
                // Claim-on-read is destructive: it atomically returns the
                // latched claim (from the last `get_interrupt`) and marks
                // that source claimed, excluding it from selection until
                // the matching complete-write.
                CONTEXT_CLAIM_OFFSET => Ok(self.claim_and_mark(&mut state, ctx) as u64),
                _ => Err(BusError::Unmapped(offset)),
            };
        }
        Err(BusError::Unmapped(offset))
    }

    fn store(&self, offset: u64, width: u8, value: u64) -> Result<(), BusError> {
        if width != 4 {
            return Err(BusError::CrossesDeviceBoundary { addr: offset, width });
        }
        let mut state = self.state.lock().unwrap();
        if offset < PENDING_BASE {
            let src = (offset / 4) as usize;
            if let Some(slot) = state.priority.get_mut(src) {
                *slot = value as u32;
                return Ok(());
            }
            return Err(BusError::Unmapped(offset));
        }
        if (PENDING_BASE..ENABLE_BASE).contains(&offset) {
            // Pending bits are set only via update_ext; register is
            // read-only from the bus's point of view.
            return Ok(());
        }
        if (ENABLE_BASE..CONTEXT_BASE).contains(&offset) {
            let ctx = ((offset - ENABLE_BASE) / ENABLE_STRIDE) as usize;
            let word = (((offset - ENABLE_BASE) % ENABLE_STRIDE) / 4) as usize;
            let num_sources = state.priority.len();
            let context = state.contexts.get_mut(ctx).ok_or(BusError::Unmapped(offset))?;
            for bit in 0..32 {
                let src = word * 32 + bit;
                if src < num_sources {
                    context.enable[src] = value & (1 << bit) != 0;
                }
            }
            return Ok(());
        }
        if offset >= CONTEXT_BASE {
            let ctx = ((offset - CONTEXT_BASE) / CONTEXT_STRIDE) as usize;
            let reg_offset = (offset - CONTEXT_BASE) % CONTEXT_STRIDE;
            return self.store_context_register(&mut state, ctx, reg_offset, value, offset);
        }
        Err(BusError::Unmapped(offset))
    }

    fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.priority.iter_mut().for_each(|p| *p = 0);
        state.pending.iter_mut().for_each(|p| *p = false);
        for context in &mut state.contexts {
            context.threshold = 0;
            context.enable.iter_mut().for_each(|e| *e = false);
            context.claimed.iter_mut().for_each(|c| *c = false);
            context.last_claim = 0;
        }
    }
}

impl Plic {
    /// Claim-on-read is destructive (it marks the claimed source's bit),
    /// so it needs `&mut PlicState`; called from `Device::load` via a
    /// second, mutable lookup to keep the read-only cases above simple.
    fn claim_and_mark(&self, state: &mut PlicState, ctx: usize) -> u32 {
        let claim = state.contexts[ctx].last_claim;
        if claim != 0 {
            state.contexts[ctx].claimed[claim as usize] = true;
        }
        claim
    }

    fn store_context_register(
        &self,
        state: &mut PlicState,
        ctx: usize,
        reg_offset: u64,
        value: u64,
        addr: u64,
    ) -> Result<(), BusError> {
        if ctx >= state.contexts.len() {
            return Err(BusError::Unmapped(addr));
        }
        match reg_offset {
            CONTEXT_THRESHOLD_OFFSET => {
                state.contexts[ctx].threshold = value as u32;
                Ok(())
            }
            CONTEXT_CLAIM_OFFSET => {
                let src = value as usize;
                if src == 0 || src >= state.contexts[ctx].claimed.len() {
                    return Err(BusError::Unmapped(addr));
                }
                state.contexts[ctx].claimed[src] = false;
                Ok(())
            }
            _ => Err(BusError::Unmapped(addr)),
        }
    }
}
