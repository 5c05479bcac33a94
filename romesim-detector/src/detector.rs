use romesim_core::Hit;
use romesim_readout::ReadoutCell;

use crate::error::{Error, Result};
use crate::state_machine::StateMachine;
use crate::trigger::TriggerQueue;

/// Top-level node wrapping a readout-cell subtree (spec §4.E).
///
/// Owns the root of its readout hierarchy, the in-memory accepted/lost hit
/// logs (append-only within a run; flushing them to a text file is
/// `romesim-io`'s job, not this crate's — `romesim-detector` never touches
/// `std::fs`, matching the teacher's layering where only the I/O crate
/// does), the bounded trigger-timestamp queue, and the pluggable state
/// machine that drives the tree's clock edges.
#[derive(Debug)]
pub struct Detector {
    pub address_name: String,
    pub address: i64,
    root: ReadoutCell,
    state_machine: Option<Box<dyn StateMachine>>,
    triggers: TriggerQueue,
    accepted_log: Vec<Hit>,
    lost_log: Vec<Hit>,
}

impl Detector {
    pub fn new(
        address_name: impl Into<String>,
        address: i64,
        root: ReadoutCell,
        trigger_capacity: usize,
        trigger_mask: i64,
        state_machine: Box<dyn StateMachine>,
    ) -> Self {
        Self {
            address_name: address_name.into(),
            address,
            root,
            state_machine: Some(state_machine),
            triggers: TriggerQueue::new(trigger_capacity, trigger_mask),
            accepted_log: Vec::new(),
            lost_log: Vec::new(),
        }
    }

    pub fn root(&self) -> &ReadoutCell {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut ReadoutCell {
        &mut self.root
    }

    pub fn current_state_name(&self) -> &str {
        self.state_machine.as_ref().expect("state machine always present").current_state_name()
    }

    /// Routes `h` down the tree, matching its address map level by level.
    /// Any rejection is logged to the lost-hit sink by `ReadoutCell::place_hit`.
    pub fn place_hit(&mut self, h: Hit, t: i64) -> bool {
        self.root.place_hit(h, t, &mut self.lost_log)
    }

    pub fn add_trigger(&mut self, t: i64) {
        self.triggers.add_trigger(t);
    }

    pub fn presented_trigger(&self) -> Option<i64> {
        self.triggers.presented()
    }

    pub fn trigger_queue_len(&self) -> usize {
        self.triggers.len()
    }

    pub fn trigger_queue_capacity(&self) -> usize {
        self.triggers.capacity()
    }

    /// Recurses `load_cell(name, t)` over the tree, running the matching
    /// cell's child-read policy with the currently presented trigger.
    pub fn load_cell(&mut self, name: &str, t: i64) {
        let presented = self.triggers.presented();
        self.root.load_cell(name, t, presented, &mut self.lost_log);
    }

    /// Recurses `load_pixel(t)` over the tree, running each leaf cell's
    /// pixel-read policy.
    pub fn load_pixel(&mut self, t: i64) {
        self.root.load_pixel(t, &mut self.lost_log);
    }

    /// A direct (non-recursive-policy) read of the root cell's own buffer.
    pub fn get_hit(&mut self, t: i64) -> Hit {
        self.root.get_hit(t, true)
    }

    /// Recurses to every cell addressed `name` and drains its own buffer's
    /// available hit directly, collecting results.
    pub fn drain_named(&mut self, name: &str, t: i64) -> Vec<Hit> {
        let mut out = Vec::new();
        self.root.drain_named(name, t, &mut out);
        out
    }

    pub fn hits_available(&self, name: &str) -> usize {
        self.root.hits_available(name)
    }

    /// Stamps `h` with this detector's own address readout time at `t` and
    /// appends it to the accepted-hit log.
    pub fn save_hit(&mut self, mut h: Hit, t: i64) {
        h.annotate(self.address_name.clone(), t);
        self.accepted_log.push(h);
    }

    pub fn accepted_log(&self) -> &[Hit] {
        &self.accepted_log
    }

    pub fn lost_log(&self) -> &[Hit] {
        &self.lost_log
    }

    /// Drains the in-memory accepted log, handing ownership to the caller
    /// (e.g. `romesim-io`'s writer). Idempotent: a second call returns
    /// nothing new.
    pub fn take_accepted(&mut self) -> Vec<Hit> {
        std::mem::take(&mut self.accepted_log)
    }

    pub fn take_lost(&mut self) -> Vec<Hit> {
        std::mem::take(&mut self.lost_log)
    }

    /// Synchronous phase of the clock: dispatches to the active state
    /// machine. The state machine is taken out of its slot for the
    /// duration of the call so it can borrow the rest of the detector
    /// mutably without aliasing itself (same pattern as the readout
    /// strategy objects).
    pub fn clock_up(&mut self, t: i64) -> Result<()> {
        let mut sm = self.state_machine.take().ok_or(Error::UnknownState(String::new()))?;
        let result = sm.clock_up(self, t);
        self.state_machine = Some(sm);
        result
    }

    /// Synchronisation phase: commits any pending state transition, then
    /// (if `trigger_high` is false) evicts every triggered sub-cell's
    /// pending hits as `noTrigger` and advances the presented trigger.
    pub fn clock_down(&mut self, t: i64, trigger_high: bool) {
        let mut sm = self.state_machine.take().expect("state machine always present");
        sm.clock_down(self, t);
        self.state_machine = Some(sm);

        if !trigger_high {
            self.root.no_trigger_remove_triggered(t, &mut self.lost_log);
        }
        self.triggers.remove_trigger_front(t);
    }

    /// End-of-run drain: everything still resident anywhere in the subtree
    /// is annotated `SimulationEnd` and moved to the lost log. Idempotent.
    pub fn remove_and_save_all(&mut self, t: i64) {
        self.root.remove_and_save_all(t, &mut self.lost_log);
    }
}
