use crate::detector::Detector;
use crate::error::Result;

/// Common interface shared by the fixed four-state controller and the
/// data-driven graph machine (spec Design Note: "keep both as concrete
/// implementations of a common detector interface").
///
/// Implementations are owned by value inside the [`Detector`] they drive and
/// are handed a `&mut Detector` at call time rather than holding a
/// back-pointer to it, exactly like the buffer/child-read/pixel-read
/// strategy objects in `romesim-readout`.
pub trait StateMachine: std::fmt::Debug {
    /// Synchronous phase: evaluate guards, run actions, possibly transition.
    fn clock_up(&mut self, detector: &mut Detector, t: i64) -> Result<()>;

    /// Synchronisation phase: load pixels into cells and commit any pending
    /// state transition.
    fn clock_down(&mut self, detector: &mut Detector, t: i64);

    fn current_state_name(&self) -> &str;

    fn num_states(&self) -> usize;
}
