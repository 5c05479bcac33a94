//! The detector tree: trigger queue, pluggable state machine, and the
//! top-level node that wraps a readout-cell subtree.

pub mod builder;
pub mod detector;
pub mod dynamic_state_machine;
pub mod error;
pub mod fixed_state_machine;
pub mod state_machine;
pub mod trigger;

pub use builder::DetectorBuilder;
pub use detector::Detector;
pub use dynamic_state_machine::{
    ActionKind, Comparand, Comparison, DynamicStateMachine, ReadKind, Relation, RegisterAccess,
    StateMachineState, Transition, SYNCHRONISATION_STATE,
};
pub use error::{Error, Result};
pub use fixed_state_machine::{FixedState, FixedStateMachine};
pub use state_machine::StateMachine;
pub use trigger::TriggerQueue;
