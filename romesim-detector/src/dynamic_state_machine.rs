use std::collections::HashMap;

use crate::detector::Detector;
use crate::error::Result;
use crate::state_machine::StateMachine;

const EPS: f64 = 1e-9;

/// Comparison relation, grounded on `xmldetector.h::Comparison::Relations`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    Or,
    And,
    Xor,
}

/// What a [`RegisterAccess`] reads to produce a numeric operand.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadKind {
    Counter(String),
    HitsAvailable(String),
}

/// One side of a [`Comparison`]: a literal, a register/counter read, or a
/// nested boolean sub-comparison (used with the `Or`/`And`/`Xor` relations).
#[derive(Debug, Clone)]
pub enum Comparand {
    Literal(f64),
    Read(ReadKind),
    Sub(Box<Comparison>),
}

/// A tree of comparisons evaluated against a detector's counters and hit
/// counts (spec §3, §4.G). Guards are evaluated in declared order by the
/// owning [`Transition`]; the first guard to evaluate `true` fires.
#[derive(Debug, Clone)]
pub struct Comparison {
    pub relation: Relation,
    pub lhs: Comparand,
    pub rhs: Comparand,
}

impl Comparison {
    pub fn new(relation: Relation, lhs: Comparand, rhs: Comparand) -> Self {
        Self { relation, lhs, rhs }
    }

    /// Numeric relations read both sides as `f64`; boolean relations
    /// (`Or`/`And`/`Xor`) require both sides to be `Comparand::Sub` and
    /// recurse. A guard whose operand is unset (the read returns `None`, or
    /// a boolean relation's side isn't a sub-comparison) fails closed —
    /// "fails safe" per spec §4.G.
    pub fn evaluate(&self, counters: &HashMap<String, f64>, detector: &Detector) -> bool {
        match self.relation {
            Relation::Or | Relation::And | Relation::Xor => {
                let (Comparand::Sub(l), Comparand::Sub(r)) = (&self.lhs, &self.rhs) else {
                    return false;
                };
                let l = l.evaluate(counters, detector);
                let r = r.evaluate(counters, detector);
                match self.relation {
                    Relation::Or => l || r,
                    Relation::And => l && r,
                    Relation::Xor => l ^ r,
                    _ => unreachable!(),
                }
            }
            _ => {
                let (Some(l), Some(r)) = (
                    self.lhs.resolve(counters, detector),
                    self.rhs.resolve(counters, detector),
                ) else {
                    return false;
                };
                match self.relation {
                    Relation::Lt => l < r,
                    Relation::Le => l <= r,
                    Relation::Gt => l > r,
                    Relation::Ge => l >= r,
                    Relation::Eq => (l - r).abs() < EPS,
                    Relation::Ne => (l - r).abs() >= EPS,
                    _ => unreachable!(),
                }
            }
        }
    }
}

impl Comparand {
    fn resolve(&self, counters: &HashMap<String, f64>, detector: &Detector) -> Option<f64> {
        match self {
            Comparand::Literal(v) => Some(*v),
            Comparand::Read(ReadKind::Counter(name)) => counters.get(name).copied(),
            Comparand::Read(ReadKind::HitsAvailable(name)) => Some(detector.hits_available(name) as f64),
            Comparand::Sub(cmp) => Some(if cmp.evaluate(counters, detector) { 1.0 } else { 0.0 }),
        }
    }
}

/// What a [`RegisterAccess`] does, dispatched by its textual `what` key in
/// the original (spec §4.G table).
#[derive(Debug, Clone, PartialEq)]
pub enum ActionKind {
    Cout,
    PrintHitsAvailable,
    PrintCounter,
    SetCounter,
    IncrementCounter,
    DecrementCounter,
    LoadPixel,
    LoadCell,
    ReadCell,
}

#[derive(Debug, Clone)]
pub struct RegisterAccess {
    pub what: ActionKind,
    pub parameter: String,
    pub value: f64,
}

impl RegisterAccess {
    pub fn new(what: ActionKind, parameter: impl Into<String>, value: f64) -> Self {
        Self { what, parameter: parameter.into(), value }
    }

    fn execute(&self, counters: &mut HashMap<String, f64>, detector: &mut Detector, t: i64) {
        match self.what {
            ActionKind::Cout => log::info!("{}", self.parameter),
            ActionKind::PrintHitsAvailable => {
                log::info!("hits available ({}): {}", self.parameter, detector.hits_available(&self.parameter));
            }
            ActionKind::PrintCounter => {
                log::info!("counter {}: {}", self.parameter, counters.get(&self.parameter).copied().unwrap_or(0.0));
            }
            ActionKind::SetCounter => {
                counters.insert(self.parameter.clone(), self.value);
            }
            ActionKind::IncrementCounter => {
                *counters.entry(self.parameter.clone()).or_insert(0.0) += self.value;
            }
            ActionKind::DecrementCounter => {
                *counters.entry(self.parameter.clone()).or_insert(0.0) -= self.value;
            }
            ActionKind::LoadPixel => {
                detector.load_pixel(t);
                counters.insert("loadpixel".to_string(), 1.0);
            }
            ActionKind::LoadCell => {
                detector.load_cell(&self.parameter, t);
                counters.insert(format!("loadcell_{}", self.parameter), 1.0);
            }
            ActionKind::ReadCell => {
                let hit = detector.get_hit(t);
                if hit.is_valid() {
                    let address_name = detector.address_name.clone();
                    let mut hit = hit;
                    hit.annotate(address_name, t);
                    detector.save_hit(hit, t);
                }
                *counters.entry("readhits".to_string()).or_insert(0.0) += 1.0;
            }
        }
    }
}

/// A guarded edge out of a [`StateMachineState`] (spec §3 `Transition`).
#[derive(Debug, Clone)]
pub struct Transition {
    pub guard: Comparison,
    pub delay: i64,
    pub actions: Vec<RegisterAccess>,
    pub target: String,
}

impl Transition {
    pub fn new(guard: Comparison, delay: i64, actions: Vec<RegisterAccess>, target: impl Into<String>) -> Self {
        Self { guard, delay, actions, target: target.into() }
    }
}

/// A named node of the data-driven state graph: entry actions run whenever
/// this state is entered, then its transitions are evaluated in declared
/// order every subsequent tick until one fires.
#[derive(Debug, Clone)]
pub struct StateMachineState {
    pub name: String,
    pub entry_actions: Vec<RegisterAccess>,
    pub transitions: Vec<Transition>,
}

impl StateMachineState {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), entry_actions: Vec::new(), transitions: Vec::new() }
    }

    pub fn with_entry_action(mut self, action: RegisterAccess) -> Self {
        self.entry_actions.push(action);
        self
    }

    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }
}

/// Name reserved for the optional state whose entry actions run
/// unconditionally every `clock_down`, independent of the active state
/// (spec §4.G).
pub const SYNCHRONISATION_STATE: &str = "synchronisation";

/// The data-driven state machine: named states, a counter set (seeded with
/// an implicit `delay` counter), and predicate-guarded transitions (spec
/// §3, §4.G), grounded on `xmldetector.h`/`.cpp`.
#[derive(Debug, Clone)]
pub struct DynamicStateMachine {
    states: Vec<StateMachineState>,
    current: usize,
    counters: HashMap<String, f64>,
}

impl DynamicStateMachine {
    pub fn new(states: Vec<StateMachineState>, initial_state: &str, counters: HashMap<String, f64>) -> Self {
        let current = states.iter().position(|s| s.name == initial_state).unwrap_or(0);
        let mut counters = counters;
        counters.entry("delay".to_string()).or_insert(0.0);
        Self { states, current, counters }
    }

    pub fn counter(&self, name: &str) -> Option<f64> {
        self.counters.get(name).copied()
    }

    fn delay_remaining(&self) -> i64 {
        self.counters.get("delay").copied().unwrap_or(0.0) as i64
    }

    fn set_delay(&mut self, delay: i64) {
        self.counters.insert("delay".to_string(), delay as f64);
    }

    fn enter_state(&mut self, index: usize, detector: &mut Detector, t: i64) {
        self.current = index;
        let actions = self.states[index].entry_actions.clone();
        for action in &actions {
            action.execute(&mut self.counters, detector, t);
        }
    }
}

impl StateMachine for DynamicStateMachine {
    fn clock_up(&mut self, detector: &mut Detector, t: i64) -> Result<()> {
        if self.delay_remaining() > 0 {
            self.set_delay(self.delay_remaining() - 1);
            return Ok(());
        }

        let transitions = self.states[self.current].transitions.clone();
        let fired = transitions.iter().find(|tr| tr.guard.evaluate(&self.counters, detector));

        let Some(transition) = fired else {
            log::warn!(
                "{}: no transition fired out of state {:?}; guards = {:?}",
                detector.address_name,
                self.states[self.current].name,
                transitions.iter().map(|tr| tr.guard.relation).collect::<Vec<_>>(),
            );
            return Ok(());
        };

        for action in &transition.actions {
            action.execute(&mut self.counters, detector, t);
        }
        self.set_delay(transition.delay);

        let target = self
            .states
            .iter()
            .position(|s| s.name == transition.target)
            .ok_or_else(|| crate::error::Error::UnknownState(transition.target.clone()))?;
        self.enter_state(target, detector, t);
        Ok(())
    }

    fn clock_down(&mut self, detector: &mut Detector, t: i64) {
        if let Some(index) = self.states.iter().position(|s| s.name == SYNCHRONISATION_STATE) {
            let actions = self.states[index].entry_actions.clone();
            for action in &actions {
                action.execute(&mut self.counters, detector, t);
            }
        }
        detector.load_pixel(t);
    }

    fn current_state_name(&self) -> &str {
        &self.states[self.current].name
    }

    fn num_states(&self) -> usize {
        self.states.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use romesim_core::{Pixel, Vec3};
    use romesim_readout::{BufferPolicy, ChildReadPolicy, PixelReadPolicy, ReadoutCell};

    fn empty_detector() -> Detector {
        let col = ReadoutCell::new_with_pixels(
            "Column",
            0,
            BufferPolicy::fifo(2),
            PixelReadPolicy::pptb_or(0),
            vec![Pixel::new("Pixel", 1, Vec3::ZERO, Vec3::new(1.0, 1.0, 1.0)).with_threshold(1.0)],
        );
        let root =
            ReadoutCell::new_with_cells("CU", 0, BufferPolicy::fifo(2), ChildReadPolicy::no_full_read(), vec![col]);
        Detector::new("det", 0, root, 4, 0, Box::new(DynamicStateMachine::new(Vec::new(), "idle", HashMap::new())))
    }

    #[test]
    fn first_true_guard_wins_and_fires_actions() {
        let mut counters = HashMap::new();
        counters.insert("x".to_string(), 0.0);
        let states = vec![
            StateMachineState::new("idle").with_transition(Transition::new(
                Comparison::new(Relation::Ge, Comparand::Read(ReadKind::Counter("x".into())), Comparand::Literal(0.0)),
                0,
                vec![RegisterAccess::new(ActionKind::IncrementCounter, "x", 1.0)],
                "running",
            )),
            StateMachineState::new("running"),
        ];
        let mut sm = DynamicStateMachine::new(states, "idle", counters);
        let mut det = empty_detector();
        sm.clock_up(&mut det, 0).unwrap();
        assert_eq!(sm.current_state_name(), "running");
        assert_eq!(sm.counter("x"), Some(1.0));
    }

    #[test]
    fn unset_counter_fails_safe_and_no_transition_fires() {
        let states = vec![StateMachineState::new("idle").with_transition(Transition::new(
            Comparison::new(Relation::Gt, Comparand::Read(ReadKind::Counter("missing".into())), Comparand::Literal(0.0)),
            0,
            vec![],
            "running",
        ))];
        let mut sm = DynamicStateMachine::new(states, "idle", HashMap::new());
        let mut det = empty_detector();
        sm.clock_up(&mut det, 0).unwrap();
        assert_eq!(sm.current_state_name(), "idle");
    }

    #[test]
    fn delay_gates_the_transition() {
        let states = vec![
            StateMachineState::new("idle").with_transition(Transition::new(
                Comparison::new(Relation::Eq, Comparand::Literal(1.0), Comparand::Literal(1.0)),
                2,
                vec![],
                "running",
            )),
            StateMachineState::new("running"),
        ];
        let mut sm = DynamicStateMachine::new(states, "idle", HashMap::new());
        let mut det = empty_detector();
        sm.clock_up(&mut det, 0).unwrap();
        assert_eq!(sm.current_state_name(), "running");
        assert_eq!(sm.counter("delay"), Some(2.0));
    }

    #[test]
    fn synchronisation_state_runs_every_clock_down() {
        let states = vec![
            StateMachineState::new("idle"),
            StateMachineState::new(SYNCHRONISATION_STATE)
                .with_entry_action(RegisterAccess::new(ActionKind::IncrementCounter, "syncs", 1.0)),
        ];
        let mut sm = DynamicStateMachine::new(states, "idle", HashMap::new());
        let mut det = empty_detector();
        sm.clock_down(&mut det, 0);
        sm.clock_down(&mut det, 1);
        assert_eq!(sm.counter("syncs"), Some(2.0));
    }
}
