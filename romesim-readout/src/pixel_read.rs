use romesim_core::{Hit, LostKind};

use crate::cell::{Children, ReadoutCell};

/// How a cell harvests hits from its leaf pixels into its own buffer.
#[derive(Debug, Clone)]
pub enum PixelReadPolicy {
    /// OR-group: the first pixel to fire schedules a sample time
    /// `sample_delay` ticks later; every pixel valid at that instant is
    /// OR-merged into one group hit.
    PptbOr { sample_delay: i64 },
    /// As `PptbOr`, but only forwards on the rising edge of the group OR —
    /// no hit is emitted if some pixel in the group was already hot.
    /// `group_was_busy` is the persisted edge-detect state: whether any
    /// pixel in the group was still busy as of the last time this policy
    /// ran, so a round that merely joins an already-hot group can be told
    /// apart from a genuine empty-to-hot transition.
    PptbOrBeforeEdge { sample_delay: i64, group_was_busy: bool },
    /// General boolean combinator over named pixels and sub-logics.
    Complex(PixelLogic),
}

impl PixelReadPolicy {
    pub fn pptb_or(sample_delay: i64) -> Self {
        PixelReadPolicy::PptbOr { sample_delay }
    }
    pub fn pptb_or_before_edge(sample_delay: i64) -> Self {
        PixelReadPolicy::PptbOrBeforeEdge { sample_delay, group_was_busy: false }
    }
    pub fn complex(logic: PixelLogic) -> Self {
        PixelReadPolicy::Complex(logic)
    }

    pub fn read(&mut self, cell: &mut ReadoutCell, t: i64, lost_sink: &mut Vec<Hit>) {
        match self {
            PixelReadPolicy::PptbOr { sample_delay } => read_pptb_or(cell, *sample_delay, t, lost_sink),
            PixelReadPolicy::PptbOrBeforeEdge { sample_delay, group_was_busy } => {
                read_pptb_or_before_edge(cell, *sample_delay, group_was_busy, t, lost_sink)
            }
            PixelReadPolicy::Complex(logic) => logic.read_hit(cell, t, lost_sink),
        }
    }
}

fn earliest_hit_time(cell: &ReadoutCell) -> Option<i64> {
    let Children::Pixels(pixels) = &cell.children else { return None };
    pixels.iter().map(|p| p.current_hit()).filter(|h| h.is_valid()).map(|h| h.timestamp).min()
}

fn read_pptb_or(cell: &mut ReadoutCell, sample_delay: i64, t: i64, lost_sink: &mut Vec<Hit>) {
    loop {
        let Some(earliest) = earliest_hit_time(cell) else { break };
        let sample_time = earliest + sample_delay;
        if sample_time > t {
            break;
        }

        let Children::Pixels(pixels) = &mut cell.children else { break };
        let had_multiple = pixels.len() > 1;

        // Step 1: pixels whose dead-time ends before the sample instant
        // lose their hit to sample-delay, but keep a zero-charge
        // placeholder so the slot's occupancy is preserved.
        for pixel in pixels.iter_mut() {
            if pixel.current_hit().is_valid() && pixel.current_hit().dead_time_end < sample_time {
                if let Some(mut lost) = pixel.drain() {
                    let placeholder_address = lost.address.clone();
                    let event_index = lost.event_index;
                    let dead_time_end = lost.dead_time_end;
                    lost.annotate_loss(LostKind::SampleDelayLoss, sample_time);
                    lost_sink.push(lost);
                    let mut placeholder = Hit::new(event_index, sample_time, dead_time_end, 0.0);
                    placeholder.address = placeholder_address;
                    pixel.create_hit(placeholder);
                }
            }
        }

        // Steps 2 & 3: merge every pixel valid or still-busy at sample_time.
        let mut group: Option<Hit> = None;
        for pixel in pixels.iter_mut() {
            let busy_before = !pixel.is_empty(sample_time);
            let hit = pixel.load_hit(sample_time, &mut Vec::new());
            if hit.is_valid() {
                merge_into_group(&mut group, &hit);
                if had_multiple {
                    let mut component = hit;
                    component.annotate_loss(LostKind::Merged, sample_time);
                    lost_sink.push(component);
                }
            } else if busy_before {
                let busy_hit = pixel.current_hit().clone();
                if busy_hit.is_valid() {
                    merge_into_group(&mut group, &busy_hit);
                    let mut component = busy_hit;
                    component.annotate_loss(LostKind::Remerged, sample_time);
                    lost_sink.push(component);
                }
            }
        }

        if let Some(mut group_hit) = group {
            group_hit.annotate(cell.address_name.clone(), sample_time);
            if let Err(mut rejected) = cell.buffer.insert(&cell.address_name, group_hit) {
                rejected.annotate_loss(LostKind::BufferFull, sample_time);
                lost_sink.push(rejected);
            }
        }
    }
}

fn read_pptb_or_before_edge(
    cell: &mut ReadoutCell,
    sample_delay: i64,
    group_was_busy: &mut bool,
    t: i64,
    lost_sink: &mut Vec<Hit>,
) {
    // Not a rising edge if the group was already busy the last time this
    // policy ran (driven once per tick, like the rest of the clock-down
    // phase): this call's hit is joining an already-hot group rather than
    // transitioning the OR from empty to hot.
    let was_busy_before = *group_was_busy;

    loop {
        let Some(earliest) = earliest_hit_time(cell) else { break };
        let sample_time = earliest + sample_delay;
        if sample_time > t {
            break;
        }

        let Children::Pixels(pixels) = &mut cell.children else { break };

        let group_dead_time_end = pixels.iter().map(|p| p.current_hit().dead_time_end).max().unwrap_or(i64::MIN);
        let already_high = was_busy_before;

        for pixel in pixels.iter_mut() {
            let hit_dead_time_end = pixel.current_hit().dead_time_end;
            if pixel.current_hit().is_valid() && hit_dead_time_end < sample_time {
                if let Some(mut lost) = pixel.drain() {
                    let kind = if hit_dead_time_end < group_dead_time_end {
                        LostKind::GroupDeadShort
                    } else {
                        LostKind::SampleDelayLoss
                    };
                    let placeholder_address = lost.address.clone();
                    let event_index = lost.event_index;
                    lost.annotate_loss(kind, sample_time);
                    lost_sink.push(lost);
                    let mut placeholder = Hit::new(event_index, sample_time, hit_dead_time_end, 0.0);
                    placeholder.address = placeholder_address;
                    pixel.create_hit(placeholder);
                }
            }
        }

        let mut group: Option<Hit> = None;
        for pixel in pixels.iter_mut() {
            let hit = pixel.load_hit(sample_time, &mut Vec::new());
            if !hit.is_valid() {
                continue;
            }
            if already_high {
                let mut dropped = hit;
                dropped.annotate_loss(LostKind::GroupDead, sample_time);
                lost_sink.push(dropped);
            } else {
                merge_into_group(&mut group, &hit);
            }
        }

        if let Some(mut group_hit) = group {
            group_hit.annotate(cell.address_name.clone(), sample_time);
            if let Err(mut rejected) = cell.buffer.insert(&cell.address_name, group_hit) {
                rejected.annotate_loss(LostKind::BufferFull, sample_time);
                lost_sink.push(rejected);
            }
        }
    }

    if let Children::Pixels(pixels) = &cell.children {
        *group_was_busy = pixels.iter().any(|p| !p.is_empty(t));
    }
}

fn merge_into_group(group: &mut Option<Hit>, hit: &Hit) {
    match group {
        None => *group = Some(hit.clone()),
        Some(g) => {
            for (name, value) in hit.address.iter() {
                let merged = g.address.get(name).unwrap_or(0) | value;
                g.address.set(name, merged);
            }
            g.charge += hit.charge;
        }
    }
}

/// Boolean combinator evaluated over named pixels (and, recursively, other
/// `PixelLogic` sub-expressions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    Or,
    And,
    Xor,
    Nor,
    Nand,
    Xnor,
    Not,
}

/// A declared pixel name, flagged whether it contributes its address to the
/// result ("own") or is only a guard condition.
#[derive(Debug, Clone)]
pub struct PixelTerm {
    pub pixel_name: String,
    pub own: bool,
}

#[derive(Debug, Clone)]
pub enum EdgeMode {
    None,
    AgainstLastTick,
    SinceLastEvaluation,
}

#[derive(Debug, Clone)]
pub struct PixelLogic {
    pub op: LogicOp,
    pub terms: Vec<PixelTerm>,
    pub sublogics: Vec<PixelLogic>,
    pub edge_mode: EdgeMode,
    last_evaluation: Option<bool>,
}

impl PixelLogic {
    pub fn new(op: LogicOp) -> Self {
        Self { op, terms: Vec::new(), sublogics: Vec::new(), edge_mode: EdgeMode::None, last_evaluation: None }
    }

    pub fn with_term(mut self, pixel_name: impl Into<String>, own: bool) -> Self {
        self.terms.push(PixelTerm { pixel_name: pixel_name.into(), own });
        self
    }

    pub fn with_sublogic(mut self, logic: PixelLogic) -> Self {
        self.sublogics.push(logic);
        self
    }

    pub fn with_edge_mode(mut self, mode: EdgeMode) -> Self {
        self.edge_mode = mode;
        self
    }

    fn raw_value(&self, cell: &ReadoutCell, t: i64) -> bool {
        let Children::Pixels(pixels) = &cell.children else { return false };
        let term_values = self.terms.iter().map(|term| {
            pixels
                .iter()
                .find(|p| p.address_name == term.pixel_name)
                .map(|p| !p.is_empty(t))
                .unwrap_or(false)
        });
        let sub_values = self.sublogics.iter().map(|s| s.evaluate(cell, t));
        combine(self.op, term_values.chain(sub_values))
    }

    /// Evaluates the boolean combination at tick `t`, applying the
    /// configured edge mode.
    pub fn evaluate(&self, cell: &ReadoutCell, t: i64) -> bool {
        let raw = self.raw_value(cell, t);
        match self.edge_mode {
            EdgeMode::None => raw,
            EdgeMode::AgainstLastTick | EdgeMode::SinceLastEvaluation => {
                raw && !self.last_evaluation.unwrap_or(false)
            }
        }
    }

    /// Consumes matching "own" pixels into one assembled hit, draining
    /// "not own" guard pixels without contributing to the address.
    pub fn read_hit(&mut self, cell: &mut ReadoutCell, t: i64, lost_sink: &mut Vec<Hit>) {
        let fires = self.evaluate(cell, t);
        self.last_evaluation = Some(self.raw_value(cell, t));
        for sub in self.sublogics.iter_mut() {
            sub.last_evaluation = Some(sub.raw_value(cell, t));
        }
        if !fires {
            return;
        }

        let address_name = cell.address_name.clone();
        let Children::Pixels(pixels) = &mut cell.children else { return };
        let mut group: Option<Hit> = None;
        for term in &self.terms {
            let Some(pixel) = pixels.iter_mut().find(|p| p.address_name == term.pixel_name) else { continue };
            let hit = pixel.load_hit(t, &mut Vec::new());
            if !hit.is_valid() {
                continue;
            }
            if term.own {
                merge_into_group(&mut group, &hit);
            } else {
                let mut reference = hit;
                reference.annotate_loss(LostKind::ReferencePixelHitDetected, t);
                lost_sink.push(reference);
            }
        }
        if let Some(mut group_hit) = group {
            group_hit.annotate(address_name.clone(), t);
            if let Err(mut rejected) = cell.buffer.insert(&address_name, group_hit) {
                rejected.annotate_loss(LostKind::BufferFull, t);
                lost_sink.push(rejected);
            }
        }
    }
}

fn combine(op: LogicOp, mut values: impl Iterator<Item = bool>) -> bool {
    match op {
        LogicOp::Or => values.any(|v| v),
        LogicOp::And => values.all(|v| v),
        LogicOp::Nor => !values.any(|v| v),
        LogicOp::Nand => !values.all(|v| v),
        LogicOp::Not => !values.next().unwrap_or(false),
        LogicOp::Xor => values.fold(false, |acc, v| acc ^ v),
        LogicOp::Xnor => !values.fold(false, |acc, v| acc ^ v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPolicy;
    use crate::cell::ReadoutCell;
    use romesim_core::{Pixel, Vec3};

    fn pixel(name: &str, addr: i64) -> Pixel {
        Pixel::new(name, addr, Vec3::ZERO, Vec3::new(1.0, 1.0, 1.0)).with_threshold(1.0)
    }

    fn hit_for(event: i64, t: i64, dead_time_end: i64, pixel_name: &str, addr: i64) -> Hit {
        let mut h = Hit::new(event, t, dead_time_end, 5.0);
        h.address.push(pixel_name, addr);
        h
    }

    #[test]
    fn pptb_or_groups_two_pixels() {
        let mut cell = ReadoutCell::new_with_pixels(
            "col",
            0,
            BufferPolicy::fifo(2),
            PixelReadPolicy::pptb_or(0),
            vec![pixel("pix", 1), pixel("pix", 2)],
        );
        let mut lost = Vec::new();
        cell.place_hit(hit_for(0, 3, 7, "pix", 1), 3, &mut lost);
        cell.load_pixel(3, &mut lost);
        let out = cell.get_hit(4, true);
        assert!(out.is_valid());
        assert_eq!(out.address.get("pix"), Some(1));
    }

    #[test]
    fn dead_time_rejects_second_hit_same_pixel() {
        let mut cell = ReadoutCell::new_with_pixels(
            "col",
            0,
            BufferPolicy::fifo(2),
            PixelReadPolicy::pptb_or(0),
            vec![pixel("pix", 1)],
        );
        let mut lost = Vec::new();
        assert!(cell.place_hit(hit_for(0, 3, 6, "pix", 1), 3, &mut lost));
        assert!(!cell.place_hit(hit_for(1, 4, 7, "pix", 1), 4, &mut lost));
        assert_eq!(lost.len(), 1);
    }

    #[test]
    fn pptb_or_before_edge_forwards_a_fresh_group() {
        let mut cell = ReadoutCell::new_with_pixels(
            "col",
            0,
            BufferPolicy::fifo(2),
            PixelReadPolicy::pptb_or_before_edge(0),
            vec![pixel("pix", 1)],
        );
        let mut lost = Vec::new();
        cell.place_hit(hit_for(0, 3, 7, "pix", 1), 3, &mut lost);
        cell.load_pixel(3, &mut lost);
        let out = cell.get_hit(4, true);
        assert!(out.is_valid());
        assert!(!lost.iter().any(|h| h.find_readout_time("GroupDead").is_some()));
    }

    #[test]
    fn pptb_or_before_edge_drops_a_hit_joining_an_already_busy_group() {
        // Seed the edge-detect state as though the group was already hot as
        // of the last time this policy ran, the way it would be left after a
        // call whose due group stayed resident past its own judgment.
        let mut cell = ReadoutCell::new_with_pixels(
            "col",
            0,
            BufferPolicy::fifo(2),
            PixelReadPolicy::PptbOrBeforeEdge { sample_delay: 0, group_was_busy: true },
            vec![pixel("pix", 1)],
        );
        let mut lost = Vec::new();
        cell.place_hit(hit_for(0, 3, 7, "pix", 1), 3, &mut lost);
        cell.load_pixel(3, &mut lost);
        assert!(lost.iter().any(|h| h.find_readout_time("GroupDead").is_some()));
        let out = cell.get_hit(4, true);
        assert!(!out.is_valid(), "a GroupDead hit must not also reach the buffer");
    }

    #[test]
    fn pixel_logic_or_merges_own_terms() {
        let logic = PixelLogic::new(LogicOp::Or).with_term("pix", true).with_term("ref", false);
        let mut cell = ReadoutCell::new_with_pixels(
            "col",
            0,
            BufferPolicy::fifo(2),
            PixelReadPolicy::complex(logic),
            vec![pixel("pix", 1), pixel("ref", 2)],
        );
        let mut lost = Vec::new();
        cell.place_hit(hit_for(0, 3, 7, "pix", 1), 3, &mut lost);
        cell.load_pixel(3, &mut lost);
        let out = cell.get_hit(4, true);
        assert!(out.is_valid());
    }
}
