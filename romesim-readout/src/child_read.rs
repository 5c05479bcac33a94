use romesim_core::{Hit, LostKind};

use crate::cell::{Children, ReadoutCell};

/// How a cell harvests hits from its child cells into its own buffer.
///
/// Each variant is owned by value inside the [`ReadoutCell`] it governs
/// (see the crate-level design note); `read` is called with the cell taken
/// out of its own `child_read` slot so it can borrow the rest of the cell
/// mutably without aliasing itself.
#[derive(Debug, Clone)]
pub enum ChildReadPolicy {
    NoFullRead,
    NoOverwrite,
    Overwrite,
    OneByOne,
    Token { current_index: usize },
    /// `mask` is OR-ed into both the presented trigger and each candidate
    /// hit's tagged trigger time before comparing them.
    Sorted { mask: i64 },
    Merging { merge_field: String },
}

impl ChildReadPolicy {
    pub fn no_full_read() -> Self {
        ChildReadPolicy::NoFullRead
    }
    pub fn no_overwrite() -> Self {
        ChildReadPolicy::NoOverwrite
    }
    pub fn overwrite() -> Self {
        ChildReadPolicy::Overwrite
    }
    pub fn one_by_one() -> Self {
        ChildReadPolicy::OneByOne
    }
    pub fn token() -> Self {
        ChildReadPolicy::Token { current_index: 0 }
    }
    pub fn sorted(mask: i64) -> Self {
        ChildReadPolicy::Sorted { mask }
    }
    pub fn merging(merge_field: impl Into<String>) -> Self {
        ChildReadPolicy::Merging { merge_field: merge_field.into() }
    }

    pub fn read(
        &mut self,
        cell: &mut ReadoutCell,
        t: i64,
        presented_trigger: Option<i64>,
        lost_sink: &mut Vec<Hit>,
    ) {
        match self {
            ChildReadPolicy::NoFullRead => read_no_full(cell, t, lost_sink),
            ChildReadPolicy::NoOverwrite => read_no_overwrite(cell, t, lost_sink),
            ChildReadPolicy::Overwrite => read_overwrite(cell, t, lost_sink),
            ChildReadPolicy::OneByOne => read_one_by_one(cell, t),
            ChildReadPolicy::Token { current_index } => read_token(cell, current_index, t),
            ChildReadPolicy::Sorted { mask } => read_sorted(cell, *mask, t, presented_trigger),
            ChildReadPolicy::Merging { merge_field } => read_merging(cell, merge_field, t, lost_sink),
        }
    }
}

/// Stamps a hit just pulled from `child` with: the child's `_Trigger` time
/// if the child is a triggered cell, this cell's own address readout time,
/// and a recomputed `available_from`.
fn stamp_child_read(cell: &ReadoutCell, child: &ReadoutCell, mut hit: Hit, t: i64) -> Hit {
    if child.triggered {
        hit.annotate(format!("{}_Trigger", child.address_name), hit.available_from);
    }
    hit.annotate(cell.address_name.clone(), t);
    hit.available_from = compute_available_from(cell, &hit, t);
    hit
}

fn compute_available_from(cell: &ReadoutCell, hit: &Hit, t: i64) -> i64 {
    let base = match &cell.delay_reference {
        Some(name) => hit.readout.get(name).unwrap_or(t),
        None => t,
    };
    base + cell.readout_delay
}

fn read_no_full(cell: &mut ReadoutCell, t: i64, lost_sink: &mut Vec<Hit>) {
    let Children::Cells(children) = &mut cell.children else { return };
    for child in children.iter_mut() {
        if cell.buffer.is_full() {
            break;
        }
        let hit = child.get_hit(t, true);
        if !hit.is_valid() {
            continue;
        }
        let hit = stamp_child_read(cell, child, hit, t);
        if let Err(mut rejected) = cell.buffer.insert(&cell.address_name, hit) {
            rejected.annotate_loss(LostKind::NoSpace, t);
            lost_sink.push(rejected);
        }
    }
}

fn read_no_overwrite(cell: &mut ReadoutCell, t: i64, lost_sink: &mut Vec<Hit>) {
    let Children::Cells(children) = &mut cell.children else { return };
    for child in children.iter_mut() {
        let hit = child.get_hit(t, true);
        if !hit.is_valid() {
            continue;
        }
        let hit = stamp_child_read(cell, child, hit, t);
        if let Err(mut rejected) = cell.buffer.insert(&cell.address_name, hit) {
            rejected.annotate_loss(LostKind::NoSpace, t);
            lost_sink.push(rejected);
        }
    }
}

fn read_overwrite(cell: &mut ReadoutCell, t: i64, lost_sink: &mut Vec<Hit>) {
    let Children::Cells(children) = &mut cell.children else { return };
    for child in children.iter_mut() {
        let hit = child.get_hit(t, true);
        if !hit.is_valid() {
            continue;
        }
        let hit = stamp_child_read(cell, child, hit, t);
        if let Err(rejected) = cell.buffer.insert(&cell.address_name, hit) {
            if let Some(mut evicted) = cell.buffer.evict_oldest() {
                evicted.annotate_loss(LostKind::Overwritten, t);
                lost_sink.push(evicted);
                let _ = cell.buffer.insert(&cell.address_name, rejected);
            } else {
                let mut rejected = rejected;
                rejected.annotate_loss(LostKind::NoSpace, t);
                lost_sink.push(rejected);
            }
        }
    }
}

fn read_one_by_one(cell: &mut ReadoutCell, t: i64) {
    let address_name = cell.address_name.clone();
    let capacity = cell.buffer.capacity();
    let Children::Cells(children) = &mut cell.children else { return };
    let Some(child) = children.first() else { return };
    let mirrored: Vec<(usize, Hit)> = (0..capacity)
        .filter_map(|i| {
            child
                .peek_child_slot(i)
                .filter(|h| h.is_valid() && h.is_available(t))
                .map(|h| (i, h.clone()))
        })
        .collect();
    for (index, mut hit) in mirrored {
        if !cell.buffer.slot_occupied(index) {
            hit.annotate(address_name.clone(), t);
            cell.buffer.set_slot(index, hit);
        }
    }
}

fn read_token(cell: &mut ReadoutCell, current_index: &mut usize, t: i64) {
    let Children::Cells(children) = &mut cell.children else { return };
    if children.is_empty() {
        return;
    }
    let n = children.len();
    for _ in 0..n {
        if cell.buffer.is_full() {
            break;
        }
        let idx = *current_index % n;
        *current_index = (*current_index + 1) % n;
        let child = &mut children[idx];
        let peek = child.get_hit(t, false);
        if !peek.is_valid() {
            continue;
        }
        let hit = child.get_hit(t, true);
        let hit = stamp_child_read(cell, child, hit, t);
        let _ = cell.buffer.insert(&cell.address_name, hit);
    }
}

fn read_sorted(cell: &mut ReadoutCell, mask: i64, t: i64, presented_trigger: Option<i64>) {
    let Some(presented) = presented_trigger else { return };
    let timestamp_to_read = presented | mask;
    let Children::Cells(children) = &mut cell.children else { return };
    for child in children.iter_mut() {
        if cell.buffer.is_full() {
            break;
        }
        let peek = child.get_hit(t, false);
        if !peek.is_valid() {
            continue;
        }
        let Some(trigger_time) = peek.find_readout_time("_Trigger") else { continue };
        if timestamp_to_read != (trigger_time | mask) {
            continue;
        }
        let hit = child.get_hit(t, true);
        let hit = stamp_child_read(cell, child, hit, t);
        let _ = cell.buffer.insert(&cell.address_name, hit);
    }
}

fn read_merging(cell: &mut ReadoutCell, merge_field: &str, t: i64, lost_sink: &mut Vec<Hit>) {
    let Children::Cells(children) = &mut cell.children else { return };
    let mut group: Option<Hit> = None;
    for child in children.iter_mut() {
        let hit = child.get_hit(t, true);
        if !hit.is_valid() {
            continue;
        }
        let hit = stamp_child_read(cell, child, hit, t);
        let mut component = hit.clone();
        component.annotate_loss(LostKind::RocMerge, t);
        lost_sink.push(component);
        match &mut group {
            None => group = Some(hit),
            Some(g) => {
                let merged = g.address.get(merge_field).unwrap_or(0) | hit.address.get(merge_field).unwrap_or(0);
                g.address.set(merge_field, merged);
                g.charge += hit.charge;
            }
        }
    }
    if let Some(group_hit) = group {
        if let Err(mut rejected) = cell.buffer.insert(&cell.address_name, group_hit) {
            rejected.annotate_loss(LostKind::BufferFull, t);
            lost_sink.push(rejected);
        }
    }
}

impl ReadoutCell {
    /// Peek at slot `i` of this cell's own buffer, used by the parent's
    /// `OneByOneReadout` to mirror slots without consuming them.
    pub(crate) fn peek_child_slot(&self, i: usize) -> Option<&Hit> {
        self.buffer.peek_slot(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPolicy;
    use crate::pixel_read::PixelReadPolicy;
    use romesim_core::Vec3;
    use romesim_core::Pixel;

    fn pixel_col(capacity: usize) -> ReadoutCell {
        ReadoutCell::new_with_pixels(
            "col",
            0,
            BufferPolicy::fifo(capacity),
            PixelReadPolicy::pptb_or(0),
            vec![Pixel::new("pix", 1, Vec3::ZERO, Vec3::new(1.0, 1.0, 1.0)).with_threshold(1.0)],
        )
    }

    #[test]
    fn merging_readout_ors_address_and_sums_charge() {
        let mut det = ReadoutCell::new_with_cells(
            "det",
            0,
            BufferPolicy::fifo(1),
            ChildReadPolicy::merging("pix"),
            vec![pixel_col(1), pixel_col(1), pixel_col(1)],
        );
        let mut lost = Vec::new();
        for (i, (addr, charge)) in [(1i64, 3.0), (2, 5.0), (4, 2.0)].into_iter().enumerate() {
            let mut h = Hit::new(i as i64, 0, 5, charge);
            h.address.push("col", 0);
            h.address.push("pix", addr);
            if let Children::Cells(children) = &mut det.children {
                children[i].place_hit(h, 0, &mut lost);
                children[i].load_pixel(0, &mut lost);
            }
        }
        det.load_cell("det", 1, None, &mut lost);
        let merged = det.get_hit(2, true);
        assert!(merged.is_valid());
        assert_eq!(merged.address.get("pix"), Some(7));
        assert_eq!(merged.charge, 10.0);
        let merge_tags = lost.iter().filter(|h| h.find_readout_time("ROCMerge").is_some()).count();
        assert_eq!(merge_tags, 3);
    }

    #[test]
    fn delay_reference_measures_from_the_referenced_readout_time_not_the_read_tick() {
        let mut det = ReadoutCell::new_with_cells(
            "det",
            0,
            BufferPolicy::fifo(1),
            ChildReadPolicy::no_full_read(),
            vec![pixel_col(1)],
        )
        .with_delay_reference("col")
        .with_readout_delay(5);
        let mut lost = Vec::new();

        let mut h = Hit::new(0, 1, 50, 1.0);
        h.address.push("col", 0);
        h.address.push("pix", 1);
        if let Children::Cells(children) = &mut det.children {
            // Loaded into "col" at tick 2, stamping hit.readout["col"] = 2.
            children[0].place_hit(h, 1, &mut lost);
            children[0].load_pixel(2, &mut lost);
        }
        // Read up into "det" much later, at tick 9.
        det.load_cell("det", 9, None, &mut lost);

        let served = det.get_hit(10, true);
        assert!(served.is_valid());
        assert_eq!(served.find_readout_time("col"), Some(2));
        assert_eq!(served.available_from, 2 + 5, "available_from should follow the \"col\" stamp, not the tick 9 read");
    }

    #[test]
    fn sorted_readout_serves_the_presented_trigger_first() {
        let mut det = ReadoutCell::new_with_cells("det", 0, BufferPolicy::fifo(2), ChildReadPolicy::sorted(0), vec![pixel_col(1), pixel_col(1)]);
        let mut lost = Vec::new();

        // child 0 is tagged for the later trigger (20), child 1 for the
        // earlier one (10); arrival order does not match trigger order.
        let mut h_late = Hit::new(0, 1, 50, 1.0);
        h_late.address.push("col", 0);
        h_late.address.push("pix", 1);
        h_late.annotate("det_Trigger", 20);
        let mut h_early = Hit::new(1, 2, 50, 1.0);
        h_early.address.push("col", 0);
        h_early.address.push("pix", 1);
        h_early.annotate("det_Trigger", 10);

        if let Children::Cells(children) = &mut det.children {
            children[0].place_hit(h_late, 1, &mut lost);
            children[0].load_pixel(1, &mut lost);
            children[1].place_hit(h_early, 2, &mut lost);
            children[1].load_pixel(2, &mut lost);
        }

        // Presented trigger is 10: only the early-tagged hit (child 1) may
        // be pulled up, even though the late-tagged hit arrived first.
        det.load_cell("det", 3, Some(10), &mut lost);
        let served = det.get_hit(4, true);
        assert_eq!(served.event_index, 1);

        // Once the presented trigger advances to 20, the other hit follows.
        det.load_cell("det", 5, Some(20), &mut lost);
        let served = det.get_hit(6, true);
        assert_eq!(served.event_index, 0);
    }

    #[test]
    fn overwrite_readout_evicts_oldest() {
        let mut det = ReadoutCell::new_with_cells(
            "det",
            0,
            BufferPolicy::fifo(1),
            ChildReadPolicy::overwrite(),
            vec![pixel_col(1)],
        );
        let mut lost = Vec::new();
        let mut h1 = Hit::new(0, 1, 50, 1.0);
        h1.address.push("col", 0);
        h1.address.push("pix", 1);
        if let Children::Cells(children) = &mut det.children {
            children[0].place_hit(h1, 1, &mut lost);
            children[0].load_pixel(1, &mut lost);
        }
        det.load_cell("det", 2, None, &mut lost);

        let mut h2 = Hit::new(1, 2, 50, 2.0);
        h2.address.push("col", 0);
        h2.address.push("pix", 1);
        if let Children::Cells(children) = &mut det.children {
            children[0].place_hit(h2, 2, &mut lost);
            children[0].load_pixel(2, &mut lost);
        }
        det.load_cell("det", 3, None, &mut lost);

        assert!(lost.iter().any(|h| h.find_readout_time("overwritten").is_some()));
        let kept = det.get_hit(4, true);
        assert_eq!(kept.event_index, 1);
    }
}
