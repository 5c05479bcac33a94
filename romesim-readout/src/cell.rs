use romesim_core::{Hit, LostKind, Pixel, Vec3};

use crate::buffer::BufferPolicy;
use crate::child_read::ChildReadPolicy;
use crate::error::{Error, Result};
use crate::pixel_read::PixelReadPolicy;

/// A readout cell's children: either a list of sub-cells or a list of
/// leaf pixels, never semantically both at once.
#[derive(Debug, Clone)]
pub enum Children {
    Cells(Vec<ReadoutCell>),
    Pixels(Vec<Pixel>),
}

impl Children {
    pub fn is_empty(&self) -> bool {
        match self {
            Children::Cells(c) => c.is_empty(),
            Children::Pixels(p) => p.is_empty(),
        }
    }
}

/// Full address path and static geometry of one leaf pixel, as surfaced by
/// [`ReadoutCell::collect_pixel_geometries`].
#[derive(Debug, Clone)]
pub struct PixelGeometry {
    pub address_path: Vec<(String, i64)>,
    pub position: Vec3,
    pub size: Vec3,
    pub threshold: f64,
    pub efficiency: f64,
    pub dead_time_scaling: f64,
}

/// Internal tree node of the detector's readout hierarchy.
///
/// Owns its children by value (no parent back-pointer — see the design
/// note on [`crate`] about passing scalars like the detector's presented
/// trigger down by parameter instead of storing a pointer to the owner).
#[derive(Debug, Clone)]
pub struct ReadoutCell {
    pub address_name: String,
    pub address: i64,
    pub children: Children,
    pub(crate) buffer: BufferPolicy,
    pub(crate) child_read: Option<ChildReadPolicy>,
    pub(crate) pixel_read: Option<PixelReadPolicy>,
    pub readout_delay: i64,
    /// Name of a readout-timestamp field to pull as the reference instant
    /// for `available_from` instead of the current tick.
    pub delay_reference: Option<String>,
    pub triggered: bool,
    position: Vec3,
    size: Vec3,
}

impl ReadoutCell {
    pub fn new_with_cells(
        address_name: impl Into<String>,
        address: i64,
        buffer: BufferPolicy,
        child_read: ChildReadPolicy,
        children: Vec<ReadoutCell>,
    ) -> Self {
        let mut cell = Self {
            address_name: address_name.into(),
            address,
            children: Children::Cells(children),
            buffer,
            child_read: Some(child_read),
            pixel_read: None,
            readout_delay: 0,
            delay_reference: None,
            triggered: false,
            position: Vec3::ZERO,
            size: Vec3::ZERO,
        };
        cell.update_size();
        cell
    }

    pub fn new_with_pixels(
        address_name: impl Into<String>,
        address: i64,
        buffer: BufferPolicy,
        pixel_read: PixelReadPolicy,
        pixels: Vec<Pixel>,
    ) -> Self {
        let mut cell = Self {
            address_name: address_name.into(),
            address,
            children: Children::Pixels(pixels),
            buffer,
            child_read: None,
            pixel_read: Some(pixel_read),
            readout_delay: 0,
            delay_reference: None,
            triggered: false,
            position: Vec3::ZERO,
            size: Vec3::ZERO,
        };
        cell.update_size();
        cell
    }

    pub fn with_readout_delay(mut self, delay: i64) -> Self {
        self.readout_delay = delay;
        self
    }

    pub fn with_delay_reference(mut self, name: impl Into<String>) -> Self {
        self.delay_reference = Some(name.into());
        self
    }

    pub fn with_triggered(mut self, triggered: bool) -> Self {
        self.triggered = triggered;
        self
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn size(&self) -> Vec3 {
        self.size
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn buffer_occupied(&self) -> usize {
        self.buffer.occupied_count()
    }

    /// Recomputes `position`/`size` as the tightest axis-aligned box
    /// containing every descendant pixel.
    pub fn update_size(&mut self) {
        let (lo, hi) = match &mut self.children {
            Children::Pixels(pixels) => pixels.iter().fold(None, |acc, p| {
                let lo = p.position;
                let hi = p.position + p.size;
                Some(match acc {
                    None => (lo, hi),
                    Some((alo, ahi)) => (alo.componentwise_min(&lo), ahi.componentwise_max(&hi)),
                })
            }),
            Children::Cells(cells) => {
                for c in cells.iter_mut() {
                    c.update_size();
                }
                cells.iter().fold(None, |acc, c| {
                    let lo = c.position;
                    let hi = c.position + c.size;
                    Some(match acc {
                        None => (lo, hi),
                        Some((alo, ahi)) => (alo.componentwise_min(&lo), ahi.componentwise_max(&hi)),
                    })
                })
            }
        }
        .unwrap_or((Vec3::ZERO, Vec3::ZERO));
        self.position = lo;
        self.size = hi - lo;
    }

    /// Translates every descendant pixel's position by `delta`, then
    /// recomputes the bounding box.
    pub fn shift(&mut self, delta: Vec3) {
        match &mut self.children {
            Children::Pixels(pixels) => {
                for p in pixels.iter_mut() {
                    p.position = p.position + delta;
                }
            }
            Children::Cells(cells) => {
                for c in cells.iter_mut() {
                    c.shift(delta);
                }
            }
        }
        self.update_size();
    }

    /// Checks that no two sibling cells/pixels anywhere in the subtree
    /// share the same `(address_name, address)` pair.
    pub fn check_roc_addresses(&self) -> Result<()> {
        match &self.children {
            Children::Cells(cells) => {
                let mut seen = Vec::new();
                for c in cells {
                    if seen.contains(&c.address) {
                        return Err(Error::DuplicateAddress(c.address, self.address_name.clone()));
                    }
                    seen.push(c.address);
                    c.check_roc_addresses()?;
                }
            }
            Children::Pixels(pixels) => {
                let mut seen = Vec::new();
                for p in pixels {
                    if seen.contains(&p.address) {
                        return Err(Error::DuplicateAddress(p.address, self.address_name.clone()));
                    }
                    seen.push(p.address);
                }
            }
        }
        Ok(())
    }

    /// Recursively checks the `OneByOneReadout` invariant ("requires exactly
    /// one child of same capacity", spec.md §4.D) at every cell in the
    /// subtree configured with that child-read policy, in addition to the
    /// no-duplicate-sibling-address check of [`ReadoutCell::check_roc_addresses`].
    pub fn validate(&self) -> Result<()> {
        self.check_roc_addresses()?;
        if matches!(self.child_read, Some(ChildReadPolicy::OneByOne)) {
            let Children::Cells(cells) = &self.children else { return Ok(()) };
            if cells.len() != 1 {
                return Err(Error::OneByOneChildCount(self.address_name.clone(), cells.len()));
            }
            if cells[0].buffer.capacity() != self.buffer.capacity() {
                return Err(Error::OneByOneCapacityMismatch(
                    self.address_name.clone(),
                    self.buffer.capacity(),
                    cells[0].buffer.capacity(),
                ));
            }
        }
        if let Children::Cells(cells) = &self.children {
            for c in cells {
                c.validate()?;
            }
        }
        Ok(())
    }

    /// Stamps `h` with this cell's address at `t`, sets `available_from`,
    /// and hands it to the buffer policy.
    pub fn add_hit(&mut self, mut h: Hit, t: i64) -> Result<(), Hit> {
        h.annotate(self.address_name.clone(), t);
        h.available_from = t + self.readout_delay;
        self.buffer.insert(&self.address_name, h)
    }

    /// Reads from this cell's own buffer. When this cell's child-read
    /// policy is `OneByOne`, a successful removal also clears the mirrored
    /// slot in the (sole) child cell.
    pub fn get_hit(&mut self, t: i64, remove: bool) -> Hit {
        let mirrors_child = matches!(self.child_read, Some(ChildReadPolicy::OneByOne));
        let slot = if mirrors_child && remove {
            self.buffer.index_of_available(t)
        } else {
            None
        };
        let hit = self.buffer.get(t, remove);
        if let (Some(index), Children::Cells(cells)) = (slot, &mut self.children) {
            if let Some(child) = cells.first_mut() {
                child.buffer.clear_slot(index);
            }
        }
        hit
    }

    pub fn no_trigger_remove(&mut self, t: i64, lost_sink: &mut Vec<Hit>) {
        self.buffer.no_trigger_remove(t, lost_sink);
    }

    /// Recursively applies `no_trigger_remove` to every cell in the
    /// subtree flagged `triggered`, used by `clock_down` when the
    /// detector's gate is low.
    pub fn no_trigger_remove_triggered(&mut self, t: i64, lost_sink: &mut Vec<Hit>) {
        if self.triggered {
            self.no_trigger_remove(t, lost_sink);
        }
        if let Children::Cells(cells) = &mut self.children {
            for c in cells.iter_mut() {
                c.no_trigger_remove_triggered(t, lost_sink);
            }
        }
    }

    /// Depth-first: recurse into every child cell, then (if this cell has
    /// pixel children) run the pixel-read policy.
    pub fn load_pixel(&mut self, t: i64, lost_sink: &mut Vec<Hit>) {
        if let Children::Cells(cells) = &mut self.children {
            for c in cells.iter_mut() {
                c.load_pixel(t, lost_sink);
            }
            return;
        }
        if let Some(mut policy) = self.pixel_read.take() {
            policy.read(self, t, lost_sink);
            self.pixel_read = Some(policy);
        }
    }

    /// Depth-first: recurse into every child cell, then, if `name` matches
    /// this cell's own address name, run the child-read policy.
    pub fn load_cell(&mut self, name: &str, t: i64, presented_trigger: Option<i64>, lost_sink: &mut Vec<Hit>) {
        if let Children::Cells(cells) = &mut self.children {
            for c in cells.iter_mut() {
                c.load_cell(name, t, presented_trigger, lost_sink);
            }
        }
        if self.address_name == name {
            if let Some(mut policy) = self.child_read.take() {
                policy.read(self, t, presented_trigger, lost_sink);
                self.child_read = Some(policy);
            }
        }
    }

    /// Routes `h` down the tree by matching its address map against each
    /// level's `(address_name, address)`. Unmatched names and empty
    /// subtrees are logged to `lost_sink`.
    pub fn place_hit(&mut self, h: Hit, t: i64, lost_sink: &mut Vec<Hit>) -> bool {
        match &mut self.children {
            Children::Pixels(pixels) => {
                let target = pixels
                    .iter()
                    .position(|p| h.address.get(&p.address_name) == Some(p.address));
                match target {
                    Some(idx) => {
                        let attempt = h.clone();
                        match pixels[idx].create_hit(h) {
                            romesim_core::Admission::Accepted => true,
                            romesim_core::Admission::Rejected => {
                                let mut lost = attempt;
                                lost.annotate_loss(LostKind::PixelFull, t);
                                lost_sink.push(lost);
                                false
                            }
                        }
                    }
                    None => {
                        let mut lost = h;
                        lost.annotate_loss(LostKind::PixelNotFound, t);
                        lost_sink.push(lost);
                        false
                    }
                }
            }
            Children::Cells(cells) => {
                if cells.is_empty() {
                    let mut lost = h;
                    lost.annotate_loss(LostKind::EmptyRoc, t);
                    lost_sink.push(lost);
                    return false;
                }
                let target = cells
                    .iter()
                    .position(|c| h.address.get(&c.address_name) == Some(c.address));
                match target {
                    Some(idx) => cells[idx].place_hit(h, t, lost_sink),
                    None => {
                        let mut lost = h;
                        lost.annotate_loss(LostKind::PixelNotFound, t);
                        lost_sink.push(lost);
                        false
                    }
                }
            }
        }
    }

    /// Recurses to every cell named `name` and pulls its own buffer's
    /// currently-available hit with a direct (non-policy) buffer read,
    /// collecting results into `out`. Used by the fixed state machine's
    /// `RdCol` step to drain every `CU`-addressed cell in one pass.
    pub fn drain_named(&mut self, name: &str, t: i64, out: &mut Vec<Hit>) {
        if self.address_name == name {
            let hit = self.get_hit(t, true);
            if hit.is_valid() {
                out.push(hit);
            }
        }
        if let Children::Cells(cells) = &mut self.children {
            for c in cells.iter_mut() {
                c.drain_named(name, t, out);
            }
        }
    }

    /// Tree sum of currently-resident hits addressed to cells named `name`.
    /// Subtrees whose child-read policy is `OneByOne` are excluded from the
    /// recursive sum since their slots mirror the parent's and would
    /// otherwise be counted twice.
    pub fn hits_available(&self, name: &str) -> usize {
        let mut count = 0;
        if self.address_name == name {
            count += self.buffer.occupied_count();
        }
        if let Children::Cells(cells) = &self.children {
            let mirrors_children = matches!(self.child_read, Some(ChildReadPolicy::OneByOne));
            if !mirrors_children {
                for c in cells {
                    count += c.hits_available(name);
                }
            }
        }
        count
    }

    /// Recursively collects every leaf pixel's full address path and
    /// geometry. Used by the event generator to prune candidate pixels
    /// against a track's charge volume before building hits, mirroring the
    /// original's recursive `ScanReadoutCell` fall-through.
    pub fn collect_pixel_geometries(&self, prefix: &mut Vec<(String, i64)>, out: &mut Vec<PixelGeometry>) {
        match &self.children {
            Children::Pixels(pixels) => {
                for p in pixels {
                    prefix.push((p.address_name.clone(), p.address));
                    out.push(PixelGeometry {
                        address_path: prefix.clone(),
                        position: p.position,
                        size: p.size,
                        threshold: p.threshold,
                        efficiency: p.efficiency,
                        dead_time_scaling: p.dead_time_scaling,
                    });
                    prefix.pop();
                }
            }
            Children::Cells(cells) => {
                for c in cells {
                    prefix.push((c.address_name.clone(), c.address));
                    c.collect_pixel_geometries(prefix, out);
                    prefix.pop();
                }
            }
        }
    }

    /// End-of-run drain: every hit still resident anywhere in the subtree
    /// is annotated `SimulationEnd` and pushed to `sink`. Idempotent: a
    /// second call finds nothing left to drain.
    pub fn remove_and_save_all(&mut self, t: i64, sink: &mut Vec<Hit>) {
        self.buffer.drain_all(|mut h| {
            h.annotate_loss(LostKind::SimulationEnd, t);
            sink.push(h);
        });
        match &mut self.children {
            Children::Cells(cells) => {
                for c in cells.iter_mut() {
                    c.remove_and_save_all(t, sink);
                }
            }
            Children::Pixels(pixels) => {
                for p in pixels.iter_mut() {
                    if let Some(mut h) = p.drain() {
                        h.annotate_loss(LostKind::SimulationEnd, t);
                        sink.push(h);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::child_read::ChildReadPolicy;
    use crate::pixel_read::PixelReadPolicy;
    use romesim_core::Vec3;

    fn leaf_pixel(name: &str, addr: i64) -> Pixel {
        Pixel::new(name, addr, Vec3::ZERO, Vec3::new(1.0, 1.0, 1.0)).with_threshold(1.0)
    }

    fn sample_hit(event: i64, t: i64, dead_time_end: i64) -> Hit {
        let mut h = Hit::new(event, t, dead_time_end, 5.0);
        h.address.push("col", 0);
        h.address.push("pix", 1);
        h
    }

    #[test]
    fn place_hit_reaches_matching_pixel() {
        let mut col = ReadoutCell::new_with_pixels(
            "col",
            0,
            BufferPolicy::fifo(1),
            PixelReadPolicy::pptb_or(0),
            vec![leaf_pixel("pix", 1), leaf_pixel("pix", 2)],
        );
        let mut lost = Vec::new();
        assert!(col.place_hit(sample_hit(0, 3, 7), 3, &mut lost));
        assert!(lost.is_empty());
    }

    #[test]
    fn place_hit_logs_pixel_not_found() {
        let mut col = ReadoutCell::new_with_pixels(
            "col",
            0,
            BufferPolicy::fifo(1),
            PixelReadPolicy::pptb_or(0),
            vec![leaf_pixel("pix", 9)],
        );
        let mut lost = Vec::new();
        assert!(!col.place_hit(sample_hit(0, 3, 7), 3, &mut lost));
        assert_eq!(lost.len(), 1);
        assert!(lost[0].find_readout_time("PixelNotFound").is_some());
    }

    #[test]
    fn place_hit_on_empty_subtree_logs_empty_roc() {
        let mut det = ReadoutCell::new_with_cells(
            "det",
            0,
            BufferPolicy::fifo(1),
            ChildReadPolicy::no_full_read(),
            vec![],
        );
        let mut lost = Vec::new();
        assert!(!det.place_hit(sample_hit(0, 3, 7), 3, &mut lost));
        assert_eq!(lost.len(), 1);
        assert!(lost[0].find_readout_time("EmptyROC").is_some());
    }

    #[test]
    fn remove_and_save_all_is_idempotent() {
        let mut col = ReadoutCell::new_with_pixels(
            "col",
            0,
            BufferPolicy::fifo(2),
            PixelReadPolicy::pptb_or(0),
            vec![leaf_pixel("pix", 1)],
        );
        col.place_hit(sample_hit(0, 3, 7), 3, &mut Vec::new());
        let mut first = Vec::new();
        col.remove_and_save_all(10, &mut first);
        assert_eq!(first.len(), 1);
        let mut second = Vec::new();
        col.remove_and_save_all(10, &mut second);
        assert!(second.is_empty());
    }

    #[test]
    fn one_by_one_requires_single_child_of_matching_capacity() {
        let mismatched = ReadoutCell::new_with_cells(
            "det",
            0,
            BufferPolicy::fifo(2),
            ChildReadPolicy::one_by_one(),
            vec![pixel_col("col", 3)],
        );
        assert!(mismatched.validate().is_err());

        let two_children = ReadoutCell::new_with_cells(
            "det",
            0,
            BufferPolicy::fifo(2),
            ChildReadPolicy::one_by_one(),
            vec![pixel_col("col", 2), pixel_col("col2", 2)],
        );
        assert!(two_children.validate().is_err());

        let matched = ReadoutCell::new_with_cells(
            "det",
            0,
            BufferPolicy::fifo(2),
            ChildReadPolicy::one_by_one(),
            vec![pixel_col("col", 2)],
        );
        assert!(matched.validate().is_ok());
    }

    fn pixel_col(name: &str, capacity: usize) -> ReadoutCell {
        ReadoutCell::new_with_pixels(
            name,
            0,
            BufferPolicy::fifo(capacity),
            PixelReadPolicy::pptb_or(0),
            vec![leaf_pixel("pix", 1)],
        )
    }
}
