use romesim_readout::ReadoutCell;

use crate::detector::Detector;
use crate::state_machine::StateMachine;

/// Programmatic equivalent of the external XML configuration loader (spec.md
/// §6): assembles a [`Detector`] from a readout-cell subtree, a trigger
/// queue depth/mask, and a state machine, then validates the tree before
/// handing back an owned `Detector`.
///
/// Grounded on `rustpix-algorithms`'s plain `with_*` builder-struct
/// convention (`DbscanConfig`, `GridConfig`) rather than a file format.
pub struct DetectorBuilder {
    address_name: String,
    address: i64,
    root: ReadoutCell,
    trigger_capacity: usize,
    trigger_mask: i64,
    state_machine: Box<dyn StateMachine>,
}

impl DetectorBuilder {
    pub fn new(
        address_name: impl Into<String>,
        address: i64,
        root: ReadoutCell,
        state_machine: Box<dyn StateMachine>,
    ) -> Self {
        Self {
            address_name: address_name.into(),
            address,
            root,
            trigger_capacity: 1,
            trigger_mask: 0,
            state_machine,
        }
    }

    pub fn with_trigger_capacity(mut self, capacity: usize) -> Self {
        self.trigger_capacity = capacity;
        self
    }

    pub fn with_trigger_mask(mut self, mask: i64) -> Self {
        self.trigger_mask = mask;
        self
    }

    /// Checks the assembled tree's structural invariants (no duplicate
    /// sibling addresses, `OneByOneReadout`'s single-child/matching-capacity
    /// requirement) without consuming `self`, so a caller can inspect the
    /// error and adjust the tree before calling [`DetectorBuilder::build`].
    pub fn validate(&self) -> romesim_readout::Result<()> {
        self.root.validate()
    }

    /// Validates the tree and builds the [`Detector`].
    pub fn build(self) -> romesim_readout::Result<Detector> {
        self.root.validate()?;
        Ok(Detector::new(
            self.address_name,
            self.address,
            self.root,
            self.trigger_capacity,
            self.trigger_mask,
            self.state_machine,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed_state_machine::FixedStateMachine;
    use romesim_core::{Pixel, Vec3};
    use romesim_readout::{BufferPolicy, ChildReadPolicy, PixelReadPolicy};

    fn leaf_column() -> ReadoutCell {
        ReadoutCell::new_with_pixels(
            "col",
            0,
            BufferPolicy::fifo(2),
            PixelReadPolicy::pptb_or(0),
            vec![Pixel::new("pix", 1, Vec3::ZERO, Vec3::new(1.0, 1.0, 1.0)).with_threshold(1.0)],
        )
    }

    #[test]
    fn builds_a_valid_tree() {
        let root = ReadoutCell::new_with_cells("det", 0, BufferPolicy::fifo(2), ChildReadPolicy::no_full_read(), vec![leaf_column()]);
        let detector = DetectorBuilder::new("det", 0, root, Box::new(FixedStateMachine::new()))
            .with_trigger_capacity(4)
            .build();
        assert!(detector.is_ok());
    }

    #[test]
    fn rejects_duplicate_sibling_addresses() {
        let root = ReadoutCell::new_with_cells(
            "det",
            0,
            BufferPolicy::fifo(2),
            ChildReadPolicy::no_full_read(),
            vec![leaf_column(), leaf_column()],
        );
        let builder = DetectorBuilder::new("det", 0, root, Box::new(FixedStateMachine::new()));
        assert!(builder.validate().is_err());
        assert!(builder.build().is_err());
    }

    #[test]
    fn rejects_one_by_one_with_wrong_child_count() {
        let root = ReadoutCell::new_with_cells(
            "det",
            0,
            BufferPolicy::fifo(2),
            ChildReadPolicy::one_by_one(),
            vec![leaf_column(), leaf_column_named("col2")],
        );
        let builder = DetectorBuilder::new("det", 0, root, Box::new(FixedStateMachine::new()));
        assert!(builder.build().is_err());
    }

    fn leaf_column_named(name: &str) -> ReadoutCell {
        ReadoutCell::new_with_pixels(
            name,
            1,
            BufferPolicy::fifo(2),
            PixelReadPolicy::pptb_or(0),
            vec![Pixel::new("pix", 1, Vec3::ZERO, Vec3::new(1.0, 1.0, 1.0)).with_threshold(1.0)],
        )
    }
}
