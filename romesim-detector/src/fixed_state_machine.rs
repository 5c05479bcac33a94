use crate::detector::Detector;
use crate::error::Result;
use crate::state_machine::StateMachine;

/// The MuPix8-style four-state readout controller (spec §4.F), grounded on
/// `detector.cpp`'s `StateMachineCkUp`/`StateMachineCkDown`.
///
/// The per-state visit counters that gate `LdCol`'s four-pass loop, `LdPix`'s
/// single retry, and `RdCol`'s 63-pass cap were function-local `static`s in
/// the original; spec §9's Open Question resolves them as explicit fields
/// here so the machine has no hidden global state and is trivially cloned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixedState {
    PullDown,
    LdCol,
    LdPix,
    RdCol,
}

impl FixedState {
    pub fn name(self) -> &'static str {
        match self {
            FixedState::PullDown => "PullDown",
            FixedState::LdCol => "LdCol",
            FixedState::LdPix => "LdPix",
            FixedState::RdCol => "RdCol",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FixedStateMachine {
    current: FixedState,
    next: FixedState,
    delay: i64,
    ldcol_visits: u32,
    ldpix_visits: u32,
    rdcol_visits: u32,
    rdcol_cap: u32,
    /// `RdCol` splits across two arm executions: `false` means the next
    /// visit should load Column's hit into CU's buffer; `true` means a hit
    /// was loaded on a prior tick and is now due for drain. Without this
    /// split, loading and draining CU's buffer on the same tick violates
    /// `available_from < t` (the just-loaded hit is never yet available)
    /// and no hit is ever read out.
    rdcol_loaded: bool,
}

impl Default for FixedStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl FixedStateMachine {
    pub fn new() -> Self {
        Self {
            current: FixedState::PullDown,
            next: FixedState::PullDown,
            delay: 0,
            ldcol_visits: 0,
            ldpix_visits: 0,
            rdcol_visits: 0,
            rdcol_cap: 63,
            rdcol_loaded: false,
        }
    }

    pub fn with_rdcol_cap(mut self, cap: u32) -> Self {
        self.rdcol_cap = cap;
        self
    }

    pub fn current(&self) -> FixedState {
        self.current
    }
}

impl StateMachine for FixedStateMachine {
    fn clock_up(&mut self, detector: &mut Detector, t: i64) -> Result<()> {
        log::trace!("{}: state {}", detector.address_name, self.current.name());

        if self.delay > 0 {
            self.delay -= 1;
            return Ok(());
        }

        match self.current {
            FixedState::PullDown => {
                self.next = FixedState::LdCol;
                self.delay = 1;
            }
            FixedState::LdCol => {
                detector.load_cell("Column", t);
                self.ldcol_visits += 1;
                if self.ldcol_visits < 4 {
                    self.next = FixedState::LdCol;
                } else {
                    self.ldcol_visits = 0;
                    self.next = FixedState::LdPix;
                    self.delay = 1;
                }
            }
            FixedState::LdPix => {
                let hits_available = detector.hits_available("Column");
                detector.load_cell("Pixel", t);
                if hits_available > 0 {
                    self.ldpix_visits = 0;
                    self.next = FixedState::RdCol;
                    self.delay = 1;
                } else if self.ldpix_visits < 1 {
                    self.ldpix_visits += 1;
                    self.next = FixedState::LdPix;
                } else {
                    self.ldpix_visits = 0;
                    self.next = FixedState::PullDown;
                    self.delay = 1;
                }
            }
            FixedState::RdCol if !self.rdcol_loaded => {
                detector.load_cell("CU", t);
                self.rdcol_loaded = true;
                self.next = FixedState::RdCol;
                self.delay = 1;
            }
            FixedState::RdCol => {
                let read = detector.drain_named("CU", t);
                let any_read = !read.is_empty();
                for hit in read {
                    detector.save_hit(hit, t);
                }
                self.rdcol_loaded = false;

                if any_read {
                    let more_hits = detector.hits_available("Column");
                    if more_hits > 0 && self.rdcol_visits <= self.rdcol_cap {
                        self.next = FixedState::RdCol;
                        self.rdcol_visits += 1;
                    } else {
                        self.next = FixedState::PullDown;
                        self.rdcol_visits = 0;
                    }
                } else {
                    self.next = FixedState::PullDown;
                    self.rdcol_visits = 0;
                }
                self.delay = 1;
            }
        }

        Ok(())
    }

    fn clock_down(&mut self, detector: &mut Detector, t: i64) {
        detector.load_pixel(t);
        self.current = self.next;
    }

    fn current_state_name(&self) -> &str {
        self.current.name()
    }

    fn num_states(&self) -> usize {
        4
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::Detector;
    use romesim_core::{Hit, Pixel, Vec3};
    use romesim_readout::{BufferPolicy, ChildReadPolicy, PixelReadPolicy, ReadoutCell};

    /// Three readout-cell layers, mirroring MuPix8's CU -> Column -> PixCell
    /// hierarchy: the pixel-read policy lives on `PixCell`, and `Column`/`CU`
    /// each carry a child-read policy so `LdCol`/`RdCol` have something to
    /// pull upward (`Detector::load_cell("Pixel", t)` in `LdPix` is a
    /// deliberate no-op here — no cell in this tree is named `"Pixel"`; see
    /// `readoutcell.cpp::LoadCell`, which only acts on an address-name match).
    fn sample_detector() -> Detector {
        let pixcell = ReadoutCell::new_with_pixels(
            "PixCell",
            0,
            BufferPolicy::fifo(2),
            PixelReadPolicy::pptb_or(0),
            vec![Pixel::new("Pixel", 1, Vec3::ZERO, Vec3::new(1.0, 1.0, 1.0)).with_threshold(1.0)],
        );
        let column = ReadoutCell::new_with_cells(
            "Column",
            0,
            BufferPolicy::fifo(2),
            ChildReadPolicy::no_full_read(),
            vec![pixcell],
        );
        let root = ReadoutCell::new_with_cells(
            "CU",
            0,
            BufferPolicy::fifo(2),
            ChildReadPolicy::no_full_read(),
            vec![column],
        );
        Detector::new("det", 0, root, 4, 0, Box::new(FixedStateMachine::new()))
    }

    fn sample_hit(event: i64, t: i64, dead_time_end: i64) -> Hit {
        let mut h = Hit::new(event, t, dead_time_end, 5.0);
        h.address.push("Column", 0);
        h.address.push("PixCell", 0);
        h.address.push("Pixel", 1);
        h
    }

    #[test]
    fn cycles_through_states_and_reads_out_a_hit() {
        let mut det = sample_detector();
        assert!(det.place_hit(sample_hit(0, 0, 100), 0));

        // Drive enough ticks for PullDown -> LdCol(x4) -> LdPix -> RdCol.
        for t in 0..40 {
            det.clock_up(t).unwrap();
            det.clock_down(t, true);
        }

        assert!(!det.accepted_log().is_empty(), "expected at least one hit read out by t=40");
    }
}
