use crate::hit::{Hit, LostKind};
use crate::vec3::Vec3;

/// Outcome of offering a newly-created hit to a [`Pixel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    /// The pixel was busy; dead-time may have been extended (pile-up).
    Rejected,
}

/// A leaf sensor. Holds at most one in-flight hit and enforces dead-time.
///
/// `threshold`/`efficiency`/`dead_time_scaling`/`detection_delay` describe
/// the sensor to the event generator (charge-integration and dead-time/
/// time-walk lookups happen there); `Pixel` itself only arbitrates
/// admission and readout of whatever `Hit` it is handed.
#[derive(Debug, Clone)]
pub struct Pixel {
    pub address_name: String,
    pub address: i64,
    pub position: Vec3,
    pub size: Vec3,
    pub threshold: f64,
    pub efficiency: f64,
    pub dead_time_scaling: f64,
    pub detection_delay: f64,
    hit: Hit,
}

impl Pixel {
    pub fn new(address_name: impl Into<String>, address: i64, position: Vec3, size: Vec3) -> Self {
        Self {
            address_name: address_name.into(),
            address,
            position,
            size,
            threshold: 0.0,
            efficiency: 1.0,
            dead_time_scaling: 1.0,
            detection_delay: 0.0,
            hit: Hit::invalid(),
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_efficiency(mut self, efficiency: f64) -> Self {
        self.efficiency = efficiency;
        self
    }

    pub fn with_dead_time_scaling(mut self, scaling: f64) -> Self {
        self.dead_time_scaling = scaling;
        self
    }

    pub fn with_detection_delay(mut self, delay: f64) -> Self {
        self.detection_delay = delay;
        self
    }

    /// `t >= dead_time_end` of whatever hit (if any) currently occupies the
    /// pixel. An empty pixel has `dead_time_end = i64::MIN`, so this is
    /// always true for it.
    pub fn is_empty(&self, t: i64) -> bool {
        t >= self.hit.dead_time_end
    }

    pub fn current_hit(&self) -> &Hit {
        &self.hit
    }

    /// Offers `h` for admission. Rejects while the pixel is busy, but still
    /// extends its dead-time if `h`'s would end later (pile-up extends the
    /// busy period even though the piled-up hit itself is lost).
    pub fn create_hit(&mut self, h: Hit) -> Admission {
        if self.hit.is_valid() && h.timestamp <= self.hit.dead_time_end {
            if h.dead_time_end > self.hit.dead_time_end {
                self.hit.dead_time_end = h.dead_time_end;
            }
            return Admission::Rejected;
        }
        self.hit = h;
        Admission::Accepted
    }

    /// If the stored hit is valid and its dead-time has elapsed by `t`
    /// without ever being forwarded, it is annotated `NotRead`, written to
    /// `lost_sink`, and cleared. Otherwise the stored hit is returned
    /// without clearing (a peek).
    pub fn get_hit(&mut self, t: i64, lost_sink: &mut Vec<Hit>) -> Hit {
        if self.hit.is_valid() && t >= self.hit.dead_time_end {
            let mut expired = self.hit.clone();
            expired.annotate_loss(LostKind::NotRead, t);
            lost_sink.push(expired);
            self.hit = Hit::invalid();
            return Hit::invalid();
        }
        self.hit.clone()
    }

    /// `get_hit` followed by clearing the slot if a valid hit was returned
    /// (active consumption, as opposed to `get_hit`'s peek). The returned
    /// hit still carries its charge for the caller's own aggregation.
    pub fn load_hit(&mut self, t: i64, lost_sink: &mut Vec<Hit>) -> Hit {
        let out = self.get_hit(t, lost_sink);
        if out.is_valid() {
            self.hit = Hit::invalid();
        }
        out
    }

    /// Unconditionally removes and returns the resident hit, with no
    /// dead-time check and no loss annotation — the caller decides how to
    /// log it (sample-delay loss, end-of-run drain, ...).
    pub fn drain(&mut self) -> Option<Hit> {
        if self.hit.is_valid() {
            Some(std::mem::replace(&mut self.hit, Hit::invalid()))
        } else {
            None
        }
    }
}
