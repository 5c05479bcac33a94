use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use romesim_core::{overlap_volume, Hit, Vec3};
use romesim_readout::PixelGeometry;

use crate::charge_model::{BoxOverlapChargeModel, ChargeModel, Track};
use crate::error::{Error, Result};
use crate::spline::Spline;

/// How trigger signals are emitted relative to generated events (spec §4.H).
#[derive(Debug, Clone, Copy)]
pub enum TriggerMode {
    /// One independent Bernoulli trial per generated event.
    PerEvent,
    /// One Bernoulli trial per fixed-length time window, independent of how
    /// many events land inside it.
    PerFixedWindow { window: i64 },
}

/// All tunable parameters of one generation run (spec §4.H's input list).
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub seed: u64,
    pub event_rate: f64,
    pub rate_is_total: bool,
    pub inclination_sigma: f64,
    pub cluster_size: f64,
    pub charge_scale: f64,
    pub trigger_probability: f64,
    pub trigger_delay: f64,
    pub trigger_mode: TriggerMode,
    pub dead_time_points: Vec<(f64, f64)>,
    pub time_walk_points: Vec<(f64, f64)>,
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.event_rate <= 0.0 {
            return Err(Error::NonPositiveRate(self.event_rate));
        }
        if !(0.0..=1.0).contains(&self.trigger_probability) {
            return Err(Error::InvalidTriggerProbability(self.trigger_probability));
        }
        Ok(())
    }
}

/// Rounds a fractional tick *up* by adding 0.9 before truncating — an
/// already-integral tick is left unchanged, per spec §4.H.
fn round_up_tick(x: f64) -> i64 {
    (x + 0.9) as i64
}

/// One straight-line particle track drawn during generation, paired with
/// its assigned event index and nominal arrival time.
struct PendingTrack {
    event_index: i64,
    time: f64,
    track: Track,
}

/// Output of one [`EventGenerator::generate`] call: hits sorted by
/// `(timestamp, event_index)` and the trigger timestamps emitted alongside
/// them, both ready to merge into a simulator's event queue.
#[derive(Debug, Clone, Default)]
pub struct GeneratedBatch {
    pub hits: Vec<Hit>,
    pub trigger_timestamps: Vec<i64>,
}

/// One externally-supplied charge deposit, as consumed by
/// [`EventGenerator::regroup_charge_distributions`] in place of the
/// original's ROOT-format replay (out of scope; see the crate's readme for
/// the `ChargeDistributionSource` trait this takes its place behind).
#[derive(Debug, Clone)]
pub struct ChargeSample {
    pub address_path: Vec<(String, i64)>,
    pub charge: f64,
    pub timestamp: i64,
}

/// A source of externally-computed charge deposits, grouped into batches
/// that share a nominal event index. Implemented by a synthetic in-memory
/// source in tests; a ROOT-format reader is explicitly out of scope.
pub trait ChargeDistributionSource {
    fn next_batch(&mut self) -> Option<Vec<ChargeSample>>;
}

/// Draws Poisson-spaced particle tracks with Gaussian angular spread,
/// integrates their charge against a pluggable [`ChargeModel`], and emits
/// the resulting hits plus trigger timestamps (spec §4.H).
pub struct EventGenerator {
    config: GeneratorConfig,
    rng: StdRng,
    dead_time: Spline,
    time_walk: Spline,
    charge_model: Box<dyn ChargeModel>,
    next_event_index: i64,
}

impl EventGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        config.validate()?;
        let dead_time = Spline::new(&config.dead_time_points).unwrap_or_else(|_| Spline::zero());
        let time_walk = Spline::new(&config.time_walk_points).unwrap_or_else(|_| Spline::zero());
        let charge_model: Box<dyn ChargeModel> = Box::new(BoxOverlapChargeModel::new(config.charge_scale));
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self { config, rng, dead_time, time_walk, charge_model, next_event_index: 0 })
    }

    pub fn with_charge_model(mut self, model: Box<dyn ChargeModel>) -> Self {
        self.charge_model = model;
        self
    }

    pub fn next_event_index(&self) -> i64 {
        self.next_event_index
    }

    fn sample_exponential(&mut self, lambda: f64) -> f64 {
        let u: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        -u.ln() / lambda
    }

    /// Box-Muller transform; `sigma <= 0.0` collapses to the mean, matching
    /// a detector configured with no angular spread at all.
    fn sample_gaussian(&mut self, mean: f64, sigma: f64) -> f64 {
        if sigma <= 0.0 {
            return mean;
        }
        let u1: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = self.rng.gen();
        let z = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
        mean + sigma * z
    }

    fn sample_bernoulli(&mut self, p: f64) -> bool {
        self.rng.gen::<f64>() < p
    }

    fn bounding_box(pixels: &[PixelGeometry]) -> (Vec3, Vec3) {
        pixels.iter().fold((Vec3::ZERO, Vec3::ZERO), |(lo, hi), p| {
            (lo.componentwise_min(&p.position), hi.componentwise_max(&(p.position + p.size)))
        })
    }

    /// Generates events from `t = 0` through `stop_time` (inclusive),
    /// evaluating each track's charge deposit against every candidate pixel
    /// and emitting trigger timestamps alongside the hit stream.
    pub fn generate(&mut self, pixels: &[PixelGeometry], stop_time: i64) -> GeneratedBatch {
        let (lo, hi) = Self::bounding_box(pixels);
        let width = (hi.x - lo.x).max(1.0);
        let depth = (hi.y - lo.y).max(1.0);
        let area = width * depth;
        let lambda = if self.config.rate_is_total {
            self.config.event_rate
        } else {
            self.config.event_rate * area
        }
        .max(f64::EPSILON);

        let mut tracks = Vec::new();
        let mut t = 0.0_f64;
        loop {
            t += self.sample_exponential(lambda);
            if t > stop_time as f64 {
                break;
            }
            let setpoint = Vec3::new(
                lo.x + self.rng.gen::<f64>() * width,
                lo.y + self.rng.gen::<f64>() * depth,
                lo.z,
            );
            let direction = Vec3::new(
                self.sample_gaussian(0.0, self.config.inclination_sigma),
                self.sample_gaussian(0.0, self.config.inclination_sigma),
                (hi.z - lo.z).max(1.0),
            );
            let event_index = self.next_event_index;
            self.next_event_index += 1;
            tracks.push(PendingTrack {
                event_index,
                time: t,
                track: Track { setpoint, direction, cluster_size: self.config.cluster_size },
            });
        }

        let trigger_timestamps = self.emit_triggers(&tracks, stop_time);
        let hits = self.evaluate_tracks(pixels, &tracks);
        log::debug!(
            "generated {} tracks, {} hits, {} triggers through t={stop_time}",
            tracks.len(),
            hits.len(),
            trigger_timestamps.len()
        );
        GeneratedBatch { hits, trigger_timestamps }
    }

    fn emit_triggers(&mut self, tracks: &[PendingTrack], stop_time: i64) -> Vec<i64> {
        let mut triggers = Vec::new();
        match self.config.trigger_mode {
            TriggerMode::PerEvent => {
                for pending in tracks {
                    if self.sample_bernoulli(self.config.trigger_probability) {
                        triggers.push(round_up_tick(pending.time + self.config.trigger_delay));
                    }
                }
            }
            TriggerMode::PerFixedWindow { window } => {
                let window = window.max(1);
                let mut w = 0_i64;
                while w <= stop_time {
                    if self.sample_bernoulli(self.config.trigger_probability) {
                        triggers.push(round_up_tick(w as f64 + self.config.trigger_delay));
                    }
                    w += window;
                }
            }
        }
        triggers.sort_unstable();
        triggers
    }

    /// Splits `tracks` across worker threads via `rayon`, each producing a
    /// local hit vector, then merges and sorts the combined result by
    /// `(timestamp, event_index)` (spec §5).
    fn evaluate_tracks(&self, pixels: &[PixelGeometry], tracks: &[PendingTrack]) -> Vec<Hit> {
        let mut hits: Vec<Hit> = tracks
            .par_iter()
            .flat_map(|pending| self.evaluate_one_track(pixels, pending))
            .collect();
        hits.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.event_index.cmp(&b.event_index)));
        hits
    }

    /// Prunes pixels whose box has no overlap with the track's cluster
    /// bounding box before ever invoking the charge model, per spec §4.A.
    /// Per-pixel efficiency is sampled from a seed derived from
    /// `(run seed, event index, pixel index)` rather than the generator's
    /// shared RNG, so this method stays reproducible under parallel
    /// evaluation without needing a mutable shared generator.
    fn evaluate_one_track(&self, pixels: &[PixelGeometry], pending: &PendingTrack) -> Vec<Hit> {
        let (cluster_lo, cluster_hi) =
            pending.track.cluster_bounds(pending.track.setpoint, pending.track.setpoint + pending.track.direction);

        let mut out = Vec::new();
        for (pixel_index, pixel) in pixels.iter().enumerate() {
            let pixel_lo = pixel.position;
            let pixel_hi = pixel.position + pixel.size;
            if overlap_volume(cluster_lo, cluster_hi, pixel_lo, pixel_hi) <= 0.0 {
                continue;
            }

            let charge = self.charge_model.integrate(&pending.track, pixel_lo, pixel_hi);
            if charge <= pixel.threshold {
                continue;
            }

            let mut efficiency_rng = StdRng::seed_from_u64(efficiency_seed(
                self.config.seed,
                pending.event_index,
                pixel_index as i64,
            ));
            if efficiency_rng.gen::<f64>() >= pixel.efficiency {
                continue;
            }

            let timestamp = (pending.time + self.time_walk.evaluate(charge)).round() as i64;
            let dead_time_end = timestamp + (self.dead_time.evaluate(charge) * pixel.dead_time_scaling).round() as i64;

            let mut hit = Hit::new(pending.event_index, timestamp, dead_time_end, charge);
            for (name, addr) in &pixel.address_path {
                hit.address.push(name.clone(), *addr);
            }
            out.push(hit);
        }
        out
    }

    /// Sums externally-supplied charge deposits per pixel address within
    /// each batch ("regrouping"), then applies the same threshold/
    /// time-walk/dead-time pipeline as generated tracks.
    pub fn regroup_charge_distributions(
        &mut self,
        source: &mut dyn ChargeDistributionSource,
        pixels: &[PixelGeometry],
    ) -> Vec<Hit> {
        let mut hits = Vec::new();
        while let Some(batch) = source.next_batch() {
            let event_index = self.next_event_index;
            self.next_event_index += 1;

            let mut by_address: Vec<(Vec<(String, i64)>, f64, i64)> = Vec::new();
            for sample in batch {
                if let Some(existing) = by_address.iter_mut().find(|(addr, _, _)| *addr == sample.address_path) {
                    existing.1 += sample.charge;
                    existing.2 = existing.2.min(sample.timestamp);
                } else {
                    by_address.push((sample.address_path, sample.charge, sample.timestamp));
                }
            }

            for (address_path, charge, timestamp) in by_address {
                let Some(pixel) = pixels.iter().find(|p| p.address_path == address_path) else {
                    continue;
                };
                if charge <= pixel.threshold {
                    continue;
                }
                let timestamp = (timestamp as f64 + self.time_walk.evaluate(charge)).round() as i64;
                let dead_time_end =
                    timestamp + (self.dead_time.evaluate(charge) * pixel.dead_time_scaling).round() as i64;
                let mut hit = Hit::new(event_index, timestamp, dead_time_end, charge);
                for (name, addr) in &address_path {
                    hit.address.push(name.clone(), *addr);
                }
                hits.push(hit);
            }
        }
        hits.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.event_index.cmp(&b.event_index)));
        hits
    }
}

/// Deterministic per-pixel efficiency seed, mixed from the run seed, event
/// index, and pixel index with a fixed-prime splitmix-style combination.
fn efficiency_seed(run_seed: u64, event_index: i64, pixel_index: i64) -> u64 {
    run_seed
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .wrapping_add((event_index as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9))
        .wrapping_add((pixel_index as u64).wrapping_mul(0x94D0_49BB_1331_11EB))
}
