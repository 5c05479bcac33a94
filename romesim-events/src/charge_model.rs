use romesim_core::{overlap_volume, Vec3};

/// A straight particle track through the detector volume, with a charge
/// cluster of radius `cluster_size` spread around it.
#[derive(Debug, Clone, Copy)]
pub struct Track {
    pub setpoint: Vec3,
    pub direction: Vec3,
    pub cluster_size: f64,
}

impl Track {
    /// Axis-aligned bounding box of the charge cluster around the whole
    /// track segment through the detector's bounds, used to prune pixels
    /// before invoking a [`ChargeModel`].
    pub fn cluster_bounds(&self, segment_lo: Vec3, segment_hi: Vec3) -> (Vec3, Vec3) {
        let pad = Vec3::new(self.cluster_size, self.cluster_size, self.cluster_size);
        (segment_lo - pad, segment_hi + pad)
    }
}

/// Integrates the charge a [`Track`] deposits into one pixel's bounding box.
///
/// Kept as a trait so the full Gaussian charge-tube numerical integral of
/// the original can be dropped in later without disturbing the generator's
/// control flow; the shipped default approximates deposited charge as
/// proportional to the geometric overlap between the cluster's bounding box
/// and the pixel's own box.
pub trait ChargeModel: Send + Sync {
    fn integrate(&self, track: &Track, pixel_lo: Vec3, pixel_hi: Vec3) -> f64;
}

/// Default [`ChargeModel`]: charge is the product of total charge scale and
/// the fraction of the cluster's bounding-box volume that overlaps the
/// pixel, built directly on [`overlap_volume`].
#[derive(Debug, Clone, Copy)]
pub struct BoxOverlapChargeModel {
    pub charge_scale: f64,
}

impl BoxOverlapChargeModel {
    pub fn new(charge_scale: f64) -> Self {
        Self { charge_scale }
    }
}

impl ChargeModel for BoxOverlapChargeModel {
    fn integrate(&self, track: &Track, pixel_lo: Vec3, pixel_hi: Vec3) -> f64 {
        let (cluster_lo, cluster_hi) = track.cluster_bounds(track.setpoint, track.setpoint + track.direction);
        let cluster_volume = (cluster_hi.x - cluster_lo.x) * (cluster_hi.y - cluster_lo.y) * (cluster_hi.z - cluster_lo.z);
        if cluster_volume <= 0.0 {
            return 0.0;
        }
        let overlap = overlap_volume(cluster_lo, cluster_hi, pixel_lo, pixel_hi);
        self.charge_scale * overlap / cluster_volume
    }
}
