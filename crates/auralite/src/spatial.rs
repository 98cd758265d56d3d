//! The spatialiser: a pure function from (listener, source, output layout)
//! to a pair of (speaker indices, gains).

use crate::types::Vec3;

/// Distance attenuation model, selectable per-context or per-source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum DistanceModel {
    #[default]
    None,
    Inverse,
    InverseClamped,
    Linear,
    LinearClamped,
    Exponent,
    ExponentClamped,
}

#[derive(Debug, Clone, Copy)]
pub struct ListenerState {
    pub position: Vec3,
    pub at: Vec3,
    pub up: Vec3,
    pub gain: f32,
}

impl Default for ListenerState {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            at: Vec3::new(0.0, 0.0, -1.0),
            up: Vec3::new(0.0, 1.0, 0.0),
            gain: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SourceSpatialParams {
    pub position: Vec3,
    pub source_relative: bool,
    pub gain: f32,
    pub min_gain: f32,
    pub max_gain: f32,
    pub reference_distance: f32,
    pub max_distance: f32,
    pub rolloff: f32,
    pub direction: Vec3,
    pub cone_inner_angle_deg: f32,
    pub cone_outer_angle_deg: f32,
    pub cone_outer_gain: f32,
    pub distance_model: DistanceModel,
    /// Source buffer channel count; the spatialiser only spatialises mono
    /// sources (spec §4.4 step 1 / Non-goals).
    pub source_channels: u8,
}

/// Output channel layout the mixer is writing into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    Mono,
    Stereo,
    Surround4,
    Surround4_1,
    Surround5_1,
    Surround6_1,
    Surround7_1,
}

impl ChannelLayout {
    pub fn channel_count(self) -> usize {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
            ChannelLayout::Surround4 => 4,
            ChannelLayout::Surround4_1 => 5,
            ChannelLayout::Surround5_1 => 6,
            ChannelLayout::Surround6_1 => 7,
            ChannelLayout::Surround7_1 => 8,
        }
    }

    /// (angle in degrees from listener-front, clockwise; output channel
    /// index), LFE channels excluded — they are never spatialised.
    fn speaker_table(self) -> &'static [(f32, usize)] {
        match self {
            ChannelLayout::Surround4 => &[(-45.0, 0), (45.0, 1), (-135.0, 2), (135.0, 3)],
            ChannelLayout::Surround4_1 => &[(-45.0, 0), (45.0, 1), (-135.0, 3), (135.0, 4)],
            ChannelLayout::Surround5_1 => {
                &[(-30.0, 0), (30.0, 1), (-110.0, 4), (110.0, 5)]
            }
            ChannelLayout::Surround6_1 => {
                &[(-30.0, 0), (30.0, 1), (180.0, 4), (-110.0, 5), (110.0, 6)]
            }
            ChannelLayout::Surround7_1 => &[
                (-30.0, 0),
                (30.0, 1),
                (-90.0, 4),
                (90.0, 5),
                (-150.0, 6),
                (150.0, 7),
            ],
            ChannelLayout::Mono | ChannelLayout::Stereo => &[],
        }
    }
}

/// The spatialiser's cached output for one source: which two output
/// channels carry its signal, and at what gain.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpatialOutput {
    pub speakers: [usize; 2],
    pub gains: [f32; 2],
}

pub fn distance_gain(d: f32, reference: f32, max: f32, rolloff: f32, model: DistanceModel) -> f32 {
    match model {
        DistanceModel::None => 1.0,
        DistanceModel::Inverse => {
            reference / (reference + rolloff * (d - reference)).max(f32::EPSILON)
        }
        DistanceModel::InverseClamped => {
            let d = d.clamp(reference, max);
            reference / (reference + rolloff * (d - reference)).max(f32::EPSILON)
        }
        DistanceModel::Linear => {
            let denom = (max - reference).max(f32::EPSILON);
            (1.0 - rolloff * (d.min(max) - reference) / denom).clamp(0.0, 1.0)
        }
        DistanceModel::LinearClamped => {
            let d = d.max(reference);
            let denom = (max - reference).max(f32::EPSILON);
            (1.0 - rolloff * (d.min(max) - reference) / denom).clamp(0.0, 1.0)
        }
        DistanceModel::Exponent => {
            if d <= 0.0 || reference <= 0.0 {
                1.0
            } else {
                (d / reference).powf(-rolloff)
            }
        }
        DistanceModel::ExponentClamped => {
            let d = d.clamp(reference, max);
            (d / reference).powf(-rolloff)
        }
    }
}

fn cone_attenuation(direction: Vec3, to_listener: Vec3, inner_deg: f32, outer_deg: f32, outer_gain: f32) -> f32 {
    if inner_deg >= outer_deg || direction.length() == 0.0 {
        return 1.0;
    }
    let dir_len = direction.length();
    let tl_len = to_listener.length();
    if tl_len == 0.0 {
        return 1.0;
    }
    let cos_angle = (direction.dot(to_listener) / (dir_len * tl_len)).clamp(-1.0, 1.0);
    let angle_deg = cos_angle.acos().to_degrees();

    if angle_deg <= inner_deg {
        1.0
    } else if angle_deg >= outer_deg {
        outer_gain
    } else {
        let t = (angle_deg - inner_deg) / (outer_deg - inner_deg);
        1.0 + t * (outer_gain - 1.0)
    }
}

/// Constant power panning for a signed angle theta (radians, 0 = front,
/// positive = right), per spec §4.4 step 9.
fn constant_power_pan(theta: f32) -> (f32, f32) {
    const SQRT_HALF: f32 = std::f32::consts::FRAC_1_SQRT_2;
    let deg = theta.to_degrees();

    if (-45.0..=45.0).contains(&deg) {
        let (sin, cos) = theta.sin_cos();
        ((cos - sin) * SQRT_HALF, (cos + sin) * SQRT_HALF)
    } else if deg > 45.0 && deg <= 135.0 {
        (0.0, 1.0)
    } else if deg < -45.0 && deg >= -135.0 {
        (1.0, 0.0)
    } else {
        // Behind the listener: fold by pi and reapply the frontal formula.
        let folded = if theta >= 0.0 { theta - std::f32::consts::PI } else { theta + std::f32::consts::PI };
        let (sin, cos) = folded.sin_cos();
        ((cos - sin) * SQRT_HALF, (cos + sin) * SQRT_HALF)
    }
}

/// Divisions per full circle for the VBAP bucket table (10 degrees each).
const VBAP_DIVISIONS: usize = 36;

struct VbapTable {
    /// bucket -> (speaker_a, speaker_b, inverse 2x2 matrix row-major)
    buckets: Vec<(usize, usize, [f32; 4])>,
}

fn invert_2x2(m: [f32; 4]) -> [f32; 4] {
    let det = m[0] * m[3] - m[1] * m[2];
    let det = if det.abs() < 1e-6 { 1e-6 } else { det };
    [m[3] / det, -m[1] / det, -m[2] / det, m[0] / det]
}

fn build_vbap_table(layout: ChannelLayout) -> VbapTable {
    let speakers = layout.speaker_table();
    let mut buckets = Vec::with_capacity(VBAP_DIVISIONS);

    for div in 0..VBAP_DIVISIONS {
        let angle_deg = div as f32 * (360.0 / VBAP_DIVISIONS as f32);
        let angle = angle_deg.to_radians();

        // Find the pair of adjacent speakers (by angular distance) that
        // brackets this division.
        let mut best: Option<(usize, usize, f32)> = None;
        for i in 0..speakers.len() {
            for j in (i + 1)..speakers.len() {
                let (a_deg, _) = speakers[i];
                let (b_deg, _) = speakers[j];
                let span = angular_span(a_deg, b_deg);
                if angle_within(angle_deg, a_deg, b_deg) {
                    match &best {
                        Some((_, _, best_span)) if *best_span <= span => {}
                        _ => best = Some((i, j, span)),
                    }
                }
            }
        }
        let (i, j) = best.map(|(i, j, _)| (i, j)).unwrap_or((0, 0.min(speakers.len().saturating_sub(1))));

        let (a_deg, a_ch) = speakers.get(i).copied().unwrap_or((0.0, 0));
        let (b_deg, b_ch) = speakers.get(j).copied().unwrap_or((0.0, 0));
        let a_rad = a_deg.to_radians();
        let b_rad = b_deg.to_radians();
        let m = [a_rad.cos(), b_rad.cos(), a_rad.sin(), b_rad.sin()];
        let _ = angle;
        buckets.push((a_ch, b_ch, invert_2x2(m)));
    }

    VbapTable { buckets }
}

fn angular_span(a_deg: f32, b_deg: f32) -> f32 {
    let mut diff = (a_deg - b_deg).abs() % 360.0;
    if diff > 180.0 {
        diff = 360.0 - diff;
    }
    diff
}

fn angle_within(angle_deg: f32, a_deg: f32, b_deg: f32) -> bool {
    // True if `angle_deg` lies on the minor arc between a and b.
    let span = angular_span(a_deg, b_deg);
    let to_a = angular_span(angle_deg, a_deg);
    let to_b = angular_span(angle_deg, b_deg);
    (to_a + to_b - span).abs() < 1.0
}

/// Spatialise a mono source. Returns `None` when the source should take
/// the non-spatialised path (caller fills in the degenerate output).
pub fn spatialise(
    listener: &ListenerState,
    source: &SourceSpatialParams,
    layout: ChannelLayout,
) -> SpatialOutput {
    if source.distance_model == DistanceModel::None
        || source.source_channels != 1
        || source.rolloff == 0.0
    {
        let g = source.gain.clamp(source.min_gain, source.max_gain) * listener.gain;
        return SpatialOutput { speakers: [0, 1.min(layout.channel_count() - 1)], gains: [g, g] };
    }

    let p = if source.source_relative {
        source.position
    } else {
        source.position - listener.position
    };
    let d = p.length();

    let g_d = distance_gain(d, source.reference_distance, source.max_distance, source.rolloff, source.distance_model);
    let mut g = g_d * source.gain;

    if source.cone_inner_angle_deg < source.cone_outer_angle_deg {
        let to_listener = p.scale(-1.0);
        g *= cone_attenuation(
            source.direction,
            to_listener,
            source.cone_inner_angle_deg,
            source.cone_outer_angle_deg,
            source.cone_outer_gain,
        );
    }

    g = g.clamp(source.min_gain, source.max_gain) * listener.gain;

    let v = p - listener.up.scale(p.dot(listener.up));
    let theta = if v.length() > 0.0 && listener.at.length() > 0.0 {
        let cos_t = (listener.at.dot(v) / (listener.at.length() * v.length())).clamp(-1.0, 1.0);
        let unsigned = cos_t.acos();
        let r = listener.at.cross(listener.up);
        if r.dot(v) < 0.0 { -unsigned } else { unsigned }
    } else {
        0.0
    };

    match layout {
        ChannelLayout::Mono => SpatialOutput { speakers: [0, 0], gains: [g, g] },
        ChannelLayout::Stereo => {
            let (l, r) = constant_power_pan(theta);
            SpatialOutput { speakers: [0, 1], gains: [l * g, r * g] }
        }
        _ => {
            let table = build_vbap_table(layout);
            let wrapped = theta.rem_euclid(std::f32::consts::TAU);
            let bucket = ((wrapped.to_degrees() / (360.0 / VBAP_DIVISIONS as f32)).floor() as usize)
                % VBAP_DIVISIONS;
            let (a_ch, b_ch, inv) = table.buckets[bucket];
            let (c, s) = (wrapped.cos(), wrapped.sin());
            let a = inv[0] * c + inv[1] * s;
            let b = inv[2] * c + inv[3] * s;
            let norm = (a * a + b * b).sqrt().max(1e-6);
            SpatialOutput {
                speakers: [a_ch, b_ch],
                gains: [(a / norm) * g, (b / norm) * g],
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_source() -> SourceSpatialParams {
        SourceSpatialParams {
            position: Vec3::ZERO,
            source_relative: false,
            gain: 1.0,
            min_gain: 0.0,
            max_gain: 1.0,
            reference_distance: 1.0,
            max_distance: 100.0,
            rolloff: 1.0,
            direction: Vec3::ZERO,
            cone_inner_angle_deg: 360.0,
            cone_outer_angle_deg: 360.0,
            cone_outer_gain: 0.0,
            distance_model: DistanceModel::InverseClamped,
            source_channels: 1,
        }
    }

    #[test]
    fn inverse_distance_clamped_matches_worked_example() {
        // Scenario 2 from spec §8: ref=1, max=5, rolloff=1, d=10 -> clamp to 5.
        let g = distance_gain(10.0, 1.0, 5.0, 1.0, DistanceModel::InverseClamped);
        assert!((g - 0.2).abs() < 1e-5, "got {g}");
    }

    #[test]
    fn static_mono_panning_right() {
        let listener = ListenerState::default();
        let mut source = base_source();
        source.position = Vec3::new(1.0, 0.0, 0.0);
        source.rolloff = 0.0; // non-spatialised path per scenario 1
        let out = spatialise(&listener, &source, ChannelLayout::Stereo);
        // rolloff=0 takes the non-spatialised path: equal L/R.
        assert_eq!(out.gains[0], out.gains[1]);
    }

    #[test]
    fn panning_right_gives_r_gte_l() {
        let listener = ListenerState::default();
        let mut source = base_source();
        source.position = Vec3::new(1.0, 0.0, 0.0);
        source.reference_distance = 1.0;
        source.max_distance = 1.0;
        source.rolloff = 0.0001;
        let out = spatialise(&listener, &source, ChannelLayout::Stereo);
        assert!(out.gains[1] >= out.gains[0]);
    }

    #[test]
    fn non_spatialised_path_for_stereo_source() {
        let listener = ListenerState::default();
        let mut source = base_source();
        source.source_channels = 2;
        let out = spatialise(&listener, &source, ChannelLayout::Stereo);
        assert_eq!(out.gains[0], out.gains[1]);
    }
}
