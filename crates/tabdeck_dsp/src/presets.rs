//! Built-in EQ Presets and Preset Matching

use crate::bands::{adapt_gains, EQ_BANDS};

/// Named EQ preset with 10 band gains and an optional Q
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preset {
    pub name: &'static str,
    pub gains: [f32; 10],
    pub q: Option<f32>,
}

/// List of built-in presets
pub const PRESETS: &[Preset] = &[
    Preset { name: "Flat", gains: [0.0; 10], q: None },
    Preset { name: "Bass Boost", gains: [6.0, 5.0, 3.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0], q: None },
    Preset { name: "Treble Boost", gains: [0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 3.0, 5.0, 6.0, 6.0], q: None },
    Preset { name: "Vocal Clarity", gains: [-2.0, -1.0, 0.0, 2.0, 4.0, 4.0, 3.0, 2.0, 1.0, 0.0], q: Some(1.4) },
    Preset { name: "Bass Reduce", gains: [-6.0, -4.0, -2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0], q: None },
    Preset { name: "Loudness", gains: [4.0, 3.0, 0.0, -1.0, -1.0, 0.0, 1.0, 2.0, 3.0, 4.0], q: None },
    Preset { name: "Speech", gains: [-6.0, -4.0, -1.0, 1.0, 3.0, 4.0, 3.0, 1.0, -2.0, -4.0], q: Some(0.8) },
    Preset { name: "Electronic", gains: [4.0, 3.0, 1.0, 0.0, -2.0, -2.0, 0.0, 1.0, 3.0, 4.0], q: None },
];

/// Look up a built-in preset by exact name
pub fn builtin_preset(name: &str) -> Option<&'static Preset> {
    PRESETS.iter().find(|p| p.name == name)
}

/// Borrowed view of any preset (built-in or user-defined) for matching
#[derive(Debug, Clone, Copy)]
pub struct PresetRef<'a> {
    pub name: &'a str,
    pub gains: &'a [f32],
    pub q: Option<f32>,
}

impl<'a> From<&'a Preset> for PresetRef<'a> {
    fn from(p: &'a Preset) -> Self {
        PresetRef {
            name: p.name,
            gains: &p.gains,
            q: p.q,
        }
    }
}

/// Tolerance for comparing Q values
const Q_EPSILON: f32 = 1e-3;

/// Find the first preset the live state matches.
///
/// Gains match when every band is within `tolerance_db`; preset vectors in
/// another layout are adapted to the current one first. Q is compared only
/// when the preset carries one.
pub fn match_preset<'a>(
    gains: &[f32],
    q: f32,
    presets: &[PresetRef<'a>],
    tolerance_db: f32,
) -> Option<&'a str> {
    let live = adapt_gains(gains, &EQ_BANDS);
    presets
        .iter()
        .find(|preset| {
            let candidate = adapt_gains(preset.gains, &EQ_BANDS);
            let gains_match = live
                .iter()
                .zip(candidate.iter())
                .all(|(a, b)| (a - b).abs() <= tolerance_db);
            let q_match = preset.q.map_or(true, |pq| (pq - q).abs() <= Q_EPSILON);
            gains_match && q_match
        })
        .map(|p| p.name)
}
