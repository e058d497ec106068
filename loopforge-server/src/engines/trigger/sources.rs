//! Trigger sources
//!
//! A trigger source decides *when* triggers fire. The set is closed: grid,
//! Euclidean, MIDI, transient-follow, probability, polyrhythmic, micro-timing,
//! juke pattern and offbeat. Every source answers `trigger_times` (beats) and
//! `velocity(time)`.
//!
//! All randomness flows through the caller's PRNG so sequences are
//! reproducible from a seed.

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use loopforge_common::{Error, Result};

/// Times closer than this are considered the same trigger.
const TIME_EPSILON: f64 = 1e-3;

fn default_subdivision() -> f64 {
    1.0
}

fn default_hits() -> usize {
    4
}

fn default_steps() -> usize {
    16
}

fn default_base_note() -> i64 {
    36
}

fn default_offset_range() -> (f64, f64) {
    (-0.1, 0.1)
}

fn default_true() -> bool {
    true
}

fn default_pattern_name() -> String {
    "juke_basic".to_string()
}

fn default_loop_length() -> f64 {
    4.0
}

fn default_base_subdivision() -> f64 {
    4.0
}

fn default_offbeat_ratio() -> f64 {
    1.0 / 3.0
}

fn default_swing() -> f64 {
    0.5
}

fn default_offbeat_pattern() -> Vec<bool> {
    vec![false; 16]
}

fn default_poly_layers() -> Vec<PolyLayer> {
    vec![PolyLayer {
        hits: 4,
        steps: 4,
        subdivision: 1.0,
        offset: 0.0,
    }]
}

/// Grid triggering at regular intervals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSource {
    /// Triggers per beat (1=quarter, 2=eighth, 4=sixteenth)
    #[serde(default = "default_subdivision")]
    pub subdivision: f64,
    /// Phase offset in beats
    #[serde(default)]
    pub offset: f64,
}

impl Default for GridSource {
    fn default() -> Self {
        Self {
            subdivision: 1.0,
            offset: 0.0,
        }
    }
}

/// Euclidean rhythm: `hits` distributed as evenly as possible over `steps`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EuclideanSource {
    #[serde(default = "default_hits")]
    pub hits: usize,
    #[serde(default = "default_steps")]
    pub steps: usize,
    #[serde(default)]
    pub rotation: usize,
}

impl EuclideanSource {
    /// The rotated boolean pattern this source tiles.
    pub fn pattern(&self) -> Vec<bool> {
        let mut pattern = bjorklund(self.hits.min(self.steps), self.steps);
        if self.steps > 0 {
            let rotation = self.rotation % self.steps;
            pattern.rotate_left(rotation);
        }
        pattern
    }
}

/// One MIDI note in a [`MidiSource`] pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidiNote {
    pub time: f64,
    pub note: i64,
    pub velocity: i64,
}

/// MIDI note data as a trigger source; note number maps to slice index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidiSource {
    #[serde(default)]
    pub notes: Vec<MidiNote>,
    /// MIDI note that maps to slice 0
    #[serde(default = "default_base_note")]
    pub base_note: i64,
}

impl MidiSource {
    fn note_at(&self, time: f64) -> Option<&MidiNote> {
        self.notes
            .iter()
            .find(|n| (n.time - time).abs() < TIME_EPSILON)
    }

    /// Unclamped slice offset for the note sounding at `time`.
    pub fn slice_index_at(&self, time: f64) -> i64 {
        self.note_at(time).map(|n| n.note - self.base_note).unwrap_or(0)
    }
}

/// Another stem's transients as the trigger source.
///
/// One pattern "drives" another: e.g. drum transients triggering vocal slices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransientFollowSource {
    /// Times in beats
    #[serde(default)]
    pub transient_times: Vec<f64>,
    #[serde(default)]
    pub transient_strengths: Vec<f64>,
    /// Offset; negative anticipates the followed stem
    #[serde(default)]
    pub delay_beats: f64,
}

/// Per-step trigger probability, Elektron-style.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbabilitySource {
    #[serde(default = "default_steps")]
    pub steps: usize,
    /// Probability per step; missing steps default to 1.0
    #[serde(default)]
    pub probabilities: Vec<f64>,
    #[serde(default = "default_subdivision")]
    pub subdivision: f64,
}

impl ProbabilitySource {
    fn probability(&self, step: usize) -> f64 {
        if self.probabilities.is_empty() {
            1.0
        } else {
            self.probabilities[step % self.probabilities.len()]
        }
    }
}

/// One layer of a polyrhythmic stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolyLayer {
    pub hits: usize,
    pub steps: usize,
    /// Steps per beat (1.0 = quarters, 4.0 = sixteenths)
    pub subdivision: f64,
    /// Phase offset in beats
    #[serde(default)]
    pub offset: f64,
}

/// Simultaneous Euclidean layers on different time signatures
/// (kick on 4/4, snare on 3/4, hats on 5/8).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolyrhythmicSource {
    #[serde(default = "default_poly_layers")]
    pub layers: Vec<PolyLayer>,
}

/// MPC-style micro-timing: wraps a base source and nudges each trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicroTimingSource {
    pub base_source: Box<TriggerSource>,
    /// (min, max) offset in beats
    #[serde(default = "default_offset_range")]
    pub offset_range: (f64, f64),
    /// Per-step offsets applied cyclically when not randomizing
    #[serde(default)]
    pub offset_pattern: Vec<f64>,
    #[serde(default = "default_true")]
    pub randomize: bool,
}

/// Named juke/ghetto-house pattern, or a custom `(time, velocity)` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JukePatternSource {
    #[serde(default = "default_pattern_name")]
    pub pattern_name: String,
    /// Custom pattern used when `pattern_name` is "custom"
    #[serde(default)]
    pub pattern: Option<Vec<(f64, f64)>>,
    /// Pattern length in beats
    #[serde(default = "default_loop_length")]
    pub loop_length: f64,
}

/// Classic juke/footwork patterns.
const JUKE_BASIC: &[(f64, f64)] = &[
    (0.0, 1.0),
    (0.5, 0.8),
    (1.0, 0.6),
    (1.5, 0.9),
    (2.0, 0.7),
    (2.5, 0.5),
    (3.0, 1.0),
    (3.5, 0.8),
];

const GHETTO_HOUSE: &[(f64, f64)] = &[
    (0.0, 1.0),
    (0.25, 0.4),
    (0.5, 0.9),
    (0.75, 0.3),
    (1.0, 0.8),
    (1.25, 0.5),
    (1.5, 0.9),
    (1.75, 0.4),
    (2.0, 1.0),
    (2.25, 0.3),
    (2.5, 0.9),
    (2.75, 0.5),
    (3.0, 0.8),
    (3.25, 0.4),
    (3.5, 0.9),
    (3.75, 0.3),
];

const FOOTWORK_POLY: &[(f64, f64)] = &[
    (0.0, 1.0),
    (0.33, 0.7),
    (0.67, 0.5),
    (1.0, 0.9),
    (1.33, 0.6),
    (1.67, 0.4),
    (2.0, 1.0),
    (2.33, 0.8),
    (2.67, 0.5),
    (3.0, 0.9),
    (3.33, 0.7),
    (3.67, 0.4),
];

impl JukePatternSource {
    /// Resolve the active `(time, velocity)` pattern.
    pub fn resolved_pattern(&self) -> Vec<(f64, f64)> {
        if self.pattern_name == "custom" {
            if let Some(pattern) = &self.pattern {
                return pattern.clone();
            }
        }
        match self.pattern_name.as_str() {
            "ghetto_house" => GHETTO_HOUSE.to_vec(),
            "footwork_poly" => FOOTWORK_POLY.to_vec(),
            _ => JUKE_BASIC.to_vec(),
        }
    }
}

/// Offbeat timing: shifts flagged steps off the base grid for swing/triplet
/// feel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffbeatSource {
    #[serde(default = "default_base_subdivision")]
    pub base_subdivision: f64,
    /// How far off-grid (1/3 = triplet feel)
    #[serde(default = "default_offbeat_ratio")]
    pub offbeat_ratio: f64,
    #[serde(default = "default_swing")]
    pub swing_amount: f64,
    /// Which steps get offset; cycled over the step index
    #[serde(default = "default_offbeat_pattern")]
    pub pattern: Vec<bool>,
}

/// Closed set of trigger sources, tagged with the wire names the dict form
/// uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TriggerSource {
    #[serde(rename = "GridTriggerSource")]
    Grid(GridSource),
    #[serde(rename = "EuclideanTriggerSource")]
    Euclidean(EuclideanSource),
    #[serde(rename = "MIDITriggerSource")]
    Midi(MidiSource),
    #[serde(rename = "TransientFollowSource")]
    TransientFollow(TransientFollowSource),
    #[serde(rename = "ProbabilityTriggerSource")]
    Probability(ProbabilitySource),
    #[serde(rename = "PolyrhythmicTriggerSource")]
    Polyrhythmic(PolyrhythmicSource),
    #[serde(rename = "MicroTimingTriggerSource")]
    MicroTiming(MicroTimingSource),
    #[serde(rename = "JukePatternTriggerSource")]
    JukePattern(JukePatternSource),
    #[serde(rename = "OffbeatTriggerSource")]
    Offbeat(OffbeatSource),
}

impl Default for TriggerSource {
    fn default() -> Self {
        TriggerSource::Grid(GridSource::default())
    }
}

impl TriggerSource {
    /// Build a source from its dict form.
    ///
    /// Total over the tag set: an unknown `type` yields the grid default with
    /// a diagnostic; a known tag with a malformed body is a config error.
    pub fn from_value(value: &serde_json::Value) -> Result<TriggerSource> {
        let Some(object) = value.as_object() else {
            if value.is_null() {
                return Ok(TriggerSource::default());
            }
            return Err(Error::BadInput("trigger source must be an object".to_string()));
        };
        if object.is_empty() {
            return Ok(TriggerSource::default());
        }

        let known = [
            "GridTriggerSource",
            "EuclideanTriggerSource",
            "MIDITriggerSource",
            "TransientFollowSource",
            "ProbabilityTriggerSource",
            "PolyrhythmicTriggerSource",
            "MicroTimingTriggerSource",
            "JukePatternTriggerSource",
            "OffbeatTriggerSource",
        ];
        let tag = object.get("type").and_then(|t| t.as_str()).unwrap_or("");
        if !known.contains(&tag) {
            tracing::warn!(source_type = tag, "Unknown trigger source type, using grid");
            let mut grid = value.clone();
            grid["type"] = serde_json::Value::String("GridTriggerSource".to_string());
            return serde_json::from_value(grid)
                .map_err(|e| Error::BadInput(format!("bad trigger source config: {e}")));
        }

        serde_json::from_value(value.clone())
            .map_err(|e| Error::BadInput(format!("bad trigger source config: {e}")))
    }

    /// The dict form; inverse of [`TriggerSource::from_value`].
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("trigger source serialization is infallible")
    }

    /// Times (in beats) when triggers should fire, ascending.
    pub fn trigger_times(&self, duration_beats: f64, bpm: f64, rng: &mut StdRng) -> Vec<f64> {
        match self {
            TriggerSource::Grid(grid) => {
                let step = 1.0 / grid.subdivision;
                let mut times = Vec::new();
                let mut t = grid.offset;
                while t < duration_beats {
                    times.push(t);
                    t += step;
                }
                times
            }

            TriggerSource::Euclidean(euclid) => {
                let pattern = euclid.pattern();
                if pattern.is_empty() || euclid.steps == 0 {
                    return Vec::new();
                }
                let step_duration = duration_beats / euclid.steps as f64;
                let pattern_duration = pattern.len() as f64 * step_duration;
                let num_repeats = (duration_beats / pattern_duration).ceil() as usize;

                let mut times = Vec::new();
                for repeat in 0..num_repeats {
                    for (i, hit) in pattern.iter().enumerate() {
                        if *hit {
                            let time = repeat as f64 * pattern_duration + i as f64 * step_duration;
                            if time < duration_beats {
                                times.push(time);
                            }
                        }
                    }
                }
                times
            }

            TriggerSource::Midi(midi) => midi
                .notes
                .iter()
                .map(|n| n.time)
                .filter(|&t| t < duration_beats)
                .collect(),

            TriggerSource::TransientFollow(follow) => follow
                .transient_times
                .iter()
                .map(|&t| t + follow.delay_beats)
                .filter(|&t| (0.0..duration_beats).contains(&t))
                .collect(),

            TriggerSource::Probability(prob) => {
                let step_duration = 1.0 / prob.subdivision;
                let mut times = Vec::new();
                let mut step = 0usize;
                let mut time = 0.0;
                while time < duration_beats {
                    if rng.gen::<f64>() < prob.probability(step) {
                        times.push(time);
                    }
                    time += step_duration;
                    step += 1;
                }
                times
            }

            TriggerSource::Polyrhythmic(poly) => {
                let mut all_times: Vec<f64> = Vec::new();
                for layer in &poly.layers {
                    let hits = layer.hits.max(1);
                    let steps = layer.steps.max(1);
                    let subdivision = layer.subdivision.max(0.25);
                    let pattern = bjorklund(hits.min(steps), steps);
                    let step_duration = 1.0 / subdivision;

                    let mut step = 0usize;
                    loop {
                        let time = step as f64 * step_duration + layer.offset;
                        if time >= duration_beats {
                            break;
                        }
                        if time >= 0.0 && pattern[step % pattern.len()] {
                            all_times.push(time);
                        }
                        step += 1;
                    }
                }
                all_times.sort_by(|a, b| a.partial_cmp(b).unwrap());
                all_times.dedup_by(|a, b| (*a - *b).abs() < TIME_EPSILON);
                all_times
            }

            TriggerSource::MicroTiming(micro) => {
                let base_times = micro.base_source.trigger_times(duration_beats, bpm, rng);
                let mut times = Vec::new();
                for (i, time) in base_times.into_iter().enumerate() {
                    let offset = if micro.randomize {
                        rng.gen_range(micro.offset_range.0..=micro.offset_range.1)
                    } else if micro.offset_pattern.is_empty() {
                        0.0
                    } else {
                        micro.offset_pattern[i % micro.offset_pattern.len()]
                    };
                    let shifted = time + offset;
                    if (0.0..duration_beats).contains(&shifted) {
                        times.push(shifted);
                    }
                }
                times.sort_by(|a, b| a.partial_cmp(b).unwrap());
                times
            }

            TriggerSource::JukePattern(juke) => {
                let pattern = juke.resolved_pattern();
                let num_loops = (duration_beats / juke.loop_length).ceil() as usize;
                let mut times = Vec::new();
                for loop_idx in 0..num_loops {
                    for (time_offset, _velocity) in &pattern {
                        let time = loop_idx as f64 * juke.loop_length + time_offset;
                        if time < duration_beats {
                            times.push(time);
                        }
                    }
                }
                times.sort_by(|a, b| a.partial_cmp(b).unwrap());
                times
            }

            TriggerSource::Offbeat(offbeat) => {
                let step_duration = 1.0 / offbeat.base_subdivision;
                let mut times = Vec::new();
                let mut step = 0usize;
                let mut time = 0.0;
                while time < duration_beats {
                    let should_offset = !offbeat.pattern.is_empty()
                        && offbeat.pattern[step % offbeat.pattern.len()];
                    let trigger_time = if should_offset {
                        time + step_duration * offbeat.offbeat_ratio * offbeat.swing_amount
                    } else {
                        time
                    };
                    if (0.0..duration_beats).contains(&trigger_time) {
                        times.push(trigger_time);
                    }
                    time += step_duration;
                    step += 1;
                }
                times
            }
        }
    }

    /// Velocity/intensity at a trigger time, in [0, 1].
    pub fn velocity(&self, time: f64) -> f64 {
        match self {
            TriggerSource::Midi(midi) => midi
                .note_at(time)
                .map(|n| n.velocity as f64 / 127.0)
                .unwrap_or(1.0),

            TriggerSource::TransientFollow(follow) => follow
                .transient_times
                .iter()
                .position(|&t| (t + follow.delay_beats - time).abs() < TIME_EPSILON)
                .and_then(|i| follow.transient_strengths.get(i).copied())
                .unwrap_or(1.0),

            TriggerSource::MicroTiming(micro) => micro.base_source.velocity(time),

            TriggerSource::JukePattern(juke) => {
                let time_in_loop = time.rem_euclid(juke.loop_length);
                juke.resolved_pattern()
                    .iter()
                    .find(|(offset, _)| (time_in_loop - offset).abs() < 0.01)
                    .map(|(_, velocity)| *velocity)
                    .unwrap_or(1.0)
            }

            _ => 1.0,
        }
    }
}

/// Bjorklund's algorithm: distribute `hits` among `steps` as evenly as
/// possible, rotated so the pattern starts on a pulse.
pub fn bjorklund(hits: usize, steps: usize) -> Vec<bool> {
    if steps == 0 {
        return Vec::new();
    }
    if hits == 0 {
        return vec![false; steps];
    }
    if hits >= steps {
        return vec![true; steps];
    }

    let mut counts = Vec::new();
    let mut remainders = vec![hits];
    let mut divisor = steps - hits;
    let mut level = 0usize;

    loop {
        counts.push(divisor / remainders[level]);
        remainders.push(divisor % remainders[level]);
        divisor = remainders[level];
        level += 1;
        if remainders[level] <= 1 {
            break;
        }
    }
    counts.push(divisor);

    fn build(
        level: i64,
        counts: &[usize],
        remainders: &[usize],
        pattern: &mut Vec<bool>,
    ) {
        match level {
            -1 => pattern.push(false),
            -2 => pattern.push(true),
            _ => {
                let l = level as usize;
                for _ in 0..counts[l] {
                    build(level - 1, counts, remainders, pattern);
                }
                if remainders[l] != 0 {
                    build(level - 2, counts, remainders, pattern);
                }
            }
        }
    }

    let mut pattern = Vec::with_capacity(steps);
    build(level as i64, &counts, &remainders, &mut pattern);

    // Rotate so the first step is a pulse
    if let Some(first_pulse) = pattern.iter().position(|&p| p) {
        pattern.rotate_left(first_pulse);
    }
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    fn pattern_string(pattern: &[bool]) -> String {
        pattern.iter().map(|&p| if p { 'x' } else { '.' }).collect()
    }

    #[test]
    fn test_bjorklund_3_8() {
        assert_eq!(pattern_string(&bjorklund(3, 8)), "x..x..x.");
    }

    #[test]
    fn test_bjorklund_5_8() {
        assert_eq!(pattern_string(&bjorklund(5, 8)), "x.xx.xx.");
    }

    #[test]
    fn test_bjorklund_bounds() {
        assert_eq!(bjorklund(0, 8), vec![false; 8]);
        assert_eq!(bjorklund(8, 8), vec![true; 8]);
        assert_eq!(bjorklund(9, 8), vec![true; 8]);
        assert!(bjorklund(3, 0).is_empty());
    }

    #[test]
    fn test_bjorklund_hit_counts() {
        for steps in 1..=16 {
            for hits in 0..=steps {
                let pattern = bjorklund(hits, steps);
                assert_eq!(pattern.len(), steps);
                assert_eq!(pattern.iter().filter(|&&p| p).count(), hits);
            }
        }
    }

    #[test]
    fn test_grid_times() {
        let source = TriggerSource::Grid(GridSource {
            subdivision: 4.0,
            offset: 0.25,
        });
        let times = source.trigger_times(1.0, 120.0, &mut rng());
        assert_eq!(times, vec![0.25, 0.5, 0.75]);
    }

    #[test]
    fn test_euclidean_full_and_empty() {
        let full = TriggerSource::Euclidean(EuclideanSource {
            hits: 8,
            steps: 8,
            rotation: 0,
        });
        let times = full.trigger_times(4.0, 120.0, &mut rng());
        assert_eq!(times.len(), 8);
        // hits == steps → equal spacing
        for (i, t) in times.iter().enumerate() {
            assert!((t - i as f64 * 0.5).abs() < 1e-9);
        }

        let empty = TriggerSource::Euclidean(EuclideanSource {
            hits: 0,
            steps: 8,
            rotation: 0,
        });
        assert!(empty.trigger_times(4.0, 120.0, &mut rng()).is_empty());
    }

    #[test]
    fn test_euclidean_rotation_shifts_pattern() {
        let source = EuclideanSource {
            hits: 3,
            steps: 8,
            rotation: 2,
        };
        let base = bjorklund(3, 8);
        let mut expected = base.clone();
        expected.rotate_left(2);
        assert_eq!(source.pattern(), expected);
    }

    #[test]
    fn test_probability_all_or_nothing() {
        let always = TriggerSource::Probability(ProbabilitySource {
            steps: 8,
            probabilities: vec![1.0; 8],
            subdivision: 2.0,
        });
        let times = always.trigger_times(4.0, 120.0, &mut rng());
        assert_eq!(times.len(), 8);

        let never = TriggerSource::Probability(ProbabilitySource {
            steps: 8,
            probabilities: vec![0.0; 8],
            subdivision: 2.0,
        });
        assert!(never.trigger_times(4.0, 120.0, &mut rng()).is_empty());
    }

    #[test]
    fn test_probability_is_seed_deterministic() {
        let source = TriggerSource::Probability(ProbabilitySource {
            steps: 16,
            probabilities: vec![0.5; 16],
            subdivision: 4.0,
        });
        let a = source.trigger_times(8.0, 120.0, &mut StdRng::seed_from_u64(7));
        let b = source.trigger_times(8.0, 120.0, &mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
    }

    #[test]
    fn test_midi_velocity_and_mapping() {
        let source = TriggerSource::Midi(MidiSource {
            notes: vec![
                MidiNote { time: 0.0, note: 36, velocity: 127 },
                MidiNote { time: 1.0, note: 40, velocity: 64 },
            ],
            base_note: 36,
        });
        let times = source.trigger_times(4.0, 120.0, &mut rng());
        assert_eq!(times, vec![0.0, 1.0]);
        assert!((source.velocity(0.0) - 1.0).abs() < 1e-9);
        assert!((source.velocity(1.0) - 64.0 / 127.0).abs() < 1e-9);

        if let TriggerSource::Midi(midi) = &source {
            assert_eq!(midi.slice_index_at(1.0), 4);
        }
    }

    #[test]
    fn test_transient_follow_delay_and_range() {
        let source = TriggerSource::TransientFollow(TransientFollowSource {
            transient_times: vec![0.0, 1.0, 7.5],
            transient_strengths: vec![0.9, 0.4, 0.8],
            delay_beats: 0.5,
        });
        let times = source.trigger_times(4.0, 120.0, &mut rng());
        assert_eq!(times, vec![0.5, 1.5]);
        assert!((source.velocity(1.5) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_polyrhythmic_unions_and_dedupes() {
        let source = TriggerSource::Polyrhythmic(PolyrhythmicSource {
            layers: vec![
                PolyLayer { hits: 4, steps: 4, subdivision: 1.0, offset: 0.0 },
                PolyLayer { hits: 2, steps: 4, subdivision: 1.0, offset: 0.0 },
            ],
        });
        let times = source.trigger_times(4.0, 120.0, &mut rng());
        // Second layer's hits coincide with the first layer's grid
        assert_eq!(times, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_micro_timing_offsets_within_range() {
        let source = TriggerSource::MicroTiming(MicroTimingSource {
            base_source: Box::new(TriggerSource::Grid(GridSource {
                subdivision: 1.0,
                offset: 0.5,
            })),
            offset_range: (-0.1, 0.1),
            offset_pattern: Vec::new(),
            randomize: true,
        });
        let times = source.trigger_times(8.0, 120.0, &mut rng());
        assert!(!times.is_empty());
        for window in times.windows(2) {
            assert!(window[0] <= window[1]);
        }
        for (i, t) in times.iter().enumerate() {
            let base = 0.5 + i as f64;
            assert!((t - base).abs() <= 0.1 + 1e-9);
        }
    }

    #[test]
    fn test_micro_timing_pattern_mode() {
        let source = TriggerSource::MicroTiming(MicroTimingSource {
            base_source: Box::new(TriggerSource::Grid(GridSource::default())),
            offset_range: (-0.5, 0.5),
            offset_pattern: vec![0.1, -0.1],
            randomize: false,
        });
        let times = source.trigger_times(4.0, 120.0, &mut rng());
        assert_eq!(times, vec![0.1, 0.9, 2.1, 2.9]);
    }

    #[test]
    fn test_juke_pattern_tiles() {
        let source = TriggerSource::JukePattern(JukePatternSource {
            pattern_name: "juke_basic".to_string(),
            pattern: None,
            loop_length: 4.0,
        });
        let times = source.trigger_times(8.0, 160.0, &mut rng());
        assert_eq!(times.len(), 16);
        assert!((source.velocity(0.5) - 0.8).abs() < 1e-9);
        assert!((source.velocity(4.5) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_offbeat_shifts_flagged_steps() {
        let source = TriggerSource::Offbeat(OffbeatSource {
            base_subdivision: 4.0,
            offbeat_ratio: 1.0 / 3.0,
            swing_amount: 0.6,
            pattern: vec![false, true],
        });
        let times = source.trigger_times(1.0, 120.0, &mut rng());
        let swing = 0.25 * (1.0 / 3.0) * 0.6;
        assert_eq!(times.len(), 4);
        assert!((times[0] - 0.0).abs() < 1e-9);
        assert!((times[1] - (0.25 + swing)).abs() < 1e-9);
        assert!((times[2] - 0.5).abs() < 1e-9);
        assert!((times[3] - (0.75 + swing)).abs() < 1e-9);
    }

    #[test]
    fn test_dict_round_trip_every_variant() {
        let sources = vec![
            TriggerSource::Grid(GridSource { subdivision: 4.0, offset: 0.25 }),
            TriggerSource::Euclidean(EuclideanSource { hits: 5, steps: 8, rotation: 2 }),
            TriggerSource::Midi(MidiSource {
                notes: vec![MidiNote { time: 0.5, note: 38, velocity: 100 }],
                base_note: 36,
            }),
            TriggerSource::TransientFollow(TransientFollowSource {
                transient_times: vec![0.0, 1.0],
                transient_strengths: vec![0.9, 0.1],
                delay_beats: 0.25,
            }),
            TriggerSource::Probability(ProbabilitySource {
                steps: 4,
                probabilities: vec![1.0, 0.5, 0.8, 0.2],
                subdivision: 2.0,
            }),
            TriggerSource::Polyrhythmic(PolyrhythmicSource {
                layers: vec![PolyLayer { hits: 3, steps: 4, subdivision: 1.0, offset: 0.5 }],
            }),
            TriggerSource::MicroTiming(MicroTimingSource {
                base_source: Box::new(TriggerSource::Euclidean(EuclideanSource {
                    hits: 5,
                    steps: 8,
                    rotation: 0,
                })),
                offset_range: (-0.05, 0.05),
                offset_pattern: vec![0.01],
                randomize: false,
            }),
            TriggerSource::JukePattern(JukePatternSource {
                pattern_name: "ghetto_house".to_string(),
                pattern: None,
                loop_length: 4.0,
            }),
            TriggerSource::Offbeat(OffbeatSource {
                base_subdivision: 4.0,
                offbeat_ratio: 1.0 / 3.0,
                swing_amount: 0.5,
                pattern: vec![false, true, false, true],
            }),
        ];

        for source in sources {
            let dict = source.to_value();
            let parsed = TriggerSource::from_value(&dict).unwrap();
            assert_eq!(parsed, source);
            assert_eq!(parsed.to_value(), dict);
        }
    }

    #[test]
    fn test_from_value_unknown_type_defaults_to_grid() {
        let value = serde_json::json!({"type": "WobbleTriggerSource", "subdivision": 2.0});
        let source = TriggerSource::from_value(&value).unwrap();
        assert_eq!(
            source,
            TriggerSource::Grid(GridSource { subdivision: 2.0, offset: 0.0 })
        );
    }

    #[test]
    fn test_from_value_empty_defaults_to_grid() {
        assert_eq!(
            TriggerSource::from_value(&serde_json::json!({})).unwrap(),
            TriggerSource::default()
        );
        assert_eq!(
            TriggerSource::from_value(&serde_json::Value::Null).unwrap(),
            TriggerSource::default()
        );
    }

    #[test]
    fn test_from_value_malformed_body_is_error() {
        let value = serde_json::json!({"type": "EuclideanTriggerSource", "hits": "five"});
        assert!(TriggerSource::from_value(&value).is_err());
    }
}
