//! Trigger engine
//!
//! The generative sequencer: takes a slice bank and a trigger source,
//! produces `TriggerEvent`s, applies rules for conditional behavior.
//!
//! The engine owns a seeded PRNG: the same seed and parameters always produce
//! the identical sequence, so a lucky generative take can be recalled.

mod rules;
mod sources;

pub use rules::{Action, CompiledRule, Condition, TriggerRule};
pub use sources::{
    bjorklund, EuclideanSource, GridSource, JukePatternSource, MicroTimingSource, MidiNote,
    MidiSource, OffbeatSource, PolyLayer, PolyrhythmicSource, ProbabilitySource,
    TransientFollowSource, TriggerSource,
};

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use loopforge_common::{Error, Result};

use super::slice::{SliceBank, WeightBy};

/// How the sequencer selects slices at each trigger time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// Play slices in order
    Sequential,
    /// Uniform random selection
    Random,
    /// Weighted by slice energy
    Probability,
    /// MIDI note → slice index
    MidiMap,
    /// Follow a pattern array
    Pattern,
    /// Follow another stem's transients
    Follow,
    /// Euclidean rhythm generator
    Euclidean,
    /// Full generative mode with weighted jumps
    Chaos,
    /// Footwork-specific sequencing
    Footwork,
}

impl TriggerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerMode::Sequential => "sequential",
            TriggerMode::Random => "random",
            TriggerMode::Probability => "probability",
            TriggerMode::MidiMap => "midi_map",
            TriggerMode::Pattern => "pattern",
            TriggerMode::Follow => "follow",
            TriggerMode::Euclidean => "euclidean",
            TriggerMode::Chaos => "chaos",
            TriggerMode::Footwork => "footwork",
        }
    }
}

/// A single trigger event in a sequence: "play slice X at time T with these
/// parameters".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Time in beats
    pub time: f64,
    /// Which slice to play (-1 = decide at runtime)
    pub slice_index: i64,
    /// 0-1, affects volume/filter
    pub velocity: f64,
    /// How long to play (None = full slice)
    #[serde(default)]
    pub duration: Option<f64>,
    /// Semitones
    #[serde(default)]
    pub pitch_shift: i32,
    /// Play backwards
    #[serde(default)]
    pub reverse: bool,
    /// -1 to 1 (left to right)
    #[serde(default)]
    pub pan: f64,
    /// Hz, for lowpass filter
    #[serde(default)]
    pub filter_cutoff: Option<f64>,

    /// Advisory timing offset in beats; renderers combine `time + micro_offset`
    #[serde(default)]
    pub micro_offset: f64,
    /// TR-808 style pitch sweep (0-1, controls pitch decay)
    #[serde(default)]
    pub envelope_sweep: Option<f64>,
    /// Saturation/distortion level (0-1)
    #[serde(default)]
    pub saturation_amount: f64,
    /// Swing/triplet feel (0-1)
    #[serde(default)]
    pub swing_amount: f64,

    /// What caused this trigger
    #[serde(default)]
    pub triggered_by: Option<String>,
    /// Was this modified by a rule?
    #[serde(default)]
    pub rule_modified: bool,
}

impl TriggerEvent {
    fn new(time: f64, slice_index: i64, velocity: f64, triggered_by: &str) -> Self {
        Self {
            time,
            slice_index,
            velocity,
            duration: None,
            pitch_shift: 0,
            reverse: false,
            pan: 0.0,
            filter_cutoff: None,
            micro_offset: 0.0,
            envelope_sweep: None,
            saturation_amount: 0.0,
            swing_amount: 0.0,
            triggered_by: Some(triggered_by.to_string()),
            rule_modified: false,
        }
    }
}

/// Running state the rule layer's conditions are evaluated over.
#[derive(Debug, Clone)]
pub struct EngineState {
    pub last_slice_index: i64,
    pub consecutive_plays: i64,
    pub total_plays: i64,
    /// Last 16 slice indices
    pub play_history: VecDeque<i64>,
    pub last_trigger_time: f64,
}

const HISTORY_LEN: usize = 16;

impl Default for EngineState {
    fn default() -> Self {
        Self {
            last_slice_index: -1,
            consecutive_plays: 0,
            total_plays: 0,
            play_history: VecDeque::with_capacity(HISTORY_LEN),
            last_trigger_time: 0.0,
        }
    }
}

/// The generative sequencer.
pub struct TriggerEngine {
    mode: TriggerMode,
    source: TriggerSource,
    rules: Vec<CompiledRule>,
    seed: u64,
    rng: StdRng,
    state: EngineState,
}

impl TriggerEngine {
    /// Build an engine. Malformed rule conditions are skipped with a
    /// diagnostic; rule errors never poison the rest of the set.
    pub fn new(
        mode: TriggerMode,
        source: TriggerSource,
        rules: Vec<TriggerRule>,
        seed: u64,
    ) -> Self {
        let compiled = rules
            .into_iter()
            .filter_map(|rule| match CompiledRule::compile(rule) {
                Ok(compiled) => Some(compiled),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed trigger rule");
                    None
                }
            })
            .collect();

        Self {
            mode,
            source,
            rules: compiled,
            seed,
            rng: StdRng::seed_from_u64(seed),
            state: EngineState::default(),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// The generating parameters in their persisted form.
    pub fn params_value(&self) -> serde_json::Value {
        serde_json::json!({
            "mode": self.mode,
            "trigger_source": self.source.to_value(),
            "rules": self.rules.iter().map(|r| &r.rule).collect::<Vec<_>>(),
            "seed": self.seed,
        })
    }

    /// Reset internal state (and re-seed the PRNG) for a new sequence.
    pub fn reset(&mut self) {
        self.state = EngineState::default();
        self.rng = StdRng::seed_from_u64(self.seed);
    }

    /// Generate a sequence of trigger events.
    ///
    /// `slice_bank` enables feature-weighted selection; `num_slices` alone is
    /// enough for the positional modes.
    pub fn generate_sequence(
        &mut self,
        num_slices: usize,
        duration_beats: f64,
        bpm: f64,
        slice_bank: Option<&SliceBank>,
    ) -> Result<Vec<TriggerEvent>> {
        if num_slices == 0 {
            return Err(Error::BadInput("slice bank is empty".to_string()));
        }
        if duration_beats <= 0.0 {
            return Err(Error::BadInput("duration must be positive".to_string()));
        }
        if !(0.0..=300.0).contains(&bpm) || bpm == 0.0 {
            return Err(Error::BadInput(format!("bpm out of range: {bpm}")));
        }

        self.reset();
        let trigger_times = self.source.trigger_times(duration_beats, bpm, &mut self.rng);

        let mut events = Vec::with_capacity(trigger_times.len());
        let mut skip_next = false;

        for time in trigger_times {
            if skip_next {
                skip_next = false;
                continue;
            }

            let slice_index = self.select_slice(num_slices, time, slice_bank)?;
            let velocity = self.source.velocity(time);

            let mut event =
                TriggerEvent::new(time, slice_index as i64, velocity, self.mode.as_str());

            if self.mode == TriggerMode::Footwork {
                self.apply_footwork_params(&mut event, slice_index, velocity, slice_bank);
            }

            // Update state before rules so conditions see the current play
            if slice_index as i64 == self.state.last_slice_index {
                self.state.consecutive_plays += 1;
            } else {
                self.state.consecutive_plays = 1;
            }
            self.state.last_slice_index = slice_index as i64;
            self.state.total_plays += 1;
            self.state.play_history.push_back(slice_index as i64);
            while self.state.play_history.len() > HISTORY_LEN {
                self.state.play_history.pop_front();
            }

            // Rules fire in definition order and may compose on one event
            for rule_idx in 0..self.rules.len() {
                if !self.rules[rule_idx].rule.enabled {
                    continue;
                }
                if !self.rules[rule_idx].condition.evaluate(&self.state) {
                    continue;
                }
                if self.rng.gen::<f64>() < self.rules[rule_idx].rule.probability {
                    let action = self.rules[rule_idx].action.clone();
                    if self.apply_action(&action, &mut event, num_slices) {
                        skip_next = true;
                    }
                }
            }

            events.push(event);
            self.state.last_trigger_time = time;
        }

        Ok(events)
    }

    /// Select which slice to play based on mode.
    fn select_slice(
        &mut self,
        num_slices: usize,
        time: f64,
        slice_bank: Option<&SliceBank>,
    ) -> Result<usize> {
        let index = match self.mode {
            TriggerMode::Sequential
            | TriggerMode::Pattern
            | TriggerMode::Follow
            | TriggerMode::Euclidean => (self.state.total_plays as usize) % num_slices,

            TriggerMode::Random => self.rng.gen_range(0..num_slices),

            TriggerMode::Probability => match slice_bank {
                Some(bank) if !bank.is_empty() => {
                    bank.weighted_index(WeightBy::Energy, 1.0, &mut self.rng)?
                }
                _ => self.rng.gen_range(0..num_slices),
            },

            TriggerMode::MidiMap => match &self.source {
                TriggerSource::Midi(midi) => {
                    let raw = midi.slice_index_at(time);
                    raw.clamp(0, num_slices as i64 - 1) as usize
                }
                _ => 0,
            },

            TriggerMode::Chaos => {
                if self.rng.gen::<f64>() < 0.3 {
                    ((self.state.last_slice_index + 1).rem_euclid(num_slices as i64)) as usize
                } else {
                    match slice_bank {
                        Some(bank) if !bank.is_empty() => {
                            bank.weighted_index(WeightBy::Transient, 1.0, &mut self.rng)?
                        }
                        _ => self.rng.gen_range(0..num_slices),
                    }
                }
            }

            TriggerMode::Footwork => match slice_bank {
                Some(bank) if !bank.is_empty() => {
                    bank.weighted_index(WeightBy::Transient, 1.0, &mut self.rng)?
                }
                _ => self.rng.gen_range(0..num_slices),
            },
        };
        Ok(index.min(num_slices - 1))
    }

    /// Footwork mode stamps extra render parameters on each event.
    fn apply_footwork_params(
        &mut self,
        event: &mut TriggerEvent,
        slice_index: usize,
        velocity: f64,
        slice_bank: Option<&SliceBank>,
    ) {
        // The micro-timing source already jitters trigger times, so stack only
        // a smaller humanization offset on top of it
        event.micro_offset = if matches!(self.source, TriggerSource::MicroTiming(_)) {
            self.rng.gen_range(-0.02..=0.02)
        } else {
            self.rng.gen_range(-0.03..=0.03)
        };

        // Saturation-as-texture, scaled by hit intensity
        event.saturation_amount = 0.3 + velocity * 0.4;

        if let TriggerSource::Offbeat(offbeat) = &self.source {
            event.swing_amount = offbeat.swing_amount;
        }

        if let Some(bank) = slice_bank {
            if let Some(slice) = bank.slices.get(slice_index) {
                if slice.duration < 0.5 && slice.transient_strength > 0.7 {
                    event.envelope_sweep = Some(0.5 + velocity * 0.3);
                }
            }
        }
    }

    /// Apply a rule action; returns whether the next trigger is skipped.
    fn apply_action(&mut self, action: &Action, event: &mut TriggerEvent, num_slices: usize) -> bool {
        let mut skip = false;
        match action {
            Action::SkipNext => skip = true,
            // Duplicate emission is a renderer concern; the event is only
            // flagged as rule-touched
            Action::DoubleTrigger => {}
            Action::PitchUp(semitones) => event.pitch_shift += semitones,
            Action::PitchDown(semitones) => event.pitch_shift -= semitones,
            Action::Reverse => event.reverse = !event.reverse,
            Action::RandomSlice => {
                event.slice_index = self.rng.gen_range(0..num_slices) as i64;
            }
            Action::ResetSequence => {
                self.state = EngineState::default();
            }
            Action::HalfVelocity => event.velocity *= 0.5,
            Action::DoubleVelocity => event.velocity = (event.velocity * 2.0).min(1.0),
            Action::Noop => {}
        }
        event.rule_modified = true;
        skip
    }
}
