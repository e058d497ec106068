//! Trigger rules
//!
//! Conditional behavior over the sequencer's running state:
//! "IF slice 1 plays 3x consecutive THEN skip next trigger".
//!
//! Condition and action strings are parsed once into typed ASTs when an
//! engine is built; evaluation is pure over [`EngineState`]. There is no
//! string-eval path at sequence time.

use serde::{Deserialize, Serialize};

use loopforge_common::{Error, Result};

use super::EngineState;

/// A conditional rule that modifies sequence behavior, in its stored form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRule {
    pub id: String,
    pub name: String,
    /// e.g. "consecutive_plays > 3"
    pub condition: String,
    /// e.g. "skip_next"
    pub action: String,
    /// Chance of the rule firing when its condition holds (0-1)
    #[serde(default = "default_probability")]
    pub probability: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_probability() -> f64 {
    1.0
}

fn default_enabled() -> bool {
    true
}

/// Comparison operators accepted in conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Greater,
    GreaterEqual,
    Equal,
}

/// Parsed condition AST. The grammar is closed:
///
/// ```text
/// consecutive_plays {>, >=, ==} N
/// total_plays {>, %} N          // '%' fires every N plays
/// slice_index {==, !=} N
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    ConsecutivePlays(Comparison, i64),
    TotalPlaysGreater(i64),
    TotalPlaysEvery(i64),
    SliceIndexEqual(i64),
    SliceIndexNotEqual(i64),
}

impl Condition {
    pub fn parse(condition: &str) -> Result<Condition> {
        let tokens: Vec<&str> = condition.split_whitespace().collect();
        let [subject, operator, value] = tokens[..] else {
            return Err(Error::BadInput(format!("bad rule condition: {condition}")));
        };
        let value: i64 = value
            .parse()
            .map_err(|_| Error::BadInput(format!("bad rule condition value: {condition}")))?;

        match (subject, operator) {
            ("consecutive_plays", ">") => Ok(Condition::ConsecutivePlays(Comparison::Greater, value)),
            ("consecutive_plays", ">=") => {
                Ok(Condition::ConsecutivePlays(Comparison::GreaterEqual, value))
            }
            ("consecutive_plays", "==") => Ok(Condition::ConsecutivePlays(Comparison::Equal, value)),
            ("total_plays", ">") => Ok(Condition::TotalPlaysGreater(value)),
            ("total_plays", "%") => {
                if value == 0 {
                    return Err(Error::BadInput("total_plays % 0 is undefined".to_string()));
                }
                Ok(Condition::TotalPlaysEvery(value))
            }
            ("slice_index", "==") => Ok(Condition::SliceIndexEqual(value)),
            ("slice_index", "!=") => Ok(Condition::SliceIndexNotEqual(value)),
            _ => Err(Error::BadInput(format!("bad rule condition: {condition}"))),
        }
    }

    /// Evaluate against the engine state. Pure.
    pub fn evaluate(&self, state: &EngineState) -> bool {
        match self {
            Condition::ConsecutivePlays(cmp, value) => match cmp {
                Comparison::Greater => state.consecutive_plays > *value,
                Comparison::GreaterEqual => state.consecutive_plays >= *value,
                Comparison::Equal => state.consecutive_plays == *value,
            },
            Condition::TotalPlaysGreater(value) => state.total_plays > *value,
            Condition::TotalPlaysEvery(value) => state.total_plays % *value == 0,
            Condition::SliceIndexEqual(value) => state.last_slice_index == *value,
            Condition::SliceIndexNotEqual(value) => state.last_slice_index != *value,
        }
    }
}

/// Parsed action AST. An unrecognized token parses to `Noop` with a
/// diagnostic rather than failing the whole rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    SkipNext,
    DoubleTrigger,
    PitchUp(i32),
    PitchDown(i32),
    Reverse,
    RandomSlice,
    ResetSequence,
    HalfVelocity,
    DoubleVelocity,
    Noop,
}

impl Action {
    /// Total over all strings: unknown actions become `Noop`.
    pub fn parse(action: &str) -> Action {
        if let Some(semitones) = action.strip_prefix("pitch_up_") {
            if let Ok(n) = semitones.parse() {
                return Action::PitchUp(n);
            }
        }
        if let Some(semitones) = action.strip_prefix("pitch_down_") {
            if let Ok(n) = semitones.parse() {
                return Action::PitchDown(n);
            }
        }

        match action {
            "skip_next" => Action::SkipNext,
            "double_trigger" => Action::DoubleTrigger,
            "reverse" => Action::Reverse,
            "random_slice" => Action::RandomSlice,
            "reset_sequence" => Action::ResetSequence,
            "half_velocity" => Action::HalfVelocity,
            "double_velocity" => Action::DoubleVelocity,
            other => {
                tracing::warn!(action = other, "Unknown rule action, treating as no-op");
                Action::Noop
            }
        }
    }
}

/// A rule with its condition and action parsed and ready to evaluate.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: TriggerRule,
    pub condition: Condition,
    pub action: Action,
}

impl CompiledRule {
    /// Compile a stored rule. A malformed condition is a registration error;
    /// a malformed action degrades to a no-op.
    pub fn compile(rule: TriggerRule) -> Result<CompiledRule> {
        let condition = Condition::parse(&rule.condition)?;
        let action = Action::parse(&rule.action);
        Ok(CompiledRule {
            rule,
            condition,
            action,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(last: i64, consecutive: i64, total: i64) -> EngineState {
        EngineState {
            last_slice_index: last,
            consecutive_plays: consecutive,
            total_plays: total,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_conditions() {
        assert_eq!(
            Condition::parse("consecutive_plays > 3").unwrap(),
            Condition::ConsecutivePlays(Comparison::Greater, 3)
        );
        assert_eq!(
            Condition::parse("consecutive_plays >= 2").unwrap(),
            Condition::ConsecutivePlays(Comparison::GreaterEqual, 2)
        );
        assert_eq!(
            Condition::parse("total_plays % 8").unwrap(),
            Condition::TotalPlaysEvery(8)
        );
        assert_eq!(
            Condition::parse("total_plays > 16").unwrap(),
            Condition::TotalPlaysGreater(16)
        );
        assert_eq!(
            Condition::parse("slice_index == 2").unwrap(),
            Condition::SliceIndexEqual(2)
        );
        assert_eq!(
            Condition::parse("slice_index != 0").unwrap(),
            Condition::SliceIndexNotEqual(0)
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Condition::parse("").is_err());
        assert!(Condition::parse("velocity > 0.5").is_err());
        assert!(Condition::parse("consecutive_plays < 3").is_err());
        assert!(Condition::parse("consecutive_plays > banana").is_err());
        assert!(Condition::parse("total_plays % 0").is_err());
    }

    #[test]
    fn test_evaluate_consecutive() {
        let condition = Condition::parse("consecutive_plays > 3").unwrap();
        assert!(!condition.evaluate(&state(0, 3, 10)));
        assert!(condition.evaluate(&state(0, 4, 10)));
    }

    #[test]
    fn test_evaluate_total_plays_every() {
        let condition = Condition::parse("total_plays % 4").unwrap();
        assert!(condition.evaluate(&state(0, 1, 8)));
        assert!(!condition.evaluate(&state(0, 1, 9)));
    }

    #[test]
    fn test_evaluate_slice_index() {
        let eq = Condition::parse("slice_index == 2").unwrap();
        assert!(eq.evaluate(&state(2, 1, 1)));
        assert!(!eq.evaluate(&state(3, 1, 1)));

        let ne = Condition::parse("slice_index != 2").unwrap();
        assert!(!ne.evaluate(&state(2, 1, 1)));
        assert!(ne.evaluate(&state(3, 1, 1)));
    }

    #[test]
    fn test_parse_actions() {
        assert_eq!(Action::parse("skip_next"), Action::SkipNext);
        assert_eq!(Action::parse("pitch_up_7"), Action::PitchUp(7));
        assert_eq!(Action::parse("pitch_down_12"), Action::PitchDown(12));
        assert_eq!(Action::parse("half_velocity"), Action::HalfVelocity);
        assert_eq!(Action::parse("reverse"), Action::Reverse);
        // Unknown actions degrade to a logged no-op
        assert_eq!(Action::parse("explode"), Action::Noop);
        assert_eq!(Action::parse("pitch_up_many"), Action::Noop);
    }

    #[test]
    fn test_compile_rule() {
        let rule = TriggerRule {
            id: "skip_triple".to_string(),
            name: "Skip after triple".to_string(),
            condition: "consecutive_plays > 3".to_string(),
            action: "skip_next".to_string(),
            probability: 0.7,
            enabled: true,
        };
        let compiled = CompiledRule::compile(rule).unwrap();
        assert_eq!(compiled.action, Action::SkipNext);

        let bad = TriggerRule {
            id: "bad".to_string(),
            name: "Bad".to_string(),
            condition: "wibble == 1".to_string(),
            action: "skip_next".to_string(),
            probability: 1.0,
            enabled: true,
        };
        assert!(CompiledRule::compile(bad).is_err());
    }

    #[test]
    fn test_rule_serde_defaults() {
        let rule: TriggerRule = serde_json::from_value(serde_json::json!({
            "id": "r1",
            "name": "Rule",
            "condition": "total_plays % 2",
            "action": "reverse"
        }))
        .unwrap();
        assert_eq!(rule.probability, 1.0);
        assert!(rule.enabled);
    }
}
