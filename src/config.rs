//! Runtime options.
//!
//! Every option is an integer keyed by a stable name, so hosts can set and
//! snapshot them uniformly. Typed accessors interpret the raw values.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::error::{ConfigError, SiaResult};

/// How an all-indifferent context-slot candidate set collapses to one winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPolicy {
    First,
    Last,
    Ask,
    Random,
}

/// Shape of the inner elaboration loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElaborationMode {
    /// Proposal and application sub-phases around each decision.
    ProposeApply,
    /// One flat elaboration cycle per decision.
    SingleCycle,
}

/// Known option names and their defaults.
const DEFAULTS: &[(&str, i64)] = &[
    ("max-elaborations", 100),
    ("max-goal-depth", 100),
    ("max-nil-output-cycles", 15),
    ("selection-policy", 0),
    ("elaboration-mode", 0),
    ("numeric-indifferent-mode", 0),
    ("trace-phases", 0),
    ("trace-decisions", 0),
    ("random-seed", 0),
];

/// Integer-valued runtime options.
#[derive(Debug, Clone)]
pub struct Options {
    values: BTreeMap<&'static str, i64>,
}

impl Options {
    pub fn new() -> Self {
        Self {
            values: DEFAULTS.iter().copied().collect(),
        }
    }

    pub fn names() -> impl Iterator<Item = &'static str> {
        DEFAULTS.iter().map(|(name, _)| *name)
    }

    pub fn get(&self, name: &str) -> SiaResult<i64> {
        self.values
            .get(name)
            .copied()
            .ok_or_else(|| ConfigError::UnknownOption { name: name.into() }.into())
    }

    /// Set an option, validating the value.
    pub fn set(&mut self, name: &str, value: i64) -> SiaResult<()> {
        let Some(key) = DEFAULTS
            .iter()
            .map(|(n, _)| *n)
            .find(|n| *n == name)
        else {
            return Err(ConfigError::UnknownOption { name: name.into() }.into());
        };
        let reject = |reason: &str| {
            Err(ConfigError::UnsupportedValue {
                name: name.into(),
                value,
                reason: reason.into(),
            }
            .into())
        };
        match key {
            "max-elaborations" | "max-goal-depth" | "max-nil-output-cycles" => {
                if value < 1 {
                    return reject("must be at least 1");
                }
            }
            "selection-policy" => {
                if !(0..=3).contains(&value) {
                    return reject("0=first, 1=last, 2=ask, 3=random");
                }
            }
            "elaboration-mode" => {
                if !(0..=1).contains(&value) {
                    return reject("0=propose/apply, 1=single-cycle");
                }
            }
            "numeric-indifferent-mode" => {
                if value != 0 {
                    return reject("only mode 0 is implemented");
                }
            }
            "trace-phases" | "trace-decisions" => {
                if !(0..=1).contains(&value) {
                    return reject("boolean option");
                }
            }
            "random-seed" => {}
            _ => unreachable!("name validated against DEFAULTS"),
        }
        self.values.insert(key, value);
        Ok(())
    }

    // --- typed accessors ---

    pub fn max_elaborations(&self) -> u64 {
        self.values["max-elaborations"] as u64
    }

    pub fn max_goal_depth(&self) -> u32 {
        self.values["max-goal-depth"] as u32
    }

    pub fn max_nil_output_cycles(&self) -> u64 {
        self.values["max-nil-output-cycles"] as u64
    }

    pub fn selection_policy(&self) -> SelectionPolicy {
        match self.values["selection-policy"] {
            1 => SelectionPolicy::Last,
            2 => SelectionPolicy::Ask,
            3 => SelectionPolicy::Random,
            _ => SelectionPolicy::First,
        }
    }

    pub fn elaboration_mode(&self) -> ElaborationMode {
        match self.values["elaboration-mode"] {
            1 => ElaborationMode::SingleCycle,
            _ => ElaborationMode::ProposeApply,
        }
    }

    pub fn trace_phases(&self) -> bool {
        self.values["trace-phases"] != 0
    }

    pub fn trace_decisions(&self) -> bool {
        self.values["trace-decisions"] != 0
    }

    pub fn random_seed(&self) -> u64 {
        self.values["random-seed"] as u64
    }

    /// JSON snapshot of all options, for diagnostics.
    pub fn snapshot(&self) -> Value {
        json!(self.values)
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let opts = Options::new();
        for name in Options::names() {
            assert!(opts.get(name).is_ok(), "missing default for {name}");
        }
        assert_eq!(opts.max_elaborations(), 100);
        assert_eq!(opts.selection_policy(), SelectionPolicy::First);
        assert_eq!(opts.elaboration_mode(), ElaborationMode::ProposeApply);
    }

    #[test]
    fn unknown_option_rejected() {
        let mut opts = Options::new();
        assert!(opts.get("no-such-option").is_err());
        assert!(opts.set("no-such-option", 1).is_err());
    }

    #[test]
    fn numeric_indifferent_mode_only_zero() {
        let mut opts = Options::new();
        assert!(opts.set("numeric-indifferent-mode", 0).is_ok());
        assert!(opts.set("numeric-indifferent-mode", 1).is_err());
    }

    #[test]
    fn bounds_enforced() {
        let mut opts = Options::new();
        assert!(opts.set("max-elaborations", 0).is_err());
        assert!(opts.set("selection-policy", 4).is_err());
        assert!(opts.set("selection-policy", 3).is_ok());
        assert_eq!(opts.selection_policy(), SelectionPolicy::Random);
    }
}
