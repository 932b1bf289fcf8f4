//! Capacity-exhaustion detection over tool transcripts.

use std::collections::HashMap;

use regex::Regex;

use crate::config::GlobalConfig;
use crate::{AppError, Result};

/// Verdict of a [`TranscriptClassifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapacitySignal {
    /// Nothing suggests the tool ran out of capacity.
    Available,
    /// The transcript carries a capacity-exhaustion message.
    Exhausted {
        /// Pattern that matched.
        pattern: String,
    },
}

impl CapacitySignal {
    /// Whether the tool should be abandoned for the rest of the run.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

/// Pluggable transcript classifier; tool output formats drift.
pub trait TranscriptClassifier: Send + Sync {
    /// Classify recent output `text` produced by `tool`.
    fn classify(&self, tool: &str, text: &str) -> CapacitySignal;
}

/// Classifier matching per-tool regexes.
#[derive(Debug, Clone, Default)]
pub struct PatternClassifier {
    patterns: HashMap<String, Vec<Regex>>,
}

impl PatternClassifier {
    /// Build from each configured tool's `capacity_patterns`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a pattern does not compile.
    pub fn from_config(config: &GlobalConfig) -> Result<Self> {
        let mut classifier = Self::default();
        for (name, tool) in &config.tools {
            for pattern in &tool.capacity_patterns {
                classifier.add(name, pattern)?;
            }
        }
        Ok(classifier)
    }

    /// Register one pattern for `tool`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the pattern does not compile.
    pub fn add(&mut self, tool: &str, pattern: &str) -> Result<()> {
        let regex = Regex::new(pattern)
            .map_err(|err| AppError::Config(format!("invalid capacity pattern {pattern}: {err}")))?;
        self.patterns.entry(tool.to_owned()).or_default().push(regex);
        Ok(())
    }
}

impl TranscriptClassifier for PatternClassifier {
    fn classify(&self, tool: &str, text: &str) -> CapacitySignal {
        self.patterns
            .get(tool)
            .and_then(|patterns| patterns.iter().find(|regex| regex.is_match(text)))
            .map_or(CapacitySignal::Available, |regex| CapacitySignal::Exhausted {
                pattern: regex.as_str().to_owned(),
            })
    }
}
