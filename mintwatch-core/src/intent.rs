//! Keyword intent classification.
//!
//! Two ordered pattern families are tested against the text. The creation
//! family always wins over the minting family, and within a family the first
//! matching pattern decides.

use crate::types::Intent;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

pub const CREATION_PATTERNS: &[&str] = &[
    r"\b(create|design|commission|custom)\b",
    r"\b(digital art|illustration)\b",
];

pub const MINTING_PATTERNS: &[&str] = &[
    r"\b(mint|deploy|launch|list)\b",
    r"\b(blockchain|open sea|opensea)\b",
];

static DEFAULT_CLASSIFIER: Lazy<IntentClassifier> = Lazy::new(|| {
    IntentClassifier::with_patterns(CREATION_PATTERNS, MINTING_PATTERNS)
        .expect("built-in intent patterns are valid")
});

#[derive(Debug, Clone)]
pub struct IntentClassifier {
    creation: Vec<Regex>,
    minting: Vec<Regex>,
}

impl IntentClassifier {
    pub fn with_patterns(creation: &[&str], minting: &[&str]) -> Result<Self, regex::Error> {
        Ok(Self {
            creation: compile(creation)?,
            minting: compile(minting)?,
        })
    }

    pub fn classify(&self, text: &str) -> Intent {
        if text.is_empty() {
            return Intent::None;
        }
        if self.creation.iter().any(|pattern| pattern.is_match(text)) {
            return Intent::Creation;
        }
        if self.minting.iter().any(|pattern| pattern.is_match(text)) {
            return Intent::Minting;
        }
        Intent::None
    }
}

impl Default for IntentClassifier {
    fn default() -> Self {
        DEFAULT_CLASSIFIER.clone()
    }
}

/// Classify with the built-in keyword families.
pub fn classify(text: &str) -> Intent {
    DEFAULT_CLASSIFIER.classify(text)
}

fn compile(patterns: &[&str]) -> Result<Vec<Regex>, regex::Error> {
    patterns
        .iter()
        .map(|pattern| RegexBuilder::new(pattern).case_insensitive(true).build())
        .collect()
}
