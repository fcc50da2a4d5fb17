//! Emotion derivation: face attribute probabilities in, discrete state out.
//!
//! Everything here is pure. The same attributes, thresholds and policy always
//! give the same `EmotionState`; the capture timestamp is passed through
//! untouched.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::detect::{Attribute, FaceAttributes, Probability};
use crate::error::PipelineError;

pub const DEFAULT_THRESHOLD: f32 = 0.3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmotionCategory {
    Happy,
    Smiling,
    Neutral,
    Sleepy,
    Unknown,
}

impl EmotionCategory {
    pub fn label(self) -> &'static str {
        match self {
            EmotionCategory::Happy => "Happy",
            EmotionCategory::Smiling => "Smiling",
            EmotionCategory::Neutral => "Neutral",
            EmotionCategory::Sleepy => "Sleepy",
            EmotionCategory::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for EmotionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// When missing attributes turn the category into `Unknown`.
///
/// Either way an unknown attribute never counts as smiling or open.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownPolicy {
    /// `Unknown` only when the detector reported none of the attributes.
    #[default]
    Lenient,
    /// `Unknown` as soon as any attribute is missing.
    Strict,
}

impl FromStr for UnknownPolicy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(UnknownPolicy::Lenient),
            "strict" => Ok(UnknownPolicy::Strict),
            other => Err(PipelineError::invalid_input(format!(
                "unknown policy must be 'lenient' or 'strict', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub smile: f32,
    pub eye_open: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            smile: DEFAULT_THRESHOLD,
            eye_open: DEFAULT_THRESHOLD,
        }
    }
}

impl Thresholds {
    pub fn new(smile: f32, eye_open: f32) -> Result<Self, PipelineError> {
        let thresholds = Self { smile, eye_open };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        for (name, value) in [("smile", self.smile), ("eye_open", self.eye_open)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PipelineError::invalid_input(format!(
                    "{} threshold must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Derived state for one face. Immutable once built.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct EmotionState {
    smile: Probability,
    left_eye_open: Probability,
    right_eye_open: Probability,
    is_smiling: bool,
    is_left_eye_open: bool,
    is_right_eye_open: bool,
    category: EmotionCategory,
    timestamp_ms: u64,
}

impl EmotionState {
    pub fn smile(&self) -> Probability {
        self.smile
    }

    /// The detector's left-eye-open attribute, as reported.
    pub fn left_eye_open(&self) -> Probability {
        self.left_eye_open
    }

    /// The detector's right-eye-open attribute, as reported.
    pub fn right_eye_open(&self) -> Probability {
        self.right_eye_open
    }

    pub fn is_smiling(&self) -> bool {
        self.is_smiling
    }

    pub fn is_left_eye_open(&self) -> bool {
        self.is_left_eye_open
    }

    pub fn is_right_eye_open(&self) -> bool {
        self.is_right_eye_open
    }

    pub fn category(&self) -> EmotionCategory {
        self.category
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }
}

/// Derive the emotion state of one face.
pub fn derive_emotion(
    attributes: &FaceAttributes,
    timestamp_ms: u64,
    thresholds: Thresholds,
    policy: UnknownPolicy,
) -> EmotionState {
    let is_smiling = attributes.smile.meets(thresholds.smile);
    let is_left_eye_open = attributes.left_eye_open.meets(thresholds.eye_open);
    let is_right_eye_open = attributes.right_eye_open.meets(thresholds.eye_open);

    let missing = match policy {
        UnknownPolicy::Lenient => attributes.all_unknown(),
        UnknownPolicy::Strict => Attribute::ALL
            .iter()
            .any(|&attribute| !attributes.get(attribute).is_known()),
    };

    let category = if missing {
        EmotionCategory::Unknown
    } else if is_smiling && is_left_eye_open && is_right_eye_open {
        EmotionCategory::Happy
    } else if is_smiling {
        EmotionCategory::Smiling
    } else if !is_left_eye_open && !is_right_eye_open {
        EmotionCategory::Sleepy
    } else {
        EmotionCategory::Neutral
    };

    EmotionState {
        smile: attributes.smile,
        left_eye_open: attributes.left_eye_open,
        right_eye_open: attributes.right_eye_open,
        is_smiling,
        is_left_eye_open,
        is_right_eye_open,
        category,
        timestamp_ms,
    }
}

/// Thresholds and policy bundled for the pipeline worker.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EmotionDeriver {
    pub thresholds: Thresholds,
    pub policy: UnknownPolicy,
}

impl EmotionDeriver {
    pub fn new(thresholds: Thresholds, policy: UnknownPolicy) -> Self {
        Self { thresholds, policy }
    }

    pub fn derive(&self, attributes: &FaceAttributes, timestamp_ms: u64) -> EmotionState {
        derive_emotion(attributes, timestamp_ms, self.thresholds, self.policy)
    }
}
