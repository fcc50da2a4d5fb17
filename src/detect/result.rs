use std::fmt;

use serde::Serialize;

use crate::error::PipelineError;

/// A detector-reported probability, or the explicit absence of one.
///
/// `Unknown` is not `Known(0.0)`: a missing signal is not evidence that the
/// face is not smiling or that an eye is closed.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Probability {
    Known(f32),
    #[default]
    Unknown,
}

impl Probability {
    /// Build a known probability, rejecting NaN and values outside [0, 1].
    pub fn known(value: f32) -> Result<Self, PipelineError> {
        if (0.0..=1.0).contains(&value) {
            Ok(Probability::Known(value))
        } else {
            Err(PipelineError::invalid_input(format!(
                "probability {} outside [0, 1]",
                value
            )))
        }
    }

    pub fn from_option(value: Option<f32>) -> Result<Self, PipelineError> {
        value.map_or(Ok(Probability::Unknown), Self::known)
    }

    pub fn value(self) -> Option<f32> {
        match self {
            Probability::Known(value) => Some(value),
            Probability::Unknown => None,
        }
    }

    pub fn is_known(self) -> bool {
        matches!(self, Probability::Known(_))
    }

    /// `value >= threshold`; an unknown probability never meets a threshold.
    pub fn meets(self, threshold: f32) -> bool {
        self.value().is_some_and(|value| value >= threshold)
    }

    fn is_valid(self) -> bool {
        match self {
            Probability::Known(value) => (0.0..=1.0).contains(&value),
            Probability::Unknown => true,
        }
    }
}

impl Serialize for Probability {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Probability::Known(value) => serializer.serialize_f32(*value),
            Probability::Unknown => serializer.serialize_none(),
        }
    }
}

/// Named classification attributes a face detector may report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Attribute {
    Smile,
    /// The subject's left eye, as labelled by the detector.
    LeftEyeOpen,
    /// The subject's right eye, as labelled by the detector.
    RightEyeOpen,
}

impl Attribute {
    pub const ALL: [Attribute; 3] = [
        Attribute::Smile,
        Attribute::LeftEyeOpen,
        Attribute::RightEyeOpen,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Attribute::Smile => "smile",
            Attribute::LeftEyeOpen => "left-eye-open",
            Attribute::RightEyeOpen => "right-eye-open",
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Classification attributes of one face.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct FaceAttributes {
    pub smile: Probability,
    pub left_eye_open: Probability,
    pub right_eye_open: Probability,
}

impl FaceAttributes {
    pub fn get(&self, attribute: Attribute) -> Probability {
        match attribute {
            Attribute::Smile => self.smile,
            Attribute::LeftEyeOpen => self.left_eye_open,
            Attribute::RightEyeOpen => self.right_eye_open,
        }
    }

    pub fn set(&mut self, attribute: Attribute, value: Probability) {
        match attribute {
            Attribute::Smile => self.smile = value,
            Attribute::LeftEyeOpen => self.left_eye_open = value,
            Attribute::RightEyeOpen => self.right_eye_open = value,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Attribute, Probability)> + '_ {
        Attribute::ALL.into_iter().map(move |a| (a, self.get(a)))
    }

    pub fn all_unknown(&self) -> bool {
        self.iter().all(|(_, p)| !p.is_known())
    }
}

/// Axis-aligned box in upright frame pixels. May extend past the frame edge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl BoundingBox {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// One face found in a frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectedEntity {
    pub bounds: BoundingBox,
    pub attributes: FaceAttributes,
    /// Detector-assigned tracking id, stable across frames when supported.
    pub tracking_id: Option<u32>,
}

impl DetectedEntity {
    pub fn new(bounds: BoundingBox, attributes: FaceAttributes) -> Self {
        Self {
            bounds,
            attributes,
            tracking_id: None,
        }
    }

    pub fn with_tracking_id(mut self, id: u32) -> Self {
        self.tracking_id = Some(id);
        self
    }

    /// Check the entity invariants: probabilities in range, box not inverted.
    pub fn validate(&self) -> Result<(), PipelineError> {
        for (attribute, probability) in self.attributes.iter() {
            if !probability.is_valid() {
                return Err(PipelineError::invalid_input(format!(
                    "{} probability {:?} outside [0, 1]",
                    attribute, probability
                )));
            }
        }
        if self.bounds.width() < 0 || self.bounds.height() < 0 {
            return Err(PipelineError::invalid_input(format!(
                "inverted bounding box {:?}",
                self.bounds
            )));
        }
        Ok(())
    }
}
