//! Pipeline error taxonomy.
//!
//! Every variant is scoped to a single frame cycle or a single source start
//! attempt. Errors travel to the consumer through the `StatePublisher`; none of
//! them is fatal to the process.

use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the frame pipeline.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// The external detection call failed for one frame.
    #[error("face detection failed: {0}")]
    DetectorFailure(String),
    /// The source delivered a frame with no usable image.
    #[error("frame has no usable image")]
    FrameUnavailable,
    /// The source cannot start because camera access was refused.
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    /// Degenerate geometry handed to the coordinate mapper.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Fieldless tag for a `PipelineError`, convenient for matching and logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    DetectorFailure,
    FrameUnavailable,
    PermissionDenied,
    InvalidInput,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::DetectorFailure(_) => ErrorKind::DetectorFailure,
            PipelineError::FrameUnavailable => ErrorKind::FrameUnavailable,
            PipelineError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            PipelineError::InvalidInput(_) => ErrorKind::InvalidInput,
        }
    }

    pub(crate) fn invalid_input(msg: impl Into<String>) -> Self {
        PipelineError::InvalidInput(msg.into())
    }
}

impl Serialize for PipelineError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("PipelineError", 2)?;
        state.serialize_field("kind", &self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_match_variants() {
        assert_eq!(
            PipelineError::DetectorFailure("boom".into()).kind(),
            ErrorKind::DetectorFailure
        );
        assert_eq!(PipelineError::FrameUnavailable.kind(), ErrorKind::FrameUnavailable);
        assert_eq!(
            PipelineError::invalid_input("width 0").kind(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn serializes_kind_and_message() {
        let json = serde_json::to_value(PipelineError::PermissionDenied("camera".into())).unwrap();
        assert_eq!(json["kind"], "permission-denied");
        assert_eq!(json["message"], "camera permission denied: camera");
    }
}
