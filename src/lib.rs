//! Sentimo frame pipeline
//!
//! Turns a live camera feed into a small, continuously refreshed face state:
//! which emotion the primary face shows, how open each eye is, and where the
//! face sits on screen.
//!
//! # Architecture
//!
//! ```text
//! FrameSource -> BackpressureGate -> RateLimiter -> DetectorAdapter
//!     -> { emotion derivation, CoordinateMapper } -> StatePublisher -> consumer
//! ```
//!
//! The pipeline holds three guarantees by construction:
//!
//! 1. **Never stalls the source**: `submit` only touches a single pending slot.
//! 2. **Never queues**: at most one frame in flight and one pending; a newer
//!    frame displaces the pending one.
//! 3. **Never leaks frames**: every `Frame` is released exactly once, from
//!    `Drop`, whichever stage ends up holding it.
//!
//! # Module Structure
//!
//! - `frame`: borrowed frames, opaque image data, release hooks
//! - `gate`, `throttle`: frame selection and rate limiting
//! - `detect`: detector trait, backends, registry and adapter
//! - `emotion`, `geometry`: pure derivation and coordinate mapping
//! - `publish`: single-slot state publisher
//! - `pipeline`: the worker tying the stages together
//! - `ingest`: frame sources
//! - `overlay`, `ui`: consumer-side presentation
//! - `config`: file and environment configuration

pub mod clock;
pub mod config;
pub mod detect;
pub mod emotion;
pub mod error;
pub mod frame;
pub mod gate;
pub mod geometry;
pub mod ingest;
pub mod overlay;
pub mod pipeline;
pub mod publish;
pub mod throttle;
pub mod ui;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use detect::{
    Attribute, BackendRegistry, BoundingBox, DetectedEntity, Detection, DetectorAdapter,
    FaceAttributes, FaceCapability, FaceDetector, Probability, ScriptedDetector, ScriptedOutcome,
    SharedDetector, SyntheticFaceDetector,
};
pub use emotion::{
    derive_emotion, EmotionCategory, EmotionDeriver, EmotionState, Thresholds, UnknownPolicy,
};
pub use error::{ErrorKind, PipelineError};
pub use frame::{Frame, FrameInfo, ImageData, PixelFormat, Rotation};
pub use gate::{BackpressureGate, FrameSink, GateStats, Submission};
pub use geometry::{compute_transform, map_rect, CoordinateMapper, DisplayRect, ViewTransform};
pub use ingest::{
    open_source, run_source, FrameSource, SourceConfig, SourceStalled, SourceStats,
    SyntheticSource, MIN_OUTSTANDING,
};
pub use pipeline::{Pipeline, PipelineSettings, PipelineSink, PipelineStats};
pub use publish::{FaceState, Observation, Snapshot, StatePublisher};
pub use throttle::{interval_elapsed, RateLimiter};
