mod adapter;
mod backend;
mod backends;
mod registry;
mod result;

pub use adapter::{Detection, DetectorAdapter};
pub use backend::{FaceCapability, FaceDetector};
pub use backends::{ScriptedDetector, ScriptedOutcome, SyntheticFaceDetector};
pub use registry::{BackendRegistry, SharedDetector};
pub use result::{Attribute, BoundingBox, DetectedEntity, FaceAttributes, Probability};
