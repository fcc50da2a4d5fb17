pub mod scripted;
pub mod synthetic;

pub use scripted::{ScriptedDetector, ScriptedOutcome};
pub use synthetic::SyntheticFaceDetector;
