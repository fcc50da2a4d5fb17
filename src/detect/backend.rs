use anyhow::Result;

use crate::detect::result::DetectedEntity;
use crate::frame::{ImageData, Rotation};

/// Detection capabilities a face backend may offer.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaceCapability {
    /// Face bounding boxes.
    Bounds,
    /// Facial landmarks (eyes, mouth corners).
    Landmarks,
    /// Smile / eye-open classification probabilities.
    Classification,
}

/// Face detector backend trait.
///
/// This is the seam where a recognition model plugs in. The pipeline treats
/// the backend as a black box: pixels in, face records out.
///
/// Implementations must treat the image as read-only and must not keep it
/// past the `detect` call; the frame it belongs to is released right after.
/// Returned boxes are in the upright image space, i.e. after `rotation` has
/// been applied.
pub trait FaceDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend supports a capability.
    fn supports(&self, capability: FaceCapability) -> bool;

    /// Run detection on one image.
    fn detect(&mut self, image: &ImageData, rotation: Rotation) -> Result<Vec<DetectedEntity>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
