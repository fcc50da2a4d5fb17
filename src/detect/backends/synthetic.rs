use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::detect::backend::{FaceCapability, FaceDetector};
use crate::detect::result::{BoundingBox, DetectedEntity, FaceAttributes, Probability};
use crate::frame::{ImageData, Rotation};

/// Digest byte below which the frame is reported as containing no face.
const NO_FACE_CUTOFF: u8 = 38;

/// Digest byte below which the smile probability is reported as unknown.
const UNKNOWN_SMILE_CUTOFF: u8 = 16;

/// Stand-in backend for running the pipeline without a recognition model.
///
/// Derives at most one face per image from a SHA-256 digest of the pixels, so
/// the same image always yields the same face. Useful for demos and tests;
/// the numbers carry no meaning.
#[derive(Default)]
pub struct SyntheticFaceDetector {
    images_seen: u64,
}

impl SyntheticFaceDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn images_seen(&self) -> u64 {
        self.images_seen
    }
}

fn unit(byte: u8) -> f32 {
    byte as f32 / 255.0
}

impl FaceDetector for SyntheticFaceDetector {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn supports(&self, capability: FaceCapability) -> bool {
        matches!(
            capability,
            FaceCapability::Bounds | FaceCapability::Classification
        )
    }

    fn detect(&mut self, image: &ImageData, rotation: Rotation) -> Result<Vec<DetectedEntity>> {
        self.images_seen += 1;
        let digest: [u8; 32] = Sha256::digest(image.pixels()).into();
        if digest[0] < NO_FACE_CUTOFF {
            return Ok(Vec::new());
        }

        let (width, height) = if rotation.swaps_axes() {
            (image.height() as i32, image.width() as i32)
        } else {
            (image.width() as i32, image.height() as i32)
        };
        let side = (width.min(height) as f32 * (0.35 + unit(digest[5]) * 0.25)) as i32;
        let center_x = width / 2 + (digest[6] as i32 - 128) * (width / 8) / 128;
        let center_y = height / 2 + (digest[7] as i32 - 128) * (height / 8) / 128;
        let bounds = BoundingBox::new(
            center_x - side / 2,
            center_y - side / 2,
            center_x + side / 2,
            center_y + side / 2,
        );

        let smile = if digest[4] < UNKNOWN_SMILE_CUTOFF {
            Probability::Unknown
        } else {
            Probability::Known(unit(digest[1]))
        };
        let attributes = FaceAttributes {
            smile,
            left_eye_open: Probability::Known(unit(digest[2])),
            right_eye_open: Probability::Known(unit(digest[3])),
        };

        Ok(vec![DetectedEntity::new(bounds, attributes).with_tracking_id(1)])
    }
}
