//! Borrowed camera frames.
//!
//! A `Frame` is lent to the pipeline by the frame source and must be handed
//! back exactly once. The hand-back is modelled as a release hook owned by the
//! frame and fired from `Drop`, so every exit path (processed, dropped by the
//! gate, throttled, failed, torn down) releases the frame without any stage
//! having to remember to do it.
//!
//! - `ImageData`: opaque pixel container. Not `Clone`, zeroized on drop.
//! - `Frame`: image + geometry + capture metadata + release hook. Not `Clone`.
//! - `FrameInfo`: copyable metadata snapshot that outlives the frame.

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::PipelineError;

// ----------------------------------------------------------------------------
// ImageData: opaque pixel container
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// Single luminance plane (the Y plane of a YUV capture).
    Luma8,
    /// Packed 8-bit RGB.
    Rgb24,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Luma8 => 1,
            PixelFormat::Rgb24 => 3,
        }
    }
}

/// Pixel data handed through to the detector untouched.
///
/// There is no `Clone` and no owned-bytes accessor; detectors borrow the
/// slice for the duration of one call.
pub struct ImageData {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl ImageData {
    /// Wrap a pixel buffer, checking its length against the geometry.
    pub fn new(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Self, PipelineError> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(format.bytes_per_pixel()))
            .ok_or_else(|| PipelineError::invalid_input("image dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(PipelineError::invalid_input(format!(
                "{:?} image {}x{} expects {} bytes, got {}",
                format,
                width,
                height,
                expected,
                pixels.len()
            )));
        }
        Ok(Self {
            pixels,
            width,
            height,
            format,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }
}

impl fmt::Debug for ImageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print pixel content.
        f.debug_struct("ImageData")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl Drop for ImageData {
    fn drop(&mut self) {
        self.pixels.zeroize();
    }
}

// ----------------------------------------------------------------------------
// Rotation
// ----------------------------------------------------------------------------

/// Clockwise rotation needed to bring the sensor image upright.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// True when the upright image has width and height exchanged.
    pub fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

impl TryFrom<u32> for Rotation {
    type Error = PipelineError;

    fn try_from(degrees: u32) -> Result<Self, Self::Error> {
        match degrees {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(PipelineError::invalid_input(format!(
                "rotation must be 0, 90, 180 or 270 degrees, got {}",
                other
            ))),
        }
    }
}

impl Serialize for Rotation {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.degrees())
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

type ReleaseHook = Box<dyn FnOnce() + Send + 'static>;

/// One captured image plus metadata, borrowed from the source.
///
/// Ownership moves from stage to stage; whichever stage drops it releases it.
/// Deliberately not `Clone`: a second handle would mean a second release.
pub struct Frame {
    image: Option<ImageData>,
    pub width: u32,
    pub height: u32,
    pub rotation: Rotation,
    /// Monotonic capture timestamp in milliseconds.
    pub timestamp_ms: u64,
    /// Source-assigned sequence number.
    pub sequence: u64,
    release: Option<ReleaseHook>,
}

impl Frame {
    /// Create a frame. `release` runs exactly once, when the frame is dropped.
    pub fn new<F>(
        image: Option<ImageData>,
        width: u32,
        height: u32,
        rotation: Rotation,
        timestamp_ms: u64,
        release: F,
    ) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            image,
            width,
            height,
            rotation,
            timestamp_ms,
            sequence: 0,
            release: Some(Box::new(release)),
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// The image, if the source managed to produce one.
    pub fn image(&self) -> Option<&ImageData> {
        self.image.as_ref()
    }

    /// Extent of the image after applying `rotation`.
    pub fn upright_extent(&self) -> (u32, u32) {
        if self.rotation.swaps_axes() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }

    pub fn info(&self) -> FrameInfo {
        let (upright_width, upright_height) = self.upright_extent();
        FrameInfo {
            sequence: self.sequence,
            width: self.width,
            height: self.height,
            upright_width,
            upright_height,
            rotation: self.rotation,
            timestamp_ms: self.timestamp_ms,
        }
    }

    /// Release the frame now. Equivalent to dropping it.
    pub fn release(self) {}
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("rotation", &self.rotation)
            .field("timestamp_ms", &self.timestamp_ms)
            .field("has_image", &self.image.is_some())
            .finish()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Copyable frame metadata carried into published snapshots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FrameInfo {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub upright_width: u32,
    pub upright_height: u32,
    pub rotation: Rotation,
    pub timestamp_ms: u64,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
