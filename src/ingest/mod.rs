//! Frame sources.
//!
//! A source lends frames to the pipeline. Every frame carries a release hook
//! back to its source; a source that gets too few frames back stalls, the
//! same way a camera with all its buffers checked out stops delivering.
//!
//! Only the synthetic `stub://` source ships with the crate. Device binding
//! lives outside this crate and plugs in through `FrameSource`.
//!
//! Sources MUST NOT:
//! - Log pixel content
//! - Keep a frame after handing it to the sink

pub mod synthetic;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::clock::Clock;
use crate::error::PipelineError;
use crate::frame::{Frame, Rotation};
use crate::gate::FrameSink;

pub use synthetic::SyntheticSource;

/// Fewest frames a source must be able to lend: one in detection, one
/// pending in the gate, one being captured.
pub const MIN_OUTSTANDING: u64 = 3;

/// Every frame the source can lend is still out. Capturing again succeeds
/// once one of them is released.
#[derive(Debug, thiserror::Error)]
#[error("{url} stalled: {outstanding} frame(s) never released")]
pub struct SourceStalled {
    pub url: String,
    pub outstanding: u64,
}

/// Configuration for the frame source.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceConfig {
    /// Source URL. Only `stub://` is built in.
    pub url: String,
    /// Target frame rate (frames per second).
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    /// Rotation that brings the sensor image upright.
    pub rotation: Rotation,
    /// Whether the source mirrors its preview (front camera).
    pub front_facing: bool,
    /// Simulated camera permission.
    pub permission_granted: bool,
    /// Fraction of frames delivered without an image, in [0, 1].
    pub unavailable_ratio: f32,
    /// Frames the source can lend out before it stalls.
    pub max_outstanding: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: "stub://front_camera".to_string(),
            target_fps: 30,
            width: 640,
            height: 480,
            rotation: Rotation::Deg270,
            front_facing: true,
            permission_granted: true,
            unavailable_ratio: 0.0,
            max_outstanding: 4,
        }
    }
}

/// Counters for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub frames_released: u64,
    pub frames_without_image: u64,
    pub url: String,
}

impl SourceStats {
    pub fn outstanding(&self) -> u64 {
        self.frames_captured - self.frames_released
    }
}

/// A camera-like producer of borrowed frames.
pub trait FrameSource: Send {
    fn name(&self) -> &str;

    /// Start the source. Fails with `PermissionDenied` when camera access is
    /// refused; the caller decides whether to try again.
    fn connect(&mut self) -> Result<(), PipelineError>;

    /// Capture the next frame. A source with all its frames on loan fails
    /// with [`SourceStalled`].
    fn next_frame(&mut self) -> Result<Frame>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Open the source named by `config.url`.
pub fn open_source(config: SourceConfig, clock: Arc<dyn Clock>) -> Result<Box<dyn FrameSource>> {
    if config.url.starts_with("stub://") {
        Ok(Box::new(SyntheticSource::new(config, clock)?))
    } else {
        Err(anyhow!(
            "unsupported frame source '{}': only stub:// sources are built in",
            config.url
        ))
    }
}

/// Pump frames from `source` into `sink` at `target_fps` until `running` is
/// cleared or `max_frames` frames have been delivered.
///
/// A stalled source is polled again on the next tick instead of ending the
/// pump. Returns the number of frames delivered.
pub fn run_source(
    source: &mut dyn FrameSource,
    sink: &dyn FrameSink,
    target_fps: u32,
    running: &AtomicBool,
    max_frames: Option<u64>,
) -> Result<u64> {
    let period = Duration::from_secs(1) / target_fps.max(1);
    let mut delivered = 0u64;
    let mut stalled = false;
    while running.load(Ordering::SeqCst) {
        if max_frames.is_some_and(|max| delivered >= max) {
            break;
        }
        let started = Instant::now();
        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(err) if err.is::<SourceStalled>() => {
                if !stalled {
                    log::warn!("{}; waiting for frames to come back", err);
                    stalled = true;
                }
                std::thread::sleep(period);
                continue;
            }
            Err(err) => return Err(err),
        };
        if stalled {
            log::info!("{}: delivering again", source.name());
            stalled = false;
        }
        sink.submit(frame);
        delivered += 1;
        if let Some(rest) = period.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }
    log::info!("{}: stopped after {} frame(s)", source.name(), delivered);
    Ok(delivered)
}
