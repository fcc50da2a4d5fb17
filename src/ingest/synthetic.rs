//! Synthetic `stub://` camera.
//!
//! Produces a drifting diagonal gradient in a single luma plane. Counts every
//! release so tests can check that nothing leaks, and refuses to capture once
//! too many frames are out on loan.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{FrameSource, SourceConfig, SourceStalled, SourceStats};
use crate::clock::Clock;
use crate::error::PipelineError;
use crate::frame::{Frame, ImageData, PixelFormat};

pub struct SyntheticSource {
    config: SourceConfig,
    clock: Arc<dyn Clock>,
    rng: StdRng,
    connected: bool,
    frame_count: u64,
    without_image: u64,
    released: Arc<AtomicU64>,
}

impl SyntheticSource {
    pub fn new(config: SourceConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        if !config.url.starts_with("stub://") {
            return Err(anyhow!("synthetic source needs a stub:// url, got {}", config.url));
        }
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!(
                "synthetic source extent {}x{} is empty",
                config.width,
                config.height
            ));
        }
        Ok(Self {
            config,
            clock,
            rng: StdRng::from_entropy(),
            connected: false,
            frame_count: 0,
            without_image: 0,
            released: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Fix the random sequence deciding which frames lack an image.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    fn outstanding(&self) -> u64 {
        self.frame_count - self.released.load(Ordering::SeqCst)
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let width = self.config.width as usize;
        let height = self.config.height as usize;
        let shift = (self.frame_count * 3) as usize;
        let mut pixels = vec![0u8; width * height];
        for (y, row) in pixels.chunks_exact_mut(width).enumerate() {
            for (x, pixel) in row.iter_mut().enumerate() {
                *pixel = ((x + y + shift) % 256) as u8;
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &str {
        &self.config.url
    }

    fn connect(&mut self) -> Result<(), PipelineError> {
        if !self.config.permission_granted {
            self.connected = false;
            return Err(PipelineError::PermissionDenied(format!(
                "{} refused camera access",
                self.config.url
            )));
        }
        self.connected = true;
        log::info!(
            "SyntheticSource: connected to {} ({}x{} @ {} fps, rotation {})",
            self.config.url,
            self.config.width,
            self.config.height,
            self.config.target_fps,
            self.config.rotation.degrees()
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if !self.connected {
            return Err(anyhow!("{} is not connected", self.config.url));
        }
        let outstanding = self.outstanding();
        if outstanding >= self.config.max_outstanding {
            return Err(SourceStalled {
                url: self.config.url.clone(),
                outstanding,
            }
            .into());
        }

        self.frame_count += 1;
        let image = if self.rng.gen::<f32>() < self.config.unavailable_ratio {
            self.without_image += 1;
            None
        } else {
            Some(ImageData::new(
                self.generate_pixels(),
                self.config.width,
                self.config.height,
                PixelFormat::Luma8,
            )?)
        };

        let released = self.released.clone();
        let frame = Frame::new(
            image,
            self.config.width,
            self.config.height,
            self.config.rotation,
            self.clock.now_ms(),
            move || {
                released.fetch_add(1, Ordering::SeqCst);
            },
        )
        .with_sequence(self.frame_count);
        Ok(frame)
    }

    fn is_healthy(&self) -> bool {
        self.connected && self.outstanding() < self.config.max_outstanding
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            frames_released: self.released.load(Ordering::SeqCst),
            frames_without_image: self.without_image,
            url: self.config.url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ErrorKind;

    fn source(config: SourceConfig) -> (SyntheticSource, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let source = SyntheticSource::new(config, clock.clone()).unwrap().with_seed(7);
        (source, clock)
    }

    #[test]
    fn denied_permission_blocks_connect() {
        let (mut source, _) = source(SourceConfig {
            permission_granted: false,
            ..SourceConfig::default()
        });
        let err = source.connect().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(source.next_frame().is_err());
        assert!(!source.is_healthy());
    }

    #[test]
    fn frames_carry_clock_time_and_sequence() {
        let (mut source, clock) = source(SourceConfig::default());
        source.connect().unwrap();
        let first = source.next_frame().unwrap();
        clock.advance(33);
        let second = source.next_frame().unwrap();
        assert_eq!((first.sequence, first.timestamp_ms), (1, 1_000));
        assert_eq!((second.sequence, second.timestamp_ms), (2, 1_033));
        assert_eq!(first.upright_extent(), (480, 640));
        assert_ne!(
            first.image().unwrap().pixels(),
            second.image().unwrap().pixels()
        );
    }

    #[test]
    fn stalls_when_frames_are_not_released() {
        let (mut source, _) = source(SourceConfig {
            max_outstanding: 2,
            ..SourceConfig::default()
        });
        source.connect().unwrap();
        let a = source.next_frame().unwrap();
        let _b = source.next_frame().unwrap();
        let err = source.next_frame().unwrap_err();
        let stall = err.downcast_ref::<SourceStalled>().expect("typed stall");
        assert_eq!(stall.outstanding, 2);
        assert!(!source.is_healthy());

        drop(a);
        assert!(source.is_healthy());
        assert!(source.next_frame().is_ok());
        assert_eq!(source.stats().frames_released, 2);
    }

    #[test]
    fn unavailable_ratio_one_drops_every_image() {
        let (mut source, _) = source(SourceConfig {
            unavailable_ratio: 1.0,
            ..SourceConfig::default()
        });
        source.connect().unwrap();
        for _ in 0..3 {
            assert!(source.next_frame().unwrap().image().is_none());
        }
        assert_eq!(source.stats().frames_without_image, 3);
    }
}
