use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::detect::backend::{FaceCapability, FaceDetector};
use crate::detect::result::DetectedEntity;
use crate::frame::{ImageData, Rotation};

/// One scripted reply.
#[derive(Clone, Debug)]
pub enum ScriptedOutcome {
    Faces(Vec<DetectedEntity>),
    Fail(String),
    Panic(String),
}

/// Replays a fixed script of outcomes, one per call.
///
/// Once the script runs out every call reports no faces.
#[derive(Default)]
pub struct ScriptedDetector {
    script: VecDeque<ScriptedOutcome>,
    latency: Duration,
    calls: u64,
}

impl ScriptedDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script<I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = ScriptedOutcome>,
    {
        Self {
            script: outcomes.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Sleep this long inside every `detect` call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn push(&mut self, outcome: ScriptedOutcome) {
        self.script.push_back(outcome);
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl FaceDetector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn supports(&self, capability: FaceCapability) -> bool {
        matches!(
            capability,
            FaceCapability::Bounds | FaceCapability::Classification
        )
    }

    fn detect(&mut self, _image: &ImageData, _rotation: Rotation) -> Result<Vec<DetectedEntity>> {
        self.calls += 1;
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        match self.script.pop_front() {
            None => Ok(Vec::new()),
            Some(ScriptedOutcome::Faces(faces)) => Ok(faces),
            Some(ScriptedOutcome::Fail(reason)) => Err(anyhow!(reason)),
            Some(ScriptedOutcome::Panic(reason)) => panic!("{}", reason),
        }
    }
}
