//! Backpressure gate: keep-only-latest frame selection.
//!
//! The gate owns a single pending slot. The source pushes frames with
//! `submit`, which never blocks and never queues more than one frame: a newer
//! frame displaces the pending one, and the displaced frame is released on the
//! spot. The worker pulls with `next`, which hands out the pending frame and
//! marks a cycle as in flight until the returned `CycleGuard` is dropped.
//!
//! Net effect, for a burst of k frames arriving while a cycle is in flight:
//! k - 1 are released unseen and the newest one is processed next.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::frame::Frame;

/// Anything a frame source can push frames into.
pub trait FrameSink: Send + Sync {
    fn submit(&self, frame: Frame);
}

/// Outcome of a single `submit` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submission {
    /// The slot was empty; the frame now waits for the worker.
    Queued,
    /// The frame displaced an older pending frame, which was released.
    Replaced,
    /// The gate is closed; the frame was released immediately.
    Rejected,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GateStats {
    pub submitted: u64,
    pub dropped: u64,
    pub selected: u64,
}

#[derive(Default)]
struct GateState {
    pending: Option<Frame>,
    in_flight: bool,
    closed: bool,
}

pub struct BackpressureGate {
    state: Mutex<GateState>,
    changed: Condvar,
    submitted: AtomicU64,
    dropped: AtomicU64,
    selected: AtomicU64,
}

impl BackpressureGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::default()),
            changed: Condvar::new(),
            submitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            selected: AtomicU64::new(0),
        }
    }

    // The guarded state is updated in single assignments, so a panic while
    // holding the lock cannot leave it half-written.
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Offer a frame. Never blocks on processing.
    pub fn offer(&self, frame: Frame) -> Submission {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        let sequence = frame.sequence;
        let (displaced, outcome) = {
            let mut state = self.lock();
            if state.closed {
                (Some(frame), Submission::Rejected)
            } else {
                match state.pending.replace(frame) {
                    Some(old) => (Some(old), Submission::Replaced),
                    None => (None, Submission::Queued),
                }
            }
        };
        self.changed.notify_all();

        // Release outside the lock: release hooks belong to the source and
        // may take their own locks.
        if let Some(frame) = displaced {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            log::trace!(
                "gate: released frame #{} unprocessed ({:?}, incoming #{})",
                frame.sequence,
                outcome,
                sequence
            );
            drop(frame);
        }
        outcome
    }

    /// Block until a frame is pending (or the gate closes) and start a cycle.
    ///
    /// Returns `None` once the gate is closed. The cycle stays in flight until
    /// the returned guard is dropped.
    pub fn next(&self) -> Option<(Frame, CycleGuard<'_>)> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(frame) = state.pending.take() {
                state.in_flight = true;
                self.selected.fetch_add(1, Ordering::Relaxed);
                return Some((frame, CycleGuard { gate: self }));
            }
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Close the gate. The pending frame, if any, is released; later
    /// submissions are released on arrival.
    pub fn close(&self) {
        let pending = {
            let mut state = self.lock();
            state.closed = true;
            state.pending.take()
        };
        self.changed.notify_all();
        if let Some(frame) = pending {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            drop(frame);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn is_in_flight(&self) -> bool {
        self.lock().in_flight
    }

    /// Wait until nothing is pending and no cycle is in flight.
    ///
    /// Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            let idle = !state.in_flight && (state.pending.is_none() || state.closed);
            if idle {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            selected: self.selected.load(Ordering::Relaxed),
        }
    }

    fn finish_cycle(&self) {
        self.lock().in_flight = false;
        self.changed.notify_all();
    }
}

impl Default for BackpressureGate {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSink for BackpressureGate {
    fn submit(&self, frame: Frame) {
        self.offer(frame);
    }
}

impl<T: FrameSink + ?Sized> FrameSink for std::sync::Arc<T> {
    fn submit(&self, frame: Frame) {
        (**self).submit(frame)
    }
}

/// Marks one processing cycle as in flight for as long as it lives.
pub struct CycleGuard<'a> {
    gate: &'a BackpressureGate,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.gate.finish_cycle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Rotation;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct Tracker {
        releases: Vec<Arc<AtomicUsize>>,
    }

    impl Tracker {
        fn new() -> Self {
            Self { releases: Vec::new() }
        }

        fn frame(&mut self, sequence: u64) -> Frame {
            let counter = Arc::new(AtomicUsize::new(0));
            self.releases.push(counter.clone());
            Frame::new(None, 8, 8, Rotation::Deg0, sequence * 20, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .with_sequence(sequence)
        }

        fn released(&self, sequence: u64) -> usize {
            self.releases[(sequence - 1) as usize].load(Ordering::SeqCst)
        }
    }

    #[test]
    fn burst_keeps_only_newest() {
        let gate = BackpressureGate::new();
        let mut tracker = Tracker::new();

        assert_eq!(gate.offer(tracker.frame(1)), Submission::Queued);
        let (first, cycle) = gate.next().expect("frame 1");
        assert_eq!(first.sequence, 1);

        for seq in 2..=5 {
            gate.offer(tracker.frame(seq));
        }
        for seq in 2..=4 {
            assert_eq!(tracker.released(seq), 1, "frame {} released", seq);
        }
        assert_eq!(tracker.released(5), 0);

        drop(first);
        drop(cycle);

        let (selected, _cycle) = gate.next().expect("frame 5");
        assert_eq!(selected.sequence, 5);
        drop(selected);

        for seq in 1..=5 {
            assert_eq!(tracker.released(seq), 1);
        }
        let stats = gate.stats();
        assert_eq!(stats.submitted, 5);
        assert_eq!(stats.dropped, 3);
        assert_eq!(stats.selected, 2);
    }

    #[test]
    fn replaced_submission_is_reported() {
        let gate = BackpressureGate::new();
        let mut tracker = Tracker::new();
        assert_eq!(gate.offer(tracker.frame(1)), Submission::Queued);
        assert_eq!(gate.offer(tracker.frame(2)), Submission::Replaced);
        assert_eq!(tracker.released(1), 1);
    }

    #[test]
    fn close_releases_pending_and_rejects_new_frames() {
        let gate = BackpressureGate::new();
        let mut tracker = Tracker::new();
        gate.offer(tracker.frame(1));
        gate.close();
        assert_eq!(tracker.released(1), 1);

        assert_eq!(gate.offer(tracker.frame(2)), Submission::Rejected);
        assert_eq!(tracker.released(2), 1);
        assert!(gate.next().is_none());
    }

    #[test]
    fn cycle_guard_clears_in_flight() {
        let gate = BackpressureGate::new();
        let mut tracker = Tracker::new();
        gate.offer(tracker.frame(1));
        let (frame, cycle) = gate.next().unwrap();
        assert!(gate.is_in_flight());
        assert!(!gate.wait_idle(Duration::from_millis(10)));
        drop(frame);
        drop(cycle);
        assert!(!gate.is_in_flight());
        assert!(gate.wait_idle(Duration::from_millis(10)));
    }

    #[test]
    fn next_wakes_on_submit_from_another_thread() {
        let gate = Arc::new(BackpressureGate::new());
        let worker_gate = gate.clone();
        let worker = std::thread::spawn(move || {
            let (frame, _cycle) = worker_gate.next().expect("frame");
            frame.sequence
        });
        std::thread::sleep(Duration::from_millis(20));
        let mut tracker = Tracker::new();
        gate.submit(tracker.frame(1));
        assert_eq!(worker.join().unwrap(), 1);
        assert_eq!(tracker.released(1), 1);
    }

    #[test]
    fn next_returns_none_when_closed_while_waiting() {
        let gate = Arc::new(BackpressureGate::new());
        let worker_gate = gate.clone();
        let worker = std::thread::spawn(move || worker_gate.next().is_none());
        std::thread::sleep(Duration::from_millis(20));
        gate.close();
        assert!(worker.join().unwrap());
    }
}
