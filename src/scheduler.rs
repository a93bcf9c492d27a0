//! Intervention scheduling over the live transcript.
//!
//! Finalized segments accumulate in a text buffer. Once the buffer crosses
//! the configured threshold, it is handed off as one coaching invocation,
//! subject to two gates:
//!
//! - **Exclusivity**: at most one invocation in flight at any time.
//! - **Cooldown**: a fixed quiet period after each completed invocation.
//!
//! The scheduler is a synchronous state machine; the session loop owns it
//! and passes `Instant::now()` in, which keeps the timing rules directly
//! testable.

use std::time::{Duration, Instant};

/// Default buffered-character threshold that triggers an invocation.
pub const DEFAULT_INTERVENTION_INTERVAL: usize = 300;

/// Snapshots shorter than this are never dispatched, on any path.
const MIN_SNAPSHOT_CHARS: usize = 10;

/// Quiet period after each completed invocation.
const COOLDOWN: Duration = Duration::from_secs(3);

/// Buffers transcript text and decides when to dispatch it for coaching.
#[derive(Debug)]
pub struct InterventionScheduler {
    buffer: String,
    /// Characters (not bytes) that trigger a dispatch when exceeded.
    interval: usize,
    in_flight: bool,
    cooldown_until: Option<Instant>,
}

impl InterventionScheduler {
    pub fn new(interval: usize) -> Self {
        Self {
            buffer: String::new(),
            interval,
            in_flight: false,
            cooldown_until: None,
        }
    }

    /// Append one finalized segment. Returns a snapshot to dispatch when
    /// the threshold is crossed and both gates are open.
    pub fn push_segment(&mut self, text: &str, now: Instant) -> Option<String> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        if !self.buffer.is_empty() {
            self.buffer.push(' ');
        }
        self.buffer.push_str(text);

        if self.buffer.chars().count() > self.interval {
            self.try_dispatch(now)
        } else {
            None
        }
    }

    /// Mark the in-flight invocation as finished and start the cooldown.
    ///
    /// Call this on failure too: a failed invocation still consumed its
    /// slot, and retrying immediately would hammer the endpoint.
    pub fn complete_invocation(&mut self, now: Instant) {
        self.in_flight = false;
        self.cooldown_until = Some(now + COOLDOWN);
    }

    /// Session is ending: dispatch whatever is buffered regardless of the
    /// threshold. The exclusivity and cooldown gates still apply, as does
    /// the minimum-length floor.
    pub fn final_flush(&mut self, now: Instant) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        self.try_dispatch(now)
    }

    pub fn has_buffered_text(&self) -> bool {
        !self.buffer.is_empty()
    }

    pub fn invocation_in_flight(&self) -> bool {
        self.in_flight
    }

    fn try_dispatch(&mut self, now: Instant) -> Option<String> {
        if self.in_flight {
            return None;
        }
        if let Some(until) = self.cooldown_until {
            if now < until {
                return None;
            }
        }
        // Too little text to say anything useful about
        if self.buffer.chars().count() < MIN_SNAPSHOT_CHARS {
            return None;
        }

        let snapshot = std::mem::take(&mut self.buffer);
        self.in_flight = true;
        log::debug!("Dispatching {} chars for coaching", snapshot.chars().count());
        Some(snapshot)
    }
}
