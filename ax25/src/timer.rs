use std::time::{Duration, Instant};

/// The three AX.25 link timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Acknowledgement / retransmission timer.
    T1,
    /// Response delay, used to coalesce acknowledgements.
    T2,
    /// Idle link keepalive.
    T3,
}

/// What happened when a timer's deadline passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerExpiry {
    /// The timer fired and has been re-armed for another interval.
    Fire,
    /// Every repetition has been used. The timer is now stopped.
    GiveUp,
}

/// Names one arming of one timer.
///
/// A token taken before an expiry is delivered goes stale if the timer is
/// stopped or started again in the meantime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken {
    pub kind: TimerKind,
    pub generation: u64,
}

/// A restartable deadline with a bounded number of repetitions.
///
/// Timers never read the clock themselves. The owner passes `now` into every
/// call, collects a token with `due` once the deadline has passed, and hands
/// the token back to `expire` when it is ready to act on it.
#[derive(Debug, Clone)]
pub struct Timer {
    kind: TimerKind,
    interval: Duration,
    max_repetitions: u32,
    attempts: u32,
    deadline: Option<Instant>,
    generation: u64,
}

impl Timer {
    pub fn new(kind: TimerKind, interval: Duration, max_repetitions: u32) -> Timer {
        Timer {
            kind,
            interval,
            max_repetitions,
            attempts: 0,
            deadline: None,
            generation: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Takes effect the next time the timer is armed.
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    pub fn max_repetitions(&self) -> u32 {
        self.max_repetitions
    }

    pub fn set_max_repetitions(&mut self, max_repetitions: u32) {
        self.max_repetitions = max_repetitions;
    }

    /// How many times the timer has fired since it was last started.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The token for the current arming. The generation moves on every `start`.
    pub fn token(&self) -> TimerToken {
        TimerToken {
            kind: self.kind,
            generation: self.generation,
        }
    }

    /// A token for the current arming if its deadline has passed.
    pub fn due(&self, now: Instant) -> Option<TimerToken> {
        match self.deadline {
            Some(deadline) if now >= deadline => Some(self.token()),
            _ => None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    /// Arm the timer, replacing any running instance and resetting the attempt counter.
    pub fn start(&mut self, now: Instant) {
        self.attempts = 0;
        self.generation = self.generation.wrapping_add(1);
        self.deadline = Some(now + self.interval);
    }

    /// Push the deadline out by one interval without touching the attempt counter.
    pub fn restart(&mut self, now: Instant) {
        self.deadline = Some(now + self.interval);
    }

    pub fn stop(&mut self) {
        self.deadline = None;
    }

    /// Act on an expiry named by `token`.
    ///
    /// Returns `None` if the token is stale, or the timer is stopped or not yet due.
    pub fn expire(&mut self, token: TimerToken, now: Instant) -> Option<TimerExpiry> {
        if token != self.token() {
            return None;
        }
        let deadline = self.deadline?;
        if now < deadline {
            return None;
        }
        if self.attempts < self.max_repetitions {
            self.attempts += 1;
            self.restart(now);
            Some(TimerExpiry::Fire)
        } else {
            self.stop();
            Some(TimerExpiry::GiveUp)
        }
    }
}
