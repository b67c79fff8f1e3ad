//! Elapsed-time stopwatch used to supervise the ISO 15765-2 timeouts
//! (N_As, N_Bs, N_Cs on the sending side, N_Ar, N_Br, N_Cr on the receiving side).
//!
//! Time comes from the `embassy-time` driver of the target, so the same code
//! runs on bare metal and on a host with the `std` driver.
use embassy_time::{Duration, Instant};

//==================================================================================TIMER
/// Start/stop/clear stopwatch with millisecond readings.
///
/// * `start` (re)starts counting from zero.
/// * `stop` freezes the current reading.
/// * `clear` resets the reading to zero and leaves the timer stopped.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timer {
    started_at: Option<Instant>,
    frozen: Duration,
}

impl Timer {
    /// Create a stopped timer reading zero.
    pub const fn new() -> Self {
        Self {
            started_at: None,
            frozen: Duration::from_ticks(0),
        }
    }

    /// Restart counting from now.
    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
        self.frozen = Duration::from_ticks(0);
    }

    /// Freeze the reading. No effect on a stopped timer.
    pub fn stop(&mut self) {
        if let Some(started_at) = self.started_at.take() {
            self.frozen = Instant::now().saturating_duration_since(started_at);
        }
    }

    /// Reset to zero and stop.
    pub fn clear(&mut self) {
        self.started_at = None;
        self.frozen = Duration::from_ticks(0);
    }

    /// Whether the timer is currently counting.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    /// Elapsed time since `start`, or the frozen reading when stopped.
    pub fn elapsed(&self) -> Duration {
        match self.started_at {
            Some(started_at) => Instant::now().saturating_duration_since(started_at),
            None => self.frozen,
        }
    }

    /// Elapsed time in milliseconds.
    #[inline]
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis()
    }

    /// `true` when the timer is running and has exceeded `limit_ms`.
    #[inline]
    pub fn exceeded(&self, limit_ms: u32) -> bool {
        self.is_running() && self.elapsed_ms() > u64::from(limit_ms)
    }
}
