//! Bounded-wait mutual exclusion.
//!
//! Every shared structure of the transport layer (configuration, runner
//! collections, individual runners, acknowledgement queue) sits behind a
//! [`TimedMutex`]: acquisition is attempted until a deadline and then given
//! up, so no operation of the stack can block indefinitely. On failure no
//! lock is held.
//!
//! Waiting is a busy spin. It only pays off when the holder runs concurrently
//! (another core, another thread, or preemption). No guard is ever held across
//! an `.await`, so tasks of one cooperative executor never contend; code
//! interrupting a holder on the same core spins until the timeout and fails.
use crate::error::LockTimeout;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use embassy_time::{Duration, Instant};

/// Guard returned by [`TimedMutex::lock`].
pub type TimedGuard<'a, T> = MutexGuard<'a, CriticalSectionRawMutex, T>;

//==================================================================================TIMED_MUTEX
/// Mutex whose acquisition waits at most `timeout`.
pub struct TimedMutex<T> {
    inner: Mutex<CriticalSectionRawMutex, T>,
    timeout: Duration,
}

impl<T> TimedMutex<T> {
    /// Wrap `value`; every `lock` waits at most `timeout`.
    pub const fn new(value: T, timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(value),
            timeout,
        }
    }

    /// Acquire the lock, spinning until the timeout has elapsed.
    pub fn lock(&self) -> Result<TimedGuard<'_, T>, LockTimeout> {
        if let Ok(guard) = self.inner.try_lock() {
            return Ok(guard);
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            if let Ok(guard) = self.inner.try_lock() {
                return Ok(guard);
            }
            if Instant::now() >= deadline {
                #[cfg(feature = "defmt")]
                defmt::warn!("lock not acquired within {} ms", self.timeout.as_millis());
                return Err(LockTimeout);
            }
            core::hint::spin_loop();
        }
    }

    /// Single non-waiting attempt.
    pub fn try_lock(&self) -> Result<TimedGuard<'_, T>, LockTimeout> {
        self.inner.try_lock().map_err(|_| LockTimeout)
    }

    /// Bound applied by [`lock`](Self::lock).
    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Exclusive access without locking (the borrow checker proves uniqueness).
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for TimedMutex<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut out = f.debug_struct("TimedMutex");
        match self.inner.try_lock() {
            Ok(guard) => out.field("value", &*guard),
            Err(_) => out.field("value", &"<locked>"),
        };
        out.finish()
    }
}
