use std::time::{Duration, Instant};

/// Deadline for a register busy-wait.
///
/// ```ignore
/// let timeout = Timeout::from_secs(1);
/// while reg.readf(BUSY) {
///     timeout.run().map_err(|()| Error::Timeout)?;
/// }
/// ```
pub struct Timeout {
    instant: Instant,
    duration: Duration,
}

impl Timeout {
    #[inline]
    pub fn new(duration: Duration) -> Self {
        Self {
            instant: Instant::now(),
            duration,
        }
    }

    #[inline]
    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    #[inline]
    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Yields once and returns `Ok` while the deadline has not passed.
    #[inline]
    pub fn run(&self) -> Result<(), ()> {
        if self.instant.elapsed() < self.duration {
            std::thread::yield_now();
            Ok(())
        } else {
            Err(())
        }
    }
}
