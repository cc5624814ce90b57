use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Source of time for the scheduler and the persistence writer.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Monotonic time, used to measure intervals.
    fn now(&self) -> Instant;

    /// Wall-clock time, used to stamp measurements.
    fn wall(&self) -> DateTime<Local>;

    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall(&self) -> DateTime<Local> {
        Local::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }
}

/// Virtual clock for tests. Time only moves through `advance` or `sleep`,
/// and sleeping returns immediately after moving time forward.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    wall_origin: DateTime<Local>,
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    pub fn new(wall_origin: DateTime<Local>) -> Self {
        Self {
            origin: Instant::now(),
            wall_origin,
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(|e| e.into_inner());
        *elapsed += duration;
    }

    /// Virtual time passed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn wall(&self) -> DateTime<Local> {
        // chrono::Duration::from_std only fails past ~292 billion years
        self.wall_origin + chrono::Duration::from_std(self.elapsed()).unwrap_or_default()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn manual_clock_moves_only_when_told() {
        let wall = Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(wall);
        let start = clock.now();

        assert_eq!(clock.now(), start);
        clock.sleep(Duration::from_secs(90)).await;
        assert_eq!(clock.now() - start, Duration::from_secs(90));
        assert_eq!(
            clock.wall().format("%Y-%m-%d %H:%M:%S").to_string(),
            "2024-05-01 12:01:30"
        );

        clock.advance(Duration::from_secs(30));
        assert_eq!(clock.elapsed(), Duration::from_secs(120));
    }
}
