//! Live clock shown next to the session controls.
//!
//! Purely cosmetic. It lives and dies with the mount scope: dropping the
//! [`Ticker`] stops the timer task.

use std::time::Duration;

use chrono::{DateTime, FixedOffset, Offset, Timelike, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Tick period of the live clock
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Asia/Seoul is UTC+9 with no daylight saving
const SEOUL_UTC_OFFSET_SECS: i32 = 9 * 3600;

fn seoul() -> FixedOffset {
    FixedOffset::east_opt(SEOUL_UTC_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// Format a time the way a Korean locale shows it, e.g. `오후 3:04:05`.
pub fn format_korean_time(time: DateTime<FixedOffset>) -> String {
    let (is_pm, hour) = time.hour12();
    let meridiem = if is_pm { "오후" } else { "오전" };
    format!("{} {}:{:02}:{:02}", meridiem, hour, time.minute(), time.second())
}

/// Current Seoul wall-clock time, formatted for display
pub fn seoul_now() -> String {
    format_korean_time(Utc::now().with_timezone(&seoul()))
}

/// Repeating timer publishing the formatted current time.
pub struct Ticker {
    handle: JoinHandle<()>,
    rx: watch::Receiver<String>,
}

impl Ticker {
    /// Spawn the timer task on the current runtime.
    pub fn start(period: Duration) -> Self {
        let (tx, rx) = watch::channel(seoul_now());
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if tx.send(seoul_now()).is_err() {
                    break;
                }
            }
        });
        debug!(period_ms = period.as_millis() as u64, "Clock ticker started");
        Self { handle, rx }
    }

    pub fn current(&self) -> String {
        self.rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.rx.clone()
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.handle.abort();
        debug!("Clock ticker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32, second: u32) -> DateTime<FixedOffset> {
        seoul()
            .with_ymd_and_hms(2024, 5, 1, hour, minute, second)
            .single()
            .unwrap()
    }

    #[test]
    fn test_format_afternoon() {
        assert_eq!(format_korean_time(at(15, 4, 5)), "오후 3:04:05");
    }

    #[test]
    fn test_format_midnight_and_noon() {
        assert_eq!(format_korean_time(at(0, 0, 0)), "오전 12:00:00");
        assert_eq!(format_korean_time(at(12, 30, 9)), "오후 12:30:09");
    }

    #[test]
    fn test_seoul_is_utc_plus_nine() {
        let utc = Utc.with_ymd_and_hms(2024, 5, 1, 20, 0, 0).single().unwrap();
        assert_eq!(format_korean_time(utc.with_timezone(&seoul())), "오전 5:00:00");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_publishes_each_period() {
        let ticker = Ticker::start(TICK_INTERVAL);
        let mut rx = ticker.subscribe();

        // First tick fires immediately, the next after one period
        rx.changed().await.unwrap();
        rx.changed().await.unwrap();
        assert!(!ticker.current().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_ticker_stops_updates() {
        let ticker = Ticker::start(TICK_INTERVAL);
        let mut rx = ticker.subscribe();
        drop(ticker);

        let result = tokio::time::timeout(Duration::from_secs(5), rx.changed()).await;
        assert!(matches!(result, Ok(Err(_))));
    }
}
