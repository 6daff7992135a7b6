use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const ENDED_LABEL: &str = "ended";
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum CountdownTick {
    #[default]
    Idle,
    #[serde(rename_all = "camelCase")]
    Running { remaining_seconds: u64, label: String },
    Ended,
}

impl CountdownTick {
    pub fn label(&self) -> &str {
        match self {
            Self::Idle => "",
            Self::Running { label, .. } => label,
            Self::Ended => ENDED_LABEL,
        }
    }
}

/// Renders `3725` as `"1h 2m 5s"`; leading zero units are dropped.
pub fn format_remaining(total_seconds: u64) -> String {
    if total_seconds == 0 {
        return ENDED_LABEL.to_string();
    }

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3_600;
    let minutes = (total_seconds % 3_600) / 60;
    let seconds = total_seconds % 60;

    if days > 0 {
        format!("{days}d {hours}h {minutes}m {seconds}s")
    } else if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

pub fn tick_for(remaining: Duration) -> CountdownTick {
    let seconds = remaining.as_millis().div_ceil(1_000).min(u64::MAX as u128) as u64;
    if seconds == 0 {
        return CountdownTick::Ended;
    }
    CountdownTick::Running {
        remaining_seconds: seconds,
        label: format_remaining(seconds),
    }
}

pub trait TickSink: Send + Sync + 'static {
    fn publish(&self, tick: CountdownTick);
}

impl TickSink for watch::Sender<CountdownTick> {
    fn publish(&self, tick: CountdownTick) {
        self.send_if_modified(|current| {
            if *current == tick {
                return false;
            }
            *current = tick;
            true
        });
    }
}

struct RunningCadence {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// One-second cadence derived from an authoritative end time.
///
/// `restart` always discards the previous cadence; the cadence stops by
/// itself after publishing [`CountdownTick::Ended`] once.
pub struct CountdownClock<S: TickSink> {
    sink: Arc<S>,
    end_time: Option<DateTime<Utc>>,
    running: Option<RunningCadence>,
}

impl<S: TickSink> CountdownClock<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink: Arc::new(sink),
            end_time: None,
            running: None,
        }
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .map(|cadence| !cadence.handle.is_finished())
            .unwrap_or(false)
    }

    pub fn restart(&mut self, end_time: DateTime<Utc>) {
        self.stop();

        let remaining = (end_time - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let deadline = Instant::now() + remaining;
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_cadence(Arc::clone(&self.sink), deadline, cancel.clone()));

        self.end_time = Some(end_time);
        self.running = Some(RunningCadence { cancel, handle });
    }

    pub fn stop(&mut self) {
        if let Some(cadence) = self.running.take() {
            cadence.cancel.cancel();
        }
    }

    /// Stops the cadence and shows the terminal label right away.
    pub fn finish(&mut self) {
        self.stop();
        self.sink.publish(CountdownTick::Ended);
    }
}

impl<S: TickSink> Drop for CountdownClock<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_cadence<S: TickSink>(sink: Arc<S>, deadline: Instant, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let tick = tick_for(deadline.saturating_duration_since(Instant::now()));
                let ended = tick == CountdownTick::Ended;
                sink.publish(tick);
                if ended {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio::sync::mpsc::error::TryRecvError;

    /// Records every tick so tests can assert on the full sequence.
    impl TickSink for mpsc::UnboundedSender<CountdownTick> {
        fn publish(&self, tick: CountdownTick) {
            let _ = self.send(tick);
        }
    }

    #[test]
    fn drops_leading_zero_units() {
        assert_eq!(format_remaining(12 * 60 + 4), "12m 4s");
        assert_eq!(format_remaining(61), "1m 1s");
        assert_eq!(format_remaining(3_600), "1h 0m 0s");
        assert_eq!(format_remaining(2 * 86_400 + 5), "2d 0h 0m 5s");
        assert_eq!(format_remaining(9), "9s");
        assert_eq!(format_remaining(0), ENDED_LABEL);
    }

    #[test]
    fn rounds_partial_seconds_up() {
        assert_eq!(
            tick_for(Duration::from_millis(60_999)),
            CountdownTick::Running {
                remaining_seconds: 61,
                label: "1m 1s".to_string()
            }
        );
        assert_eq!(tick_for(Duration::ZERO), CountdownTick::Ended);
    }

    #[tokio::test(start_paused = true)]
    async fn counts_down_and_ends_exactly_once() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let mut clock = CountdownClock::new(sender);
        clock.restart(Utc::now() + chrono::Duration::seconds(61));

        let first = receiver.recv().await.expect("first tick");
        assert_eq!(first.label(), "1m 1s");

        let mut running_ticks = 1;
        let mut ended_ticks = 0;
        while let Some(tick) = receiver.recv().await {
            match tick {
                CountdownTick::Running { .. } => running_ticks += 1,
                CountdownTick::Ended => {
                    ended_ticks += 1;
                    break;
                }
                CountdownTick::Idle => unreachable!("cadence never publishes idle"),
            }
        }

        assert_eq!(running_ticks, 61);
        assert_eq!(ended_ticks, 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(receiver.try_recv(), Err(TryRecvError::Empty));
        assert!(!clock.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_discards_previous_cadence() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let mut clock = CountdownClock::new(sender);
        clock.restart(Utc::now() + chrono::Duration::seconds(30));
        let _ = receiver.recv().await;

        let extended = Utc::now() + chrono::Duration::seconds(300);
        clock.restart(extended);
        assert_eq!(clock.end_time(), Some(extended));

        for _ in 0..40 {
            match receiver.recv().await.expect("tick") {
                CountdownTick::Running {
                    remaining_seconds, ..
                } => assert!(remaining_seconds > 200),
                other => panic!("unexpected tick {other:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn finish_publishes_ended_to_watchers() {
        let (sender, receiver) = watch::channel(CountdownTick::Idle);
        let mut clock = CountdownClock::new(sender);
        clock.restart(Utc::now() + chrono::Duration::seconds(600));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(matches!(*receiver.borrow(), CountdownTick::Running { .. }));

        clock.finish();
        assert_eq!(*receiver.borrow(), CountdownTick::Ended);
        assert!(!clock.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_silences_the_cadence() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let mut clock = CountdownClock::new(sender);
        clock.restart(Utc::now() + chrono::Duration::seconds(30));
        let _ = receiver.recv().await;

        clock.stop();
        tokio::time::sleep(Duration::from_secs(10)).await;
        while let Ok(tick) = receiver.try_recv() {
            assert_ne!(tick, CountdownTick::Ended);
        }
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(receiver.try_recv(), Err(TryRecvError::Empty));
    }
}
