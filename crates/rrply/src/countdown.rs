//! Play-time countdown.
//!
//! Counts whole ticks of wall-clock time, but only those ticks at which the
//! `is_running` predicate holds.  A paused track therefore never finishes
//! early: its wait always spans its nominal duration of running time.

use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// `played` reached the target after `waited` ticks of wall-clock time.
    Elapsed { played: u64, waited: u64 },
    Cancelled { played: u64 },
}

#[derive(Debug, Clone, Copy)]
pub struct Countdown {
    tick: Duration,
}

impl Default for Countdown {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl Countdown {
    pub fn new(tick: Duration) -> Self {
        Self { tick }
    }

    /// Ticks needed for `secs` of running time; fractions round up.
    pub fn ticks_for(&self, secs: f64) -> u64 {
        if secs <= 0.0 || !secs.is_finite() {
            return 0;
        }
        (secs / self.tick.as_secs_f64()).ceil() as u64
    }

    /// Wait until `is_running` has been observed true on enough ticks to
    /// cover `secs`, or until `cancel` fires.
    pub async fn run<F>(&self, secs: f64, is_running: F, cancel: &CancellationToken) -> Outcome
    where
        F: Fn() -> bool,
    {
        let target = self.ticks_for(secs);
        let mut played = 0;
        let mut waited = 0;

        let mut ticker = interval_at(Instant::now() + self.tick, self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while played < target {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Outcome::Cancelled { played },
                _ = ticker.tick() => {
                    waited += 1;
                    if is_running() {
                        played += 1;
                    }
                }
            }
        }
        Outcome::Elapsed { played, waited }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Flip `running` at each offset (seconds from now).
    fn schedule_flips(running: Arc<AtomicBool>, offsets: Vec<f64>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let start = Instant::now();
            for at in offsets {
                tokio::time::sleep_until(start + Duration::from_secs_f64(at)).await;
                running.fetch_xor(true, Ordering::SeqCst);
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_uninterrupted_wait_matches_duration() {
        let start = Instant::now();
        let outcome = Countdown::default()
            .run(5.0, || true, &CancellationToken::new())
            .await;
        assert_eq!(outcome, Outcome::Elapsed { played: 5, waited: 5 });
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_ticks_do_not_count() {
        let running = Arc::new(AtomicBool::new(true));
        // off at 2.5, on at 6.5, off at 7.5, on at 10.5
        let flips = schedule_flips(running.clone(), vec![2.5, 6.5, 7.5, 10.5]);

        let start = Instant::now();
        let r = running.clone();
        let outcome = Countdown::default()
            .run(10.0, move || r.load(Ordering::SeqCst), &CancellationToken::new())
            .await;

        assert_eq!(outcome, Outcome::Elapsed { played: 10, waited: 17 });
        assert_eq!(start.elapsed(), Duration::from_secs(17));
        flips.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_any_toggle_sequence_plays_full_duration() {
        // Cheap deterministic spread of toggle schedules
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        for _ in 0..20 {
            let mut offsets = Vec::new();
            let mut at = 0.0;
            for _ in 0..6 {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                at += 0.25 + (seed >> 40) as f64 / (1u64 << 24) as f64 * 4.0;
                offsets.push(at);
            }
            let running = Arc::new(AtomicBool::new(true));
            let flips = schedule_flips(running.clone(), offsets);
            let r = running.clone();
            let outcome = Countdown::default()
                .run(12.0, move || r.load(Ordering::SeqCst), &CancellationToken::new())
                .await;

            match outcome {
                Outcome::Elapsed { played, waited } => {
                    assert_eq!(played, 12);
                    assert!(waited >= 12);
                }
                other => panic!("unexpected {:?}", other),
            }
            flips.abort();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_ends_wait_promptly() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(3500)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let outcome = Countdown::default().run(60.0, || true, &cancel).await;
        assert_eq!(outcome, Outcome::Cancelled { played: 3 });
        assert_eq!(start.elapsed(), Duration::from_millis(3500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_running_waits_until_cancelled() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(100)).await;
            trigger.cancel();
        });
        let outcome = Countdown::default().run(1.0, || false, &cancel).await;
        assert_eq!(outcome, Outcome::Cancelled { played: 0 });
    }

    #[test]
    fn test_ticks_for_rounds_up() {
        let c = Countdown::default();
        assert_eq!(c.ticks_for(169.5), 170);
        assert_eq!(c.ticks_for(10.0), 10);
        assert_eq!(c.ticks_for(0.0), 0);
        assert_eq!(c.ticks_for(-3.0), 0);
    }
}
