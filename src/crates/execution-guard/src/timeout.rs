//! Attempt timing: timeouts, warning thresholds, backoff and the attempt race

use crate::cancel::CancelSignal;
use rand::Rng;
use std::fmt::Display;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Timeout for attempt `attempt` (1-based)
///
/// With `progressive` set, attempt *k* gets `base * multiplier^(k-1)`. The
/// result never exceeds `cap`.
pub fn attempt_timeout(
    base: Duration,
    attempt: u32,
    multiplier: f64,
    cap: Duration,
    progressive: bool,
) -> Duration {
    let timeout = if progressive && attempt > 1 {
        let factor = multiplier.powi(attempt.saturating_sub(1) as i32);
        let millis = base.as_millis() as f64 * factor;
        if millis.is_finite() && millis < cap.as_millis() as f64 {
            Duration::from_millis(millis.round() as u64)
        } else {
            cap
        }
    } else {
        base
    };
    timeout.min(cap)
}

/// Point within an attempt at which the advisory warning fires
///
/// `None` when `ratio` would not land strictly inside the timeout.
pub fn warning_threshold(timeout: Duration, ratio: f64) -> Option<Duration> {
    if !(ratio > 0.0 && ratio < 1.0) {
        return None;
    }
    let at = timeout.mul_f64(ratio);
    (at > Duration::ZERO && at < timeout).then_some(at)
}

/// Linear backoff before the attempt after `attempt`: `base * attempt`
///
/// With `jitter`, the delay is scaled by a random factor in `0.5..=1.5`.
pub fn retry_backoff(base: Duration, attempt: u32, jitter: bool) -> Duration {
    let delay = base.saturating_mul(attempt.max(1));
    if jitter {
        let factor = rand::thread_rng().gen_range(0.5..=1.5);
        delay.mul_f64(factor)
    } else {
        delay
    }
}

/// How a single attempt ended
#[derive(Debug)]
pub(crate) enum AttemptOutcome<T> {
    Completed(T),
    Failed(String),
    TimedOut,
    Cancelled,
}

/// Race a spawned attempt against its deadline, a warning timer and
/// cancellation
///
/// On timeout or cancellation the join handle is dropped, which detaches the
/// task: it may still finish, and its result goes nowhere.
pub(crate) async fn race_attempt<T, E, W>(
    mut handle: JoinHandle<Result<T, E>>,
    timeout: Duration,
    warn_at: Option<Duration>,
    cancel: &CancelSignal,
    mut on_warning: W,
) -> AttemptOutcome<T>
where
    E: Display,
    W: FnMut(Duration),
{
    let started = Instant::now();
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let warning = tokio::time::sleep(warn_at.unwrap_or(timeout));
    tokio::pin!(warning);
    let mut warned = warn_at.is_none();

    loop {
        tokio::select! {
            biased;

            joined = &mut handle => {
                return match joined {
                    Ok(Ok(value)) => AttemptOutcome::Completed(value),
                    Ok(Err(err)) => AttemptOutcome::Failed(err.to_string()),
                    Err(join_err) => AttemptOutcome::Failed(format!("operation task failed: {}", join_err)),
                };
            }
            _ = cancel.cancelled() => return AttemptOutcome::Cancelled,
            _ = &mut deadline => return AttemptOutcome::TimedOut,
            _ = &mut warning, if !warned => {
                warned = true;
                on_warning(started.elapsed());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: Duration = Duration::from_secs(1);

    #[test]
    fn test_fixed_timeout_ignores_attempt() {
        for attempt in 1..=4 {
            assert_eq!(attempt_timeout(SEC, attempt, 1.5, 10 * SEC, false), SEC);
        }
    }

    #[test]
    fn test_progressive_timeout_sequence() {
        let cap = Duration::from_secs(120);
        let seq: Vec<u128> = (1..=3)
            .map(|k| attempt_timeout(SEC, k, 1.5, cap, true).as_millis())
            .collect();
        assert_eq!(seq, vec![1000, 1500, 2250]);
    }

    #[test]
    fn test_progressive_timeout_capped() {
        let cap = Duration::from_millis(2000);
        assert_eq!(attempt_timeout(SEC, 3, 1.5, cap, true), cap);
        assert_eq!(attempt_timeout(SEC, 200, 10.0, cap, true), cap);
        assert_eq!(attempt_timeout(5 * SEC, 1, 1.5, cap, false), cap);
    }

    #[test]
    fn test_warning_threshold_inside_timeout() {
        assert_eq!(
            warning_threshold(SEC, 0.8),
            Some(Duration::from_millis(800))
        );
        assert_eq!(warning_threshold(SEC, 1.0), None);
        assert_eq!(warning_threshold(Duration::ZERO, 0.5), None);
    }

    #[test]
    fn test_linear_backoff() {
        let base = Duration::from_millis(100);
        assert_eq!(retry_backoff(base, 1, false), Duration::from_millis(100));
        assert_eq!(retry_backoff(base, 3, false), Duration::from_millis(300));
    }

    #[test]
    fn test_jittered_backoff_bounds() {
        let base = Duration::from_millis(100);
        for _ in 0..50 {
            let delay = retry_backoff(base, 2, true);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(300));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_completes() {
        let handle = tokio::spawn(async { Ok::<_, String>(7) });
        let outcome = race_attempt(handle, SEC, None, &CancelSignal::new(), |_| {}).await;
        assert!(matches!(outcome, AttemptOutcome::Completed(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_times_out_and_warns_first() {
        let handle = tokio::spawn(async {
            std::future::pending::<()>().await;
            Ok::<u32, String>(0)
        });
        let mut warnings = Vec::new();
        let outcome = race_attempt(
            handle,
            SEC,
            Some(Duration::from_millis(800)),
            &CancelSignal::new(),
            |elapsed| warnings.push(elapsed),
        )
        .await;

        assert!(matches!(outcome, AttemptOutcome::TimedOut));
        assert_eq!(warnings, vec![Duration::from_millis(800)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_reports_failure_message() {
        let handle = tokio::spawn(async { Err::<u32, _>("rate limited") });
        let outcome = race_attempt(handle, SEC, None, &CancelSignal::new(), |_| {}).await;
        match outcome {
            AttemptOutcome::Failed(msg) => assert_eq!(msg, "rate limited"),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_observes_cancel() {
        let cancel = CancelSignal::new();
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<u32, String>(1)
        });
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let outcome = race_attempt(handle, 10 * SEC, None, &cancel, |_| {}).await;
        assert!(matches!(outcome, AttemptOutcome::Cancelled));
    }
}
