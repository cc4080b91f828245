//! Bounded polling for in-flight backend operations.
//!
//! Every backend reports asynchronous work through some "fetch current
//! status" call; this module re-checks that status on a fixed interval until
//! it reaches a terminal value, the deadline passes, or the caller cancels.
//! A fetch error aborts the wait immediately rather than being retried.

use crate::{Error, Result};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Status of an in-flight operation as classified by the fetch closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    Pending,
    Done,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    /// `None` waits indefinitely. The default is bounded; indefinite waits
    /// are an availability hazard.
    pub deadline: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            deadline: Some(Duration::from_secs(600)),
        }
    }
}

/// How a completed wait went, for logging and tests.
#[derive(Debug, Clone)]
pub struct PollStats {
    pub polls: u32,
    pub elapsed: Duration,
}

/// Re-fetch `fetch` every `config.interval` until it reports a terminal
/// state.
///
/// Returns the number of fetches and elapsed time on success. `Failed`
/// surfaces as [`Error::OperationFailed`], a passed deadline as
/// [`Error::PollTimeout`], cancellation as [`Error::Cancelled`], and any
/// fetch error is propagated as-is.
pub async fn wait_until<F, Fut>(
    what: &str,
    config: &PollConfig,
    cancel: &CancellationToken,
    mut fetch: F,
) -> Result<PollStats>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollState>>,
{
    let start = Instant::now();
    let mut polls: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        polls += 1;
        match fetch().await? {
            PollState::Done => {
                let stats = PollStats {
                    polls,
                    elapsed: start.elapsed(),
                };
                debug!(what, polls = stats.polls, elapsed_ms = stats.elapsed.as_millis() as u64, "operation reached terminal state");
                return Ok(stats);
            }
            PollState::Failed(reason) => {
                return Err(Error::OperationFailed {
                    what: what.to_string(),
                    reason,
                });
            }
            PollState::Pending => {}
        }

        if let Some(deadline) = config.deadline
            && start.elapsed() >= deadline
        {
            return Err(Error::PollTimeout {
                what: what.to_string(),
                polls,
                elapsed: start.elapsed(),
            });
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(config.interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(1),
            deadline: Some(Duration::from_secs(5)),
        }
    }

    async fn run_sequence(states: Vec<PollState>) -> (Result<PollStats>, u32) {
        let fetches = Arc::new(AtomicU32::new(0));
        let counter = fetches.clone();
        let mut queue = VecDeque::from(states);
        let cancel = CancellationToken::new();

        let result = wait_until("test operation", &fast(), &cancel, || {
            counter.fetch_add(1, Ordering::SeqCst);
            let state = queue.pop_front().expect("polled past end of sequence");
            async move { Ok(state) }
        })
        .await;

        (result, fetches.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn pending_pending_done_fetches_exactly_three_times() {
        let (result, fetches) =
            run_sequence(vec![PollState::Pending, PollState::Pending, PollState::Done]).await;

        let stats = result.unwrap();
        assert_eq!(stats.polls, 3);
        assert_eq!(fetches, 3);
    }

    #[tokio::test]
    async fn failure_stops_after_second_fetch() {
        let (result, fetches) = run_sequence(vec![
            PollState::Pending,
            PollState::Failed("disk quota exceeded".into()),
        ])
        .await;

        assert!(matches!(result, Err(Error::OperationFailed { .. })));
        assert_eq!(fetches, 2);
    }

    #[tokio::test]
    async fn fetch_error_aborts_immediately() {
        let cancel = CancellationToken::new();
        let fetches = Arc::new(AtomicU32::new(0));
        let counter = fetches.clone();

        let result = wait_until("test operation", &fast(), &cancel, || {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                Err(Error::OperationFailed {
                    what: "status fetch".into(),
                    reason: "connection reset".into(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deadline_produces_timeout() {
        let config = PollConfig {
            interval: Duration::from_millis(1),
            deadline: Some(Duration::from_millis(5)),
        };
        let cancel = CancellationToken::new();

        let result = wait_until("test operation", &config, &cancel, || async {
            Ok(PollState::Pending)
        })
        .await;

        match result {
            Err(Error::PollTimeout { polls, .. }) => assert!(polls >= 1),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_any_fetch() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = wait_until("test operation", &fast(), &cancel, || async {
            panic!("must not fetch after cancellation")
        })
        .await;

        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
