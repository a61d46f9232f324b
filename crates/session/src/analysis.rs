//! Analysis Retry Loop
//!
//! Fetches the post-call report from the practice agent with a fixed number of
//! attempts and a fixed pause between them. Only one loop runs at a time; a
//! second trigger while one is in flight does nothing.

use crate::error::AnalysisError;
use async_trait::async_trait;
use kiyomi_core::AnalysisResult;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Where analysis results come from.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AnalysisSource: Send + Sync {
    async fn fetch_analysis(&self) -> Result<AnalysisResult, AnalysisError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPhase {
    Idle,
    Requesting { attempt: u32, max_attempts: u32 },
    Succeeded,
    Exhausted,
    Cancelled,
}

#[derive(Debug)]
pub enum RetryOutcome {
    Succeeded { result: AnalysisResult, attempts: u32 },
    Exhausted { attempts: u32, last_error: AnalysisError },
    /// The session went away while the loop was running.
    Cancelled,
    /// Another loop was already running; nothing was done.
    AlreadyRunning,
}

pub struct AnalysisRetryLoop {
    busy: AtomicBool,
    phase: watch::Sender<RetryPhase>,
    max_attempts: u32,
    delay: Duration,
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl AnalysisRetryLoop {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        let (phase, _) = watch::channel(RetryPhase::Idle);
        Self {
            busy: AtomicBool::new(false),
            phase,
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn phase(&self) -> watch::Receiver<RetryPhase> {
        self.phase.subscribe()
    }

    pub fn current_phase(&self) -> RetryPhase {
        *self.phase.borrow()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Runs the loop to completion. `on_attempt` is told the number of each
    /// attempt before it starts.
    #[instrument(skip_all, fields(max_attempts = self.max_attempts))]
    pub async fn run(
        &self,
        source: &dyn AnalysisSource,
        cancel: &CancellationToken,
        on_attempt: &(dyn Fn(u32) + Send + Sync),
    ) -> RetryOutcome {
        if self.busy.swap(true, Ordering::SeqCst) {
            info!("Analysis already in progress; ignoring trigger");
            return RetryOutcome::AlreadyRunning;
        }
        let _guard = BusyGuard(&self.busy);

        let mut last_error = None;
        for attempt in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                return self.cancelled();
            }
            self.phase.send_replace(RetryPhase::Requesting {
                attempt,
                max_attempts: self.max_attempts,
            });
            on_attempt(attempt);

            let result = tokio::select! {
                _ = cancel.cancelled() => return self.cancelled(),
                result = source.fetch_analysis() => result,
            };
            if cancel.is_cancelled() {
                return self.cancelled();
            }

            match result {
                Ok(result) => {
                    info!(attempt, "Analysis received");
                    self.phase.send_replace(RetryPhase::Succeeded);
                    return RetryOutcome::Succeeded {
                        result,
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Analysis attempt failed");
                    last_error = Some(e);
                }
            }

            if attempt < self.max_attempts {
                tokio::select! {
                    _ = cancel.cancelled() => return self.cancelled(),
                    _ = tokio::time::sleep(self.delay) => {}
                }
            }
        }

        self.phase.send_replace(RetryPhase::Exhausted);
        warn!(attempts = self.max_attempts, "Analysis retries exhausted");
        RetryOutcome::Exhausted {
            attempts: self.max_attempts,
            last_error: last_error.unwrap_or(AnalysisError::AgentNotPresent),
        }
    }

    fn cancelled(&self) -> RetryOutcome {
        info!("Analysis loop cancelled");
        self.phase.send_replace(RetryPhase::Cancelled);
        RetryOutcome::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiyomi_core::feedback::{DimensionScore, RadarDiagram};
    use kiyomi_realtime::RpcError;
    use std::sync::Arc;
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn report() -> AnalysisResult {
        let dim = |score| DimensionScore {
            score,
            insight: "steady".to_string(),
        };
        AnalysisResult {
            overall_score: "B-".to_string(),
            radar_diagram: RadarDiagram {
                impact: dim(7.0),
                rapport: dim(8.0),
                flex: dim(6.0),
                frame: dim(7.0),
                timing: dim(5.0),
            },
            feedback: vec!["Ask more open questions".to_string()],
            overall_message: "Solid first attempt".to_string(),
        }
    }

    /// Fails until `succeed_on`, recording when each attempt started.
    struct ScriptedSource {
        succeed_on: Option<u32>,
        calls: Mutex<Vec<Instant>>,
        latency: Duration,
    }

    impl ScriptedSource {
        fn new(succeed_on: Option<u32>) -> Self {
            Self {
                succeed_on,
                calls: Mutex::new(Vec::new()),
                latency: Duration::ZERO,
            }
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AnalysisSource for ScriptedSource {
        async fn fetch_analysis(&self) -> Result<AnalysisResult, AnalysisError> {
            let attempt = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(Instant::now());
                calls.len() as u32
            };
            tokio::time::sleep(self.latency).await;
            if Some(attempt) == self.succeed_on {
                Ok(report())
            } else {
                Err(RpcError::application("analysis not ready").into())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_source_exhausts_after_three_attempts() {
        let source = ScriptedSource::new(None);
        let retry = AnalysisRetryLoop::new(3, Duration::from_secs(2));
        let seen = Mutex::new(Vec::new());

        let outcome = retry
            .run(&source, &CancellationToken::new(), &|attempt| seen.lock().unwrap().push(attempt))
            .await;

        assert!(matches!(outcome, RetryOutcome::Exhausted { attempts: 3, .. }));
        assert_eq!(retry.current_phase(), RetryPhase::Exhausted);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);

        let calls = source.calls();
        assert_eq!(calls.len(), 3);
        for pair in calls.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_secs(2));
        }
        assert!(!retry.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_second_attempt_stops() {
        let source = ScriptedSource::new(Some(2));
        let retry = AnalysisRetryLoop::new(3, Duration::from_secs(2));

        let outcome = retry.run(&source, &CancellationToken::new(), &|_| {}).await;

        match outcome {
            RetryOutcome::Succeeded { result, attempts } => {
                assert_eq!(attempts, 2);
                assert_eq!(result, report());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(source.calls().len(), 2);
        assert_eq!(retry.current_phase(), RetryPhase::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_trigger_while_requesting_is_ignored() {
        let source = Arc::new(ScriptedSource {
            latency: Duration::from_secs(5),
            ..ScriptedSource::new(Some(1))
        });
        let retry = Arc::new(AnalysisRetryLoop::new(3, Duration::from_secs(2)));
        let cancel = CancellationToken::new();

        let first = {
            let (source, retry, cancel) = (Arc::clone(&source), Arc::clone(&retry), cancel.clone());
            tokio::spawn(async move { retry.run(source.as_ref(), &cancel, &|_| {}).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            retry.current_phase(),
            RetryPhase::Requesting {
                attempt: 1,
                max_attempts: 3
            }
        );

        let second = retry.run(source.as_ref(), &cancel, &|_| {}).await;
        assert!(matches!(second, RetryOutcome::AlreadyRunning));
        assert_eq!(
            retry.current_phase(),
            RetryPhase::Requesting {
                attempt: 1,
                max_attempts: 3
            }
        );

        let first = first.await.unwrap();
        assert!(matches!(first, RetryOutcome::Succeeded { attempts: 1, .. }));
        assert_eq!(source.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_delay_discards_the_loop() {
        let source = Arc::new(ScriptedSource::new(Some(2)));
        let retry = Arc::new(AnalysisRetryLoop::new(3, Duration::from_secs(2)));
        let cancel = CancellationToken::new();

        let task = {
            let (source, retry, cancel) = (Arc::clone(&source), Arc::clone(&retry), cancel.clone());
            tokio::spawn(async move { retry.run(source.as_ref(), &cancel, &|_| {}).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        assert!(matches!(task.await.unwrap(), RetryOutcome::Cancelled));
        assert_eq!(source.calls().len(), 1);
        assert_eq!(retry.current_phase(), RetryPhase::Cancelled);
    }

    #[tokio::test]
    async fn test_mocked_parse_failure_counts_as_attempt() {
        let mut source = MockAnalysisSource::new();
        let mut attempts = 0;
        source.expect_fetch_analysis().times(2).returning(move || {
            attempts += 1;
            if attempts == 1 {
                Err(kiyomi_core::AnalysisResult::parse("{}").unwrap_err().into())
            } else {
                Ok(report())
            }
        });
        let retry = AnalysisRetryLoop::new(3, Duration::from_millis(10));

        let outcome = retry.run(&source, &CancellationToken::new(), &|_| {}).await;
        assert!(matches!(outcome, RetryOutcome::Succeeded { attempts: 2, .. }));
    }
}
