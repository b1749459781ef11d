//! Request/poll protocol bounded by a total time budget.

use std::{future::Future, time::Duration};

use synapse_core::{
    Job, JobOutcome, JobRemote, Progress, RemoteResponse, TransportError, settings::PollSettings,
};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

/// Floor for the poll interval so a zero interval cannot spin.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Polling cadence and time budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Pause between status checks.
    pub poll_interval: Duration,
    /// Total wall-clock budget measured from submission.
    pub timeout_budget: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            timeout_budget: Duration::from_secs(900),
        }
    }
}

impl PollOptions {
    #[must_use]
    pub const fn new(poll_interval: Duration, timeout_budget: Duration) -> Self {
        Self {
            poll_interval,
            timeout_budget,
        }
    }

    /// Options with whole-second interval and budget.
    #[must_use]
    pub const fn from_secs(interval_secs: u64, budget_secs: u64) -> Self {
        Self::new(
            Duration::from_secs(interval_secs),
            Duration::from_secs(budget_secs),
        )
    }
}

impl From<&PollSettings> for PollOptions {
    fn from(settings: &PollSettings) -> Self {
        Self::new(settings.interval(), settings.timeout())
    }
}

fn transport_failure(phase: &'static str, err: &TransportError) -> JobOutcome {
    warn!(phase, error = %err, "transport failure, abandoning job");
    JobOutcome::transport_failure(err)
}

/// Runs the submit/poll protocol.
///
/// Stateless between invocations: one executor can drive any number of
/// concurrent jobs, each an independent suspend/resume sequence.
#[derive(Debug, Clone, Copy, Default)]
pub struct PollingExecutor {
    options: PollOptions,
}

impl PollingExecutor {
    #[must_use]
    pub const fn new(options: PollOptions) -> Self {
        Self { options }
    }

    #[must_use]
    pub const fn options(&self) -> PollOptions {
        self.options
    }

    /// Submit once, then poll until a terminal status or the budget runs out.
    ///
    /// Never fails: every path resolves to a [`JobOutcome`].
    pub async fn execute<S, SFut, P, PFut>(&self, submit: S, poll: P) -> JobOutcome
    where
        S: FnOnce() -> SFut,
        SFut: Future<Output = Result<RemoteResponse, TransportError>>,
        P: FnMut(String) -> PFut,
        PFut: Future<Output = Result<RemoteResponse, TransportError>>,
    {
        self.execute_with_cancel(submit, poll, &CancellationToken::new())
            .await
    }

    /// [`execute`](Self::execute) with a cooperative cancellation token,
    /// checked at every suspension point.
    pub async fn execute_with_cancel<S, SFut, P, PFut>(
        &self,
        submit: S,
        mut poll: P,
        cancel: &CancellationToken,
    ) -> JobOutcome
    where
        S: FnOnce() -> SFut,
        SFut: Future<Output = Result<RemoteResponse, TransportError>>,
        P: FnMut(String) -> PFut,
        PFut: Future<Output = Result<RemoteResponse, TransportError>>,
    {
        let started = Instant::now();
        let budget = self.options.timeout_budget;
        let interval = self.options.poll_interval.max(MIN_POLL_INTERVAL);

        let submitted = tokio::select! {
            biased;
            () = cancel.cancelled() => return JobOutcome::Cancelled,
            res = submit() => res,
        };

        let request_id = match submitted {
            Err(err) => return transport_failure("submit", &err),
            Ok(response) => match response.into_progress() {
                Progress::Done(outcome) => {
                    debug!(outcome = ?outcome.error_kind(), "job finished on submit");
                    return outcome;
                }
                Progress::Pending { request_id } => request_id,
            },
        };
        info!(%request_id, "job pending, polling for status");

        let mut attempt: u32 = 0;
        while started.elapsed() < budget {
            attempt += 1;
            let polled = tokio::select! {
                biased;
                () = cancel.cancelled() => return JobOutcome::Cancelled,
                res = poll(request_id.clone()) => res,
            };

            match polled {
                Err(err) => return transport_failure("poll", &err),
                Ok(response) => {
                    if let Progress::Done(outcome) = response.into_progress() {
                        info!(%request_id, attempt, "job reached terminal state");
                        return outcome;
                    }
                }
            }

            let elapsed = started.elapsed();
            debug!(
                %request_id,
                attempt,
                elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                "job still pending"
            );

            // A full interval would overshoot the budget: wait out the
            // remainder only, then stop without another poll.
            let wait = if elapsed + interval < budget {
                interval
            } else {
                budget.saturating_sub(elapsed)
            };
            if !wait.is_zero() {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return JobOutcome::Cancelled,
                    () = sleep(wait) => {}
                }
            }
        }

        warn!(
            %request_id,
            attempt,
            budget_secs = budget.as_secs(),
            "job status check timed out"
        );
        JobOutcome::timed_out(budget)
    }

    /// Run `job` against a [`JobRemote`].
    pub async fn run<R>(&self, remote: &R, job: &Job) -> JobOutcome
    where
        R: JobRemote + ?Sized,
    {
        self.run_with_cancel(remote, job, &CancellationToken::new())
            .await
    }

    /// Run `job` against a [`JobRemote`] with cancellation.
    pub async fn run_with_cancel<R>(
        &self,
        remote: &R,
        job: &Job,
        cancel: &CancellationToken,
    ) -> JobOutcome
    where
        R: JobRemote + ?Sized,
    {
        let span = info_span!("job", job_id = %job.job_id, kind = ?job.kind);
        async {
            info!("submitting job");
            self.execute_with_cancel(
                || remote.submit(job),
                |request_id| async move { remote.check_status(&request_id).await },
                cancel,
            )
            .await
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use serde_json::json;
    use synapse_core::{ErrorKind, FailureSource};

    use super::*;

    fn pending() -> Result<RemoteResponse, TransportError> {
        Ok(RemoteResponse::Pending {
            request_id: "req-1".into(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_success_never_polls() {
        let polls = AtomicUsize::new(0);
        let executor = PollingExecutor::default();

        let outcome = executor
            .execute(
                || async {
                    Ok(RemoteResponse::Success {
                        result: json!({"answer": "done"}),
                    })
                },
                |_| {
                    polls.fetch_add(1, Ordering::SeqCst);
                    async { pending() }
                },
            )
            .await;

        assert_eq!(
            outcome,
            JobOutcome::Success {
                result: json!({"answer": "done"})
            }
        );
        assert_eq!(polls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_failure_never_polls() {
        let polls = AtomicUsize::new(0);
        let outcome = PollingExecutor::default()
            .execute(
                || async {
                    Ok(RemoteResponse::Error {
                        message: "bad payload".into(),
                    })
                },
                |_| {
                    polls.fetch_add(1, Ordering::SeqCst);
                    async { pending() }
                },
            )
            .await;

        assert_eq!(outcome.error_kind(), Some(ErrorKind::RemoteFailure));
        assert_eq!(outcome.message(), Some("bad payload"));
        assert_eq!(polls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_pending_times_out_within_one_interval_of_budget() {
        for (interval, budget) in [(15, 900), (1, 10), (3, 10), (7, 10), (9, 10), (4, 30)] {
            let executor = PollingExecutor::new(PollOptions::from_secs(interval, budget));
            let start = Instant::now();

            let outcome = executor
                .execute(|| async { pending() }, |_| async { pending() })
                .await;

            let elapsed = start.elapsed();
            assert_eq!(outcome, JobOutcome::timed_out(Duration::from_secs(budget)));
            assert!(elapsed >= Duration::from_secs(budget), "{interval}/{budget}: {elapsed:?}");
            assert!(
                elapsed < Duration::from_secs(budget + interval),
                "{interval}/{budget}: {elapsed:?}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_cadence_poll_count() {
        let polls = AtomicUsize::new(0);
        let outcome = PollingExecutor::default()
            .execute(
                || async { pending() },
                |_| {
                    polls.fetch_add(1, Ordering::SeqCst);
                    async { pending() }
                },
            )
            .await;

        assert_eq!(outcome.error_kind(), Some(ErrorKind::Timeout));
        // Polls at t = 0, 15, ..., 885.
        assert_eq!(polls.load(Ordering::SeqCst), 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nth_poll_failed_stops_polling() {
        let polls = AtomicUsize::new(0);
        let executor = PollingExecutor::new(PollOptions::from_secs(1, 60));

        let outcome = executor
            .execute(
                || async { pending() },
                |request_id| {
                    assert_eq!(request_id, "req-1");
                    let n = polls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if n == 3 {
                            Ok(RemoteResponse::Failed {
                                message: "step 2 crashed".into(),
                            })
                        } else {
                            pending()
                        }
                    }
                },
            )
            .await;

        assert_eq!(
            outcome,
            JobOutcome::Failed {
                source: FailureSource::Remote,
                message: "step 2 crashed".into()
            }
        );
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_success_returns_result() {
        let polls = AtomicUsize::new(0);
        let outcome = PollingExecutor::new(PollOptions::from_secs(2, 60))
            .execute(
                || async { pending() },
                |_| {
                    let n = polls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            pending()
                        } else {
                            Ok(RemoteResponse::Success { result: json!(7) })
                        }
                    }
                },
            )
            .await;

        assert_eq!(outcome, JobOutcome::Success { result: json!(7) });
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_on_submit() {
        let polls = AtomicUsize::new(0);
        let outcome = PollingExecutor::default()
            .execute(
                || async { Err(TransportError::Network("connection refused".into())) },
                |_| {
                    polls.fetch_add(1, Ordering::SeqCst);
                    async { pending() }
                },
            )
            .await;

        assert_eq!(outcome.error_kind(), Some(ErrorKind::Transport));
        assert!(outcome.message().unwrap().contains("connection refused"));
        assert_eq!(polls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_mid_poll_is_terminal() {
        let polls = AtomicUsize::new(0);
        let start = Instant::now();
        let outcome = PollingExecutor::new(PollOptions::from_secs(5, 600))
            .execute(
                || async { pending() },
                |_| {
                    let n = polls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 1 {
                            Err(TransportError::Decode("unexpected EOF".into()))
                        } else {
                            pending()
                        }
                    }
                },
            )
            .await;

        assert_eq!(outcome.error_kind(), Some(ErrorKind::Transport));
        assert_eq!(polls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() < Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_wait() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(40)).await;
            trigger.cancel();
        });

        let outcome = PollingExecutor::default()
            .execute_with_cancel(|| async { pending() }, |_| async { pending() }, &cancel)
            .await;

        assert_eq!(outcome, JobOutcome::Cancelled);
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Cancelled));
    }

    struct ScriptedRemote {
        statuses: std::sync::Mutex<Vec<RemoteResponse>>,
        submitted: AtomicUsize,
    }

    #[async_trait]
    impl JobRemote for ScriptedRemote {
        async fn submit(&self, job: &Job) -> Result<RemoteResponse, TransportError> {
            assert_eq!(job.job_id, "wf-research");
            self.submitted.fetch_add(1, Ordering::SeqCst);
            pending()
        }

        async fn check_status(&self, request_id: &str) -> Result<RemoteResponse, TransportError> {
            assert_eq!(request_id, "req-1");
            let mut statuses = self.statuses.lock().unwrap();
            Ok(if statuses.is_empty() {
                RemoteResponse::Pending {
                    request_id: request_id.into(),
                }
            } else {
                statuses.remove(0)
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_against_job_remote() {
        let remote = Arc::new(ScriptedRemote {
            statuses: std::sync::Mutex::new(vec![
                RemoteResponse::Pending {
                    request_id: "req-1".into(),
                },
                RemoteResponse::Success {
                    result: json!({"summary": "ok"}),
                },
            ]),
            submitted: AtomicUsize::new(0),
        });
        let job = Job::workflow("wf-research", json!({"query": "rust"}));

        let outcome = PollingExecutor::new(PollOptions::from_secs(1, 30))
            .run(remote.as_ref(), &job)
            .await;

        assert!(outcome.is_success());
        assert_eq!(remote.submitted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_runs_are_independent() {
        let executor = PollingExecutor::new(PollOptions::from_secs(1, 5));
        let fast = executor.execute(
            || async { Ok(RemoteResponse::Success { result: json!("a") }) },
            |_| async { pending() },
        );
        let slow = executor.execute(|| async { pending() }, |_| async { pending() });

        let (fast, slow) = tokio::join!(fast, slow);
        assert!(fast.is_success());
        assert_eq!(slow.error_kind(), Some(ErrorKind::Timeout));
    }

    #[test]
    fn test_options_from_settings() {
        let options = PollOptions::from(&PollSettings::default());
        assert_eq!(options, PollOptions::default());
    }
}
