pub mod poll;

use std::collections::BTreeSet;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinSet;

use crate::endpoint::Endpoint;
use crate::error::{ConfigError, ProbeError, VerifyError};
use crate::identity::extract_identity;
use crate::probe::{ProbeConfig, Prober, TcpProber};

use self::poll::{poll_until, PollError, PollPolicy, Progress, Step};

/// Wrong-identity responses tolerated by [`Verifier::await_identity`] before it gives up.
pub const DEFAULT_MAX_MISMATCHES: u32 = 10;

/// Tuning for a [`Verifier`].
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Pacing between sequential polling attempts.
    pub poll_policy: PollPolicy,
    /// Content mismatches retried before an identity check fails.
    pub max_mismatches: u32,
    /// Socket timeouts for each probe.
    pub probe: ProbeConfig,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            poll_policy: PollPolicy::default(),
            max_mismatches: DEFAULT_MAX_MISMATCHES,
            probe: ProbeConfig::default(),
        }
    }
}

impl VerifierConfig {
    pub fn builder() -> VerifierConfigBuilder {
        VerifierConfigBuilder::default()
    }
}

/// Builder for [`VerifierConfig`].
#[derive(Debug, Clone, Default)]
pub struct VerifierConfigBuilder {
    config: VerifierConfig,
}

impl VerifierConfigBuilder {
    pub fn poll_policy(mut self, policy: PollPolicy) -> Self {
        self.config.poll_policy = policy;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_policy = PollPolicy::fixed(interval);
        self
    }

    pub fn max_mismatches(mut self, max: u32) -> Self {
        self.config.max_mismatches = max;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.probe.connect_timeout = timeout;
        self
    }

    pub fn rw_timeout(mut self, timeout: Duration) -> Self {
        self.config.probe.rw_timeout = timeout;
        self
    }

    /// Build the `VerifierConfig`, validating that all values are sensible.
    pub fn build(self) -> Result<VerifierConfig, ConfigError> {
        let c = self.config;
        if c.poll_policy.initial_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "poll_interval",
                reason: "must be > 0".into(),
            });
        }
        if c.poll_policy.max_interval < c.poll_policy.initial_interval {
            return Err(ConfigError::Invalid {
                field: "max_interval",
                reason: "must not be less than the initial interval".into(),
            });
        }
        if !(c.poll_policy.backoff_multiplier >= 1.0) {
            return Err(ConfigError::Invalid {
                field: "backoff_multiplier",
                reason: "must be >= 1.0".into(),
            });
        }
        if c.probe.connect_timeout.is_zero() || c.probe.rw_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "probe timeouts",
                reason: "must be > 0".into(),
            });
        }
        Ok(c)
    }
}

/// Result of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome<T> {
    pub attempts: u32,
    pub elapsed: Duration,
    pub value: T,
}

impl<T> Outcome<T> {
    fn new(progress: Progress, value: T) -> Self {
        Self {
            attempts: progress.attempts,
            elapsed: progress.elapsed,
            value,
        }
    }
}

/// Result of [`Verifier::verify_load_balanced`].
#[derive(Debug, Clone)]
pub struct LoadBalanced {
    /// The reachability wait that preceded sampling.
    pub reachable: Outcome<Bytes>,
    /// Sampling rounds, including the successful one.
    pub rounds: u32,
    /// Identities observed in the successful round, in completion order.
    pub identities: Vec<String>,
}

impl LoadBalanced {
    pub fn distinct(&self) -> BTreeSet<&str> {
        self.identities.iter().map(String::as_str).collect()
    }
}

/// How a withdrawn route gave itself away.
enum Answered {
    Response(Bytes),
    Accepted(ProbeError),
}

/// Turns raw probes into pass/fail judgements, tolerating the propagation
/// window that follows any routing change.
pub struct Verifier {
    prober: Arc<dyn Prober>,
    config: VerifierConfig,
}

impl Verifier {
    /// A verifier probing over TCP with `config.probe` timeouts.
    pub fn new(config: VerifierConfig) -> Self {
        let prober = Arc::new(TcpProber::new(config.probe));
        Self { prober, config }
    }

    pub fn with_prober(prober: Arc<dyn Prober>, config: VerifierConfig) -> Self {
        Self { prober, config }
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Probe until any response arrives or `budget` elapses.
    pub async fn await_reachable(
        &self,
        endpoint: &Endpoint,
        budget: Duration,
    ) -> Result<Outcome<Bytes>, VerifyError> {
        let prober = &self.prober;
        let res: Result<(Bytes, Progress), PollError<Infallible>> =
            poll_until(&self.config.poll_policy, budget, |p| async move {
                match prober.probe(endpoint).await {
                    Ok(response) => Step::Done(response),
                    Err(e) => {
                        tracing::debug!(%endpoint, attempt = p.attempts, error = %e, "not reachable yet");
                        Step::Retry(Some(e.to_string()))
                    }
                }
            })
            .await;

        match res {
            Ok((response, progress)) => {
                tracing::info!(%endpoint, attempts = progress.attempts, elapsed_ms = progress.elapsed.as_millis() as u64, "reachable");
                Ok(Outcome::new(progress, response))
            }
            Err(PollError::TimedOut {
                progress,
                last_observed,
            }) => Err(VerifyError::Timeout {
                endpoint: endpoint.clone(),
                attempts: progress.attempts,
                elapsed: progress.elapsed,
                last_observed,
            }),
            Err(PollError::Failed { error, .. }) => match error {},
        }
    }

    /// Probe until a response carries `expected` as its identity.
    ///
    /// Connection failures are retried silently within `budget`. A response
    /// from the wrong backend, or one that cannot be parsed, is logged and
    /// retried up to `max_mismatches` times; the next one fails the check.
    pub async fn await_identity(
        &self,
        endpoint: &Endpoint,
        expected: &str,
        budget: Duration,
    ) -> Result<Outcome<String>, VerifyError> {
        let prober = &self.prober;
        let max_mismatches = self.config.max_mismatches;
        let mismatches = AtomicU32::new(0);

        let res: Result<(String, Progress), PollError<String>> =
            poll_until(&self.config.poll_policy, budget, |p| {
                let mismatches = &mismatches;
                async move {
                    let response = match prober.probe(endpoint).await {
                        Ok(response) => response,
                        Err(e) => {
                            tracing::debug!(%endpoint, attempt = p.attempts, error = %e, "not reachable yet");
                            return Step::Retry(Some(e.to_string()));
                        }
                    };

                    let observed = match extract_identity(&response) {
                        Ok(identity) if identity == expected => {
                            return Step::Done(identity.to_string())
                        }
                        Ok(identity) => identity.to_string(),
                        Err(e) => e.to_string(),
                    };

                    let misses = mismatches.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::warn!(
                        %endpoint,
                        expected,
                        observed = %observed,
                        misses,
                        max = max_mismatches,
                        "response from unexpected backend"
                    );
                    if misses > max_mismatches {
                        Step::Fail(observed)
                    } else {
                        Step::Retry(Some(observed))
                    }
                }
            })
            .await;

        match res {
            Ok((identity, progress)) => {
                tracing::info!(%endpoint, identity = %identity, attempts = progress.attempts, "identity confirmed");
                Ok(Outcome::new(progress, identity))
            }
            Err(PollError::TimedOut {
                progress,
                last_observed,
            }) => Err(VerifyError::Timeout {
                endpoint: endpoint.clone(),
                attempts: progress.attempts,
                elapsed: progress.elapsed,
                last_observed,
            }),
            Err(PollError::Failed { error, progress }) => Err(VerifyError::IdentityMismatch {
                endpoint: endpoint.clone(),
                expected: expected.to_string(),
                last_observed: error,
                attempts: progress.attempts,
                elapsed: progress.elapsed,
            }),
        }
    }

    /// Check that `endpoint` spreads fresh connections over `expected`.
    ///
    /// Waits for reachability, then opens `sample_count` concurrent
    /// connections per round. Any identity outside `expected` fails
    /// immediately. A round containing an unparseable response is a content
    /// mismatch: it is retried, and the call fails once more than
    /// `max_mismatches` such rounds were seen. With two or more expected
    /// identities a round must observe at least two distinct ones; rounds
    /// that do not are repeated until `budget` elapses. The check is
    /// statistical: a small sample can miss a live backend.
    pub async fn verify_load_balanced<S: AsRef<str>>(
        &self,
        endpoint: &Endpoint,
        expected: &[S],
        sample_count: usize,
        budget: Duration,
    ) -> Result<LoadBalanced, VerifyError> {
        if sample_count < 2 {
            return Err(VerifyError::InvalidSampleCount(sample_count));
        }
        let expected: BTreeSet<&str> = expected.iter().map(AsRef::as_ref).collect();
        let expected_list = || expected.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let require_distinct = expected.len() >= 2;

        let reachable = self.await_reachable(endpoint, budget).await?;
        let remaining = budget.saturating_sub(reachable.elapsed);

        let max_mismatches = self.config.max_mismatches;
        let malformed_rounds = AtomicU32::new(0);
        let last_round: Mutex<Vec<String>> = Mutex::new(Vec::new());
        let res: Result<(Vec<String>, Progress), PollError<VerifyError>> =
            poll_until(&self.config.poll_policy, remaining, |p| {
                let last_round = &last_round;
                let malformed_rounds = &malformed_rounds;
                let expected = &expected;
                let expected_list = &expected_list;
                async move {
                    let responses = match self.sample(endpoint, sample_count).await {
                        Ok(responses) => responses,
                        Err(e) => {
                            tracing::debug!(%endpoint, round = p.attempts, error = %e, "sample round failed");
                            return Step::Retry(Some(e.to_string()));
                        }
                    };

                    let mut identities = Vec::with_capacity(responses.len());
                    for response in &responses {
                        let identity = match extract_identity(response) {
                            Ok(identity) => identity,
                            Err(e) => {
                                let misses = malformed_rounds.fetch_add(1, Ordering::SeqCst) + 1;
                                tracing::warn!(
                                    %endpoint,
                                    round = p.attempts,
                                    error = %e,
                                    misses,
                                    max = max_mismatches,
                                    "malformed sample response"
                                );
                                if misses > max_mismatches {
                                    return Step::Fail(e.into());
                                }
                                return Step::Retry(Some(e.to_string()));
                            }
                        };
                        if !expected.contains(identity) {
                            return Step::Fail(VerifyError::UnexpectedIdentity {
                                endpoint: endpoint.clone(),
                                observed: identity.to_string(),
                                expected: expected_list(),
                            });
                        }
                        identities.push(identity.to_string());
                    }

                    let distinct: BTreeSet<&str> = identities.iter().map(String::as_str).collect();
                    if require_distinct && distinct.len() < 2 {
                        tracing::warn!(
                            %endpoint,
                            round = p.attempts,
                            observed = ?distinct,
                            "all samples reached one backend"
                        );
                        let observed = identities.first().cloned();
                        *last_round.lock().unwrap_or_else(|e| e.into_inner()) = identities;
                        return Step::Retry(observed);
                    }
                    Step::Done(identities)
                }
            })
            .await;

        match res {
            Ok((identities, progress)) => {
                tracing::info!(%endpoint, identities = ?identities, rounds = progress.attempts, "load balanced");
                Ok(LoadBalanced {
                    reachable,
                    rounds: progress.attempts,
                    identities,
                })
            }
            Err(PollError::Failed { error, .. }) => Err(error),
            Err(PollError::TimedOut {
                progress,
                last_observed,
            }) => {
                let last = last_round.into_inner().unwrap_or_else(|e| e.into_inner());
                match last.into_iter().next() {
                    Some(observed) => Err(VerifyError::NotDistributed {
                        endpoint: endpoint.clone(),
                        observed,
                        expected: expected_list(),
                        samples: sample_count,
                    }),
                    None => Err(VerifyError::Timeout {
                        endpoint: endpoint.clone(),
                        attempts: reachable.attempts + progress.attempts,
                        elapsed: reachable.elapsed + progress.elapsed,
                        last_observed,
                    }),
                }
            }
        }
    }

    /// Require every probe to fail to connect until `budget` elapses.
    ///
    /// Only a refused or timed-out connect confirms withdrawal. Any response
    /// fails with [`VerifyError::UnexpectedSuccess`]; a connection that is
    /// accepted and then fails on write or read fails with
    /// [`VerifyError::StillAccepting`].
    pub async fn verify_unreachable(
        &self,
        endpoint: &Endpoint,
        budget: Duration,
    ) -> Result<Outcome<()>, VerifyError> {
        let prober = &self.prober;
        let res: Result<(Infallible, Progress), PollError<Answered>> =
            poll_until(&self.config.poll_policy, budget, |p| async move {
                match prober.probe(endpoint).await {
                    Ok(response) => Step::Fail(Answered::Response(response)),
                    Err(e) if e.is_connect() => {
                        tracing::debug!(%endpoint, attempt = p.attempts, error = %e, "unreachable as expected");
                        Step::Retry(Some(e.to_string()))
                    }
                    Err(e) => Step::Fail(Answered::Accepted(e)),
                }
            })
            .await;

        match res {
            Ok((never, _)) => match never {},
            Err(PollError::TimedOut { progress, .. }) => {
                tracing::info!(%endpoint, attempts = progress.attempts, "route withdrawn");
                Ok(Outcome::new(progress, ()))
            }
            Err(PollError::Failed {
                error: Answered::Response(response),
                progress,
            }) => {
                let response = String::from_utf8_lossy(&response).into_owned();
                tracing::error!(%endpoint, response = %response, "withdrawn route still answering");
                Err(VerifyError::UnexpectedSuccess {
                    endpoint: endpoint.clone(),
                    response,
                    attempts: progress.attempts,
                    elapsed: progress.elapsed,
                })
            }
            Err(PollError::Failed {
                error: Answered::Accepted(cause),
                progress,
            }) => {
                tracing::error!(%endpoint, error = %cause, "withdrawn route still accepting connections");
                Err(VerifyError::StillAccepting {
                    endpoint: endpoint.clone(),
                    attempts: progress.attempts,
                    elapsed: progress.elapsed,
                    cause,
                })
            }
        }
    }

    /// [`await_reachable`](Self::await_reachable) against `port` on every router address in turn.
    pub async fn await_reachable_on_all<S: AsRef<str>>(
        &self,
        hosts: &[S],
        port: u16,
        budget: Duration,
    ) -> Result<Vec<Outcome<Bytes>>, VerifyError> {
        let mut outcomes = Vec::with_capacity(hosts.len());
        for host in hosts {
            let endpoint = Endpoint::new(host.as_ref(), port);
            outcomes.push(self.await_reachable(&endpoint, budget).await?);
        }
        Ok(outcomes)
    }

    /// [`await_identity`](Self::await_identity) against `port` on every router address in turn.
    pub async fn await_identity_on_all<S: AsRef<str>>(
        &self,
        hosts: &[S],
        port: u16,
        expected: &str,
        budget: Duration,
    ) -> Result<Vec<Outcome<String>>, VerifyError> {
        let mut outcomes = Vec::with_capacity(hosts.len());
        for host in hosts {
            let endpoint = Endpoint::new(host.as_ref(), port);
            outcomes.push(self.await_identity(&endpoint, expected, budget).await?);
        }
        Ok(outcomes)
    }

    /// Run `count` independent probes concurrently and collect their responses.
    async fn sample(&self, endpoint: &Endpoint, count: usize) -> Result<Vec<Bytes>, VerifyError> {
        let mut tasks = JoinSet::new();
        for _ in 0..count {
            let prober = Arc::clone(&self.prober);
            let endpoint = endpoint.clone();
            tasks.spawn(async move { prober.probe(&endpoint).await });
        }

        let mut responses = Vec::with_capacity(count);
        while let Some(joined) = tasks.join_next().await {
            let response = joined.map_err(|e| VerifyError::SampleTask(e.to_string()))??;
            responses.push(response);
        }
        Ok(responses)
    }
}
