//! Control-plane readiness waiter
//!
//! Two nested loops:
//! - an outer ticker that fires every `poll_interval` and never gives up on
//!   its own;
//! - an inner, bounded exponential backoff that absorbs transient API errors
//!   within one tick.
//!
//! A successful listing ends the inner loop right away with a ready or
//! not-ready verdict. Pending pods are re-checked on the next tick, not
//! busy-polled.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use rand::Rng;
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::{oneshot, watch};
use tokio::time::{sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::client::PodLister;

/// Lifecycle phase of a pod as reported by the API server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl From<&str> for PodPhase {
    fn from(phase: &str) -> Self {
        match phase {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

/// A pod reduced to what readiness cares about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodState {
    pub name: String,
    pub namespace: String,
    pub phase: PodPhase,
}

impl PodState {
    pub fn new(namespace: &str, name: &str, phase: PodPhase) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            phase,
        }
    }
}

/// Snapshot of every pod in the cluster at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodObservation {
    pub pods: Vec<PodState>,
}

impl PodObservation {
    pub fn new(pods: Vec<PodState>) -> Self {
        Self { pods }
    }

    pub fn from_pods(pods: impl IntoIterator<Item = Pod>) -> Self {
        let pods = pods
            .into_iter()
            .map(|pod| PodState {
                name: pod.metadata.name.unwrap_or_default(),
                namespace: pod.metadata.namespace.unwrap_or_default(),
                phase: pod
                    .status
                    .and_then(|s| s.phase)
                    .as_deref()
                    .map(PodPhase::from)
                    .unwrap_or(PodPhase::Unknown),
            })
            .collect();
        Self { pods }
    }

    pub fn len(&self) -> usize {
        self.pods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
    }

    /// Pods whose phase is anything other than Running
    pub fn not_running(&self) -> impl Iterator<Item = &PodState> {
        self.pods.iter().filter(|p| p.phase != PodPhase::Running)
    }
}

/// Decides whether an observation counts as a ready control plane
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadinessPolicy {
    /// Minimum number of pods that must be observed. Zero makes an empty
    /// cluster ready.
    pub min_pods: usize,
}

impl ReadinessPolicy {
    pub fn new(min_pods: usize) -> Self {
        Self { min_pods }
    }

    pub fn is_ready(&self, observation: &PodObservation) -> bool {
        observation.len() >= self.min_pods && observation.not_running().next().is_none()
    }
}

/// Bounded exponential backoff for transient API errors
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Maximum number of attempts in one sequence
    pub steps: u32,
    pub initial_delay: Duration,
    pub factor: f64,
    /// Extra random delay, as a fraction of the base delay
    pub jitter: f64,
    pub max_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            steps: 4,
            initial_delay: Duration::from_millis(10),
            factor: 5.0,
            jitter: 0.1,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl Backoff {
    /// Delay before retry number `retry` (zero based), without jitter.
    ///
    /// Always within `0..=max_delay`, whatever `factor` holds.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let scaled = self.initial_delay.as_secs_f64() * self.factor.powi(retry as i32);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else if scaled <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(scaled)
        }
    }

    /// Jitter outside `0..=1` is clamped; NaN disables it
    fn delay(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        if self.jitter.is_nan() || self.jitter <= 0.0 {
            return base;
        }
        let extra = rand::rng().random_range(0.0..=self.jitter.min(1.0));
        let extra = Duration::try_from_secs_f64(base.as_secs_f64() * extra).unwrap_or_default();
        base.saturating_add(extra)
    }
}

/// Result of one inner attempt sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Ready { pods: usize },
    NotReady { pods: usize, not_running: usize },
    ApiUnavailable { attempts: u32 },
}

impl Verdict {
    pub fn is_ready(&self) -> bool {
        matches!(self, Verdict::Ready { .. })
    }
}

/// Run one inner attempt sequence: list pods, retrying API errors with backoff
pub async fn evaluate<L>(lister: &L, policy: &ReadinessPolicy, backoff: &Backoff) -> Verdict
where
    L: PodLister + ?Sized,
{
    let steps = backoff.steps.max(1);
    for attempt in 1..=steps {
        match lister.list_pods().await {
            Ok(observation) => {
                info!("There are {} pods in the cluster", observation.len());
                if policy.is_ready(&observation) {
                    return Verdict::Ready {
                        pods: observation.len(),
                    };
                }
                for pod in observation.not_running() {
                    debug!(namespace = %pod.namespace, pod = %pod.name, phase = %pod.phase, "Pod not running");
                }
                return Verdict::NotReady {
                    pods: observation.len(),
                    not_running: observation.not_running().count(),
                };
            }
            Err(e) => {
                warn!(attempt, steps, "Failed to list pods: {}", e);
                if attempt < steps {
                    sleep(backoff.delay(attempt - 1)).await;
                }
            }
        }
    }
    Verdict::ApiUnavailable { attempts: steps }
}

/// Cooperative cancellation signal shared between the caller and the waiter
#[derive(Clone, Debug)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`CancelToken::cancel`] has been called
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// How the readiness wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WaitOutcome {
    Ready { ticks: u32 },
    Cancelled { ticks: u32 },
    TimedOut { ticks: u32 },
    /// The ticker task stopped without reporting readiness
    Aborted { ticks: u32 },
}

impl WaitOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, WaitOutcome::Ready { .. })
    }
}

impl fmt::Display for WaitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitOutcome::Ready { ticks } => write!(f, "ready after {} checks", ticks),
            WaitOutcome::Cancelled { ticks } => write!(f, "cancelled after {} checks", ticks),
            WaitOutcome::TimedOut { ticks } => write!(f, "timed out after {} checks", ticks),
            WaitOutcome::Aborted { ticks } => write!(f, "aborted after {} checks", ticks),
        }
    }
}

/// Blocks until the cluster is observed ready, the caller cancels, or the
/// optional deadline passes
pub struct ReadinessWaiter<L: ?Sized> {
    lister: Arc<L>,
    policy: ReadinessPolicy,
    backoff: Backoff,
    poll_interval: Duration,
    deadline: Option<Duration>,
}

impl<L> ReadinessWaiter<L>
where
    L: PodLister + ?Sized + 'static,
{
    pub fn new(lister: Arc<L>, poll_interval: Duration) -> Self {
        Self {
            lister,
            policy: ReadinessPolicy::default(),
            backoff: Backoff::default(),
            poll_interval,
            deadline: None,
        }
    }

    pub fn with_policy(mut self, policy: ReadinessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub async fn wait_until_ready(&self, cancel: &CancelToken) -> WaitOutcome {
        let ticks = Arc::new(AtomicU32::new(0));
        let (done_tx, done_rx) = oneshot::channel();

        let ticker = tokio::spawn(run_ticker(
            Arc::clone(&self.lister),
            self.policy,
            self.backoff,
            self.poll_interval,
            Arc::clone(&ticks),
            done_tx,
        ));

        let deadline = self.deadline;
        let timeout = async move {
            match deadline {
                Some(d) => sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        let outcome = tokio::select! {
            biased;
            done = done_rx => match done {
                Ok(ticks) => WaitOutcome::Ready { ticks },
                Err(_) => WaitOutcome::Aborted { ticks: ticks.load(Ordering::SeqCst) },
            },
            _ = cancel.cancelled() => WaitOutcome::Cancelled { ticks: ticks.load(Ordering::SeqCst) },
            _ = timeout => WaitOutcome::TimedOut { ticks: ticks.load(Ordering::SeqCst) },
        };

        ticker.abort();
        match outcome {
            WaitOutcome::Ready { .. } => info!("All pods running ({})", outcome),
            _ => warn!("Stopped waiting for the control plane: {}", outcome),
        }
        outcome
    }
}

async fn run_ticker<L>(
    lister: Arc<L>,
    policy: ReadinessPolicy,
    backoff: Backoff,
    poll_interval: Duration,
    ticks: Arc<AtomicU32>,
    done: oneshot::Sender<u32>,
) where
    L: PodLister + ?Sized,
{
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let tick = ticks.fetch_add(1, Ordering::SeqCst) + 1;

        match evaluate(&*lister, &policy, &backoff).await {
            Verdict::Ready { pods } => {
                debug!(tick, pods, "Cluster ready");
                let _ = done.send(tick);
                return;
            }
            Verdict::NotReady { pods, not_running } => {
                info!(
                    tick,
                    "{} of {} pods not running yet, checking again in {:?}",
                    not_running,
                    pods,
                    poll_interval
                );
            }
            Verdict::ApiUnavailable { attempts } => {
                warn!(
                    tick,
                    "Kubernetes API unavailable after {} attempts, checking again in {:?}",
                    attempts,
                    poll_interval
                );
            }
        }
    }
}
