//! Kubernetes integration
//!
//! - Building a client from a kubeconfig
//! - Listing every pod in the cluster
//! - Waiting for the control plane to come up

mod client;
mod readiness;

pub use client::{K8sClient, PodLister};
pub use readiness::{
    evaluate, Backoff, CancelToken, PodObservation, PodPhase, PodState, ReadinessPolicy,
    ReadinessWaiter, Verdict, WaitOutcome,
};

#[cfg(test)]
pub use client::MockPodLister;
