//! rollguard-cluster: the I/O boundary to the orchestrated cluster.
//!
//! Every read and mutation the rollout, trigger, and rollback engines make
//! goes through the [`ClusterGateway`] trait. The gateway carries no policy:
//! it runs a verb and classifies failures as transient (safe to retry) or
//! permanent.
//!
//! # Components
//!
//! - **`gateway`**: the trait and its value types
//! - **`kubectl`**: production gateway shelling out to `kubectl`
//! - **`probe`**: HTTP GET probe against workload endpoints
//! - **`retry`**: bounded retry of transient errors
//! - **`manifest`**: JSON helpers for cluster objects
//! - **`fake`**: in-memory cluster used by tests across the workspace

pub mod error;
pub mod fake;
pub mod gateway;
pub mod kubectl;
pub mod manifest;
pub mod probe;
pub mod retry;

pub use error::{GatewayError, GatewayResult};
pub use fake::{FakeCluster, FakeOp, deployment_manifest, service_manifest};
pub use gateway::{ClusterGateway, ExecOutput, ProbeOutcome, RolloutState};
pub use kubectl::{KubectlConfig, KubectlGateway};
pub use retry::retry_transient;
