//! awsctl - bulk lifecycle control of AWS resources
//!
//! Resolves CloudFormation stacks into typed targets, starts and stops them in
//! dependency order under a bounded concurrency budget, waits for asynchronous
//! state transitions, and applies bulk cleanup actions to filtered resource
//! sets. All AWS access is delegated to the `aws` command line.

pub mod aws;
pub mod config;
pub mod lifecycle;
pub mod progress;
pub mod resource;

/// Version injected at compile time via AWSCTL_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("AWSCTL_VERSION") {
    Some(v) => v,
    None => "dev",
};
