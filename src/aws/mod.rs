//! AWS collaborator layer
//!
//! # Module Structure
//!
//! - [`runner`] - Process boundary for the external `aws` binary
//! - [`client`] - JSON-speaking CLI client and error formatting
//! - [`stack`] - CloudFormation stack enumeration and resolution
//! - [`lifecycle`] - Start/stop/scale operations per resource kind
//! - [`cloudfront`] - Cache invalidation
//! - [`cleanup`] - Candidate listers and bulk actions

pub mod cleanup;
pub mod client;
pub mod cloudfront;
pub mod lifecycle;
pub mod runner;
pub mod stack;

pub use client::{format_aws_error, AwsCli, AwsCliError};
pub use runner::{CommandOutput, CommandRunner, ProcessRunner};
pub use stack::{resolve_service, resolve_stack, ResolutionError, StackInventory};
