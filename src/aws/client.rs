//! AWS CLI Client
//!
//! Thin client that invokes `aws <service> <operation>` through a
//! [`CommandRunner`] and parses the JSON it prints.

use super::runner::{CommandRunner, ProcessRunner};
use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Maximum length of stderr kept in errors and logs
const MAX_LOG_BODY_LENGTH: usize = 300;

/// A failed AWS CLI invocation
#[derive(Debug, Error)]
#[error("aws {service} {operation} failed (exit {code}): {message}")]
pub struct AwsCliError {
    pub service: String,
    pub operation: String,
    pub code: i32,
    pub message: String,
}

impl AwsCliError {
    /// True when the error says the target does not exist
    pub fn is_not_found(&self) -> bool {
        is_not_found_message(&self.message)
    }
}

fn is_not_found_message(message: &str) -> bool {
    message.contains("NotFound")
        || message.contains("NoSuch")
        || message.contains("does not exist")
        || message.contains("not found")
}

/// Collapse whitespace and truncate CLI stderr for display
fn sanitize_for_log(body: &str) -> String {
    let collapsed = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.len() > MAX_LOG_BODY_LENGTH {
        let cut = collapsed
            .char_indices()
            .map(|(i, _)| i)
            .take_while(|i| *i <= MAX_LOG_BODY_LENGTH)
            .last()
            .unwrap_or(0);
        format!("{}... [truncated]", &collapsed[..cut])
    } else {
        collapsed
    }
}

/// AWS client backed by the `aws` command line
#[derive(Clone)]
pub struct AwsCli {
    runner: Arc<dyn CommandRunner>,
    program: String,
    pub profile: Option<String>,
    pub region: Option<String>,
}

impl AwsCli {
    /// Client that runs the real `aws` binary
    pub fn new(profile: Option<String>, region: Option<String>) -> Self {
        Self::with_runner(Arc::new(ProcessRunner), profile, region)
    }

    pub fn with_runner(
        runner: Arc<dyn CommandRunner>,
        profile: Option<String>,
        region: Option<String>,
    ) -> Self {
        Self {
            runner,
            program: "aws".to_string(),
            profile,
            region,
        }
    }

    /// Full argument list for one invocation
    pub fn build_args(&self, service: &str, operation: &str, args: &[&str]) -> Vec<String> {
        let mut full = vec![service.to_string(), operation.to_string()];
        full.extend(args.iter().map(|a| a.to_string()));
        full.extend(["--output".to_string(), "json".to_string()]);
        full.push("--no-cli-pager".to_string());
        if let Some(profile) = &self.profile {
            full.extend(["--profile".to_string(), profile.clone()]);
        }
        if let Some(region) = &self.region {
            full.extend(["--region".to_string(), region.clone()]);
        }
        full
    }

    /// Invoke an operation and parse its JSON output (`Null` when empty)
    pub async fn call(&self, service: &str, operation: &str, args: &[&str]) -> Result<Value> {
        tracing::debug!("aws {} {}", service, operation);

        let full = self.build_args(service, operation, args);
        let output = self.runner.run(&self.program, &full).await?;

        if !output.success() {
            let message = sanitize_for_log(&output.stderr);
            tracing::error!("AWS CLI error: {} {} - {}", service, operation, message);
            return Err(AwsCliError {
                service: service.to_string(),
                operation: operation.to_string(),
                code: output.code.unwrap_or(-1),
                message,
            }
            .into());
        }

        if output.stdout.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&output.stdout)
            .with_context(|| format!("Failed to parse output of aws {} {}", service, operation))
    }
}

/// String field of a JSON object
pub fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// Array field of a JSON object, empty when missing
pub fn array_field<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Whether an error chain contains a "not found" AWS CLI failure
pub fn is_not_found(error: &anyhow::Error) -> bool {
    error
        .chain()
        .any(|cause| match cause.downcast_ref::<AwsCliError>() {
            Some(cli) => cli.is_not_found(),
            None => false,
        })
}

/// Format an AWS error for the operator
pub fn format_aws_error(error: &anyhow::Error) -> String {
    let error_str = format!("{:#}", error);

    if error_str.contains("AccessDenied") || error_str.contains("UnauthorizedOperation") {
        return "Permission denied. Check your IAM permissions.".to_string();
    }
    if error_str.contains("ExpiredToken")
        || error_str.contains("Unable to locate credentials")
        || error_str.contains("The SSO session")
    {
        return "Credentials missing or expired. Run 'aws sso login' or check --profile."
            .to_string();
    }
    if error_str.contains("Throttling") || error_str.contains("Rate exceeded") {
        return "Rate limit exceeded. Please try again later.".to_string();
    }
    if error_str.contains("Failed to execute aws") {
        return "The aws CLI was not found. Install it and make sure it is on PATH.".to_string();
    }
    if is_not_found_message(&error_str) {
        return "Resource not found.".to_string();
    }

    let sanitized: String = error_str
        .chars()
        .filter(|c| !c.is_control())
        .take(120)
        .collect();

    if sanitized.len() < error_str.len() {
        format!("{}...", sanitized)
    } else {
        sanitized
    }
}
