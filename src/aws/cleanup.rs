//! Cleanup candidates and bulk actions
//!
//! Listers return [`CleanupCandidate`]s already narrowed by a [`NameFilter`],
//! so per-item state lookups (bucket emptiness, deletion protection) only run
//! for resources that matched, at most `max_concurrency` at a time. Each [`BulkAction`] here maps one candidate to
//! the AWS CLI calls that act on it.

use super::client::{array_field, is_not_found, str_field, AwsCli};
use crate::lifecycle::{filter_candidates, BulkAction, CandidateState, CleanupCandidate, NameFilter};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::future::Future;
use tracing::{info, warn};

const SERVICE_ROLE_PATH: &str = "/aws-service-role/";
const DELETION_PROTECTION: &str = "deletion_protection.enabled";

/// Treat "not found" on delete as already done
fn already_gone(result: Result<Value>, kind: &str, name: &str) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if is_not_found(&e) => {
            info!(kind, name, "Already deleted");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn collect(
    items: &[Value],
    name_key: &str,
    id_key: &str,
    state: impl Fn(&Value) -> CandidateState,
) -> Vec<CleanupCandidate> {
    items
        .iter()
        .filter_map(|item| {
            let name = str_field(item, name_key)?;
            let id = str_field(item, id_key).unwrap_or(name);
            Some(CleanupCandidate::new(name, id, state(item)))
        })
        .collect()
}

/// Run `lookup` for each candidate with a bounded number in flight.
/// Results come back in candidate order.
async fn lookup_each<'a, T, F, Fut>(
    candidates: &'a [CleanupCandidate],
    max_concurrency: usize,
    lookup: F,
) -> Vec<Result<T>>
where
    F: FnMut(&'a CleanupCandidate) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    stream::iter(candidates)
        .map(lookup)
        .buffered(max_concurrency.max(1))
        .collect()
        .await
}

// IAM roles

pub async fn list_roles(aws: &AwsCli, filter: &NameFilter) -> Result<Vec<CleanupCandidate>> {
    let response = aws.call("iam", "list-roles", &[]).await?;
    let roles = collect(array_field(&response, "Roles"), "RoleName", "Arn", |role| {
        match str_field(role, "Path") {
            Some(path) if path.starts_with(SERVICE_ROLE_PATH) => CandidateState::ServiceManaged,
            _ => CandidateState::Active,
        }
    });
    Ok(filter_candidates(roles, filter, None))
}

/// Detaches managed policies, deletes inline policies and instance profile
/// links, then deletes the role
pub struct DeleteRole {
    aws: AwsCli,
}

impl DeleteRole {
    pub fn new(aws: AwsCli) -> Self {
        Self { aws }
    }
}

#[async_trait]
impl BulkAction for DeleteRole {
    fn verb(&self) -> &str {
        "delete"
    }

    fn skip_reason(&self, candidate: &CleanupCandidate) -> Option<String> {
        (candidate.state == CandidateState::ServiceManaged)
            .then(|| "service-linked role".to_string())
    }

    async fn apply(&self, candidate: &CleanupCandidate) -> Result<()> {
        let role = candidate.name.as_str();

        let attached = self
            .aws
            .call("iam", "list-attached-role-policies", &["--role-name", role])
            .await?;
        for arn in array_field(&attached, "AttachedPolicies")
            .iter()
            .filter_map(|p| str_field(p, "PolicyArn"))
        {
            self.aws
                .call(
                    "iam",
                    "detach-role-policy",
                    &["--role-name", role, "--policy-arn", arn],
                )
                .await?;
        }

        let inline = self
            .aws
            .call("iam", "list-role-policies", &["--role-name", role])
            .await?;
        for policy in array_field(&inline, "PolicyNames").iter().filter_map(Value::as_str) {
            self.aws
                .call(
                    "iam",
                    "delete-role-policy",
                    &["--role-name", role, "--policy-name", policy],
                )
                .await?;
        }

        let profiles = self
            .aws
            .call("iam", "list-instance-profiles-for-role", &["--role-name", role])
            .await?;
        for profile in array_field(&profiles, "InstanceProfiles")
            .iter()
            .filter_map(|p| str_field(p, "InstanceProfileName"))
        {
            self.aws
                .call(
                    "iam",
                    "remove-role-from-instance-profile",
                    &["--instance-profile-name", profile, "--role-name", role],
                )
                .await?;
        }

        already_gone(
            self.aws.call("iam", "delete-role", &["--role-name", role]).await,
            "role",
            role,
        )
    }
}

// Load balancers

pub async fn list_load_balancers(
    aws: &AwsCli,
    filter: &NameFilter,
    max_concurrency: usize,
) -> Result<Vec<CleanupCandidate>> {
    let response = aws.call("elbv2", "describe-load-balancers", &[]).await?;
    let matched = filter_candidates(
        collect(
            array_field(&response, "LoadBalancers"),
            "LoadBalancerName",
            "LoadBalancerArn",
            |_| CandidateState::Active,
        ),
        filter,
        None,
    );

    let protection =
        lookup_each(&matched, max_concurrency, |lb| deletion_protection(aws, &lb.id)).await;

    Ok(matched
        .into_iter()
        .zip(protection)
        .map(|(mut lb, protected)| {
            match protected {
                Ok(true) => lb.state = CandidateState::Protected,
                Ok(false) => {}
                Err(e) => {
                    warn!(load_balancer = %lb.name, error = ?e, "Could not read attributes, assuming protected");
                    lb.state = CandidateState::Protected;
                }
            }
            lb
        })
        .collect())
}

async fn deletion_protection(aws: &AwsCli, arn: &str) -> Result<bool> {
    let response = aws
        .call(
            "elbv2",
            "describe-load-balancer-attributes",
            &["--load-balancer-arn", arn],
        )
        .await?;
    Ok(array_field(&response, "Attributes").iter().any(|attr| {
        str_field(attr, "Key") == Some(DELETION_PROTECTION) && str_field(attr, "Value") == Some("true")
    }))
}

/// Deletes a load balancer, first turning deletion protection off when
/// `unprotect` is set
pub struct DeleteLoadBalancer {
    aws: AwsCli,
    unprotect: bool,
}

impl DeleteLoadBalancer {
    pub fn new(aws: AwsCli, unprotect: bool) -> Self {
        Self { aws, unprotect }
    }
}

#[async_trait]
impl BulkAction for DeleteLoadBalancer {
    fn verb(&self) -> &str {
        "delete"
    }

    fn skip_reason(&self, candidate: &CleanupCandidate) -> Option<String> {
        (candidate.state == CandidateState::Protected && !self.unprotect)
            .then(|| "deletion protection enabled (use --unprotect)".to_string())
    }

    async fn apply(&self, candidate: &CleanupCandidate) -> Result<()> {
        let arn = candidate.id.as_str();
        let unprotected = candidate.state == CandidateState::Protected;

        if unprotected {
            let attribute = format!("Key={},Value=false", DELETION_PROTECTION);
            self.aws
                .call(
                    "elbv2",
                    "modify-load-balancer-attributes",
                    &["--load-balancer-arn", arn, "--attributes", attribute.as_str()],
                )
                .await?;
            info!(load_balancer = %candidate.name, "Deletion protection disabled");
        }

        let deleted = already_gone(
            self.aws
                .call("elbv2", "delete-load-balancer", &["--load-balancer-arn", arn])
                .await,
            "load balancer",
            &candidate.name,
        );
        if unprotected {
            return deleted.with_context(|| {
                format!(
                    "deletion protection was disabled on {} but the delete failed; it is now unprotected",
                    candidate.name
                )
            });
        }
        deleted
    }
}

// S3 buckets

pub async fn list_buckets(
    aws: &AwsCli,
    filter: &NameFilter,
    max_concurrency: usize,
) -> Result<Vec<CleanupCandidate>> {
    let response = aws.call("s3api", "list-buckets", &[]).await?;
    let matched = filter_candidates(
        collect(array_field(&response, "Buckets"), "Name", "Name", |_| {
            CandidateState::Active
        }),
        filter,
        None,
    );

    let emptiness =
        lookup_each(&matched, max_concurrency, |b| bucket_is_empty(aws, &b.name)).await;

    Ok(matched
        .into_iter()
        .zip(emptiness)
        .map(|(mut bucket, empty)| {
            match empty {
                Ok(true) => {}
                Ok(false) => bucket.state = CandidateState::NotEmpty,
                Err(e) => {
                    warn!(bucket = %bucket.name, error = ?e, "Could not list objects, assuming not empty");
                    bucket.state = CandidateState::NotEmpty;
                }
            }
            bucket
        })
        .collect())
}

async fn bucket_is_empty(aws: &AwsCli, bucket: &str) -> Result<bool> {
    let response = aws
        .call(
            "s3api",
            "list-objects-v2",
            &["--bucket", bucket, "--max-items", "1"],
        )
        .await?;
    Ok(array_field(&response, "Contents").is_empty())
}

/// Deletes empty buckets
pub struct DeleteBucket {
    aws: AwsCli,
}

impl DeleteBucket {
    pub fn new(aws: AwsCli) -> Self {
        Self { aws }
    }
}

#[async_trait]
impl BulkAction for DeleteBucket {
    fn verb(&self) -> &str {
        "delete"
    }

    fn skip_reason(&self, candidate: &CleanupCandidate) -> Option<String> {
        (candidate.state == CandidateState::NotEmpty).then(|| "bucket not empty".to_string())
    }

    async fn apply(&self, candidate: &CleanupCandidate) -> Result<()> {
        already_gone(
            self.aws
                .call("s3api", "delete-bucket", &["--bucket", candidate.name.as_str()])
                .await,
            "bucket",
            &candidate.name,
        )
    }
}

// ECR repositories

pub async fn list_repositories(
    aws: &AwsCli,
    filter: &NameFilter,
    max_concurrency: usize,
) -> Result<Vec<CleanupCandidate>> {
    let response = aws.call("ecr", "describe-repositories", &[]).await?;
    let matched = filter_candidates(
        collect(
            array_field(&response, "repositories"),
            "repositoryName",
            "repositoryArn",
            |_| CandidateState::Active,
        ),
        filter,
        None,
    );

    let images =
        lookup_each(&matched, max_concurrency, |r| repository_has_images(aws, &r.name)).await;

    Ok(matched
        .into_iter()
        .zip(images)
        .map(|(mut repo, has_images)| {
            if !matches!(has_images, Ok(false)) {
                repo.state = CandidateState::NotEmpty;
            }
            repo
        })
        .collect())
}

async fn repository_has_images(aws: &AwsCli, repository: &str) -> Result<bool> {
    let response = aws
        .call(
            "ecr",
            "list-images",
            &["--repository-name", repository, "--max-items", "1"],
        )
        .await?;
    Ok(!array_field(&response, "imageIds").is_empty())
}

/// Deletes repositories; with `force`, images are deleted along with them
pub struct DeleteRepository {
    aws: AwsCli,
    force: bool,
}

impl DeleteRepository {
    pub fn new(aws: AwsCli, force: bool) -> Self {
        Self { aws, force }
    }
}

#[async_trait]
impl BulkAction for DeleteRepository {
    fn verb(&self) -> &str {
        "delete"
    }

    fn skip_reason(&self, candidate: &CleanupCandidate) -> Option<String> {
        (candidate.state == CandidateState::NotEmpty && !self.force)
            .then(|| "repository has images (use --force)".to_string())
    }

    async fn apply(&self, candidate: &CleanupCandidate) -> Result<()> {
        let mut args = vec!["--repository-name", candidate.name.as_str()];
        if self.force {
            args.push("--force");
        }
        already_gone(
            self.aws.call("ecr", "delete-repository", &args).await,
            "repository",
            &candidate.name,
        )
    }
}

// CloudWatch log groups

pub async fn list_log_groups(aws: &AwsCli, filter: &NameFilter) -> Result<Vec<CleanupCandidate>> {
    let response = aws.call("logs", "describe-log-groups", &[]).await?;
    let groups = collect(
        array_field(&response, "logGroups"),
        "logGroupName",
        "arn",
        |_| CandidateState::Active,
    );
    Ok(filter_candidates(groups, filter, None))
}

pub struct DeleteLogGroup {
    aws: AwsCli,
}

impl DeleteLogGroup {
    pub fn new(aws: AwsCli) -> Self {
        Self { aws }
    }
}

#[async_trait]
impl BulkAction for DeleteLogGroup {
    fn verb(&self) -> &str {
        "delete"
    }

    fn skip_reason(&self, _candidate: &CleanupCandidate) -> Option<String> {
        None
    }

    async fn apply(&self, candidate: &CleanupCandidate) -> Result<()> {
        already_gone(
            self.aws
                .call(
                    "logs",
                    "delete-log-group",
                    &["--log-group-name", candidate.name.as_str()],
                )
                .await,
            "log group",
            &candidate.name,
        )
    }
}

// EventBridge rules

pub async fn list_rules(aws: &AwsCli, filter: &NameFilter) -> Result<Vec<CleanupCandidate>> {
    let response = aws.call("events", "list-rules", &[]).await?;
    let rules = collect(array_field(&response, "Rules"), "Name", "Arn", |rule| {
        if str_field(rule, "ManagedBy").is_some() {
            return CandidateState::ServiceManaged;
        }
        match str_field(rule, "State") {
            Some("DISABLED") => CandidateState::Disabled,
            _ => CandidateState::Enabled,
        }
    });
    Ok(filter_candidates(rules, filter, None))
}

/// Enables or disables rules, skipping those already in the target state
pub struct SetRuleState {
    aws: AwsCli,
    enable: bool,
}

impl SetRuleState {
    pub fn new(aws: AwsCli, enable: bool) -> Self {
        Self { aws, enable }
    }
}

#[async_trait]
impl BulkAction for SetRuleState {
    fn verb(&self) -> &str {
        if self.enable {
            "enable"
        } else {
            "disable"
        }
    }

    fn skip_reason(&self, candidate: &CleanupCandidate) -> Option<String> {
        match (&candidate.state, self.enable) {
            (CandidateState::ServiceManaged, _) => Some("managed by an AWS service".to_string()),
            (CandidateState::Enabled, true) => Some("already enabled".to_string()),
            (CandidateState::Disabled, false) => Some("already disabled".to_string()),
            _ => None,
        }
    }

    async fn apply(&self, candidate: &CleanupCandidate) -> Result<()> {
        let operation = if self.enable {
            "enable-rule"
        } else {
            "disable-rule"
        };
        self.aws
            .call("events", operation, &["--name", candidate.name.as_str()])
            .await?;
        Ok(())
    }
}
