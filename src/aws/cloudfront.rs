//! CloudFront cache invalidation

use super::client::{str_field, AwsCli};
use crate::lifecycle::WaitSpec;
use crate::progress::ProgressSink;
use anyhow::{Context, Result};
use serde_json::json;
use tokio_util::sync::CancellationToken;

const COMPLETED: &str = "Completed";

impl AwsCli {
    /// Submit an invalidation and return its id
    pub async fn create_invalidation(&self, distribution_id: &str, paths: &[String]) -> Result<String> {
        if paths.is_empty() {
            anyhow::bail!("at least one path is required");
        }

        let batch = json!({
            "Paths": { "Quantity": paths.len(), "Items": paths },
            "CallerReference": uuid::Uuid::new_v4().to_string(),
        })
        .to_string();

        let response = self
            .call(
                "cloudfront",
                "create-invalidation",
                &[
                    "--distribution-id",
                    distribution_id,
                    "--invalidation-batch",
                    batch.as_str(),
                ],
            )
            .await?;

        let id = response
            .get("Invalidation")
            .and_then(|inv| str_field(inv, "Id"))
            .context("create-invalidation returned no invalidation id")?;
        tracing::info!(distribution = %distribution_id, invalidation = %id, "Invalidation created");
        Ok(id.to_string())
    }

    pub async fn invalidation_status(&self, distribution_id: &str, invalidation_id: &str) -> Result<String> {
        let response = self
            .call(
                "cloudfront",
                "get-invalidation",
                &["--distribution-id", distribution_id, "--id", invalidation_id],
            )
            .await?;

        response
            .get("Invalidation")
            .and_then(|inv| str_field(inv, "Status"))
            .map(str::to_string)
            .with_context(|| format!("No status for invalidation {}", invalidation_id))
    }
}

/// Create an invalidation and, when `wait` is given, poll until it completes
pub async fn invalidate(
    aws: &AwsCli,
    distribution_id: &str,
    paths: &[String],
    wait: Option<&WaitSpec>,
    cancel: &CancellationToken,
    progress: &dyn ProgressSink,
) -> Result<String> {
    let id = aws.create_invalidation(distribution_id, paths).await?;

    if let Some(spec) = wait {
        let spec = WaitSpec {
            description: format!("invalidation {} on {}", id, distribution_id),
            ..spec.clone()
        };
        spec.wait(
            cancel,
            progress,
            || aws.invalidation_status(distribution_id, &id),
            |status| status == COMPLETED,
        )
        .await?;
    }

    Ok(id)
}
