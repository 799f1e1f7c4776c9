//! Per-kind start/stop operations backed by the AWS CLI

use super::client::{array_field, str_field, AwsCli};
use crate::lifecycle::{EcsCapacity, EcsServiceStatus, LifecycleOps};
use crate::resource::EcsServiceRef;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

const ECS_SCALABLE_DIMENSION: &str = "ecs:service:DesiredCount";

impl AwsCli {
    async fn db_instance_status(&self, instance_id: &str) -> Result<String> {
        let response = self
            .call(
                "rds",
                "describe-db-instances",
                &["--db-instance-identifier", instance_id],
            )
            .await?;
        array_field(&response, "DBInstances")
            .first()
            .and_then(|db| str_field(db, "DBInstanceStatus"))
            .map(str::to_string)
            .with_context(|| format!("DB instance {} not found", instance_id))
    }

    async fn db_cluster_status(&self, cluster_id: &str) -> Result<String> {
        let response = self
            .call(
                "rds",
                "describe-db-clusters",
                &["--db-cluster-identifier", cluster_id],
            )
            .await?;
        array_field(&response, "DBClusters")
            .first()
            .and_then(|db| str_field(db, "Status"))
            .map(str::to_string)
            .with_context(|| format!("DB cluster {} not found", cluster_id))
    }
}

#[async_trait]
impl LifecycleOps for AwsCli {
    async fn start_ec2(&self, instance_id: &str) -> Result<()> {
        self.call("ec2", "start-instances", &["--instance-ids", instance_id])
            .await?;
        Ok(())
    }

    async fn stop_ec2(&self, instance_id: &str) -> Result<()> {
        self.call("ec2", "stop-instances", &["--instance-ids", instance_id])
            .await?;
        Ok(())
    }

    async fn start_rds(&self, instance_id: &str) -> Result<()> {
        let status = self.db_instance_status(instance_id).await?;
        match status.as_str() {
            "available" | "starting" => {
                tracing::info!(instance = %instance_id, %status, "DB instance already started");
                return Ok(());
            }
            "stopping" => anyhow::bail!(
                "DB instance {} is still stopping; start it again once it has stopped",
                instance_id
            ),
            _ => {}
        }
        self.call(
            "rds",
            "start-db-instance",
            &["--db-instance-identifier", instance_id],
        )
        .await?;
        Ok(())
    }

    async fn stop_rds(&self, instance_id: &str) -> Result<()> {
        let status = self.db_instance_status(instance_id).await?;
        match status.as_str() {
            "stopped" | "stopping" => {
                tracing::info!(instance = %instance_id, %status, "DB instance already stopped");
                return Ok(());
            }
            "starting" => anyhow::bail!(
                "DB instance {} is still starting; stop it again once it is available",
                instance_id
            ),
            _ => {}
        }
        self.call(
            "rds",
            "stop-db-instance",
            &["--db-instance-identifier", instance_id],
        )
        .await?;
        Ok(())
    }

    async fn start_aurora(&self, cluster_id: &str) -> Result<()> {
        let status = self.db_cluster_status(cluster_id).await?;
        match status.as_str() {
            "available" | "starting" => {
                tracing::info!(cluster = %cluster_id, %status, "DB cluster already started");
                return Ok(());
            }
            "stopping" => anyhow::bail!(
                "DB cluster {} is still stopping; start it again once it has stopped",
                cluster_id
            ),
            _ => {}
        }
        self.call(
            "rds",
            "start-db-cluster",
            &["--db-cluster-identifier", cluster_id],
        )
        .await?;
        Ok(())
    }

    async fn stop_aurora(&self, cluster_id: &str) -> Result<()> {
        let status = self.db_cluster_status(cluster_id).await?;
        match status.as_str() {
            "stopped" | "stopping" => {
                tracing::info!(cluster = %cluster_id, %status, "DB cluster already stopped");
                return Ok(());
            }
            "starting" => anyhow::bail!(
                "DB cluster {} is still starting; stop it again once it is available",
                cluster_id
            ),
            _ => {}
        }
        self.call(
            "rds",
            "stop-db-cluster",
            &["--db-cluster-identifier", cluster_id],
        )
        .await?;
        Ok(())
    }

    async fn set_ecs_capacity(&self, service: &EcsServiceRef, capacity: EcsCapacity) -> Result<()> {
        let resource_id = service.scaling_resource_id();
        let min = capacity.min.to_string();
        let max = capacity.max.to_string();

        self.call(
            "application-autoscaling",
            "register-scalable-target",
            &[
                "--service-namespace",
                "ecs",
                "--scalable-dimension",
                ECS_SCALABLE_DIMENSION,
                "--resource-id",
                resource_id.as_str(),
                "--min-capacity",
                min.as_str(),
                "--max-capacity",
                max.as_str(),
            ],
        )
        .await
        .with_context(|| format!("Failed to register capacity for {}", service))?;

        self.call(
            "ecs",
            "update-service",
            &[
                "--cluster",
                service.cluster_name.as_str(),
                "--service",
                service.service_name.as_str(),
                "--desired-count",
                min.as_str(),
            ],
        )
        .await
        .with_context(|| format!("Failed to update desired count for {}", service))?;

        tracing::info!(service = %service, %capacity, "ECS capacity set");
        Ok(())
    }

    async fn describe_ecs_service(&self, service: &EcsServiceRef) -> Result<EcsServiceStatus> {
        let response = self
            .call(
                "ecs",
                "describe-services",
                &[
                    "--cluster",
                    service.cluster_name.as_str(),
                    "--services",
                    service.service_name.as_str(),
                ],
            )
            .await?;

        let described = array_field(&response, "services")
            .first()
            .with_context(|| format!("ECS service {} not found", service))?;
        Ok(parse_service_status(described))
    }

    async fn redeploy_ecs_service(&self, service: &EcsServiceRef) -> Result<()> {
        self.call(
            "ecs",
            "update-service",
            &[
                "--cluster",
                service.cluster_name.as_str(),
                "--service",
                service.service_name.as_str(),
                "--force-new-deployment",
            ],
        )
        .await?;
        tracing::info!(service = %service, "Forced new deployment");
        Ok(())
    }
}

/// Build an [`EcsServiceStatus`] from a `describe-services` entry
pub fn parse_service_status(service: &Value) -> EcsServiceStatus {
    let count = |key: &str| service.get(key).and_then(Value::as_i64).unwrap_or(0);
    let deployments = array_field(service, "deployments");

    EcsServiceStatus {
        status: str_field(service, "status").unwrap_or("UNKNOWN").to_string(),
        desired_count: count("desiredCount"),
        running_count: count("runningCount"),
        pending_count: count("pendingCount"),
        primary_rollout: deployments
            .iter()
            .find(|d| str_field(d, "status") == Some("PRIMARY"))
            .and_then(|d| str_field(d, "rolloutState"))
            .map(str::to_string),
        deployment_count: deployments.len(),
    }
}
