//! Stack Resolution
//!
//! Enumerates a CloudFormation stack's physical resources and turns them into
//! classified action targets.

use super::client::{array_field, is_not_found, str_field, AwsCli};
use crate::resource::{
    ClassifiedResources, Classifier, ClusterMembership, EcsServiceRef, ResourceDescriptor,
    ResourceType,
};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

/// Failures while resolving what to act on. These are fatal to a command.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("stack {0} not found")]
    StackNotFound(String),

    #[error("failed to list resources of stack {stack}")]
    Enumeration {
        stack: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("ECS service {service} not found in stack {stack}")]
    ServiceNotFound { stack: String, service: String },
}

/// Source of a stack's physical inventory
#[async_trait]
pub trait StackInventory: Send + Sync {
    async fn list_resources(&self, stack: &str) -> Result<Vec<ResourceDescriptor>, ResolutionError>;

    /// Member DB instance ids of each given DB cluster
    async fn cluster_membership(&self, cluster_ids: &[String]) -> Result<ClusterMembership>;
}

#[async_trait]
impl StackInventory for AwsCli {
    async fn list_resources(&self, stack: &str) -> Result<Vec<ResourceDescriptor>, ResolutionError> {
        let response = self
            .call(
                "cloudformation",
                "list-stack-resources",
                &["--stack-name", stack],
            )
            .await
            .map_err(|source| {
                if is_not_found(&source) {
                    ResolutionError::StackNotFound(stack.to_string())
                } else {
                    ResolutionError::Enumeration {
                        stack: stack.to_string(),
                        source,
                    }
                }
            })?;

        let resources = array_field(&response, "StackResourceSummaries")
            .iter()
            .filter(|r| str_field(r, "ResourceStatus") != Some("DELETE_COMPLETE"))
            .filter_map(|r| {
                let type_name = str_field(r, "ResourceType")?;
                let physical_id = str_field(r, "PhysicalResourceId")?;
                Some(ResourceDescriptor::new(
                    ResourceType::from_cfn(type_name),
                    physical_id,
                ))
            })
            .collect::<Vec<_>>();

        tracing::info!(stack, count = resources.len(), "Listed stack resources");
        Ok(resources)
    }

    async fn cluster_membership(&self, cluster_ids: &[String]) -> Result<ClusterMembership> {
        let mut membership = ClusterMembership::new();
        for cluster_id in cluster_ids {
            let response = self
                .call(
                    "rds",
                    "describe-db-clusters",
                    &["--db-cluster-identifier", cluster_id.as_str()],
                )
                .await?;
            let members = array_field(&response, "DBClusters")
                .iter()
                .flat_map(|c| array_field(c, "DBClusterMembers"))
                .filter_map(|m| str_field(m, "DBInstanceIdentifier"))
                .map(str::to_string)
                .collect();
            membership.insert(cluster_id.clone(), members);
        }
        Ok(membership)
    }
}

/// List a stack's resources and classify them.
///
/// Cluster membership is looked up when the stack has DB clusters; if that
/// lookup fails the classifier falls back to suppressing every DB instance.
pub async fn resolve_stack(
    inventory: &dyn StackInventory,
    stack: &str,
) -> Result<ClassifiedResources, ResolutionError> {
    let resources = inventory.list_resources(stack).await?;

    let clusters: Vec<String> = resources
        .iter()
        .filter(|r| r.resource_type == ResourceType::DbCluster)
        .map(|r| r.physical_id.clone())
        .collect();

    let classifier = if clusters.is_empty() {
        Classifier::new()
    } else {
        match inventory.cluster_membership(&clusters).await {
            Ok(membership) => Classifier::with_membership(membership),
            Err(e) => {
                tracing::warn!(
                    stack,
                    error = ?e,
                    "Could not read DB cluster membership, treating all DB instances as cluster members"
                );
                Classifier::new()
            }
        }
    };

    let classified = classifier.classify(&resources);
    tracing::info!(
        stack,
        ec2 = classified.ec2_instance_ids.len(),
        rds = classified.rds_instance_ids.len(),
        aurora = classified.aurora_cluster_ids.len(),
        ecs = classified.ecs_services.len(),
        "Classified stack resources"
    );
    Ok(classified)
}

/// Resolve a single ECS service of a stack by its service name
pub async fn resolve_service(
    inventory: &dyn StackInventory,
    stack: &str,
    service: &str,
) -> Result<EcsServiceRef, ResolutionError> {
    let classified = resolve_stack(inventory, stack).await?;
    classified
        .find_service(service)
        .cloned()
        .ok_or_else(|| ResolutionError::ServiceNotFound {
            stack: stack.to_string(),
            service: service.to_string(),
        })
}
