//! Resource Classifier
//!
//! Buckets a stack's resources into typed action groups. Classification is
//! two-pass so the result never depends on the order the enumeration API
//! happened to return resources in: clusters are collected first, then
//! instances and services are checked against them.

use super::types::{ClassifiedResources, EcsServiceRef, ResourceDescriptor, ResourceType};
use std::collections::{BTreeSet, HashMap, HashSet};

/// DB cluster id -> member DB instance ids
pub type ClusterMembership = HashMap<String, Vec<String>>;

/// Classifies stack resources into start/stop targets
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    membership: Option<ClusterMembership>,
}

impl Classifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use known cluster membership so only actual members of a DB cluster
    /// are suppressed as standalone RDS targets.
    pub fn with_membership(membership: ClusterMembership) -> Self {
        Self {
            membership: Some(membership),
        }
    }

    pub fn classify(&self, resources: &[ResourceDescriptor]) -> ClassifiedResources {
        let unique: BTreeSet<(&ResourceType, &str)> = resources
            .iter()
            .map(|r| (&r.resource_type, r.physical_id.as_str()))
            .filter(|(_, id)| !id.is_empty())
            .collect();

        // Pass one: clusters.
        let mut aurora_cluster_ids = BTreeSet::new();
        let mut ecs_clusters = HashSet::new();
        for (resource_type, id) in &unique {
            match resource_type {
                ResourceType::DbCluster => {
                    aurora_cluster_ids.insert(id.to_string());
                }
                ResourceType::EcsCluster => {
                    ecs_clusters.insert(cluster_name(id).to_string());
                }
                _ => {}
            }
        }

        let suppressed = self.suppressed_instances(&aurora_cluster_ids);

        // Pass two: everything that depends on the clusters.
        let mut ec2_instance_ids = BTreeSet::new();
        let mut rds_instance_ids = BTreeSet::new();
        let mut ecs_services = BTreeSet::new();
        let mut dropped_services = BTreeSet::new();

        for (resource_type, id) in &unique {
            match resource_type {
                ResourceType::Ec2Instance => {
                    ec2_instance_ids.insert(id.to_string());
                }
                ResourceType::DbInstance => {
                    if suppressed.is_suppressed(id) {
                        tracing::debug!(instance = %id, "DB instance belongs to a cluster, skipping");
                    } else {
                        rds_instance_ids.insert(id.to_string());
                    }
                }
                ResourceType::EcsService => match parse_service_arn(id) {
                    Some(svc) if ecs_clusters.contains(&svc.cluster_name) => {
                        ecs_services.insert(svc);
                    }
                    Some(svc) => {
                        tracing::warn!(
                            service = %id,
                            cluster = %svc.cluster_name,
                            "ECS service cluster not found in stack, skipping"
                        );
                        dropped_services.insert(id.to_string());
                    }
                    None => {
                        tracing::warn!(service = %id, "Unrecognized ECS service id, skipping");
                        dropped_services.insert(id.to_string());
                    }
                },
                _ => {}
            }
        }

        ClassifiedResources {
            ec2_instance_ids: ec2_instance_ids.into_iter().collect(),
            rds_instance_ids: rds_instance_ids.into_iter().collect(),
            aurora_cluster_ids: aurora_cluster_ids.into_iter().collect(),
            ecs_services: ecs_services.into_iter().collect(),
            dropped_services: dropped_services.into_iter().collect(),
        }
    }

    fn suppressed_instances(&self, clusters: &BTreeSet<String>) -> Suppression {
        if clusters.is_empty() {
            return Suppression::None;
        }

        // Membership must be known for every cluster, otherwise fall back to
        // suppressing every DB instance in the stack.
        match &self.membership {
            Some(membership) if clusters.iter().all(|c| membership.contains_key(c)) => {
                let members = clusters
                    .iter()
                    .filter_map(|c| membership.get(c))
                    .flatten()
                    .cloned()
                    .collect();
                Suppression::Members(members)
            }
            _ => Suppression::All,
        }
    }
}

enum Suppression {
    None,
    All,
    Members(HashSet<String>),
}

impl Suppression {
    fn is_suppressed(&self, instance_id: &str) -> bool {
        match self {
            Self::None => false,
            Self::All => true,
            Self::Members(members) => members.contains(instance_id),
        }
    }
}

/// Cluster name from either a bare name or a cluster ARN
fn cluster_name(id: &str) -> &str {
    if id.starts_with("arn:") {
        id.rsplit_once(":cluster/").map(|(_, name)| name).unwrap_or(id)
    } else {
        id
    }
}

/// Split `arn:aws:ecs:<region>:<account>:service/<cluster>/<service>`.
///
/// Legacy ARNs without the cluster segment return `None`: the service alone
/// does not say which cluster it runs in.
pub fn parse_service_arn(arn: &str) -> Option<EcsServiceRef> {
    let (_, path) = arn.split_once(":service/")?;
    let (cluster, service) = path.split_once('/')?;
    if cluster.is_empty() || service.is_empty() || service.contains('/') {
        return None;
    }
    Some(EcsServiceRef::new(cluster, service))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(resource_type: ResourceType, id: &str) -> ResourceDescriptor {
        ResourceDescriptor::new(resource_type, id)
    }

    const SERVICE_ARN: &str = "arn:aws:ecs:us-east-1:123456789012:service/prod/api";

    #[test]
    fn test_cluster_suppresses_instances() {
        let resources = vec![
            d(ResourceType::DbCluster, "c1"),
            d(ResourceType::DbInstance, "i1"),
            d(ResourceType::Ec2Instance, "e1"),
        ];
        let classified = Classifier::new().classify(&resources);

        assert_eq!(classified.aurora_cluster_ids, vec!["c1"]);
        assert!(classified.rds_instance_ids.is_empty());
        assert_eq!(classified.ec2_instance_ids, vec!["e1"]);
    }

    #[test]
    fn test_instance_before_cluster_is_still_suppressed() {
        let resources = vec![
            d(ResourceType::DbInstance, "i1"),
            d(ResourceType::DbCluster, "c1"),
        ];
        let classified = Classifier::new().classify(&resources);
        assert!(classified.rds_instance_ids.is_empty());
    }

    #[test]
    fn test_standalone_instances_without_clusters() {
        let resources = vec![
            d(ResourceType::DbInstance, "db-b"),
            d(ResourceType::DbInstance, "db-a"),
        ];
        let classified = Classifier::new().classify(&resources);
        assert_eq!(classified.rds_instance_ids, vec!["db-a", "db-b"]);
    }

    #[test]
    fn test_membership_only_suppresses_members() {
        let mut membership = ClusterMembership::new();
        membership.insert("c1".to_string(), vec!["c1-writer".to_string()]);

        let resources = vec![
            d(ResourceType::DbCluster, "c1"),
            d(ResourceType::DbInstance, "c1-writer"),
            d(ResourceType::DbInstance, "reporting"),
        ];
        let classified = Classifier::with_membership(membership).classify(&resources);
        assert_eq!(classified.rds_instance_ids, vec!["reporting"]);
    }

    #[test]
    fn test_partial_membership_falls_back_to_suppress_all() {
        let mut membership = ClusterMembership::new();
        membership.insert("c1".to_string(), vec![]);

        let resources = vec![
            d(ResourceType::DbCluster, "c1"),
            d(ResourceType::DbCluster, "c2"),
            d(ResourceType::DbInstance, "reporting"),
        ];
        let classified = Classifier::with_membership(membership).classify(&resources);
        assert!(classified.rds_instance_ids.is_empty());
    }

    #[test]
    fn test_ecs_service_requires_known_cluster() {
        let resources = vec![
            d(ResourceType::EcsService, SERVICE_ARN),
            d(
                ResourceType::EcsService,
                "arn:aws:ecs:us-east-1:123456789012:service/other/worker",
            ),
            d(ResourceType::EcsCluster, "prod"),
        ];
        let classified = Classifier::new().classify(&resources);

        assert_eq!(classified.ecs_services, vec![EcsServiceRef::new("prod", "api")]);
        assert_eq!(classified.dropped_services.len(), 1);
        assert!(classified.dropped_services[0].ends_with("other/worker"));
    }

    #[test]
    fn test_ecs_cluster_given_as_arn() {
        let resources = vec![
            d(
                ResourceType::EcsCluster,
                "arn:aws:ecs:us-east-1:123456789012:cluster/prod",
            ),
            d(ResourceType::EcsService, SERVICE_ARN),
        ];
        let classified = Classifier::new().classify(&resources);
        assert_eq!(classified.ecs_services.len(), 1);
    }

    #[test]
    fn test_duplicates_are_collapsed() {
        let resources = vec![
            d(ResourceType::Ec2Instance, "e1"),
            d(ResourceType::Ec2Instance, "e1"),
            d(ResourceType::EcsCluster, "prod"),
            d(ResourceType::EcsService, SERVICE_ARN),
            d(ResourceType::EcsService, SERVICE_ARN),
        ];
        let classified = Classifier::new().classify(&resources);
        assert_eq!(classified.ec2_instance_ids, vec!["e1"]);
        assert_eq!(classified.ecs_services.len(), 1);
    }

    #[test]
    fn test_empty_input_is_empty_outcome() {
        let classified = Classifier::new().classify(&[]);
        assert!(classified.is_empty());
    }

    #[test]
    fn test_parse_service_arn() {
        assert_eq!(
            parse_service_arn(SERVICE_ARN),
            Some(EcsServiceRef::new("prod", "api"))
        );
        assert_eq!(
            parse_service_arn("arn:aws:ecs:us-east-1:123456789012:service/api"),
            None
        );
        assert_eq!(parse_service_arn("api"), None);
    }
}
