//! Resource descriptor and classification types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a stack resource, parsed from its CloudFormation type string
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceType {
    Ec2Instance,
    DbInstance,
    DbCluster,
    EcsCluster,
    EcsService,
    Other(String),
}

impl ResourceType {
    pub fn from_cfn(type_name: &str) -> Self {
        match type_name {
            "AWS::EC2::Instance" => Self::Ec2Instance,
            "AWS::RDS::DBInstance" => Self::DbInstance,
            "AWS::RDS::DBCluster" => Self::DbCluster,
            "AWS::ECS::Cluster" => Self::EcsCluster,
            "AWS::ECS::Service" => Self::EcsService,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_cfn(&self) -> &str {
        match self {
            Self::Ec2Instance => "AWS::EC2::Instance",
            Self::DbInstance => "AWS::RDS::DBInstance",
            Self::DbCluster => "AWS::RDS::DBCluster",
            Self::EcsCluster => "AWS::ECS::Cluster",
            Self::EcsService => "AWS::ECS::Service",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_cfn())
    }
}

/// A deployed stack resource: its type plus the provider-assigned id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceDescriptor {
    pub resource_type: ResourceType,
    pub physical_id: String,
}

impl ResourceDescriptor {
    pub fn new(resource_type: ResourceType, physical_id: impl Into<String>) -> Self {
        Self {
            resource_type,
            physical_id: physical_id.into(),
        }
    }
}

/// An ECS service addressed by cluster and service name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EcsServiceRef {
    pub cluster_name: String,
    pub service_name: String,
}

impl EcsServiceRef {
    pub fn new(cluster_name: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            service_name: service_name.into(),
        }
    }

    /// Application Auto Scaling resource id: `service/<cluster>/<service>`
    pub fn scaling_resource_id(&self) -> String {
        format!("service/{}/{}", self.cluster_name, self.service_name)
    }
}

impl fmt::Display for EcsServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cluster_name, self.service_name)
    }
}

/// Typed, de-duplicated action targets for one stack
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassifiedResources {
    pub ec2_instance_ids: Vec<String>,
    pub rds_instance_ids: Vec<String>,
    pub aurora_cluster_ids: Vec<String>,
    pub ecs_services: Vec<EcsServiceRef>,
    /// ECS services that could not be tied to a cluster in the same stack
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dropped_services: Vec<String>,
}

impl ClassifiedResources {
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Number of actionable targets
    pub fn total(&self) -> usize {
        self.ec2_instance_ids.len()
            + self.rds_instance_ids.len()
            + self.aurora_cluster_ids.len()
            + self.ecs_services.len()
    }

    /// Find a classified ECS service by service name
    pub fn find_service(&self, service_name: &str) -> Option<&EcsServiceRef> {
        self.ecs_services
            .iter()
            .find(|s| s.service_name == service_name)
    }
}
