//! Integration tests for stage ordering and failure handling of the
//! orchestrator, driven through a recording fake of the per-kind operations.

use anyhow::Result;
use async_trait::async_trait;
use awsctl::lifecycle::{
    EcsCapacity, EcsServiceStatus, LifecycleOps, Orchestrator, OrchestratorSettings,
};
use awsctl::progress::{NoProgress, ProgressEvent, ProgressSink};
use awsctl::resource::{ClassifiedResources, EcsServiceRef};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Records every call as "<op> <target>" and lets tests fail chosen items
#[derive(Default)]
struct RecordingOps {
    calls: Mutex<Vec<String>>,
    fail: HashSet<String>,
    /// Desired count reported by describe; running never catches up when
    /// `stuck` is set
    desired: Mutex<i64>,
    stuck: bool,
}

impl RecordingOps {
    fn failing(items: &[&str]) -> Self {
        Self {
            fail: items.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn record(&self, op: &str, target: &str) -> Result<()> {
        self.calls.lock().unwrap().push(format!("{} {}", op, target));
        if self.fail.contains(target) {
            anyhow::bail!("{} {} failed", op, target);
        }
        Ok(())
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn first_index(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .position(|c| c.starts_with(prefix))
            .unwrap_or_else(|| panic!("no call starting with {}", prefix))
    }

    fn last_index(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .rposition(|c| c.starts_with(prefix))
            .unwrap_or_else(|| panic!("no call starting with {}", prefix))
    }
}

#[async_trait]
impl LifecycleOps for RecordingOps {
    async fn start_ec2(&self, id: &str) -> Result<()> {
        self.record("start_ec2", id)
    }
    async fn stop_ec2(&self, id: &str) -> Result<()> {
        self.record("stop_ec2", id)
    }
    async fn start_rds(&self, id: &str) -> Result<()> {
        self.record("start_rds", id)
    }
    async fn stop_rds(&self, id: &str) -> Result<()> {
        self.record("stop_rds", id)
    }
    async fn start_aurora(&self, id: &str) -> Result<()> {
        self.record("start_aurora", id)
    }
    async fn stop_aurora(&self, id: &str) -> Result<()> {
        self.record("stop_aurora", id)
    }

    async fn set_ecs_capacity(&self, service: &EcsServiceRef, capacity: EcsCapacity) -> Result<()> {
        *self.desired.lock().unwrap() = i64::from(capacity.min);
        self.record("set_ecs_capacity", &service.to_string())
    }

    async fn describe_ecs_service(&self, service: &EcsServiceRef) -> Result<EcsServiceStatus> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("describe_ecs_service {}", service));
        let desired = *self.desired.lock().unwrap();
        let running = if self.stuck { desired + 1 } else { desired };
        Ok(EcsServiceStatus {
            status: "ACTIVE".to_string(),
            desired_count: desired,
            running_count: running,
            deployment_count: 1,
            ..Default::default()
        })
    }

    async fn redeploy_ecs_service(&self, service: &EcsServiceRef) -> Result<()> {
        self.record("redeploy_ecs_service", &service.to_string())
    }
}

#[derive(Default)]
struct Ticks(Mutex<usize>);

impl ProgressSink for Ticks {
    fn emit(&self, event: ProgressEvent) {
        if matches!(event, ProgressEvent::WaitTick { .. }) {
            *self.0.lock().unwrap() += 1;
        }
    }
}

fn stack() -> ClassifiedResources {
    ClassifiedResources {
        ec2_instance_ids: vec!["i-1".to_string(), "i-2".to_string()],
        rds_instance_ids: vec!["reports".to_string()],
        aurora_cluster_ids: vec!["app-db".to_string()],
        ecs_services: vec![
            EcsServiceRef::new("app", "api"),
            EcsServiceRef::new("app", "worker"),
        ],
        dropped_services: Vec::new(),
    }
}

fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        max_concurrency: 2,
        poll_interval: Duration::from_secs(1),
        wait_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

fn orchestrator(ops: Arc<RecordingOps>, settings: OrchestratorSettings) -> Orchestrator {
    Orchestrator::new(ops, settings, Arc::new(NoProgress), CancellationToken::new())
}

#[tokio::test]
async fn test_stop_drains_ecs_before_compute_and_data() {
    let ops = Arc::new(RecordingOps::default());
    let result = orchestrator(ops.clone(), settings()).stop_all(&stack()).await;

    assert!(result.is_success());
    assert_eq!(result.results.len(), 6);
    assert!(ops.last_index("describe_ecs_service") < ops.first_index("stop_ec2"));
    assert!(ops.last_index("stop_ec2") < ops.first_index("stop_rds"));
    assert!(ops.last_index("stop_rds") < ops.first_index("stop_aurora"));
}

#[tokio::test]
async fn test_start_brings_up_data_before_ecs() {
    let ops = Arc::new(RecordingOps::default());
    let result = orchestrator(ops.clone(), settings()).start_all(&stack()).await;

    assert!(result.is_success());
    assert!(ops.last_index("start_ec2") < ops.first_index("start_rds"));
    assert!(ops.last_index("start_rds") < ops.first_index("start_aurora"));
    assert!(ops.last_index("start_aurora") < ops.first_index("set_ecs_capacity"));
    assert_eq!(*ops.desired.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_partial_failure_keeps_going() {
    let ops = Arc::new(RecordingOps::failing(&["i-2"]));
    let classified = ClassifiedResources {
        ec2_instance_ids: vec!["i-1".to_string(), "i-2".to_string(), "i-3".to_string()],
        rds_instance_ids: vec!["reports".to_string()],
        ..Default::default()
    };

    let result = orchestrator(ops.clone(), settings()).stop_all(&classified).await;

    assert_eq!(result.succeeded(), 3);
    assert_eq!(result.failed(), 1);
    let failure = result.failures().next().unwrap();
    assert_eq!(failure.item, "EC2 i-2");
    assert!(failure.error.as_deref().unwrap().contains("failed"));
    assert!(ops.calls().contains(&"stop_rds reports".to_string()));
}

#[tokio::test]
async fn test_empty_stack_is_reportable() {
    let ops = Arc::new(RecordingOps::default());
    let result = orchestrator(ops.clone(), settings())
        .start_all(&ClassifiedResources::default())
        .await;

    assert!(result.is_empty());
    assert!(result.is_success());
    assert!(ops.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_ecs_wait_timeout_is_item_failure() {
    let ops = Arc::new(RecordingOps {
        stuck: true,
        ..Default::default()
    });
    let ticks = Arc::new(Ticks::default());
    let orchestrator = Orchestrator::new(
        ops.clone(),
        settings(),
        ticks.clone(),
        CancellationToken::new(),
    );

    let result = orchestrator
        .stop_service(&EcsServiceRef::new("app", "api"))
        .await;

    assert_eq!(result.failed(), 1);
    let error = result.results[0].error.as_deref().unwrap();
    assert!(error.contains("timed out"), "unexpected error: {}", error);
    assert!(*ticks.0.lock().unwrap() >= 5);
}

#[tokio::test]
async fn test_no_wait_skips_describe() {
    let ops = Arc::new(RecordingOps::default());
    let settings = OrchestratorSettings {
        wait_for_ecs: false,
        ..settings()
    };

    let result = orchestrator(ops.clone(), settings)
        .start_service(&EcsServiceRef::new("app", "api"), EcsCapacity::new(2, 4).unwrap())
        .await;

    assert!(result.is_success());
    assert_eq!(ops.calls(), vec!["set_ecs_capacity app/api"]);
    assert_eq!(*ops.desired.lock().unwrap(), 2);
}

#[tokio::test]
async fn test_redeploy_waits_for_single_deployment() {
    let ops = Arc::new(RecordingOps::default());
    let result = orchestrator(ops.clone(), settings())
        .redeploy_service(&EcsServiceRef::new("app", "api"))
        .await;

    assert!(result.is_success());
    assert_eq!(
        ops.calls(),
        vec!["redeploy_ecs_service app/api", "describe_ecs_service app/api"]
    );
}

#[tokio::test]
async fn test_start_all_partial_failure() {
    let ops = Arc::new(RecordingOps::failing(&["i-2"]));
    let classified = ClassifiedResources {
        ec2_instance_ids: vec!["i-1".to_string(), "i-2".to_string(), "i-3".to_string()],
        ..Default::default()
    };

    let result = orchestrator(ops.clone(), settings()).start_all(&classified).await;

    assert_eq!(result.succeeded(), 2);
    assert_eq!(result.failed(), 1);
    assert_eq!(result.failures().next().unwrap().item, "EC2 i-2");
    assert!(ops.calls().contains(&"start_ec2 i-3".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_task_timeout_bounds_each_item() {
    let ops = Arc::new(RecordingOps {
        stuck: true,
        ..Default::default()
    });
    let settings = OrchestratorSettings {
        wait_timeout: Duration::from_secs(60),
        task_timeout: Some(Duration::from_secs(2)),
        ..settings()
    };

    let result = orchestrator(ops, settings)
        .stop_service(&EcsServiceRef::new("app", "api"))
        .await;

    assert_eq!(result.failed(), 1);
    let error = result.results[0].error.as_deref().unwrap();
    assert!(error.contains("timed out after 2s"), "unexpected error: {}", error);
}
