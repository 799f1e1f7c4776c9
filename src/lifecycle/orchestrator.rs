//! Lifecycle Orchestrator
//!
//! Sequences start/stop across resource kinds. The order is asymmetric:
//!
//! - stop: ECS capacity to zero first, then EC2, RDS, Aurora
//! - start: EC2, RDS, Aurora first, then ECS capacity up
//!
//! Each kind is one stage run through the [`Executor`]; a stage starts only
//! after the previous one has fully finished. Item failures are recorded and
//! never stop later items or stages.

use super::executor::{Executor, ProcessResult, DEFAULT_MAX_CONCURRENCY};
use super::waiter::WaitSpec;
use crate::progress::{OperationType, ProgressEvent, ProgressSink};
use crate::resource::{ClassifiedResources, EcsServiceRef};
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// ECS service min/max task count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcsCapacity {
    pub min: i32,
    pub max: i32,
}

impl EcsCapacity {
    pub const ZERO: Self = Self { min: 0, max: 0 };

    /// Capacity used when a whole stack is started
    pub const STACK_DEFAULT: Self = Self { min: 1, max: 2 };

    pub fn new(min: i32, max: i32) -> Result<Self> {
        if min < 0 || max < min {
            anyhow::bail!("invalid capacity: min={} max={}", min, max);
        }
        Ok(Self { min, max })
    }
}

impl fmt::Display for EcsCapacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "min={} max={}", self.min, self.max)
    }
}

/// Observed state of an ECS service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EcsServiceStatus {
    pub status: String,
    pub desired_count: i64,
    pub running_count: i64,
    pub pending_count: i64,
    /// Rollout state of the PRIMARY deployment, if reported
    pub primary_rollout: Option<String>,
    pub deployment_count: usize,
}

impl fmt::Display for EcsServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "running {}/{} pending {}",
            self.running_count, self.desired_count, self.pending_count
        )?;
        if self.deployment_count > 1 {
            write!(f, ", {} deployments", self.deployment_count)?;
        }
        if let Some(rollout) = &self.primary_rollout {
            write!(f, ", rollout {}", rollout)?;
        }
        Ok(())
    }
}

/// Condition an ECS wait converges to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcsTarget {
    /// Nothing desired, nothing running
    Drained,
    /// Running matches desired and is at least `min`
    Running { min: i64 },
    /// PRIMARY deployment finished rolling out
    Deployed,
}

impl EcsTarget {
    pub fn reached(&self, status: &EcsServiceStatus) -> bool {
        match self {
            Self::Drained => status.desired_count == 0 && status.running_count == 0,
            Self::Running { min } => {
                status.desired_count >= *min
                    && status.running_count == status.desired_count
                    && status.running_count >= *min
            }
            Self::Deployed => match status.primary_rollout.as_deref() {
                Some(rollout) => rollout == "COMPLETED",
                None => {
                    status.deployment_count == 1 && status.running_count == status.desired_count
                }
            },
        }
    }
}

/// Per-kind remote operations the orchestrator drives
#[async_trait]
pub trait LifecycleOps: Send + Sync {
    async fn start_ec2(&self, instance_id: &str) -> Result<()>;
    async fn stop_ec2(&self, instance_id: &str) -> Result<()>;
    async fn start_rds(&self, instance_id: &str) -> Result<()>;
    async fn stop_rds(&self, instance_id: &str) -> Result<()>;
    async fn start_aurora(&self, cluster_id: &str) -> Result<()>;
    async fn stop_aurora(&self, cluster_id: &str) -> Result<()>;
    async fn set_ecs_capacity(&self, service: &EcsServiceRef, capacity: EcsCapacity) -> Result<()>;
    async fn describe_ecs_service(&self, service: &EcsServiceRef) -> Result<EcsServiceStatus>;
    async fn redeploy_ecs_service(&self, service: &EcsServiceRef) -> Result<()>;
}

/// Tuning for an orchestration run
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub max_concurrency: usize,
    /// Wait for ECS services to converge after a capacity change or redeploy
    pub wait_for_ecs: bool,
    pub poll_interval: Duration,
    pub wait_timeout: Duration,
    /// Upper bound on a single item, including any ECS wait. `None` disables it.
    pub task_timeout: Option<Duration>,
    /// Capacity used by [`Orchestrator::start_all`]
    pub default_capacity: EcsCapacity,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            wait_for_ecs: true,
            poll_interval: Duration::from_secs(10),
            wait_timeout: Duration::from_secs(600),
            task_timeout: Some(Duration::from_secs(900)),
            default_capacity: EcsCapacity::STACK_DEFAULT,
        }
    }
}

/// Combined outcome of an orchestration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregateResult {
    pub results: Vec<ProcessResult>,
}

impl AggregateResult {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ProcessResult> {
        self.results.iter().filter(|r| !r.success)
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "Nothing to do: no matching resources".to_string();
        }
        format!(
            "{} succeeded, {} failed ({} total)",
            self.succeeded(),
            self.failed(),
            self.results.len()
        )
    }

    fn extend(&mut self, results: Vec<ProcessResult>) {
        self.results.extend(results);
    }
}

/// Drives start/stop of a classified stack
pub struct Orchestrator {
    ops: Arc<dyn LifecycleOps>,
    settings: OrchestratorSettings,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        ops: Arc<dyn LifecycleOps>,
        settings: OrchestratorSettings,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            ops,
            settings,
            progress,
            cancel,
        }
    }

    /// Start everything: data tier first, application tier last
    pub async fn start_all(&self, classified: &ClassifiedResources) -> AggregateResult {
        tracing::info!(targets = classified.total(), "Starting stack resources");
        let mut aggregate = AggregateResult::default();

        aggregate.extend(
            self.run_stage(
                "EC2 instances",
                OperationType::Start,
                classified.ec2_instance_ids.clone(),
                |id| format!("EC2 {}", id),
                |ops, id| async move { ops.start_ec2(&id).await },
            )
            .await,
        );
        aggregate.extend(
            self.run_stage(
                "RDS instances",
                OperationType::Start,
                classified.rds_instance_ids.clone(),
                |id| format!("RDS {}", id),
                |ops, id| async move { ops.start_rds(&id).await },
            )
            .await,
        );
        aggregate.extend(
            self.run_stage(
                "Aurora clusters",
                OperationType::Start,
                classified.aurora_cluster_ids.clone(),
                |id| format!("Aurora {}", id),
                |ops, id| async move { ops.start_aurora(&id).await },
            )
            .await,
        );
        aggregate.extend(
            self.scale_services(
                classified.ecs_services.clone(),
                OperationType::Start,
                self.settings.default_capacity,
            )
            .await,
        );

        tracing::info!(
            succeeded = aggregate.succeeded(),
            failed = aggregate.failed(),
            "Stack start finished"
        );
        aggregate
    }

    /// Stop everything: application tier first, data tier last
    pub async fn stop_all(&self, classified: &ClassifiedResources) -> AggregateResult {
        tracing::info!(targets = classified.total(), "Stopping stack resources");
        let mut aggregate = AggregateResult::default();

        aggregate.extend(
            self.scale_services(
                classified.ecs_services.clone(),
                OperationType::Stop,
                EcsCapacity::ZERO,
            )
            .await,
        );
        aggregate.extend(
            self.run_stage(
                "EC2 instances",
                OperationType::Stop,
                classified.ec2_instance_ids.clone(),
                |id| format!("EC2 {}", id),
                |ops, id| async move { ops.stop_ec2(&id).await },
            )
            .await,
        );
        aggregate.extend(
            self.run_stage(
                "RDS instances",
                OperationType::Stop,
                classified.rds_instance_ids.clone(),
                |id| format!("RDS {}", id),
                |ops, id| async move { ops.stop_rds(&id).await },
            )
            .await,
        );
        aggregate.extend(
            self.run_stage(
                "Aurora clusters",
                OperationType::Stop,
                classified.aurora_cluster_ids.clone(),
                |id| format!("Aurora {}", id),
                |ops, id| async move { ops.stop_aurora(&id).await },
            )
            .await,
        );

        tracing::info!(
            succeeded = aggregate.succeeded(),
            failed = aggregate.failed(),
            "Stack stop finished"
        );
        aggregate
    }

    /// Scale one service to an explicit capacity
    pub async fn start_service(
        &self,
        service: &EcsServiceRef,
        capacity: EcsCapacity,
    ) -> AggregateResult {
        AggregateResult {
            results: self
                .scale_services(vec![service.clone()], OperationType::Start, capacity)
                .await,
        }
    }

    /// Scale one service to zero
    pub async fn stop_service(&self, service: &EcsServiceRef) -> AggregateResult {
        AggregateResult {
            results: self
                .scale_services(vec![service.clone()], OperationType::Stop, EcsCapacity::ZERO)
                .await,
        }
    }

    /// Force a new deployment and optionally wait for it to complete
    pub async fn redeploy_service(&self, service: &EcsServiceRef) -> AggregateResult {
        let wait = self.ecs_wait_spec("deployment");
        let progress = Arc::clone(&self.progress);
        let cancel = self.cancel.clone();

        let results = self
            .run_stage(
                "ECS deployment",
                OperationType::Redeploy,
                vec![service.clone()],
                |svc| format!("ECS {}", svc),
                move |ops, svc| {
                    let wait = wait.clone();
                    let progress = Arc::clone(&progress);
                    let cancel = cancel.clone();
                    async move {
                        ops.redeploy_ecs_service(&svc).await?;
                        if let Some(spec) = wait {
                            converge(&*ops, &svc, EcsTarget::Deployed, &spec, &cancel, &*progress)
                                .await?;
                        }
                        Ok(())
                    }
                },
            )
            .await;

        AggregateResult { results }
    }

    async fn scale_services(
        &self,
        services: Vec<EcsServiceRef>,
        operation: OperationType,
        capacity: EcsCapacity,
    ) -> Vec<ProcessResult> {
        let target = if capacity.max == 0 {
            EcsTarget::Drained
        } else {
            EcsTarget::Running {
                min: i64::from(capacity.min),
            }
        };
        let wait = self.ecs_wait_spec("capacity");
        let progress = Arc::clone(&self.progress);
        let cancel = self.cancel.clone();

        self.run_stage(
            "ECS services",
            operation,
            services,
            |svc| format!("ECS {}", svc),
            move |ops, svc| {
                let wait = wait.clone();
                let progress = Arc::clone(&progress);
                let cancel = cancel.clone();
                async move {
                    ops.set_ecs_capacity(&svc, capacity).await?;
                    if let Some(spec) = wait {
                        converge(&*ops, &svc, target, &spec, &cancel, &*progress).await?;
                    }
                    Ok(())
                }
            },
        )
        .await
    }

    fn ecs_wait_spec(&self, what: &str) -> Option<WaitSpec> {
        self.settings.wait_for_ecs.then(|| {
            WaitSpec::new(
                format!("ECS {}", what),
                self.settings.poll_interval,
                self.settings.wait_timeout,
            )
        })
    }

    async fn run_stage<T, K, A, Fut>(
        &self,
        stage: &str,
        operation: OperationType,
        items: Vec<T>,
        key: K,
        action: A,
    ) -> Vec<ProcessResult>
    where
        K: Fn(&T) -> String,
        A: Fn(Arc<dyn LifecycleOps>, T) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if items.is_empty() {
            return Vec::new();
        }

        tracing::info!(stage, count = items.len(), "Stage started");
        self.progress.emit(ProgressEvent::StageStarted {
            stage: stage.to_string(),
            count: items.len(),
        });

        let mut executor =
            Executor::new(self.settings.max_concurrency).with_cancellation(self.cancel.clone());
        if let Some(limit) = self.settings.task_timeout {
            executor = executor.with_task_timeout(limit);
        }

        for item in items {
            let item_key = key(&item);
            let task = action(Arc::clone(&self.ops), item);
            let progress = Arc::clone(&self.progress);
            let operation = operation.clone();
            let reported = item_key.clone();

            executor.execute(item_key, async move {
                let started = Instant::now();
                let outcome = task.await;
                progress.emit(ProgressEvent::ItemFinished {
                    operation,
                    item: reported,
                    error: outcome.as_ref().err().map(|e| format!("{:#}", e)),
                    elapsed: started.elapsed(),
                });
                outcome
            });
        }

        executor.wait().await
    }
}

async fn converge(
    ops: &dyn LifecycleOps,
    service: &EcsServiceRef,
    target: EcsTarget,
    spec: &WaitSpec,
    cancel: &CancellationToken,
    progress: &dyn ProgressSink,
) -> Result<EcsServiceStatus> {
    let spec = WaitSpec {
        description: format!("{} {}", spec.description, service),
        ..spec.clone()
    };
    let status = spec
        .wait(
            cancel,
            progress,
            || ops.describe_ecs_service(service),
            |status| target.reached(status),
        )
        .await?;
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(desired: i64, running: i64) -> EcsServiceStatus {
        EcsServiceStatus {
            status: "ACTIVE".to_string(),
            desired_count: desired,
            running_count: running,
            deployment_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_drained_target() {
        assert!(EcsTarget::Drained.reached(&status(0, 0)));
        assert!(!EcsTarget::Drained.reached(&status(0, 1)));
        assert!(!EcsTarget::Drained.reached(&status(1, 0)));
    }

    #[test]
    fn test_running_target_needs_minimum() {
        let target = EcsTarget::Running { min: 1 };
        assert!(target.reached(&status(1, 1)));
        assert!(target.reached(&status(2, 2)));
        assert!(!target.reached(&status(2, 1)));
        assert!(!target.reached(&status(0, 0)));
    }

    #[test]
    fn test_deployed_target() {
        let mut s = status(2, 2);
        s.primary_rollout = Some("IN_PROGRESS".to_string());
        assert!(!EcsTarget::Deployed.reached(&s));
        s.primary_rollout = Some("COMPLETED".to_string());
        assert!(EcsTarget::Deployed.reached(&s));

        let mut legacy = status(2, 2);
        legacy.deployment_count = 2;
        assert!(!EcsTarget::Deployed.reached(&legacy));
        legacy.deployment_count = 1;
        assert!(EcsTarget::Deployed.reached(&legacy));
    }

    #[test]
    fn test_capacity_validation() {
        assert!(EcsCapacity::new(1, 2).is_ok());
        assert!(EcsCapacity::new(-1, 2).is_err());
        assert!(EcsCapacity::new(3, 2).is_err());
    }

    #[test]
    fn test_aggregate_summary() {
        let aggregate = AggregateResult {
            results: vec![
                ProcessResult::ok("EC2 i-1"),
                ProcessResult::failed("EC2 i-2", "boom"),
            ],
        };
        assert_eq!(aggregate.summary(), "1 succeeded, 1 failed (2 total)");
        assert!(!aggregate.is_success());
        assert_eq!(aggregate.failures().count(), 1);

        assert!(AggregateResult::default().is_success());
        assert!(AggregateResult::default().summary().starts_with("Nothing to do"));
    }

    #[test]
    fn test_status_display() {
        let mut s = status(2, 1);
        s.primary_rollout = Some("IN_PROGRESS".to_string());
        assert_eq!(s.to_string(), "running 1/2 pending 0, rollout IN_PROGRESS");
    }
}
