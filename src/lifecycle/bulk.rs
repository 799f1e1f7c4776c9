//! Bulk Action Runner
//!
//! Applies one action (delete, enable, disable) to a filtered candidate set,
//! with dry-run, confirmation and a partial-failure summary.

use super::executor::{Executor, ProcessResult};
use crate::progress::{OperationType, ProgressEvent, ProgressSink};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// State of a candidate as observed when it was listed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CandidateState {
    Active,
    Enabled,
    Disabled,
    /// Deletion protection is on
    Protected,
    /// Still holds data (bucket objects, repository images)
    NotEmpty,
    /// Owned by an AWS service and not deletable directly
    ServiceManaged,
}

impl fmt::Display for CandidateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Protected => "protected",
            Self::NotEmpty => "not empty",
            Self::ServiceManaged => "service-managed",
        };
        f.write_str(s)
    }
}

/// A resource eligible for a bulk action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupCandidate {
    pub name: String,
    /// ARN or provider id
    pub id: String,
    pub state: CandidateState,
}

impl CleanupCandidate {
    pub fn new(name: impl Into<String>, id: impl Into<String>, state: CandidateState) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            state,
        }
    }
}

/// Name pattern: glob when it contains `*`, `?` or `[`, otherwise a substring
#[derive(Debug, Clone)]
pub enum NameFilter {
    Substring(String),
    Glob(glob::Pattern),
}

impl NameFilter {
    pub fn parse(pattern: &str) -> Result<Self> {
        if pattern.contains(['*', '?', '[']) {
            let glob = glob::Pattern::new(pattern)
                .with_context(|| format!("Invalid name pattern: {}", pattern))?;
            Ok(Self::Glob(glob))
        } else {
            Ok(Self::Substring(pattern.to_string()))
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Substring(s) => name.contains(s.as_str()),
            Self::Glob(p) => p.matches(name),
        }
    }
}

/// Keep candidates whose name matches and, if given, whose state passes `state`
pub fn filter_candidates(
    candidates: Vec<CleanupCandidate>,
    name: &NameFilter,
    state: Option<&dyn Fn(&CandidateState) -> bool>,
) -> Vec<CleanupCandidate> {
    candidates
        .into_iter()
        .filter(|c| name.matches(&c.name))
        .filter(|c| state.map_or(true, |pred| pred(&c.state)))
        .collect()
}

/// An action applied to each candidate
#[async_trait]
pub trait BulkAction: Send + Sync {
    /// Short verb for display, e.g. "delete"
    fn verb(&self) -> &str;

    /// Reason to leave a candidate alone, if any
    fn skip_reason(&self, candidate: &CleanupCandidate) -> Option<String>;

    async fn apply(&self, candidate: &CleanupCandidate) -> Result<()>;
}

/// Asks the operator to approve a batch.
///
/// Implementations may block; [`BulkRunner`] calls them off the async runtime.
pub trait Confirmer: Send + Sync {
    fn confirm(&self, prompt: &str) -> Result<bool>;
}

/// Reads a y/N answer from stdin
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinConfirmer;

impl Confirmer for StdinConfirmer {
    fn confirm(&self, prompt: &str) -> Result<bool> {
        let stdin = std::io::stdin();
        confirm_from(prompt, &mut stdin.lock(), &mut std::io::stderr())
    }
}

fn confirm_from(prompt: &str, input: &mut impl BufRead, output: &mut impl Write) -> Result<bool> {
    write!(output, "{} [y/N]: ", prompt)?;
    output.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer).context("Failed to read confirmation")?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

/// Runner options
#[derive(Debug, Clone, Copy, Default)]
pub struct BulkOptions {
    /// Ask before executing
    pub confirm: bool,
    /// List what would happen and stop
    pub dry_run: bool,
}

/// A candidate left untouched, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedItem {
    pub name: String,
    pub reason: String,
}

/// Outcome of a bulk run
#[derive(Debug, Clone, Default, Serialize)]
pub struct Summary {
    pub results: Vec<ProcessResult>,
    pub skipped: Vec<SkippedItem>,
    pub dry_run: bool,
    /// The operator declined the confirmation prompt
    pub aborted: bool,
}

impl Summary {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    pub fn line(&self, verb: &str) -> String {
        if self.dry_run {
            return format!(
                "Dry run: would {} {}, skip {}",
                verb,
                self.results.len(),
                self.skipped.len()
            );
        }
        if self.aborted {
            return "Aborted, nothing changed".to_string();
        }
        format!(
            "{} succeeded, {} failed, {} skipped",
            self.succeeded(),
            self.failed(),
            self.skipped.len()
        )
    }
}

/// Runs a [`BulkAction`] over candidates through a bounded executor
pub struct BulkRunner {
    max_concurrency: usize,
    progress: Arc<dyn ProgressSink>,
    confirmer: Arc<dyn Confirmer>,
    cancel: CancellationToken,
    task_timeout: Option<Duration>,
}

impl BulkRunner {
    pub fn new(
        max_concurrency: usize,
        progress: Arc<dyn ProgressSink>,
        confirmer: Arc<dyn Confirmer>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            max_concurrency,
            progress,
            confirmer,
            cancel,
            task_timeout: None,
        }
    }

    /// Fail any single action that runs longer than `timeout`
    pub fn with_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub async fn run(
        &self,
        candidates: Vec<CleanupCandidate>,
        action: Arc<dyn BulkAction>,
        options: BulkOptions,
    ) -> Result<Summary> {
        let verb = action.verb().to_string();
        let mut summary = Summary {
            dry_run: options.dry_run,
            ..Default::default()
        };

        let mut actionable = Vec::new();
        for candidate in candidates {
            match action.skip_reason(&candidate) {
                Some(reason) => summary.skipped.push(SkippedItem {
                    name: candidate.name,
                    reason,
                }),
                None => actionable.push(candidate),
            }
        }

        tracing::info!(
            action = %verb,
            actionable = actionable.len(),
            skipped = summary.skipped.len(),
            "Bulk run planned"
        );

        if options.dry_run || options.confirm {
            for candidate in &actionable {
                self.progress.emit(ProgressEvent::Planned {
                    item: candidate.name.clone(),
                    action: format!("would {}", verb),
                });
            }
            for skipped in &summary.skipped {
                self.progress.emit(ProgressEvent::Planned {
                    item: skipped.name.clone(),
                    action: format!("skip ({})", skipped.reason),
                });
            }
        }

        if options.dry_run {
            summary.results = actionable
                .into_iter()
                .map(|c| ProcessResult::ok(c.name))
                .collect();
            return Ok(summary);
        }

        if actionable.is_empty() {
            return Ok(summary);
        }

        if options.confirm {
            let prompt = format!("{} {} resource(s)?", capitalize(&verb), actionable.len());
            if !self.confirm(prompt).await? {
                tracing::info!(action = %verb, "Bulk run aborted by operator");
                summary.aborted = true;
                return Ok(summary);
            }
        }

        let operation = OperationType::from_verb(&verb);
        let mut executor =
            Executor::new(self.max_concurrency).with_cancellation(self.cancel.clone());
        if let Some(limit) = self.task_timeout {
            executor = executor.with_task_timeout(limit);
        }

        for candidate in actionable {
            let action = Arc::clone(&action);
            let progress = Arc::clone(&self.progress);
            let operation = operation.clone();
            let key = candidate.name.clone();

            executor.execute(key, async move {
                let started = Instant::now();
                let outcome = action.apply(&candidate).await;
                progress.emit(ProgressEvent::ItemFinished {
                    operation,
                    item: candidate.name.clone(),
                    error: outcome.as_ref().err().map(|e| format!("{:#}", e)),
                    elapsed: started.elapsed(),
                });
                outcome
            });
        }

        summary.results = executor.wait().await;
        Ok(summary)
    }

    /// Ask the confirmer on a blocking thread so cancellation still lands
    /// while the operator has not answered.
    async fn confirm(&self, prompt: String) -> Result<bool> {
        let confirmer = Arc::clone(&self.confirmer);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                anyhow::bail!("Interrupted before confirmation, nothing changed")
            }
            answered = tokio::task::spawn_blocking(move || confirmer.confirm(&prompt)) => {
                answered.context("Confirmation prompt failed")?
            }
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
