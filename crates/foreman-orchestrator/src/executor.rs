//! Per-feature execution policy
//!
//! A run marks the feature in flight before the provider is called, streams
//! events into the RunContext and the event sink, then settles the feature:
//!
//! | Outcome                         | Feature status                         |
//! |---------------------------------|----------------------------------------|
//! | `ResultSuccess`                 | `completed` (`waiting_approval` gated) |
//! | `MaxTurnsReached`               | `failed`, partial output kept          |
//! | other errors / transport        | `failed` with the message              |
//! | cancellation                    | reverted to the pre-run status         |

use chrono::Utc;
use foreman_agent::{ProviderEvent, ProviderGateway, QueryOptions, ResultErrorKind};
use foreman_core::fail_open::{fail_open, fail_open_with_retries};
use foreman_core::{AutoModeConfig, Feature, FeatureStatus, PlanSpec, Result};
use foreman_store::{FeatureStore, StatusChange};
use futures::StreamExt;
use std::path::PathBuf;
use tracing::{debug, error, info, instrument, warn};

use crate::events::{AutoModeEventKind, EventReporter, RunPhase};
use crate::prompt::{build_implementation_prompt, build_plan_prompt, extract_summary, PLANNING_TOOLS};
use crate::run_context::RunContext;

/// Attempts for the status write that settles a run
const SETTLE_ATTEMPTS: usize = 3;

/// Provider events between agent-output flushes
const FLUSH_EVERY: usize = 25;

/// How a run ended, from the loop's point of view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunResult {
    Completed { summary: Option<String> },
    /// Plan or result is waiting for a human
    AwaitingApproval,
    Failed { error: String },
    Cancelled { reverted_to: FeatureStatus },
}

#[derive(Debug)]
enum StreamOutcome {
    Success { result: String },
    MaxTurns(String),
    Failed(String),
    Cancelled,
}

/// Runs one feature inside a RunContext
pub struct FeatureRunner<'a> {
    store: &'a FeatureStore,
    gateway: &'a ProviderGateway,
    reporter: &'a EventReporter,
    config: &'a AutoModeConfig,
}

impl<'a> FeatureRunner<'a> {
    pub fn new(
        store: &'a FeatureStore,
        gateway: &'a ProviderGateway,
        reporter: &'a EventReporter,
        config: &'a AutoModeConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            reporter,
            config,
        }
    }

    /// Run `feature`; `all` is the project's feature set (for dependency context)
    ///
    /// Errors only when the feature could not be marked in flight, in which
    /// case nothing was started.
    #[instrument(skip_all, fields(feature = %ctx.feature_id, workspace = %ctx.key))]
    pub async fn run(&self, ctx: &mut RunContext, feature: Feature, all: &[Feature]) -> Result<RunResult> {
        let project = ctx.key.project().to_path_buf();
        let mut feature = feature;

        if feature.needs_plan() {
            self.store
                .set_status(&project, &feature.id, FeatureStatus::GeneratingSpec, StatusChange::none())
                .await?;
            self.report(ctx, AutoModeEventKind::FeatureStarted {
                feature_id: feature.id.clone(),
                model: ctx.model.clone(),
                phase: RunPhase::Planning,
            });

            ctx.append_section("Plan");
            let options = QueryOptions::new(
                ctx.model.clone(),
                build_plan_prompt(&feature, &ctx.workspace),
                ctx.workspace.branch_path.clone(),
            )
            .with_max_turns(self.config.plan_max_turns)
            .with_allowed_tools(PLANNING_TOOLS.iter().map(|t| t.to_string()).collect());

            let result = match self.stream(ctx, options).await {
                StreamOutcome::Success { result } => result,
                other => return Ok(self.conclude(ctx, other).await),
            };

            let content = if result.trim().is_empty() {
                ctx.output().to_string()
            } else {
                result
            };
            let now = Utc::now();
            let mut plan = PlanSpec {
                content: Some(content.clone()),
                generated_at: Some(now),
                approved_at: None,
                version: feature.plan_spec.as_ref().map_or(0, |p| p.version) + 1,
            };

            if feature.require_plan_approval {
                info!(feature = %feature.id, "Plan generated, waiting for approval");
                self.settle(
                    ctx,
                    FeatureStatus::WaitingApproval,
                    StatusChange::none().plan(plan),
                )
                .await;
                self.flush_output(ctx).await;
                self.report(ctx, AutoModeEventKind::PlanAwaitingApproval {
                    feature_id: feature.id.clone(),
                    plan: content,
                });
                return Ok(RunResult::AwaitingApproval);
            }

            plan.approved_at = Some(now);
            match self
                .store
                .set_status(&project, &feature.id, FeatureStatus::Running, StatusChange::none().plan(plan))
                .await
            {
                Ok(updated) => feature = updated,
                Err(e) => {
                    return Ok(self
                        .conclude(ctx, StreamOutcome::Failed(format!("Could not store plan: {}", e)))
                        .await)
                }
            }
            ctx.append_section("Implementation");
        } else {
            self.store
                .set_status(&project, &feature.id, FeatureStatus::Running, StatusChange::none())
                .await?;
        }

        self.report(ctx, AutoModeEventKind::FeatureStarted {
            feature_id: feature.id.clone(),
            model: ctx.model.clone(),
            phase: RunPhase::Implementation,
        });

        let completed: Vec<&Feature> = all
            .iter()
            .filter(|f| feature.dependencies.contains(&f.id) && f.status.is_terminal_success())
            .collect();
        let options = QueryOptions::new(
            ctx.model.clone(),
            build_implementation_prompt(&feature, &ctx.workspace, &completed),
            ctx.workspace.branch_path.clone(),
        )
        .with_max_turns(self.config.max_turns)
        .with_allowed_tools(self.config.allowed_tools.clone());

        let result = match self.stream(ctx, options).await {
            StreamOutcome::Success { result } => result,
            other => return Ok(self.conclude(ctx, other).await),
        };

        if ctx.output().trim().is_empty() {
            ctx.append_text(&result);
        }
        let summary = extract_summary(ctx.output()).or_else(|| extract_summary(&result));
        let status = if feature.require_approval {
            FeatureStatus::WaitingApproval
        } else {
            FeatureStatus::Completed
        };

        self.settle(ctx, status, StatusChange::none().summary(summary.clone()))
            .await;
        self.flush_output(ctx).await;
        self.report(ctx, AutoModeEventKind::FeatureCompleted {
            feature_id: feature.id.clone(),
            status,
            summary: summary.clone(),
        });

        if status == FeatureStatus::WaitingApproval {
            Ok(RunResult::AwaitingApproval)
        } else {
            Ok(RunResult::Completed { summary })
        }
    }

    /// Drive one provider query to its result
    async fn stream(&self, ctx: &mut RunContext, options: QueryOptions) -> StreamOutcome {
        let options = options.with_cancel(ctx.cancel.clone());
        let cancel = ctx.cancel.clone();

        let mut stream = match self.gateway.execute_query(options).await {
            Ok(stream) => stream,
            Err(_) if cancel.is_cancelled() => return StreamOutcome::Cancelled,
            Err(e) => return StreamOutcome::Failed(e.to_string()),
        };

        let mut seen = 0usize;
        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => return StreamOutcome::Cancelled,
                item = stream.next() => item,
            };

            let Some(item) = item else {
                break;
            };

            match item {
                Ok(ProviderEvent::AssistantText { text }) => {
                    ctx.append_text(&text);
                    self.report(ctx, AutoModeEventKind::FeatureProgress {
                        feature_id: ctx.feature_id.clone(),
                        text,
                    });
                }
                Ok(ProviderEvent::ToolUse { name, input }) => {
                    ctx.record_tool_use(&name, &input);
                    self.report(ctx, AutoModeEventKind::FeatureToolUse {
                        feature_id: ctx.feature_id.clone(),
                        tool: name,
                        input,
                    });
                }
                Ok(ProviderEvent::Thinking { text }) => {
                    debug!(feature = %ctx.feature_id, "thinking: {} chars", text.len());
                }
                Ok(ProviderEvent::ResultSuccess { result, .. }) => {
                    return StreamOutcome::Success { result };
                }
                Ok(ProviderEvent::ResultError { subtype, message }) => {
                    return match subtype {
                        ResultErrorKind::MaxTurnsReached => StreamOutcome::MaxTurns(message),
                        ResultErrorKind::StructuredOutputRetriesExhausted => StreamOutcome::Failed(
                            format!("Structured output retries exhausted: {}", message),
                        ),
                        ResultErrorKind::ExecutionError => StreamOutcome::Failed(message),
                    };
                }
                Err(_) if cancel.is_cancelled() => return StreamOutcome::Cancelled,
                Err(e) => return StreamOutcome::Failed(e.to_string()),
            }

            seen += 1;
            if seen % FLUSH_EVERY == 0 {
                self.flush_output(ctx).await;
            }
        }

        if cancel.is_cancelled() {
            StreamOutcome::Cancelled
        } else {
            StreamOutcome::Failed("Provider stream ended without a result".to_string())
        }
    }

    /// Settle a run that did not succeed
    async fn conclude(&self, ctx: &mut RunContext, outcome: StreamOutcome) -> RunResult {
        let error = match outcome {
            StreamOutcome::Cancelled => {
                let reverted_to = ctx.prior_status;
                info!(feature = %ctx.feature_id, %reverted_to, "Run cancelled, reverting");
                self.settle(ctx, reverted_to, StatusChange::none()).await;
                self.flush_output(ctx).await;
                self.report(ctx, AutoModeEventKind::FeatureCancelled {
                    feature_id: ctx.feature_id.clone(),
                    reverted_to,
                });
                return RunResult::Cancelled { reverted_to };
            }
            StreamOutcome::MaxTurns(message) => format!("Max turns reached: {}", message),
            StreamOutcome::Failed(message) => message,
            StreamOutcome::Success { .. } => {
                return RunResult::Completed { summary: None };
            }
        };

        warn!(feature = %ctx.feature_id, error = %error, "Feature failed");
        self.settle(ctx, FeatureStatus::Failed, StatusChange::with_error(error.clone()))
            .await;
        self.flush_output(ctx).await;
        self.report(ctx, AutoModeEventKind::FeatureFailed {
            feature_id: ctx.feature_id.clone(),
            error: error.clone(),
        });
        RunResult::Failed { error }
    }

    /// Final status write, retried; a lost write is left to startup recovery
    async fn settle(&self, ctx: &RunContext, status: FeatureStatus, change: StatusChange) {
        let project: PathBuf = ctx.key.project().to_path_buf();
        let id = ctx.feature_id.clone();

        let written = fail_open_with_retries(
            "settle_feature_status",
            || self.store.set_status(&project, &id, status, change.clone()),
            SETTLE_ATTEMPTS,
        )
        .await;
        if written.is_none() {
            error!(feature = %id, %status, "Could not record final feature status");
        }
    }

    async fn flush_output(&self, ctx: &RunContext) {
        if ctx.output().is_empty() {
            return;
        }
        fail_open("agent_output_flush", || {
            self.store
                .write_agent_output(ctx.key.project(), &ctx.feature_id, ctx.output())
        })
        .await;
    }

    fn report(&self, ctx: &RunContext, kind: AutoModeEventKind) {
        self.reporter.report(&ctx.key, kind);
    }
}
