//! Auto mode: one selection loop per (project, workspace)
//!
//! Each loop is a tokio task that repeatedly selects the next eligible
//! feature for its workspace, runs it to a terminal state and re-evaluates.
//! Loops for different workspaces never wait on each other; the only shared
//! resource is the feature store, which serializes writes per project.
//!
//! Mutual exclusion holds at two levels: the loop table refuses a second
//! loop for a live workspace key and the run registry refuses a second
//! RunContext for a workspace.

use chrono::Utc;
use foreman_agent::ProviderGateway;
use foreman_core::fail_open::fail_open;
use foreman_core::{
    Feature, FeatureStatus, ForemanError, GlobalSettings, LoopMode, LoopState, ProjectLoopStatus,
    Result, WorkspaceKey,
};
use foreman_git::GitExecutor;
use foreman_store::{FeaturePatch, FeatureStore, StatusChange};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::events::{AutoModeEventKind, EventReporter, EventSink, NullEventSink};
use crate::executor::{FeatureRunner, RunResult};
use crate::failure_tracker::FailureTracker;
use crate::resolver::{blocking_dependencies, eligible_candidates, resolve};
use crate::run_context::{ActiveRunInfo, RunContext, RunRegistry};
use crate::settings::SettingsProvider;
use crate::state_machine::{transition, LoopAction, LoopEvent};
use crate::workspace::WorkspaceManager;

/// Collaborators shared by every loop, passed in explicitly
pub struct EngineContext {
    pub store: FeatureStore,
    pub gateway: ProviderGateway,
    pub workspaces: WorkspaceManager<Arc<dyn GitExecutor>>,
    pub settings: Arc<dyn SettingsProvider>,
    pub events: Arc<dyn EventSink>,
    /// Append milestones to `<project>/.foreman/activity.md`
    pub activity_log: bool,
}

impl EngineContext {
    pub fn new(
        store: FeatureStore,
        gateway: ProviderGateway,
        git: Arc<dyn GitExecutor>,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        Self {
            store,
            gateway,
            workspaces: WorkspaceManager::new(git),
            settings,
            events: Arc::new(NullEventSink),
            activity_log: true,
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_activity_log(mut self, enabled: bool) -> Self {
        self.activity_log = enabled;
        self
    }

    fn reporter(&self) -> EventReporter {
        EventReporter::new(self.events.clone(), self.activity_log)
    }
}

fn lock_status(status: &Mutex<ProjectLoopStatus>) -> MutexGuard<'_, ProjectLoopStatus> {
    status.lock().unwrap_or_else(|e| e.into_inner())
}

struct LoopHandle {
    loop_id: u64,
    cancel: CancellationToken,
    wake: Arc<Notify>,
    status: Arc<Mutex<ProjectLoopStatus>>,
    done: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl LoopHandle {
    /// Finished loops keep their entry so the final status stays readable
    fn is_live(&self) -> bool {
        !*self.done.borrow() && !self.task.is_finished()
    }

    fn snapshot(&self) -> ProjectLoopStatus {
        lock_status(&self.status).clone()
    }
}

struct Inner {
    ctx: EngineContext,
    loops: Mutex<HashMap<WorkspaceKey, LoopHandle>>,
    runs: RunRegistry,
    // Projects whose stuck features were already reset by this service
    recovered: tokio::sync::Mutex<HashSet<PathBuf>>,
    next_loop_id: AtomicU64,
}

impl Inner {
    fn loops(&self) -> MutexGuard<'_, HashMap<WorkspaceKey, LoopHandle>> {
        self.loops.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wake every loop of `project` except `skip`; returns how many were woken
    fn wake_project(&self, project: &Path, skip: Option<u64>) -> usize {
        let loops = self.loops();
        let mut woken = 0;
        for handle in loops
            .iter()
            .filter(|(key, h)| key.project() == project && Some(h.loop_id) != skip)
            .map(|(_, h)| h)
        {
            handle.wake.notify_one();
            woken += 1;
        }
        woken
    }
}

/// Owns the per-workspace loops of every project
#[derive(Clone)]
pub struct AutoModeService {
    inner: Arc<Inner>,
}

impl AutoModeService {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            inner: Arc::new(Inner {
                ctx,
                loops: Mutex::new(HashMap::new()),
                runs: RunRegistry::new(),
                recovered: tokio::sync::Mutex::new(HashSet::new()),
                next_loop_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.inner.ctx
    }

    pub fn runs(&self) -> &RunRegistry {
        &self.inner.runs
    }

    async fn key(&self, project: &Path, branch: Option<&str>) -> WorkspaceKey {
        self.inner.ctx.workspaces.canonical_key(project, branch).await
    }

    /// Start a loop for (project, branch)
    ///
    /// Fails with `LoopAlreadyRunning` while a loop for the same workspace
    /// is live.
    #[instrument(skip(self), fields(project = %project.display()))]
    pub async fn start(
        &self,
        project: &Path,
        branch: Option<&str>,
        mode: LoopMode,
    ) -> Result<ProjectLoopStatus> {
        let key = self.key(project, branch).await;
        self.start_keyed(key, mode).await
    }

    async fn start_keyed(&self, key: WorkspaceKey, mode: LoopMode) -> Result<ProjectLoopStatus> {
        if self.live_status(&key).is_some() {
            return Err(ForemanError::LoopAlreadyRunning(key.to_string()));
        }

        let settings = self.inner.ctx.settings.global_settings().await?;
        self.recover(key.project()).await;

        let mut loops = self.inner.loops();
        if loops.get(&key).is_some_and(LoopHandle::is_live) {
            return Err(ForemanError::LoopAlreadyRunning(key.to_string()));
        }

        let loop_id = self.inner.next_loop_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let wake = Arc::new(Notify::new());
        let status = Arc::new(Mutex::new(ProjectLoopStatus {
            is_auto_loop_running: true,
            mode: Some(mode.clone()),
            ..ProjectLoopStatus::not_running(&key)
        }));
        let (done_tx, done_rx) = watch::channel(false);

        let task = LoopTask {
            inner: self.inner.clone(),
            key: key.clone(),
            loop_id,
            failures: FailureTracker::new(
                settings.auto_mode.failure_threshold,
                settings.auto_mode.failure_window(),
            ),
            mode,
            settings,
            cancel: cancel.clone(),
            wake: wake.clone(),
            status: status.clone(),
            reporter: self.inner.ctx.reporter(),
            state: LoopState::Idle,
            idle: false,
            reported_cycles: HashSet::new(),
        };

        info!(workspace = %key, loop_id, "Starting auto loop");
        let task = tokio::spawn(task.run(done_tx));
        let snapshot = lock_status(&status).clone();
        loops.insert(
            key,
            LoopHandle {
                loop_id,
                cancel,
                wake,
                status,
                done: done_rx,
                task,
            },
        );
        Ok(snapshot)
    }

    /// Reset features left in flight by a previous process, once per project
    async fn recover(&self, project: &Path) {
        let mut recovered = self.inner.recovered.lock().await;
        if recovered.contains(project) {
            return;
        }
        match self.inner.ctx.store.reset_stuck_features(project).await {
            Ok(ids) if !ids.is_empty() => {
                info!(project = %project.display(), features = ?ids, "Reset stuck features");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(project = %project.display(), error = %e, "Startup recovery failed");
            }
        }
        recovered.insert(project.to_path_buf());
    }

    /// Stop the loop for (project, branch)
    ///
    /// Cancels the in-flight run and waits until the loop has exited, so the
    /// bound feature is no longer in flight when this returns.
    #[instrument(skip(self), fields(project = %project.display()))]
    pub async fn stop(&self, project: &Path, branch: Option<&str>) -> Result<ProjectLoopStatus> {
        let key = self.key(project, branch).await;
        self.stop_keyed(&key).await
    }

    async fn stop_keyed(&self, key: &WorkspaceKey) -> Result<ProjectLoopStatus> {
        let (mut done, status) = {
            let loops = self.inner.loops();
            let handle = loops
                .get(key)
                .filter(|h| h.is_live())
                .ok_or_else(|| ForemanError::LoopNotRunning(key.to_string()))?;

            info!(workspace = %key, "Stopping auto loop");
            lock_status(&handle.status).state = LoopState::Stopping;
            handle.cancel.cancel();
            (handle.done.clone(), handle.status.clone())
        };

        // A dropped sender means the task is gone as well
        let _ = done.wait_for(|finished| *finished).await;

        let status = lock_status(&status).clone();
        Ok(status)
    }

    /// Wake a parked loop, or run a single step when none is live
    pub async fn start_next(&self, project: &Path, branch: Option<&str>) -> Result<ProjectLoopStatus> {
        let key = self.key(project, branch).await;
        {
            let loops = self.inner.loops();
            if let Some(handle) = loops.get(&key).filter(|h| h.is_live()) {
                debug!(workspace = %key, "Waking live loop");
                handle.wake.notify_one();
                return Ok(handle.snapshot());
            }
        }
        self.start_keyed(key, LoopMode::SingleStep).await
    }

    /// Run one named feature in the workspace its branch maps to
    pub async fn run_feature(&self, project: &Path, feature_id: &str) -> Result<ProjectLoopStatus> {
        let feature = self.inner.ctx.store.get(project, feature_id).await?;
        if !feature.status.is_runnable() {
            return Err(ForemanError::InvalidFeature(format!(
                "{} is {}; only pending or ready features can run",
                feature.id, feature.status
            )));
        }

        let key = self.key(project, feature.branch_name.as_deref()).await;
        self.start_keyed(key, LoopMode::Feature(feature.id)).await
    }

    /// Wake every parked loop of `project`; returns how many were woken
    pub fn trigger(&self, project: &Path) -> usize {
        self.inner.wake_project(project, None)
    }

    /// Loop status for (project, branch); a pure read
    ///
    /// A finished loop reports its final status, including the last error.
    pub async fn status(&self, project: &Path, branch: Option<&str>) -> ProjectLoopStatus {
        let key = self.key(project, branch).await;
        let loops = self.inner.loops();
        loops
            .get(&key)
            .map(LoopHandle::snapshot)
            .unwrap_or_else(|| ProjectLoopStatus::not_running(&key))
    }

    fn live_status(&self, key: &WorkspaceKey) -> Option<ProjectLoopStatus> {
        let loops = self.inner.loops();
        loops.get(key).filter(|h| h.is_live()).map(LoopHandle::snapshot)
    }

    /// Statuses of every live loop, ordered by workspace
    pub fn active_loops(&self) -> Vec<ProjectLoopStatus> {
        let loops = self.inner.loops();
        let mut active: Vec<_> = loops
            .iter()
            .filter(|(_, h)| h.is_live())
            .map(|(key, h)| (key.clone(), h.snapshot()))
            .collect();
        active.sort_by(|a, b| a.0.cmp(&b.0));
        active.into_iter().map(|(_, status)| status).collect()
    }

    pub async fn active_run(&self, project: &Path, branch: Option<&str>) -> Option<ActiveRunInfo> {
        let key = self.key(project, branch).await;
        self.inner.runs.get(&key)
    }

    /// Approve a generated plan; the feature becomes `ready`
    #[instrument(skip(self), fields(project = %project.display()))]
    pub async fn approve_plan(&self, project: &Path, feature_id: &str) -> Result<Feature> {
        let feature = self.inner.ctx.store.get(project, feature_id).await?;
        if feature.status != FeatureStatus::WaitingApproval {
            return Err(ForemanError::InvalidFeature(format!(
                "{} is {}, not waiting for approval",
                feature.id, feature.status
            )));
        }
        let Some(mut plan) = feature
            .plan_spec
            .clone()
            .filter(|p| p.content.is_some() && !p.is_approved())
        else {
            return Err(ForemanError::InvalidFeature(format!(
                "{} has no plan awaiting approval",
                feature.id
            )));
        };

        plan.approved_at = Some(Utc::now());
        let updated = self
            .inner
            .ctx
            .store
            .set_status(project, feature_id, FeatureStatus::Ready, StatusChange::none().plan(plan))
            .await?;
        info!(feature = feature_id, "Plan approved");

        self.trigger(project);
        Ok(updated)
    }

    /// Accept a finished feature; dependents become eligible
    #[instrument(skip(self), fields(project = %project.display()))]
    pub async fn verify_feature(&self, project: &Path, feature_id: &str) -> Result<Feature> {
        let feature = self.inner.ctx.store.get(project, feature_id).await?;
        let plan_pending = feature.plan_spec.as_ref().is_some_and(|p| !p.is_approved());
        if feature.status == FeatureStatus::WaitingApproval && plan_pending {
            return Err(ForemanError::InvalidFeature(format!(
                "{} is waiting for plan approval, not verification",
                feature.id
            )));
        }

        let updated = self
            .inner
            .ctx
            .store
            .set_status(project, feature_id, FeatureStatus::Verified, StatusChange::none())
            .await?;
        info!(feature = feature_id, "Feature verified");

        self.trigger(project);
        Ok(updated)
    }

    /// Stop every live loop and wait for all of them
    pub async fn shutdown(&self) {
        let keys: Vec<WorkspaceKey> = {
            let loops = self.inner.loops();
            loops
                .iter()
                .filter(|(_, h)| h.is_live())
                .map(|(k, _)| k.clone())
                .collect()
        };
        if keys.is_empty() {
            return;
        }

        info!(loops = keys.len(), "Shutting down auto mode");
        for result in join_all(keys.iter().map(|key| self.stop_keyed(key))).await {
            if let Err(e) = result {
                debug!(error = %e, "Loop already finished during shutdown");
            }
        }
    }
}

enum Selection {
    Candidate { feature: Feature, all: Vec<Feature> },
    Nothing { awaiting_approval: bool },
    /// The named feature cannot run; the loop finishes with this reason
    Refused(String),
}

/// State owned by one running loop task
struct LoopTask {
    inner: Arc<Inner>,
    key: WorkspaceKey,
    loop_id: u64,
    mode: LoopMode,
    settings: GlobalSettings,
    cancel: CancellationToken,
    wake: Arc<Notify>,
    status: Arc<Mutex<ProjectLoopStatus>>,
    reporter: EventReporter,
    failures: FailureTracker,
    state: LoopState,
    idle: bool,
    reported_cycles: HashSet<Vec<String>>,
}

impl LoopTask {
    async fn run(mut self, done: watch::Sender<bool>) {
        info!(workspace = %self.key, mode = ?self.mode, "=== Auto loop started ===");
        self.report(AutoModeEventKind::LoopStarted {
            mode: self.mode.clone(),
        });

        let reason = self.drive().await;

        self.apply(LoopEvent::Stopped);
        self.update_status(|s| {
            s.is_auto_loop_running = false;
            s.current_feature_id = None;
        });
        info!(workspace = %self.key, reason = %reason, "=== Auto loop stopped ===");
        self.report(AutoModeEventKind::LoopStopped { reason });

        done.send_replace(true);
    }

    /// Select/run cycles until the loop finishes; returns the stop reason
    async fn drive(&mut self) -> String {
        let mut event = LoopEvent::Start;

        loop {
            if self.cancel.is_cancelled() {
                self.apply(LoopEvent::StopRequested);
                return "stopped".to_string();
            }
            self.apply(event);

            let selection = match self.select().await {
                Ok(selection) => selection,
                Err(e) => {
                    warn!(workspace = %self.key, error = %e, "Feature selection failed");
                    self.set_last_error(e.to_string());
                    Selection::Nothing {
                        awaiting_approval: false,
                    }
                }
            };

            let (feature, all) = match selection {
                Selection::Candidate { feature, all } => (feature, all),
                Selection::Refused(reason) => {
                    warn!(workspace = %self.key, reason = %reason, "Feature cannot run");
                    self.set_last_error(reason.clone());
                    self.apply(LoopEvent::NoCandidate {
                        awaiting_approval: false,
                    });
                    return reason;
                }
                Selection::Nothing { awaiting_approval } => {
                    self.apply(LoopEvent::NoCandidate { awaiting_approval });
                    if !self.mode.is_continuous() {
                        return "no eligible features".to_string();
                    }
                    if !self.idle {
                        self.idle = true;
                        self.report(AutoModeEventKind::LoopIdle);
                    }
                    if !self.park().await {
                        self.apply(LoopEvent::StopRequested);
                        return "stopped".to_string();
                    }
                    event = LoopEvent::Wake;
                    continue;
                }
            };

            self.idle = false;
            let feature_id = feature.id.clone();
            for action in self.apply(LoopEvent::CandidateFound {
                feature_id: feature_id.clone(),
            }) {
                if let LoopAction::BindFeature { feature_id } = action {
                    self.update_status(|s| s.current_feature_id = Some(feature_id));
                }
            }

            let result = self.run_selected(feature, all).await;
            self.update_status(|s| s.current_feature_id = None);

            match result {
                RunResult::Completed { .. } => {
                    self.record_success();
                    self.apply(LoopEvent::RunCompleted { feature_id });
                    // Dependents in other workspaces may be unblocked now
                    self.inner.wake_project(self.key.project(), Some(self.loop_id));
                }
                RunResult::AwaitingApproval => {
                    self.record_success();
                    self.apply(LoopEvent::RunAwaitingApproval { feature_id });
                }
                RunResult::Failed { error } => {
                    self.set_last_error(error.clone());
                    let escalate = self.failures.record_failure();
                    let failures = self.failures.consecutive_failures();
                    self.update_status(|s| s.consecutive_failures = failures);
                    self.apply(LoopEvent::RunFailed { feature_id, error: error.clone() });
                    if escalate {
                        return self.pause(&error).await;
                    }
                }
                RunResult::Cancelled { .. } => {
                    self.apply(LoopEvent::RunCancelled { feature_id });
                    return "stopped".to_string();
                }
            }

            if !self.mode.is_continuous() {
                return "run finished".to_string();
            }
            event = LoopEvent::Start;
        }
    }

    /// Wait for a trigger or the poll interval; false when cancelled
    async fn park(&self) -> bool {
        let interval = self.settings.auto_mode.idle_poll_interval().max(Duration::from_millis(10));
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = self.wake.notified() => true,
            _ = tokio::time::sleep(interval) => true,
        }
    }

    async fn select(&mut self) -> Result<Selection> {
        let project = self.key.project().to_path_buf();
        let all = self.inner.ctx.store.list(&project).await?;
        let primary = self.inner.ctx.workspaces.primary_branch(&project).await;
        let mine: Vec<Feature> = all
            .iter()
            .filter(|f| f.targets_workspace(self.key.branch(), primary.as_deref()))
            .cloned()
            .collect();

        // Whole project, so cycles spanning workspaces are caught too
        let resolution = resolve(&all);
        for (cycle, error) in resolution.cycles.iter().zip(resolution.cycle_errors()) {
            let touches_mine = cycle.iter().any(|id| mine.iter().any(|f| &f.id == id));
            if touches_mine && self.reported_cycles.insert(cycle.clone()) {
                warn!(workspace = %self.key, error = %error, "Features excluded from scheduling");
                self.set_last_error(error.to_string());
                self.report(AutoModeEventKind::DependencyCycle {
                    feature_ids: cycle.clone(),
                    error: error.to_string(),
                });
            }
        }

        let feature = match &self.mode {
            LoopMode::Feature(id) => {
                let Some(feature) = mine.iter().find(|f| &f.id == id) else {
                    return Ok(Selection::Refused(format!(
                        "feature {} does not belong to {}",
                        id, self.key
                    )));
                };
                if !feature.status.is_runnable() {
                    return Ok(Selection::Refused(format!("feature {} is {}", id, feature.status)));
                }
                if resolution.is_excluded(id) {
                    return Ok(Selection::Refused(format!(
                        "feature {} is part of a dependency cycle",
                        id
                    )));
                }
                let blockers = blocking_dependencies(feature, &all);
                if !blockers.is_empty() {
                    return Ok(Selection::Refused(format!(
                        "feature {} is blocked by {}",
                        id,
                        blockers.join(", ")
                    )));
                }
                feature.clone()
            }
            _ => {
                let next = eligible_candidates(&mine, &all)
                    .into_iter()
                    .filter(|f| !resolution.is_excluded(&f.id))
                    .find(|f| self.inner.runs.find_feature(&project, &f.id).is_none())
                    .cloned();
                match next {
                    Some(feature) => feature,
                    None => {
                        let awaiting_approval = mine
                            .iter()
                            .any(|f| f.status == FeatureStatus::WaitingApproval);
                        return Ok(Selection::Nothing { awaiting_approval });
                    }
                }
            }
        };

        Ok(Selection::Candidate { feature, all })
    }

    /// Bind a RunContext for `feature` and run it to a terminal state
    async fn run_selected(&mut self, feature: Feature, all: Vec<Feature>) -> RunResult {
        let project = self.key.project().to_path_buf();

        let workspace = match self.inner.ctx.workspaces.ensure_workspace(&self.key).await {
            Ok(workspace) => workspace,
            Err(e) => return self.workspace_unavailable(&project, &feature, e).await,
        };
        if self.cancel.is_cancelled() {
            return RunResult::Cancelled {
                reverted_to: feature.status,
            };
        }

        let model = feature
            .model
            .clone()
            .unwrap_or_else(|| self.settings.default_model.clone());
        let mut ctx = RunContext::new(
            feature.id.clone(),
            self.key.clone(),
            workspace,
            model,
            feature.status,
            self.cancel.child_token(),
        );
        let _guard = match self.inner.runs.register(&ctx) {
            Ok(guard) => guard,
            Err(e) => {
                warn!(workspace = %self.key, error = %e, "Run refused");
                return RunResult::Failed { error: e.to_string() };
            }
        };

        let runner = FeatureRunner::new(
            &self.inner.ctx.store,
            &self.inner.ctx.gateway,
            &self.reporter,
            &self.settings.auto_mode,
        );
        match runner.run(&mut ctx, feature, &all).await {
            Ok(result) => result,
            Err(e) => {
                error!(workspace = %self.key, feature = %ctx.feature_id, error = %e, "Run could not start");
                RunResult::Failed { error: e.to_string() }
            }
        }
    }

    /// The feature stays runnable; the error is recorded on it and counted
    async fn workspace_unavailable(
        &self,
        project: &Path,
        feature: &Feature,
        e: ForemanError,
    ) -> RunResult {
        let error = e.to_string();
        warn!(workspace = %self.key, feature = %feature.id, error = %error, "Workspace unavailable");

        let patch = FeaturePatch {
            error: Some(Some(error.clone())),
            ..Default::default()
        };
        fail_open("record workspace error", || {
            self.inner.ctx.store.update(project, &feature.id, patch)
        })
        .await;

        self.report(AutoModeEventKind::WorkspaceUnavailable {
            feature_id: feature.id.clone(),
            error: error.clone(),
        });
        RunResult::Failed { error }
    }

    async fn pause(&mut self, error: &str) -> String {
        let failures = self.failures.consecutive_failures();
        let reason = format!(
            "paused after {} failures within {}s; last error: {}",
            failures, self.settings.auto_mode.failure_window_secs, error
        );
        warn!(workspace = %self.key, failures, "Auto mode paused");
        self.set_last_error(reason.clone());
        self.report(AutoModeEventKind::AutoModePaused {
            reason: reason.clone(),
            failures,
        });
        reason
    }

    fn record_success(&mut self) {
        self.failures.record_success();
        self.update_status(|s| s.consecutive_failures = 0);
    }

    fn apply(&mut self, event: LoopEvent) -> Vec<LoopAction> {
        let from = self.state;
        let (next, actions) = transition(from, event);
        if next != from {
            debug!(workspace = %self.key, %from, to = %next, "Loop transition");
        }
        self.state = next;
        self.update_status(|s| s.state = next);

        for action in &actions {
            if let LoopAction::LogActivity { message } = action {
                debug!(workspace = %self.key, "{}", message);
                self.reporter.note(&self.key, message);
            }
        }
        actions
    }

    fn set_last_error(&self, error: String) {
        self.update_status(|s| s.last_error = Some(error));
    }

    fn update_status(&self, f: impl FnOnce(&mut ProjectLoopStatus)) {
        f(&mut lock_status(&self.status));
    }

    fn report(&self, kind: AutoModeEventKind) {
        self.reporter.report(&self.key, kind);
    }
}
