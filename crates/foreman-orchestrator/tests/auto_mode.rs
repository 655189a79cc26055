//! End-to-end loop behavior with a mock git repository and a scripted provider

use foreman_agent::{ProviderGateway, ScriptedProvider};
use foreman_core::{
    Feature, FeatureStatus, ForemanError, GlobalSettings, LoopMode, LoopState, PlanningMode,
    WorkspaceKey,
};
use foreman_git::{GitOutput, MockGitExecutor};
use foreman_orchestrator::{
    blocking_dependencies, AutoModeEventKind, AutoModeService, EngineContext, RecordingEventSink,
    StaticSettingsProvider,
};
use foreman_store::{FeatureStore, NewFeature, StatusChange};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(10);

fn repo() -> MockGitExecutor {
    MockGitExecutor::new()
        .with_response("symbolic-ref --short -q HEAD", GitOutput::ok("main\n"))
        .with_response("rev-parse --is-inside-work-tree", GitOutput::ok("true\n"))
        .with_response("rev-parse --verify --quiet HEAD", GitOutput::ok("abc\n"))
        .with_response(
            "worktree list --porcelain",
            GitOutput::ok("worktree /repo\nHEAD abc\nbranch refs/heads/main\n"),
        )
        .with_response("show-ref *", GitOutput::failed(""))
        .with_response("worktree add *", GitOutput::ok(""))
}

struct Harness {
    temp: TempDir,
    service: AutoModeService,
    provider: Arc<ScriptedProvider>,
    sink: Arc<RecordingEventSink>,
}

impl Harness {
    fn new(provider: ScriptedProvider) -> Self {
        Self::with_git(provider, repo())
    }

    fn with_git(provider: ScriptedProvider, git: MockGitExecutor) -> Self {
        let provider = Arc::new(provider);
        let sink = Arc::new(RecordingEventSink::new());
        let ctx = EngineContext::new(
            FeatureStore::new(),
            ProviderGateway::uniform(provider.clone()),
            Arc::new(git),
            Arc::new(StaticSettingsProvider::new(GlobalSettings::default())),
        )
        .with_events(sink.clone());

        Self {
            temp: TempDir::new().unwrap(),
            service: AutoModeService::new(ctx),
            provider,
            sink,
        }
    }

    fn project(&self) -> &Path {
        self.temp.path()
    }

    fn store(&self) -> &FeatureStore {
        &self.service.context().store
    }

    async fn add(&self, new: NewFeature) -> Feature {
        self.store().create(self.project(), new).await.unwrap()
    }

    async fn feature(&self, id: &str) -> Feature {
        self.store().get(self.project(), id).await.unwrap()
    }

    async fn wait_for_status(&self, id: &str, status: FeatureStatus) {
        let reached = wait_until(|| async move { self.feature(id).await.status == status }).await;
        assert!(reached, "{} never reached {}", id, status);
    }

    async fn wait_for_loop_exit(&self, branch: Option<&str>) {
        let exited = wait_until(|| async move {
            !self.service.status(self.project(), branch).await.is_auto_loop_running
        })
        .await;
        assert!(exited, "loop did not finish");
    }

    async fn wait_for_loop_state(&self, state: LoopState) {
        let reached = wait_until(|| async move {
            self.service.status(self.project(), None).await.state == state
        })
        .await;
        assert!(reached, "loop never reached {}", state);
    }

    /// Feature ids in the order their implementation queries were issued
    fn implemented(&self) -> Vec<String> {
        self.provider
            .queries()
            .iter()
            .map(|q| q.prompt.text())
            .filter(|p| p.starts_with("# FOREMAN FEATURE"))
            .filter_map(|p| {
                p.lines()
                    .find_map(|l| l.strip_prefix("## FEATURE ").map(str::to_string))
            })
            .collect()
    }
}

async fn wait_until<F, Fut>(check: F) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(TIMEOUT, async {
        loop {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test]
async fn test_priority_and_dependencies_order_runs() {
    let h = Harness::new(ScriptedProvider::new());
    h.add(NewFeature::new("First").with_id("alpha").with_priority(1)).await;
    h.add(
        NewFeature::new("Needs alpha")
            .with_id("bravo")
            .with_priority(1)
            .with_dependencies(["alpha"]),
    )
    .await;
    h.add(NewFeature::new("Independent").with_id("charlie").with_priority(2)).await;

    h.service
        .start(h.project(), None, LoopMode::Continuous)
        .await
        .unwrap();
    h.wait_for_status("bravo", FeatureStatus::Completed).await;
    h.service.stop(h.project(), None).await.unwrap();

    assert_eq!(h.implemented(), vec!["alpha", "charlie", "bravo"]);
}

#[tokio::test]
async fn test_failed_dependency_blocks() {
    let h = Harness::new(ScriptedProvider::new());
    h.add(NewFeature::new("Broken").with_id("x")).await;
    h.store()
        .set_status(h.project(), "x", FeatureStatus::Running, StatusChange::none())
        .await
        .unwrap();
    h.store()
        .set_status(h.project(), "x", FeatureStatus::Failed, StatusChange::with_error("tests failed"))
        .await
        .unwrap();
    h.add(NewFeature::new("Needs x").with_id("y").with_dependencies(["x"])).await;

    let all = h.store().list(h.project()).await.unwrap();
    let y = all.iter().find(|f| f.id == "y").unwrap();
    assert_eq!(blocking_dependencies(y, &all), vec!["x"]);

    h.service
        .start(h.project(), None, LoopMode::SingleStep)
        .await
        .unwrap();
    h.wait_for_loop_exit(None).await;

    assert!(h.provider.queries().is_empty());
    assert_eq!(h.feature("y").await.status, FeatureStatus::Pending);
}

#[tokio::test]
async fn test_one_run_per_workspace() {
    let h = Harness::new(ScriptedProvider::new().gated());
    h.add(NewFeature::new("One").with_id("one")).await;
    h.add(NewFeature::new("Two").with_id("two")).await;

    h.service
        .start(h.project(), None, LoopMode::Continuous)
        .await
        .unwrap();
    assert!(h.provider.wait_for_started(1, TIMEOUT).await);

    let err = h
        .service
        .start(h.project(), Some("main"), LoopMode::Continuous)
        .await
        .unwrap_err();
    assert!(matches!(err, ForemanError::LoopAlreadyRunning(_)));

    // Nudging the live loop must not start a second run
    h.service.start_next(h.project(), None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.provider.in_flight(), 1);

    h.provider.release(1);
    assert!(h.provider.wait_for_started(2, TIMEOUT).await);
    h.provider.release(1);
    h.wait_for_status("two", FeatureStatus::Completed).await;
    h.wait_for_status("one", FeatureStatus::Completed).await;

    assert_eq!(h.provider.max_in_flight(), 1);
    h.service.stop(h.project(), None).await.unwrap();
}

#[tokio::test]
async fn test_stop_leaves_nothing_running() {
    let h = Harness::new(ScriptedProvider::new().gated());
    h.add(NewFeature::new("Slow").with_id("slow")).await;

    h.service
        .start(h.project(), None, LoopMode::Continuous)
        .await
        .unwrap();
    assert!(h.provider.wait_for_started(1, TIMEOUT).await);
    assert_eq!(h.feature("slow").await.status, FeatureStatus::Running);
    assert!(h.service.active_run(h.project(), None).await.is_some());

    let status = h.service.stop(h.project(), None).await.unwrap();
    assert!(!status.is_auto_loop_running);
    assert_eq!(status.state, LoopState::Idle);

    assert_eq!(h.feature("slow").await.status, FeatureStatus::Pending);
    assert!(h.service.active_run(h.project(), None).await.is_none());
    assert!(h.service.active_loops().is_empty());
    assert!(h
        .sink
        .for_feature("slow")
        .iter()
        .any(|e| matches!(e.kind, AutoModeEventKind::FeatureCancelled { .. })));

    let err = h.service.stop(h.project(), None).await.unwrap_err();
    assert!(matches!(err, ForemanError::LoopNotRunning(_)));
}

#[tokio::test]
async fn test_workspaces_advance_independently() {
    let h = Harness::new(ScriptedProvider::new().gated());
    h.add(NewFeature::new("Main work").with_id("core")).await;
    h.add(NewFeature::new("Login page").with_id("login").with_branch("feature/login")).await;

    h.service
        .start(h.project(), None, LoopMode::Continuous)
        .await
        .unwrap();
    h.service
        .start(h.project(), Some("feature/login"), LoopMode::Continuous)
        .await
        .unwrap();
    assert!(h.provider.wait_for_started(2, TIMEOUT).await);

    assert_eq!(h.feature("core").await.status, FeatureStatus::Running);
    assert_eq!(h.feature("login").await.status, FeatureStatus::Running);
    assert_eq!(h.service.active_loops().len(), 2);

    let login_run = h
        .service
        .active_run(h.project(), Some("feature/login"))
        .await
        .unwrap();
    assert_eq!(login_run.feature_id, "login");
    assert!(login_run.branch_path.ends_with("feature-login"));

    // Naming the primary branch addresses the primary loop
    h.service.stop(h.project(), Some("main")).await.unwrap();

    assert_eq!(h.feature("core").await.status, FeatureStatus::Pending);
    assert_eq!(h.feature("login").await.status, FeatureStatus::Running);
    let login = h.service.status(h.project(), Some("feature/login")).await;
    assert!(login.is_auto_loop_running);
    assert_eq!(login.current_feature_id.as_deref(), Some("login"));

    h.provider.release(1);
    h.wait_for_status("login", FeatureStatus::Completed).await;
    h.service.shutdown().await;
    assert!(h.service.active_loops().is_empty());
}

#[tokio::test]
async fn test_repeated_failures_pause_loop() {
    let provider = ScriptedProvider::new().with_default(vec![Err("connection reset".to_string())]);
    let h = Harness::new(provider);
    for id in ["f1", "f2", "f3", "f4"] {
        h.add(NewFeature::new(format!("Feature {}", id)).with_id(id)).await;
    }

    h.service
        .start(h.project(), None, LoopMode::Continuous)
        .await
        .unwrap();
    h.wait_for_loop_exit(None).await;

    let status = h.service.status(h.project(), None).await;
    assert!(status.last_error.as_deref().unwrap().contains("paused after 3 failures"));

    let features = h.store().list(h.project()).await.unwrap();
    let failed = features.iter().filter(|f| f.status == FeatureStatus::Failed).count();
    assert_eq!(failed, 3);
    assert!(h
        .sink
        .events()
        .iter()
        .any(|e| matches!(e.kind, AutoModeEventKind::AutoModePaused { failures: 3, .. })));
}

#[tokio::test]
async fn test_plan_approval_flow() {
    let provider = ScriptedProvider::new()
        .on_prompt("FOREMAN PLANNING", vec![Ok(foreman_agent::ProviderEvent::success("1. Add form"))])
        .with_default(vec![Ok(foreman_agent::ProviderEvent::success(
            "<summary>Form added</summary>",
        ))]);
    let h = Harness::new(provider);
    let mut new = NewFeature::new("Signup form").with_id("signup");
    new.planning_mode = PlanningMode::Spec;
    new.require_plan_approval = true;
    h.add(new).await;

    h.service
        .start(h.project(), None, LoopMode::Continuous)
        .await
        .unwrap();
    h.wait_for_status("signup", FeatureStatus::WaitingApproval).await;
    h.wait_for_loop_state(LoopState::AwaitingApproval).await;

    let err = h.service.verify_feature(h.project(), "signup").await.unwrap_err();
    assert!(matches!(err, ForemanError::InvalidFeature(_)));

    let approved = h.service.approve_plan(h.project(), "signup").await.unwrap();
    assert_eq!(approved.status, FeatureStatus::Ready);
    assert!(approved.plan_spec.unwrap().is_approved());

    h.wait_for_status("signup", FeatureStatus::Completed).await;
    let feature = h.feature("signup").await;
    assert_eq!(feature.summary.as_deref(), Some("Form added"));

    let verified = h.service.verify_feature(h.project(), "signup").await.unwrap();
    assert_eq!(verified.status, FeatureStatus::Verified);
    h.service.stop(h.project(), None).await.unwrap();
}

#[tokio::test]
async fn test_run_feature_runs_only_that_feature() {
    let h = Harness::new(ScriptedProvider::new());
    h.add(NewFeature::new("Wanted").with_id("wanted").with_priority(3)).await;
    h.add(NewFeature::new("Other").with_id("other").with_priority(1)).await;

    h.service.run_feature(h.project(), "wanted").await.unwrap();
    h.wait_for_loop_exit(None).await;

    assert_eq!(h.feature("wanted").await.status, FeatureStatus::Completed);
    assert_eq!(h.feature("other").await.status, FeatureStatus::Pending);
    assert_eq!(h.implemented(), vec!["wanted"]);

    let err = h.service.run_feature(h.project(), "wanted").await.unwrap_err();
    assert!(matches!(err, ForemanError::InvalidFeature(_)));
}

#[tokio::test]
async fn test_startup_recovery_resets_stuck_feature() {
    let h = Harness::new(ScriptedProvider::new());
    h.add(NewFeature::new("Interrupted").with_id("stuck")).await;
    h.store()
        .set_status(h.project(), "stuck", FeatureStatus::Running, StatusChange::none())
        .await
        .unwrap();

    h.service
        .start(h.project(), None, LoopMode::SingleStep)
        .await
        .unwrap();
    h.wait_for_loop_exit(None).await;

    assert_eq!(h.feature("stuck").await.status, FeatureStatus::Completed);
    assert_eq!(h.implemented(), vec!["stuck"]);
}

#[tokio::test]
async fn test_workspace_failure_keeps_feature_runnable() {
    let git = repo().with_response("worktree add *", GitOutput::failed("fatal: invalid reference"));
    let h = Harness::with_git(ScriptedProvider::new(), git);
    h.add(NewFeature::new("Branch work").with_id("api").with_branch("feature/api")).await;

    h.service.run_feature(h.project(), "api").await.unwrap();
    h.wait_for_loop_exit(Some("feature/api")).await;

    let feature = h.feature("api").await;
    assert_eq!(feature.status, FeatureStatus::Pending);
    assert!(feature.error.unwrap().contains("invalid reference"));
    assert!(h.provider.queries().is_empty());

    let key = WorkspaceKey::new(h.project(), Some("feature/api"));
    assert!(h.sink.events().iter().any(|e| {
        e.branch_name == key.branch_name
            && matches!(e.kind, AutoModeEventKind::WorkspaceUnavailable { .. })
    }));
}

#[tokio::test]
async fn test_cycle_across_workspaces_is_reported() {
    let h = Harness::new(ScriptedProvider::new());
    h.add(NewFeature::new("Main half").with_id("a").with_dependencies(["b"])).await;
    h.add(
        NewFeature::new("Branch half")
            .with_id("b")
            .with_branch("feature/x")
            .with_dependencies(["a"]),
    )
    .await;
    h.add(NewFeature::new("Unrelated").with_id("c")).await;

    h.service
        .start(h.project(), None, LoopMode::Continuous)
        .await
        .unwrap();
    h.service
        .start(h.project(), Some("feature/x"), LoopMode::Continuous)
        .await
        .unwrap();
    h.wait_for_status("c", FeatureStatus::Completed).await;

    let cycle_events = || {
        h.sink
            .events()
            .into_iter()
            .filter_map(|e| match e.kind {
                AutoModeEventKind::DependencyCycle { feature_ids, error } => {
                    Some((e.branch_name, feature_ids, error))
                }
                _ => None,
            })
            .collect::<Vec<_>>()
    };
    let reported = wait_until(|| async move { cycle_events().len() == 2 }).await;
    assert!(reported, "cycle a <-> b was not reported by both loops");

    for (_, ids, error) in cycle_events() {
        assert_eq!(ids, vec!["a", "b"]);
        assert!(error.contains("a -> b"));
    }
    let status = h.service.status(h.project(), Some("feature/x")).await;
    assert!(status.last_error.unwrap().starts_with("Dependency cycle detected"));

    // Later selections do not repeat the report
    h.service.trigger(h.project());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cycle_events().len(), 2);

    assert_eq!(h.implemented(), vec!["c"]);
    assert_eq!(h.feature("a").await.status, FeatureStatus::Pending);
    assert_eq!(h.feature("b").await.status, FeatureStatus::Pending);
    h.service.shutdown().await;
}
