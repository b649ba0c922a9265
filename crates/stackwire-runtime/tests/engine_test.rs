//! Integration tests for the Stackwire engine.
//!
//! These tests drive full runs against the simulated cloud:
//! 1. Cross-stack export and import, with batch reordering
//! 2. Planning errors (cycles) before any side effect
//! 3. Determinism of plans
//! 4. Failures, timeouts, and aborts
//! 5. Cancellation and resume
//! 6. Destroy: retain, blocked exports, revoke after release
//! 7. Durable state across engine instances

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use stackwire_common::config::StackwireConfig;
use stackwire_common::error::StackwireError;
use stackwire_common::types::{NodeState, RemovalPolicy, ResourceKind};
use stackwire_compose::model::{OutputDeclaration, ResourceDeclaration, StackUnit, Value};
use stackwire_runtime::provider::Attributes;
use stackwire_runtime::simulated::Operation;
use stackwire_runtime::{
    Action, CancelHandle, Engine, ExitStatus, ProviderError, ProviderSet, ResourceProvider, ResourceRequest,
    SimulatedCloud,
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn engine_with(cloud: &Arc<SimulatedCloud>) -> Engine {
    init_tracing();
    Engine::in_memory(&StackwireConfig::default(), ProviderSet::uniform(cloud.clone()))
}

/// Publishes the project name as `projectAzul`.
fn params_stack() -> StackUnit {
    let mut stack = StackUnit::new("parameterstore-stack");
    stack.resources.push(
        ResourceDeclaration::new("ProjectName", ResourceKind::Parameter)
            .with_property("parameterName", "/vectorAzul/ProjectName")
            .with_property("stringValue", "vectorAzul"),
    );
    stack.outputs.push(OutputDeclaration {
        name: "vectorProjectRef".into(),
        value: Value::attr("ProjectName", "value"),
        export_name: Some("projectAzul".into()),
        description: Some("Project name".into()),
    });
    stack
}

/// Imports `projectAzul` into a bucket name.
fn app_stack() -> StackUnit {
    let mut stack = StackUnit::new("config-stack");
    stack.resources = vec![
        ResourceDeclaration::new("Vpc", ResourceKind::Network).with_property("cidr", "10.10.0.0/10"),
        ResourceDeclaration::new("Subnet1", ResourceKind::Subnet)
            .with_property("vpcId", Value::attr("Vpc", "vpcId")),
        ResourceDeclaration::new("Bucket", ResourceKind::Bucket)
            .with_property("bucketName", Value::join([Value::import("projectAzul"), "-configuracion".into()])),
    ];
    stack
}

// ── Cross-stack ──────────────────────────────────────────────────────

#[tokio::test]
async fn importer_is_applied_after_its_exporter() {
    let cloud = Arc::new(SimulatedCloud::new());
    let engine = engine_with(&cloud);

    let plan = engine.plan(vec![app_stack(), params_stack()]).expect("plan");
    assert_eq!(plan.stack_order(), vec!["parameterstore-stack", "config-stack"]);

    let result = engine.apply(&plan).await;
    assert_eq!(result.status, ExitStatus::Success, "abort: {:?}", result.abort);
    assert_eq!(result.in_state(NodeState::Created).len(), 4);

    let state = engine.state().expect("state");
    let bucket = state.record("config-stack", "Bucket").expect("bucket");
    assert_eq!(bucket.physical_id, "vectorazul-configuracion");
    assert_eq!(
        engine.registry().importers_of("projectAzul").expect("read"),
        vec!["config-stack".to_string()]
    );
    assert_eq!(
        engine.registry().lookup("projectAzul").expect("read").as_deref(),
        Some("vectorAzul")
    );
}

#[tokio::test]
async fn unknown_import_fails_planning() {
    let engine = engine_with(&Arc::new(SimulatedCloud::new()));
    let err = engine.plan(vec![app_stack()]).unwrap_err();
    assert!(
        matches!(err, StackwireError::UnresolvedReference { ref reference, .. } if reference == "import:projectAzul"),
        "got: {err}"
    );
}

// ── Planning ─────────────────────────────────────────────────────────

#[tokio::test]
async fn mutual_references_are_a_cycle() {
    let cloud = Arc::new(SimulatedCloud::new());
    let engine = engine_with(&cloud);
    let mut stack = StackUnit::new("config-stack");
    stack.resources = vec![
        ResourceDeclaration::new("Vpc", ResourceKind::Network).with_property("peer", Value::attr("Subnet1", "subnetId")),
        ResourceDeclaration::new("Subnet1", ResourceKind::Subnet).with_property("vpcId", Value::attr("Vpc", "vpcId")),
    ];

    let err = engine.plan(vec![stack]).unwrap_err();
    match err {
        StackwireError::CyclicDependency { cycle } => {
            assert!(cycle.contains(&"Vpc".to_string()));
            assert!(cycle.contains(&"Subnet1".to_string()));
        }
        other => panic!("expected a cycle, got: {other}"),
    }
    assert!(cloud.calls().is_empty());
}

#[tokio::test]
async fn identical_inputs_give_identical_plans() {
    let first = engine_with(&Arc::new(SimulatedCloud::new()))
        .plan(vec![params_stack(), app_stack()])
        .expect("plan");
    let second = engine_with(&Arc::new(SimulatedCloud::new()))
        .plan(vec![params_stack(), app_stack()])
        .expect("plan");
    assert_eq!(first.operations(), second.operations());
    assert_eq!(first.digest(), second.digest());
}

#[tokio::test]
async fn removed_resource_is_planned_and_applied_as_delete() {
    let cloud = Arc::new(SimulatedCloud::new());
    let engine = engine_with(&cloud);
    let plan = engine.plan(vec![params_stack(), app_stack()]).expect("plan");
    assert_eq!(engine.apply(&plan).await.status, ExitStatus::Success);

    let mut smaller = app_stack();
    let _ = smaller.resources.remove(1);
    let plan = engine.plan(vec![params_stack(), smaller]).expect("plan");
    let changes: Vec<(&str, Action)> = plan.changes().map(|op| (op.resource.as_str(), op.action)).collect();
    assert_eq!(changes, vec![("Subnet1", Action::Delete)]);

    let result = engine.apply(&plan).await;
    assert_eq!(result.status, ExitStatus::Success);
    assert_eq!(result.report("config-stack", "Subnet1").expect("report").state, NodeState::Destroyed);
    assert_eq!(cloud.count(Operation::Delete), 1);
}

// ── Failures ─────────────────────────────────────────────────────────

#[tokio::test]
async fn failure_aborts_remaining_stacks() {
    let cloud = Arc::new(SimulatedCloud::new());
    cloud.fail(Operation::Create, "ProjectName", "ParameterLimitExceeded");
    let engine = engine_with(&cloud);

    let plan = engine.plan(vec![params_stack(), app_stack()]).expect("plan");
    let result = engine.apply(&plan).await;
    assert_eq!(result.status, ExitStatus::PartialFailure);
    assert_eq!(result.status.code(), 1);

    let failed = result.report("parameterstore-stack", "ProjectName").expect("report");
    assert_eq!(failed.state, NodeState::Failed);
    assert!(failed.error.as_deref().unwrap_or_default().contains("ParameterLimitExceeded"));
    assert_eq!(result.in_state(NodeState::Pending).len(), 3);
    assert!(matches!(
        result.abort,
        Some(StackwireError::ResourceOperation { ref resource, .. }) if resource == "ProjectName"
    ));
}

#[tokio::test]
async fn slow_provider_call_times_out() {
    let cloud = Arc::new(SimulatedCloud::new());
    cloud.delay("Vpc", Duration::from_millis(500));
    let engine = engine_with(&cloud).with_operation_timeout(Duration::from_millis(50));

    let mut stack = app_stack();
    let _ = stack.resources.pop();
    let plan = engine.plan(vec![stack]).expect("plan");
    let result = engine.apply(&plan).await;

    assert_eq!(result.status, ExitStatus::PartialFailure);
    let vpc = result.report("config-stack", "Vpc").expect("report");
    assert_eq!(vpc.state, NodeState::Failed);
    assert!(vpc.error.as_deref().unwrap_or_default().contains("timed out"));
    assert_eq!(
        result.report("config-stack", "Subnet1").expect("report").state,
        NodeState::Pending
    );
    assert!(engine.state().expect("state").stack("config-stack").is_none());
}

// ── Cancellation ─────────────────────────────────────────────────────

/// Requests cancellation once a given resource has been created.
struct CancelAfter {
    inner: Arc<SimulatedCloud>,
    logical_id: &'static str,
    cancel: CancelHandle,
}

#[async_trait]
impl ResourceProvider for CancelAfter {
    async fn create(&self, request: &ResourceRequest) -> Result<(String, Attributes), ProviderError> {
        let created = self.inner.create(request).await?;
        if request.logical_id == self.logical_id {
            self.cancel.cancel();
        }
        Ok(created)
    }

    async fn update(&self, physical_id: &str, request: &ResourceRequest) -> Result<Attributes, ProviderError> {
        self.inner.update(physical_id, request).await
    }

    async fn delete(&self, physical_id: &str, kind: ResourceKind) -> Result<(), ProviderError> {
        self.inner.delete(physical_id, kind).await
    }
}

#[tokio::test]
async fn cancelled_apply_resumes_where_it_stopped() {
    init_tracing();
    let cloud = Arc::new(SimulatedCloud::new());
    let cancel = CancelHandle::new();
    let provider = Arc::new(CancelAfter {
        inner: cloud.clone(),
        logical_id: "Vpc",
        cancel: cancel.clone(),
    });
    let engine = Engine::in_memory(&StackwireConfig::default(), ProviderSet::uniform(provider))
        .with_cancel_handle(cancel.clone());

    let mut stack = app_stack();
    let _ = stack.resources.pop();
    let plan = engine.plan(vec![stack.clone()]).expect("plan");
    let result = engine.apply(&plan).await;

    assert_eq!(result.status, ExitStatus::PartialFailure);
    let stopped = result.cancelled_at().expect("cancelled");
    assert_eq!(stopped.resource, "Subnet1");
    assert_eq!(result.report("config-stack", "Vpc").expect("report").state, NodeState::Created);
    assert_eq!(result.report("config-stack", "Subnet1").expect("report").state, NodeState::Pending);

    let state = engine.state().expect("state");
    assert_eq!(state.resume_point.as_ref().map(|r| r.resource.as_str()), Some("Subnet1"));
    assert!(state.record("config-stack", "Vpc").is_some());

    cancel.reset();
    let plan = engine.plan(vec![stack]).expect("plan");
    let result = engine.apply(&plan).await;
    assert_eq!(result.status, ExitStatus::Success);
    assert_eq!(result.report("config-stack", "Vpc").expect("report").action, Some(Action::NoOp));
    assert_eq!(result.report("config-stack", "Subnet1").expect("report").action, Some(Action::Create));
    assert!(engine.state().expect("state").resume_point.is_none());
    assert_eq!(cloud.count(Operation::Create), 2);
}

// ── Destroy ──────────────────────────────────────────────────────────

#[tokio::test]
async fn retained_resource_outlives_destroy() {
    let cloud = Arc::new(SimulatedCloud::new());
    let engine = engine_with(&cloud);
    let mut stack = params_stack();
    stack.resources[0] = stack.resources[0]
        .clone()
        .with_removal_policy(RemovalPolicy::Retain);

    let plan = engine.plan(vec![stack.clone()]).expect("plan");
    assert_eq!(engine.apply(&plan).await.status, ExitStatus::Success);

    let result = engine.destroy(vec![stack]).await;
    assert_eq!(result.status, ExitStatus::Success);
    let report = result.report("parameterstore-stack", "ProjectName").expect("report");
    assert_eq!(report.state, NodeState::Retained);
    assert!(cloud.exists("/vectorAzul/ProjectName"));
    assert!(engine.state().expect("state").stacks.is_empty());
    assert!(engine.registry().lookup("projectAzul").expect("read").is_none());
}

#[tokio::test]
async fn destroy_is_blocked_while_export_is_imported() {
    let cloud = Arc::new(SimulatedCloud::new());
    let engine = engine_with(&cloud);
    let plan = engine.plan(vec![params_stack(), app_stack()]).expect("plan");
    assert_eq!(engine.apply(&plan).await.status, ExitStatus::Success);

    let blocked = engine.destroy(vec![params_stack()]).await;
    assert_eq!(blocked.status, ExitStatus::PartialFailure);
    let report = blocked.report("parameterstore-stack", "ProjectName").expect("report");
    assert_eq!(report.state, NodeState::Created);
    assert!(report.error.as_deref().unwrap_or_default().contains("projectAzul"));
    assert!(blocked.destroyed_stacks.is_empty());
    assert!(cloud.exists("/vectorAzul/ProjectName"));
    assert!(matches!(
        engine.registry().revoke("projectAzul"),
        Err(StackwireError::ExportInUse { .. })
    ));

    let importer = engine.destroy(vec![app_stack()]).await;
    assert_eq!(importer.status, ExitStatus::Success);
    assert!(engine.registry().importers_of("projectAzul").expect("read").is_empty());

    engine.registry().revoke("projectAzul").expect("revoke");
    let exporter = engine.destroy(vec![params_stack()]).await;
    assert_eq!(exporter.status, ExitStatus::Success);
    assert!(cloud.is_empty());
}

#[tokio::test]
async fn dropping_an_import_releases_the_claim_on_reapply() {
    let cloud = Arc::new(SimulatedCloud::new());
    let engine = engine_with(&cloud);
    let plan = engine.plan(vec![params_stack(), app_stack()]).expect("plan");
    assert_eq!(engine.apply(&plan).await.status, ExitStatus::Success);

    let mut standalone = app_stack();
    standalone.resources[2] = ResourceDeclaration::new("Bucket", ResourceKind::Bucket)
        .with_property("bucketName", "standalone-configuracion");
    let plan = engine.plan(vec![standalone]).expect("plan");
    let result = engine.apply(&plan).await;
    assert_eq!(result.status, ExitStatus::Success, "abort: {:?}", result.abort);
    assert!(engine.registry().importers_of("projectAzul").expect("read").is_empty());

    let exporter = engine.destroy(vec![params_stack()]).await;
    assert_eq!(exporter.status, ExitStatus::Success, "blocked: {:?}", exporter.blocked());
    assert_eq!(exporter.destroyed_stacks, vec!["parameterstore-stack"]);
    assert!(!cloud.exists("/vectorAzul/ProjectName"));
}

#[tokio::test]
async fn batch_destroy_tears_importers_down_first() {
    let cloud = Arc::new(SimulatedCloud::new());
    let engine = engine_with(&cloud);
    let plan = engine.plan(vec![params_stack(), app_stack()]).expect("plan");
    assert_eq!(engine.apply(&plan).await.status, ExitStatus::Success);

    let result = engine.destroy(vec![params_stack(), app_stack()]).await;
    assert_eq!(result.status, ExitStatus::Success, "abort: {:?}", result.abort);
    assert_eq!(result.destroyed_stacks, vec!["config-stack", "parameterstore-stack"]);
    let order: Vec<&str> = result.reports.iter().map(|r| r.resource.as_str()).collect();
    assert_eq!(order, vec!["Bucket", "Subnet1", "Vpc", "ProjectName"]);
    assert!(cloud.is_empty());
    assert!(engine.state().expect("state").stacks.is_empty());
}

#[tokio::test]
async fn failed_delete_aborts_destroy() {
    let cloud = Arc::new(SimulatedCloud::new());
    let engine = engine_with(&cloud);
    let mut stack = app_stack();
    let _ = stack.resources.pop();
    let plan = engine.plan(vec![stack.clone()]).expect("plan");
    assert_eq!(engine.apply(&plan).await.status, ExitStatus::Success);

    let subnet = engine
        .state()
        .expect("state")
        .record("config-stack", "Subnet1")
        .expect("subnet")
        .physical_id
        .clone();
    cloud.fail(Operation::Delete, subnet, "DependencyViolation");

    let result = engine.destroy(vec![stack]).await;
    assert_eq!(result.status, ExitStatus::PartialFailure);
    assert_eq!(result.report("config-stack", "Subnet1").expect("report").state, NodeState::Failed);
    assert!(result.report("config-stack", "Vpc").is_none());
    assert!(engine.state().expect("state").record("config-stack", "Vpc").is_some());
}

// ── Durability ───────────────────────────────────────────────────────

#[tokio::test]
async fn state_and_registry_survive_a_new_engine() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let config = StackwireConfig {
        state_dir: dir.path().to_path_buf(),
        ..StackwireConfig::default()
    };
    let cloud = Arc::new(SimulatedCloud::new());

    {
        let engine = Engine::open(&config, ProviderSet::uniform(cloud.clone())).expect("open");
        let plan = engine.plan(vec![params_stack(), app_stack()]).expect("plan");
        assert_eq!(engine.apply(&plan).await.status, ExitStatus::Success);
    }

    let engine = Engine::open(&config, ProviderSet::uniform(cloud.clone())).expect("reopen");
    assert_eq!(
        engine.registry().importers_of("projectAzul").expect("read"),
        vec!["config-stack".to_string()]
    );
    let plan = engine.plan(vec![params_stack(), app_stack()]).expect("plan");
    assert_eq!(plan.changes().count(), 0);

    let result = engine.apply(&plan).await;
    assert_eq!(result.status, ExitStatus::Success);
    assert_eq!(cloud.count(Operation::Create), 4);
    assert_eq!(cloud.count(Operation::Update), 0);
}
