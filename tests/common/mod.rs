//! Shared fixtures for the integration tests: small recording tasks, a test
//! action, and an in-memory holdingpen wired around them.

#![allow(dead_code)]

use async_trait::async_trait;
use holdingpen::{
    config::Config,
    database,
    runtime::{
        actions::{Action, ActionRegistry, HumanInput},
        scheduler::{Dispatch, DispatchOutcome},
        task::{Task, TaskContext, TaskError, TaskOutcome, TaskRegistry},
        RunReport,
    },
    service::{Collaborators, Holdingpen},
    workflow::{
        registry::{ValidationRules, WorkflowDefinition, WorkflowRegistry},
        tree::{Condition, StepTree},
        types::{ExtraData, NewObject, WorkflowObject},
    },
};
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePool;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

/// Observes task invocations across runs
#[derive(Clone, Default)]
pub struct Journal {
    calls: Arc<Mutex<Vec<String>>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl Journal {
    pub fn record(&self, name: &str) {
        self.calls.lock().unwrap().push(name.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls().iter().filter(|call| *call == name).count()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

/// Records its name and continues
struct Record {
    name: &'static str,
    journal: Journal,
}

#[async_trait]
impl Task for Record {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, _object: &mut WorkflowObject, _ctx: &TaskContext) -> Result<TaskOutcome, TaskError> {
        self.journal.record(self.name);
        Ok(TaskOutcome::Continue)
    }
}

/// Halts for "approve" until a decision is recorded
struct Gate {
    journal: Journal,
}

#[async_trait]
impl Task for Gate {
    fn name(&self) -> &str {
        "gate"
    }

    fn halts_with(&self) -> &[&'static str] {
        &["approve"]
    }

    async fn run(&self, object: &mut WorkflowObject, _ctx: &TaskContext) -> Result<TaskOutcome, TaskError> {
        self.journal.record("gate");
        if object.extra_data.approved.is_some() {
            return Ok(TaskOutcome::Continue);
        }
        Ok(TaskOutcome::halt("approve", "needs approval"))
    }
}

struct Fail {
    journal: Journal,
}

#[async_trait]
impl Task for Fail {
    fn name(&self) -> &str {
        "fail"
    }

    async fn run(&self, _object: &mut WorkflowObject, _ctx: &TaskContext) -> Result<TaskOutcome, TaskError> {
        self.journal.record("fail");
        Err(TaskError::failed("boom"))
    }
}

/// Fails as blocked by the ids listed in `data.blocked_by`
struct Blocked;

#[async_trait]
impl Task for Blocked {
    fn name(&self) -> &str {
        "blocked"
    }

    async fn run(&self, object: &mut WorkflowObject, _ctx: &TaskContext) -> Result<TaskOutcome, TaskError> {
        let ids = object
            .data
            .get("blocked_by")
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_i64).collect())
            .unwrap_or_default();

        Err(TaskError::Blocked {
            reason: "waiting on duplicates".to_string(),
            ids,
        })
    }
}

/// Outlives its own timeout
struct Sleepy;

#[async_trait]
impl Task for Sleepy {
    fn name(&self) -> &str {
        "sleepy"
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_millis(50))
    }

    async fn run(&self, _object: &mut WorkflowObject, _ctx: &TaskContext) -> Result<TaskOutcome, TaskError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(TaskOutcome::Continue)
    }
}

/// Tracks how many runs are inside it at once
struct Slow {
    name: &'static str,
    delay: Duration,
    journal: Journal,
}

#[async_trait]
impl Task for Slow {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, _object: &mut WorkflowObject, _ctx: &TaskContext) -> Result<TaskOutcome, TaskError> {
        let now = self.journal.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.journal.max_active.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.journal.active.fetch_sub(1, Ordering::SeqCst);
        self.journal.record(self.name);
        Ok(TaskOutcome::Continue)
    }
}

/// "yes" approves, "no" rejects; continues inline
pub struct Approve;

impl Action for Approve {
    fn name(&self) -> &str {
        "approve"
    }

    fn dispatch(&self) -> Dispatch {
        Dispatch::Inline
    }

    fn render(&self, object: &WorkflowObject) -> Value {
        json!({ "id": object.id, "decisions": ["yes", "no"] })
    }

    fn apply(&self, extra: &mut ExtraData, input: &HumanInput) -> Result<(), String> {
        match input.decision_value.as_str() {
            "yes" => extra.approved = Some(true),
            "no" => extra.approved = Some(false),
            other => return Err(format!("unknown decision '{}'", other)),
        }
        extra.reason = input.reason.clone();
        Ok(())
    }
}

fn routes_then(object: &WorkflowObject) -> bool {
    object.data.get("route").and_then(Value::as_str) == Some("then")
}

fn definition(kind: &str, tree: StepTree) -> WorkflowDefinition {
    WorkflowDefinition {
        kind: kind.to_string(),
        tree,
        validation: ValidationRules::new(),
        actions: Vec::new(),
    }
}

/// linear:    [a, b, c]
/// gated:     [a, Branch(route == "then")[gate] / [], d]
/// failing:   [a, fail, c]
/// blocked:   [blocked]
/// sleepy:    [sleepy, c]
/// forked:    [a, Branch(route == "then")[b] / [gate], d]
/// slow:      [slow]
/// linger:    [linger], outlives a one second lease
/// validated: [a], requires `$.title`
pub fn test_registry(journal: &Journal) -> WorkflowRegistry {
    let mut tasks = TaskRegistry::new();
    for name in ["a", "b", "c", "d"] {
        tasks.register(Record {
            name,
            journal: journal.clone(),
        });
    }
    tasks
        .register(Gate { journal: journal.clone() })
        .register(Fail { journal: journal.clone() })
        .register(Blocked)
        .register(Sleepy)
        .register(Slow {
            name: "slow",
            delay: Duration::from_millis(50),
            journal: journal.clone(),
        })
        .register(Slow {
            name: "linger",
            delay: Duration::from_millis(2500),
            journal: journal.clone(),
        });

    let mut actions = ActionRegistry::new();
    actions.register(Approve);

    let registry = WorkflowRegistry::new(tasks, actions);
    let definitions = [
        definition("linear", StepTree::builder().task("a").task("b").task("c").build()),
        WorkflowDefinition {
            actions: vec!["approve".to_string()],
            ..definition(
                "gated",
                StepTree::builder()
                    .task("a")
                    .branch(
                        Condition::new("routes_then", routes_then),
                        |then| then.task("gate"),
                        |otherwise| otherwise,
                    )
                    .task("d")
                    .build(),
            )
        },
        WorkflowDefinition {
            actions: vec!["approve".to_string()],
            ..definition(
                "forked",
                StepTree::builder()
                    .task("a")
                    .branch(
                        Condition::new("routes_then", routes_then),
                        |then| then.task("b"),
                        |otherwise| otherwise.task("gate"),
                    )
                    .task("d")
                    .build(),
            )
        },
        definition("failing", StepTree::builder().task("a").task("fail").task("c").build()),
        definition("blocked", StepTree::builder().task("blocked").build()),
        definition("sleepy", StepTree::builder().task("sleepy").task("c").build()),
        definition("slow", StepTree::builder().task("slow").build()),
        definition("linger", StepTree::builder().task("linger").build()),
        WorkflowDefinition {
            validation: ValidationRules::new().require("$.title"),
            ..definition("validated", StepTree::builder().task("a").build())
        },
    ];
    for definition in definitions {
        registry.register(definition).unwrap();
    }
    registry
}

pub struct Harness {
    pub holdingpen: Holdingpen,
    pub pool: SqlitePool,
    pub journal: Journal,
}

pub async fn harness() -> Harness {
    harness_with(Config::for_tests()).await
}

pub async fn harness_with(config: Config) -> Harness {
    let pool = database::in_memory().await.unwrap();
    let journal = Journal::default();
    let holdingpen = Holdingpen::new(
        pool.clone(),
        test_registry(&journal),
        Collaborators::offline(),
        config,
    );
    Harness {
        holdingpen,
        pool,
        journal,
    }
}

/// Holdingpen serving the curation workflows
pub async fn curation_harness(collaborators: Collaborators) -> Harness {
    let pool = database::in_memory().await.unwrap();
    let holdingpen = Holdingpen::new(
        pool.clone(),
        holdingpen::curation::registry().unwrap(),
        collaborators,
        Config::for_tests(),
    );
    Harness {
        holdingpen,
        pool,
        journal: Journal::default(),
    }
}

impl Harness {
    /// Create an object without starting it
    pub async fn create(&self, kind: &str, data: Value) -> WorkflowObject {
        self.holdingpen
            .storage
            .create(NewObject {
                workflow_kind: kind.to_string(),
                data,
                parent_id: None,
            })
            .await
            .unwrap()
    }

    /// Create an object and run it inline
    pub async fn run(&self, kind: &str, data: Value) -> RunReport {
        let outcome = self
            .holdingpen
            .submit(
                NewObject {
                    workflow_kind: kind.to_string(),
                    data,
                    parent_id: None,
                },
                Dispatch::Inline,
            )
            .await
            .unwrap();
        ran(outcome.continuation)
    }

    pub async fn object(&self, id: i64) -> WorkflowObject {
        self.holdingpen.storage.get(id).await.unwrap().unwrap()
    }

    pub async fn idle(&self) {
        assert!(
            self.holdingpen.scheduler.wait_idle(Duration::from_secs(5)).await,
            "scheduler did not go idle"
        );
    }
}

pub fn ran(outcome: DispatchOutcome) -> RunReport {
    match outcome {
        DispatchOutcome::Ran(report) => report,
        other => panic!("expected an inline run, got {:?}", other),
    }
}

pub fn input(user_id: &str, decision: &str) -> HumanInput {
    HumanInput {
        user_id: user_id.to_string(),
        decision_value: decision.to_string(),
        reason: None,
        extra_flags: Default::default(),
    }
}
