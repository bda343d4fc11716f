//! Resuming after a halt must run exactly the steps an uninterrupted run would
//! have run after the halting task, for any arrangement of nested branches.

mod common;

use async_trait::async_trait;
use common::{input, ran, Approve};
use holdingpen::{
    config::Config,
    database,
    runtime::{
        actions::{ActionRegistry, ResolveRequest},
        scheduler::Dispatch,
        task::{Task, TaskContext, TaskError, TaskOutcome, TaskRegistry},
        RunReport,
    },
    service::{Collaborators, Holdingpen},
    workflow::{
        registry::{ValidationRules, WorkflowDefinition, WorkflowRegistry},
        tree::{Condition, StepTree, StepsBuilder},
        types::{NewObject, ObjectStatus, WorkflowObject},
    },
};
use proptest::prelude::*;
use proptest::sample::Index;
use serde_json::{json, Value};

const MAX_TASKS: usize = 64;

/// Halts for "approve" when `data.halt_at` names it, until approved
struct Mark {
    name: String,
}

#[async_trait]
impl Task for Mark {
    fn name(&self) -> &str {
        &self.name
    }

    fn halts_with(&self) -> &[&'static str] {
        &["approve"]
    }

    async fn run(&self, object: &mut WorkflowObject, _ctx: &TaskContext) -> Result<TaskOutcome, TaskError> {
        let targeted = object.data.get("halt_at").and_then(Value::as_str) == Some(self.name.as_str());
        if targeted && object.extra_data.approved.is_none() {
            return Ok(TaskOutcome::halt("approve", format!("halted at {}", self.name)));
        }
        Ok(TaskOutcome::Continue)
    }
}

#[derive(Debug, Clone)]
enum Shape {
    Task,
    Branch(Vec<Shape>, Vec<Shape>),
}

fn shapes() -> impl Strategy<Value = Vec<Shape>> {
    let step = Just(Shape::Task).prop_recursive(3, 24, 3, |inner| {
        prop_oneof![
            2 => Just(Shape::Task),
            1 => (
                prop::collection::vec(inner.clone(), 0..3),
                prop::collection::vec(inner, 0..3),
            )
                .prop_map(|(then, otherwise)| Shape::Branch(then, otherwise)),
        ]
    });
    prop::collection::vec(step, 1..5)
}

#[derive(Default)]
struct Counters {
    tasks: usize,
    flags: usize,
}

fn build(mut builder: StepsBuilder, shapes: &[Shape], counters: &mut Counters) -> StepsBuilder {
    for shape in shapes {
        builder = match shape {
            Shape::Task => {
                let name = format!("t{}", counters.tasks);
                counters.tasks += 1;
                builder.task(name)
            }
            Shape::Branch(then, otherwise) => {
                let flag = counters.flags;
                counters.flags += 1;
                let then_steps = build(StepsBuilder::default(), then, counters);
                let else_steps = build(StepsBuilder::default(), otherwise, counters);
                let condition = Condition::new(format!("flag{}", flag), move |object: &WorkflowObject| {
                    object.data["flags"][flag].as_bool() == Some(true)
                });
                builder.branch(condition, move |_| then_steps, move |_| else_steps)
            }
        };
    }
    builder
}

async fn holdingpen_for(tree: StepTree) -> Holdingpen {
    let mut tasks = TaskRegistry::new();
    for i in 0..MAX_TASKS {
        tasks.register(Mark { name: format!("t{}", i) });
    }
    let mut actions = ActionRegistry::new();
    actions.register(Approve);

    let registry = WorkflowRegistry::new(tasks, actions);
    registry
        .register(WorkflowDefinition {
            kind: "nested".to_string(),
            tree,
            validation: ValidationRules::new(),
            actions: vec!["approve".to_string()],
        })
        .unwrap();

    let pool = database::in_memory().await.unwrap();
    Holdingpen::new(pool, registry, Collaborators::offline(), Config::for_tests())
}

async fn submit(holdingpen: &Holdingpen, data: Value) -> RunReport {
    let outcome = holdingpen
        .submit(
            NewObject {
                workflow_kind: "nested".to_string(),
                data,
                parent_id: None,
            },
            Dispatch::Inline,
        )
        .await
        .unwrap();
    ran(outcome.continuation)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn halted_then_resumed_run_matches_uninterrupted_run(
        shapes in shapes(),
        flags in prop::collection::vec(any::<bool>(), 32),
        halt in any::<Index>(),
    ) {
        let mut counters = Counters::default();
        let tree = build(StepTree::builder(), &shapes, &mut counters).build();
        prop_assume!(counters.tasks > 0 && counters.tasks <= MAX_TASKS && counters.flags <= 32);

        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let holdingpen = holdingpen_for(tree).await;

            let straight = submit(&holdingpen, json!({ "flags": flags })).await;
            prop_assert_eq!(straight.status, ObjectStatus::Completed);
            let trace = straight.steps_executed;
            if trace.is_empty() {
                return Ok(());
            }

            let halt_at = trace[halt.index(trace.len())].clone();
            let first = submit(&holdingpen, json!({ "flags": flags, "halt_at": halt_at })).await;
            prop_assert_eq!(first.status, ObjectStatus::Halted);
            prop_assert_eq!(first.steps_executed.last(), Some(&halt_at));

            let outcome = holdingpen
                .actions
                .resolve(
                    first.object_id,
                    ResolveRequest {
                        action: "approve".to_string(),
                        input: input("curator", "yes"),
                    },
                )
                .await
                .unwrap();
            let resumed = ran(outcome.continuation);
            prop_assert_eq!(resumed.status, ObjectStatus::Completed);

            let mut stitched = first.steps_executed;
            stitched.extend(resumed.steps_executed);
            prop_assert_eq!(stitched, trace);
            Ok(())
        })?;
    }
}
