/// Curation workflows for literature and author submissions
///
/// Registers the curation tasks and actions, and defines the Step Trees of the two
/// workflow kinds served by the holdingpen:
///
/// article: normalize, classify, then either reject automatically or check for
/// in-flight duplicates and halt for a curator; accepted articles are matched,
/// stored, uploaded to the legacy system and followed until the collector has
/// indexed them.
///
/// author: normalize, halt for a curator, then upload accepted profiles.

pub mod actions;
pub mod tasks;

use crate::{
    runtime::{actions::ActionRegistry, task::TaskRegistry},
    workflow::{
        registry::{RegistryError, ValidationRules, WorkflowDefinition, WorkflowRegistry},
        tree::{Condition, StepTree},
        types::WorkflowObject,
    },
};
use actions::{AuthorApproval, HepApproval, MergeApproval};
use tasks::{
    auto_rejectable, CheckBlockingDuplicates, CheckExistingMatch, ClassifyRelevance,
    HaltForApproval, MarkDecision, NormalizeRecord, RejectAutomatically, SendToLegacy,
    StoreRecord, WaitForCollector,
};

pub const ARTICLE: &str = "article";
pub const AUTHOR: &str = "author";

/// Add every curation task and action to the registration tables
pub fn register_all(tasks: &mut TaskRegistry, actions: &mut ActionRegistry) {
    tasks
        .register(NormalizeRecord)
        .register(ClassifyRelevance)
        .register(RejectAutomatically)
        .register(CheckBlockingDuplicates)
        .register(HaltForApproval::article())
        .register(HaltForApproval::author())
        .register(CheckExistingMatch)
        .register(StoreRecord)
        .register(SendToLegacy)
        .register(WaitForCollector)
        .register(MarkDecision::accepted())
        .register(MarkDecision::rejected());

    actions
        .register(HepApproval)
        .register(AuthorApproval)
        .register(MergeApproval);
}

fn approved(object: &WorkflowObject) -> bool {
    object.extra_data.approved == Some(true)
}

pub fn article_workflow() -> WorkflowDefinition {
    let tree = StepTree::builder()
        .task("normalize_record")
        .task("classify_relevance")
        .branch(
            Condition::new("auto_rejectable", auto_rejectable),
            |then| then.task("reject_automatically"),
            |otherwise| {
                otherwise
                    .task("check_blocking_duplicates")
                    .task("halt_for_approval")
            },
        )
        .branch(
            Condition::new("approved", approved),
            |then| {
                then.task("check_existing_match")
                    .task("store_record")
                    .task("send_to_legacy")
                    .task("wait_for_collector")
                    .task("mark_accepted")
            },
            |otherwise| otherwise.task("mark_rejected"),
        )
        .build();

    WorkflowDefinition {
        kind: ARTICLE.to_string(),
        tree,
        validation: ValidationRules::new()
            .require("$.titles[*].title")
            .require("$.document_type"),
        actions: vec!["hep_approval".to_string(), "merge_approval".to_string()],
    }
}

pub fn author_workflow() -> WorkflowDefinition {
    let tree = StepTree::builder()
        .task("normalize_record")
        .task("halt_for_author_approval")
        .branch(
            Condition::new("approved", approved),
            |then| then.task("send_to_legacy").task("mark_accepted"),
            |otherwise| otherwise.task("mark_rejected"),
        )
        .build();

    WorkflowDefinition {
        kind: AUTHOR.to_string(),
        tree,
        validation: ValidationRules::new().require("$.name.value"),
        actions: vec!["author_approval".to_string()],
    }
}

/// Registry serving both curation workflows
pub fn registry() -> Result<WorkflowRegistry, RegistryError> {
    let mut tasks = TaskRegistry::new();
    let mut actions = ActionRegistry::new();
    register_all(&mut tasks, &mut actions);

    let registry = WorkflowRegistry::new(tasks, actions);
    registry.register(article_workflow())?;
    registry.register(author_workflow())?;
    Ok(registry)
}
