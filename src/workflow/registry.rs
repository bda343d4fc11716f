/// Workflow registry using ArcSwap
///
/// Holds one compiled definition per workflow kind. Registering a kind validates its
/// Step Tree against the task and action tables up front, so a missing task or an
/// undeclared halt is a startup error instead of a failure halfway through a run.
/// Reads are lock-free; registering swaps the whole map atomically.

use crate::{
    runtime::{
        actions::{Action, ActionRegistry},
        task::{Task, TaskRegistry},
    },
    workflow::tree::StepTree,
};
use arc_swap::ArcSwap;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("workflow '{kind}' has an empty step tree")]
    EmptyTree { kind: String },

    #[error("workflow '{kind}' references unknown task '{task}'")]
    UnknownTask { kind: String, task: String },

    #[error("workflow '{kind}' declares action '{action}' which is not registered")]
    UnknownAction { kind: String, action: String },

    #[error("task '{task}' in workflow '{kind}' may halt with undeclared action '{action}'")]
    UndeclaredHalt {
        kind: String,
        task: String,
        action: String,
    },
}

/// JSONPath selectors a payload must satisfy before a run starts
#[derive(Debug, Clone, Default)]
pub struct ValidationRules {
    required: Vec<String>,
}

impl ValidationRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require the selector to match at least one non-null, non-empty value
    pub fn require(mut self, selector: impl Into<String>) -> Self {
        self.required.push(selector.into());
        self
    }

    /// Check the payload, returning every violated rule
    pub fn check(&self, data: &Value) -> Result<(), Vec<String>> {
        let mut violations = Vec::new();

        for selector in &self.required {
            match jsonpath_lib::select(data, selector) {
                Ok(found) if found.iter().any(|value| is_present(value)) => {}
                Ok(_) => violations.push(format!("missing required field {}", selector)),
                Err(e) => violations.push(format!("invalid selector {}: {:?}", selector, e)),
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

/// Static description of one workflow kind
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub kind: String,
    pub tree: StepTree,
    pub validation: ValidationRules,
    /// Actions tasks of this workflow may halt with
    pub actions: Vec<String>,
}

/// Definition with its task and action names resolved to implementations
#[derive(Clone)]
pub struct CompiledWorkflow {
    pub definition: WorkflowDefinition,
    pub tasks: HashMap<String, Arc<dyn Task>>,
    pub actions: HashMap<String, Arc<dyn Action>>,
}

impl CompiledWorkflow {
    pub fn kind(&self) -> &str {
        &self.definition.kind
    }

    pub fn tree(&self) -> &StepTree {
        &self.definition.tree
    }

    pub fn task(&self, name: &str) -> Option<&Arc<dyn Task>> {
        self.tasks.get(name)
    }

    pub fn action(&self, name: &str) -> Option<&Arc<dyn Action>> {
        self.actions.get(name)
    }
}

/// Lock-free workflow registry keyed by workflow kind
pub struct WorkflowRegistry {
    workflows: ArcSwap<HashMap<String, Arc<CompiledWorkflow>>>,
    tasks: TaskRegistry,
    actions: ActionRegistry,
}

impl WorkflowRegistry {
    pub fn new(tasks: TaskRegistry, actions: ActionRegistry) -> Self {
        Self {
            workflows: ArcSwap::new(Arc::new(HashMap::new())),
            tasks,
            actions,
        }
    }

    /// Validate and compile a definition, then publish it
    ///
    /// Re-registering a kind replaces the previous definition for new lookups;
    /// runs already holding the old one finish on it.
    pub fn register(&self, definition: WorkflowDefinition) -> Result<(), RegistryError> {
        let compiled = self.compile(definition)?;
        let kind = compiled.kind().to_string();

        let current = self.workflows.load();
        let mut next = (**current).clone();
        next.insert(kind.clone(), Arc::new(compiled));
        self.workflows.store(Arc::new(next));

        tracing::info!("📋 Registered workflow '{}'", kind);
        Ok(())
    }

    pub fn get(&self, kind: &str) -> Option<Arc<CompiledWorkflow>> {
        self.workflows.load().get(kind).cloned()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.workflows.load().contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.workflows.load().keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Action registered for a workflow kind
    pub fn action(&self, kind: &str, name: &str) -> Option<Arc<dyn Action>> {
        self.get(kind).and_then(|compiled| compiled.action(name).cloned())
    }

    fn compile(&self, definition: WorkflowDefinition) -> Result<CompiledWorkflow, RegistryError> {
        let kind = definition.kind.clone();
        if definition.tree.is_empty() {
            return Err(RegistryError::EmptyTree { kind });
        }

        let mut actions = HashMap::new();
        for name in &definition.actions {
            let action = self
                .actions
                .get(name)
                .ok_or_else(|| RegistryError::UnknownAction {
                    kind: kind.clone(),
                    action: name.clone(),
                })?;
            actions.insert(name.clone(), action);
        }

        let mut tasks = HashMap::new();
        for name in definition.tree.task_names() {
            let task = self.tasks.get(name).ok_or_else(|| RegistryError::UnknownTask {
                kind: kind.clone(),
                task: name.to_string(),
            })?;

            for halt in task.halts_with() {
                if !actions.contains_key(*halt) {
                    return Err(RegistryError::UndeclaredHalt {
                        kind: kind.clone(),
                        task: name.to_string(),
                        action: halt.to_string(),
                    });
                }
            }
            tasks.insert(name.to_string(), task);
        }

        tracing::debug!(
            "🔧 Compiled workflow '{}': {} tasks, {} actions",
            kind,
            tasks.len(),
            actions.len()
        );

        Ok(CompiledWorkflow {
            definition,
            tasks,
            actions,
        })
    }
}
