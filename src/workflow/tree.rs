/// Step Tree: the static, declarative shape of a curation pipeline
///
/// A tree is an ordered list of steps where each step is either a named Task or a
/// Branch holding a predicate and two nested step lists. Steps are addressed by path:
/// an index into the top-level list, and after every Branch an index into the arm
/// the Branch routes to. The tree itself never evaluates predicates; callers supply
/// the arm decision through an [`ArmSelector`].

use crate::workflow::types::WorkflowObject;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised when a path does not address a step in the tree
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("empty path does not address a step")]
    EmptyPath,

    #[error("path {path} is out of range at depth {depth} (list has {len} steps)")]
    OutOfRange {
        path: StepPath,
        depth: usize,
        len: usize,
    },

    #[error("path {path} descends through task at depth {depth}")]
    NotABranch { path: StepPath, depth: usize },
}

/// Index sequence locating a step, e.g. `[2,1,0]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepPath(Vec<usize>);

impl StepPath {
    pub fn root(index: usize) -> Self {
        Self(vec![index])
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Path of the first step of the arm below this Branch path
    pub fn child(&self, index: usize) -> Self {
        let mut indices = self.0.clone();
        indices.push(index);
        Self(indices)
    }
}

impl From<Vec<usize>> for StepPath {
    fn from(indices: Vec<usize>) -> Self {
        Self(indices)
    }
}

impl fmt::Display for StepPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|i| i.to_string()).collect();
        write!(f, "[{}]", parts.join(","))
    }
}

/// Which arm of a Branch is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arm {
    Then,
    Else,
}

impl Arm {
    pub fn from_bool(value: bool) -> Self {
        if value {
            Arm::Then
        } else {
            Arm::Else
        }
    }
}

type Predicate = dyn Fn(&WorkflowObject) -> bool + Send + Sync;

/// Named, pure predicate over an object
///
/// Predicates are re-evaluated when a run resumes inside one of the Branch arms, so
/// they must route to the same arm given unchanged inputs.
#[derive(Clone)]
pub struct Condition {
    name: String,
    predicate: Arc<Predicate>,
}

impl Condition {
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&WorkflowObject) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn evaluate(&self, object: &WorkflowObject) -> bool {
        (self.predicate)(object)
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Condition").field(&self.name).finish()
    }
}

/// Conditional step with a `then` and an `else` step list
#[derive(Debug, Clone)]
pub struct Branch {
    pub condition: Condition,
    pub then_steps: Vec<Step>,
    pub else_steps: Vec<Step>,
}

impl Branch {
    pub fn arm(&self, arm: Arm) -> &[Step] {
        match arm {
            Arm::Then => &self.then_steps,
            Arm::Else => &self.else_steps,
        }
    }
}

/// A single step in the tree
#[derive(Debug, Clone)]
pub enum Step {
    /// Named task, resolved against the task registry at load time
    Task(String),
    Branch(Branch),
}

/// Supplies the arm a Branch routes to while a path is walked
pub trait ArmSelector {
    fn select(&mut self, branch_path: &[usize], branch: &Branch) -> Arm;
}

impl<F> ArmSelector for F
where
    F: FnMut(&[usize], &Branch) -> Arm,
{
    fn select(&mut self, branch_path: &[usize], branch: &Branch) -> Arm {
        self(branch_path, branch)
    }
}

/// Immutable pipeline definition for one workflow kind
#[derive(Debug, Clone, Default)]
pub struct StepTree {
    steps: Vec<Step>,
}

impl StepTree {
    pub fn builder() -> StepsBuilder {
        StepsBuilder::default()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Path of the first top-level step, None for an empty tree
    pub fn first_path(&self) -> Option<StepPath> {
        (!self.steps.is_empty()).then(|| StepPath::root(0))
    }

    /// Fetch the step a path addresses
    pub fn resolve<S: ArmSelector>(
        &self,
        path: &StepPath,
        selector: &mut S,
    ) -> Result<&Step, TreeError> {
        let lists = self.containing_lists(path, selector)?;
        let depth = path.depth() - 1;
        Ok(&lists[depth][path.indices()[depth]])
    }

    /// Successor of a path: the next sibling, or the next sibling of the nearest
    /// enclosing Branch once a list is exhausted. None at the end of the tree.
    pub fn next_path<S: ArmSelector>(
        &self,
        path: &StepPath,
        selector: &mut S,
    ) -> Result<Option<StepPath>, TreeError> {
        let lists = self.containing_lists(path, selector)?;
        let indices = path.indices();

        for depth in (0..indices.len()).rev() {
            let next = indices[depth] + 1;
            if next < lists[depth].len() {
                let mut successor = indices[..depth].to_vec();
                successor.push(next);
                return Ok(Some(StepPath::from(successor)));
            }
        }

        Ok(None)
    }

    /// Every task name referenced anywhere in the tree
    pub fn task_names(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        collect_task_names(&self.steps, &mut names);
        names
    }

    /// The step list containing the step at each depth of the path
    fn containing_lists<'a, S: ArmSelector>(
        &'a self,
        path: &StepPath,
        selector: &mut S,
    ) -> Result<Vec<&'a [Step]>, TreeError> {
        let indices = path.indices();
        if indices.is_empty() {
            return Err(TreeError::EmptyPath);
        }

        let mut lists = Vec::with_capacity(indices.len());
        let mut current: &[Step] = &self.steps;

        for (depth, &index) in indices.iter().enumerate() {
            let step = current.get(index).ok_or_else(|| TreeError::OutOfRange {
                path: path.clone(),
                depth,
                len: current.len(),
            })?;
            lists.push(current);

            if depth + 1 < indices.len() {
                current = match step {
                    Step::Branch(branch) => {
                        let arm = selector.select(&indices[..=depth], branch);
                        branch.arm(arm)
                    }
                    Step::Task(_) => {
                        return Err(TreeError::NotABranch {
                            path: path.clone(),
                            depth,
                        })
                    }
                };
            }
        }

        Ok(lists)
    }
}

fn collect_task_names<'a>(steps: &'a [Step], names: &mut BTreeSet<&'a str>) {
    for step in steps {
        match step {
            Step::Task(name) => {
                names.insert(name.as_str());
            }
            Step::Branch(branch) => {
                collect_task_names(&branch.then_steps, names);
                collect_task_names(&branch.else_steps, names);
            }
        }
    }
}

/// Builder for a step list; the top-level list builds into a [`StepTree`]
#[derive(Debug, Default)]
pub struct StepsBuilder {
    steps: Vec<Step>,
}

impl StepsBuilder {
    pub fn task(mut self, name: impl Into<String>) -> Self {
        self.steps.push(Step::Task(name.into()));
        self
    }

    pub fn branch<T, E>(mut self, condition: Condition, then_steps: T, else_steps: E) -> Self
    where
        T: FnOnce(StepsBuilder) -> StepsBuilder,
        E: FnOnce(StepsBuilder) -> StepsBuilder,
    {
        self.steps.push(Step::Branch(Branch {
            condition,
            then_steps: then_steps(StepsBuilder::default()).steps,
            else_steps: else_steps(StepsBuilder::default()).steps,
        }));
        self
    }

    pub fn build(self) -> StepTree {
        StepTree { steps: self.steps }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn always(arm: Arm) -> impl FnMut(&[usize], &Branch) -> Arm {
        move |_, _| arm
    }

    // [a, Branch(then=[b, Branch(then=[c], else=[])], else=[d]), e]
    fn sample_tree() -> StepTree {
        StepTree::builder()
            .task("a")
            .branch(
                Condition::new("outer", |_| true),
                |then| {
                    then.task("b").branch(
                        Condition::new("inner", |_| true),
                        |then| then.task("c"),
                        |otherwise| otherwise,
                    )
                },
                |otherwise| otherwise.task("d"),
            )
            .task("e")
            .build()
    }

    fn task_name(step: &Step) -> &str {
        match step {
            Step::Task(name) => name,
            Step::Branch(branch) => branch.condition.name(),
        }
    }

    #[test]
    fn resolves_nested_paths_through_selected_arms() {
        let tree = sample_tree();
        let mut then = always(Arm::Then);
        let mut otherwise = always(Arm::Else);

        assert_eq!(task_name(tree.resolve(&vec![0].into(), &mut then).unwrap()), "a");
        assert_eq!(task_name(tree.resolve(&vec![1].into(), &mut then).unwrap()), "outer");
        assert_eq!(task_name(tree.resolve(&vec![1, 0].into(), &mut then).unwrap()), "b");
        assert_eq!(task_name(tree.resolve(&vec![1, 1, 0].into(), &mut then).unwrap()), "c");
        assert_eq!(task_name(tree.resolve(&vec![1, 0].into(), &mut otherwise).unwrap()), "d");
    }

    #[test]
    fn rejects_invalid_paths_instead_of_truncating() {
        let tree = sample_tree();
        let mut then = always(Arm::Then);

        assert_eq!(
            tree.resolve(&StepPath::default(), &mut then).unwrap_err(),
            TreeError::EmptyPath
        );
        assert!(matches!(
            tree.resolve(&vec![3].into(), &mut then),
            Err(TreeError::OutOfRange { depth: 0, len: 3, .. })
        ));
        assert!(matches!(
            tree.resolve(&vec![1, 2].into(), &mut then),
            Err(TreeError::OutOfRange { depth: 1, len: 2, .. })
        ));
        assert!(matches!(
            tree.resolve(&vec![0, 0].into(), &mut then),
            Err(TreeError::NotABranch { depth: 0, .. })
        ));
        assert!(matches!(
            tree.next_path(&vec![1, 5].into(), &mut then),
            Err(TreeError::OutOfRange { .. })
        ));
    }

    #[test]
    fn next_path_walks_siblings_then_pops_to_parent() {
        let tree = sample_tree();
        let mut then = always(Arm::Then);

        let next = |path: Vec<usize>, sel: &mut dyn FnMut(&[usize], &Branch) -> Arm| {
            tree.next_path(&path.into(), &mut |p: &[usize], b: &Branch| sel(p, b))
                .unwrap()
        };

        assert_eq!(next(vec![0], &mut then), Some(vec![1].into()));
        assert_eq!(next(vec![1, 0], &mut then), Some(vec![1, 1].into()));
        assert_eq!(next(vec![1, 1, 0], &mut then), Some(vec![2].into()));
        assert_eq!(next(vec![1, 0], &mut always(Arm::Else)), Some(vec![2].into()));
        assert_eq!(next(vec![2], &mut then), None);
    }

    #[test]
    fn selector_sees_branch_paths() {
        let tree = sample_tree();
        let mut seen = Vec::new();
        let mut selector = |path: &[usize], _: &Branch| {
            seen.push(path.to_vec());
            Arm::Then
        };

        tree.resolve(&vec![1, 1, 0].into(), &mut selector).unwrap();
        assert_eq!(seen, vec![vec![1], vec![1, 1]]);
    }

    #[test]
    fn collects_task_names_from_all_arms() {
        let tree = sample_tree();
        let names: Vec<&str> = tree.task_names().into_iter().collect();
        assert_eq!(names, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(StepTree::builder().build().first_path(), None);
        assert_eq!(sample_tree().first_path(), Some(StepPath::root(0)));
    }
}
