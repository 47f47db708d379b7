use crate::{PlanError, Result, Task, TaskId};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Ordered sequence of levels produced by the planner
///
/// Every dependency of a task in level `i` lives in some level `j < i`.
/// Tasks inside one level do not depend on each other and may run in any
/// order or concurrently.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ExecutionPlan<P> {
    levels: Vec<Vec<Task<P>>>,
}

impl<P> ExecutionPlan<P> {
    pub fn levels(&self) -> &[Vec<Task<P>>] {
        &self.levels
    }

    pub fn level(&self, index: usize) -> Option<&[Task<P>]> {
        self.levels.get(index).map(Vec::as_slice)
    }

    /// Number of levels
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn task_count(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    /// Index of the level holding the task with the given id
    pub fn level_of(&self, id: &str) -> Option<usize> {
        self.levels
            .iter()
            .position(|level| level.iter().any(|task| task.id == id))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Vec<Task<P>>> {
        self.levels.iter()
    }

    /// All tasks in plan order: level by level, input order within a level
    pub fn tasks(&self) -> impl Iterator<Item = &Task<P>> {
        self.levels.iter().flatten()
    }

    pub fn task_ids(&self) -> Vec<Vec<&str>> {
        self.levels
            .iter()
            .map(|level| level.iter().map(|task| task.id.as_str()).collect())
            .collect()
    }

    pub fn into_levels(self) -> Vec<Vec<Task<P>>> {
        self.levels
    }
}

impl<P> IntoIterator for ExecutionPlan<P> {
    type Item = Vec<Task<P>>;
    type IntoIter = std::vec::IntoIter<Vec<Task<P>>>;

    fn into_iter(self) -> Self::IntoIter {
        self.levels.into_iter()
    }
}

impl<'a, P> IntoIterator for &'a ExecutionPlan<P> {
    type Item = &'a Vec<Task<P>>;
    type IntoIter = std::slice::Iter<'a, Vec<Task<P>>>;

    fn into_iter(self) -> Self::IntoIter {
        self.levels.iter()
    }
}

/// Partition tasks into dependency-ordered levels
///
/// The input is left untouched; payloads are cloned into the plan. Use
/// [`plan_owned`] to move them instead.
pub fn plan<P: Clone>(tasks: &[Task<P>]) -> Result<ExecutionPlan<P>> {
    let layers = layer_indices(tasks)?;
    let levels = layers
        .into_iter()
        .map(|layer| layer.into_iter().map(|i| tasks[i].clone()).collect())
        .collect();
    Ok(ExecutionPlan { levels })
}

/// Same as [`plan`], consuming the tasks
pub fn plan_owned<P>(tasks: Vec<Task<P>>) -> Result<ExecutionPlan<P>> {
    let layers = layer_indices(&tasks)?;
    let mut slots: Vec<Option<Task<P>>> = tasks.into_iter().map(Some).collect();
    let levels = layers
        .into_iter()
        .map(|layer| layer.into_iter().filter_map(|i| slots[i].take()).collect())
        .collect();
    Ok(ExecutionPlan { levels })
}

/// Layered Kahn sort over input indices.
///
/// A dependency counts as satisfied once any task carrying that id has been
/// placed, so each task waits on the number of distinct ids it names. Ids
/// that are never placed (dangling or cyclic) keep their dependents pending.
fn layer_indices<P>(tasks: &[Task<P>]) -> Result<Vec<Vec<usize>>> {
    let mut pending = vec![0usize; tasks.len()];
    let mut dependents: HashMap<&str, Vec<usize>> = HashMap::new();

    for (i, task) in tasks.iter().enumerate() {
        let mut seen = HashSet::new();
        for dep in &task.dependencies {
            if seen.insert(dep.as_str()) {
                pending[i] += 1;
                dependents.entry(dep.as_str()).or_default().push(i);
            }
        }
    }

    let mut frontier: Vec<usize> = (0..tasks.len()).filter(|&i| pending[i] == 0).collect();
    let mut resolved: HashSet<&str> = HashSet::new();
    let mut layers = Vec::new();
    let mut placed = 0;

    while !frontier.is_empty() {
        let mut next = Vec::new();
        for &i in &frontier {
            let id = tasks[i].id.as_str();
            if !resolved.insert(id) {
                continue;
            }
            for &j in dependents.get(id).into_iter().flatten() {
                pending[j] -= 1;
                if pending[j] == 0 {
                    next.push(j);
                }
            }
        }
        // keep input order within a level
        next.sort_unstable();
        placed += frontier.len();
        layers.push(std::mem::replace(&mut frontier, next));
    }

    if placed < tasks.len() {
        let stuck: Vec<TaskId> = tasks
            .iter()
            .zip(&pending)
            .filter(|&(_, &count)| count > 0)
            .map(|(task, _)| task.id.clone())
            .collect();
        tracing::debug!(stuck = ?stuck, "dependency graph has no ready task left");
        return Err(PlanError::UnresolvableDependencyGraph { stuck });
    }

    tracing::debug!(tasks = tasks.len(), levels = layers.len(), "planned execution levels");
    Ok(layers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids<P>(plan: &ExecutionPlan<P>) -> Vec<Vec<&str>> {
        plan.task_ids()
    }

    #[test]
    fn test_diamond_graph() {
        let tasks = vec![
            Task::bare("A"),
            Task::bare("B").depends_on("A"),
            Task::bare("C").depends_on("A"),
            Task::bare("D").with_dependencies(["B", "C"]),
        ];

        let plan = plan(&tasks).unwrap();
        assert_eq!(ids(&plan), vec![vec!["A"], vec!["B", "C"], vec!["D"]]);
    }

    #[test]
    fn test_cyclic_pair_is_unresolvable() {
        let tasks = vec![
            Task::bare("X").depends_on("Y"),
            Task::bare("Y").depends_on("X"),
        ];

        let err = plan(&tasks).unwrap_err();
        assert_eq!(
            err,
            PlanError::UnresolvableDependencyGraph {
                stuck: vec!["X".to_string(), "Y".to_string()],
            }
        );
    }

    #[test]
    fn test_dangling_reference_is_unresolvable() {
        let tasks = vec![Task::bare("P").depends_on("Q")];

        let err = plan(&tasks).unwrap_err();
        assert_eq!(err.stuck(), ["P".to_string()]);
    }

    #[test]
    fn test_independent_tasks_share_one_level() {
        let tasks = vec![Task::bare("M"), Task::bare("N")];

        let plan = plan(&tasks).unwrap();
        assert_eq!(ids(&plan), vec![vec!["M", "N"]]);
    }

    #[test]
    fn test_empty_input_yields_empty_plan() {
        let tasks: Vec<Task<()>> = Vec::new();
        let plan = plan(&tasks).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.task_count(), 0);
    }

    #[test]
    fn test_input_order_preserved_within_level() {
        let tasks = vec![
            Task::bare("root"),
            Task::bare("z").depends_on("root"),
            Task::bare("a").depends_on("root"),
            Task::bare("m").depends_on("root"),
        ];

        let plan = plan(&tasks).unwrap();
        let second: Vec<&str> = plan.level(1).unwrap().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(second, ["z", "a", "m"]);
    }

    #[test]
    fn test_dependency_declared_after_dependent() {
        let tasks = vec![
            Task::bare("report").depends_on("fetch"),
            Task::bare("fetch"),
        ];

        let plan = plan(&tasks).unwrap();
        assert_eq!(ids(&plan), vec![vec!["fetch"], vec!["report"]]);
    }

    #[test]
    fn test_repeated_dependency_id_is_harmless() {
        let tasks = vec![
            Task::bare("a"),
            Task::bare("b").with_dependencies(["a", "a"]),
        ];

        let plan = plan(&tasks).unwrap();
        assert_eq!(ids(&plan), vec![vec!["a"], vec!["b"]]);
    }

    #[test]
    fn test_self_dependency_is_unresolvable() {
        let tasks = vec![Task::bare("a"), Task::bare("b").depends_on("b")];

        let err = plan(&tasks).unwrap_err();
        assert_eq!(err.stuck(), ["b".to_string()]);
    }

    #[test]
    fn test_downstream_of_cycle_is_reported_stuck() {
        let tasks = vec![
            Task::bare("ok"),
            Task::bare("a").with_dependencies(["ok", "b"]),
            Task::bare("b").depends_on("a"),
            Task::bare("c").depends_on("b"),
        ];

        let err = plan(&tasks).unwrap_err();
        assert_eq!(err.stuck(), ["a".to_string(), "b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_plan_owned_matches_plan() {
        let tasks = vec![
            Task::new("A", 1),
            Task::new("B", 2).depends_on("A"),
            Task::new("C", 3).depends_on("B"),
        ];

        let borrowed = plan(&tasks).unwrap();
        let owned = plan_owned(tasks).unwrap();
        assert_eq!(borrowed, owned);
        assert_eq!(owned.tasks().map(|t| t.payload).collect::<Vec<_>>(), [1, 2, 3]);
    }

    #[test]
    fn test_level_of() {
        let tasks = vec![Task::bare("a"), Task::bare("b").depends_on("a")];
        let plan = plan(&tasks).unwrap();

        assert_eq!(plan.level_of("a"), Some(0));
        assert_eq!(plan.level_of("b"), Some(1));
        assert_eq!(plan.level_of("missing"), None);
    }

    #[test]
    fn test_serializes_as_nested_levels() {
        let tasks = vec![Task::new("a", "x"), Task::new("b", "y").depends_on("a")];
        let plan = plan(&tasks).unwrap();

        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json[0][0]["id"], "a");
        assert_eq!(json[1][0]["dependencies"][0], "a");
        assert_eq!(json[1][0]["payload"], "y");
    }
}
