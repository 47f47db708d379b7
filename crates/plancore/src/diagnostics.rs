use crate::{Task, TaskId};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Breakdown of why a set of tasks never became ready
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnosis {
    /// `(task, dependency)` pairs where the dependency id is absent
    pub missing: Vec<(TaskId, TaskId)>,
    /// Groups of stuck tasks that depend on each other in a loop
    pub cycles: Vec<Vec<TaskId>>,
    /// Stuck tasks that are neither in a cycle nor point at a missing id;
    /// they only wait on other stuck tasks
    pub blocked: Vec<TaskId>,
}

impl Diagnosis {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.cycles.is_empty() && self.blocked.is_empty()
    }
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (task, dep) in &self.missing {
            writeln!(f, "task '{}' depends on unknown task '{}'", task, dep)?;
        }
        for cycle in &self.cycles {
            writeln!(f, "dependency cycle: {}", cycle.join(" -> "))?;
        }
        if !self.blocked.is_empty() {
            writeln!(f, "blocked behind the above: {}", self.blocked.join(", "))?;
        }
        Ok(())
    }
}

/// Classify stuck tasks into missing references, cycles and blocked tasks
///
/// `stuck` is normally the id list carried by
/// [`PlanError::UnresolvableDependencyGraph`](crate::PlanError).
pub fn diagnose<P>(tasks: &[Task<P>], stuck: &[TaskId]) -> Diagnosis {
    let known: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    let stuck_set: HashSet<&str> = stuck.iter().map(String::as_str).collect();

    let mut diagnosis = Diagnosis::default();
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut index: HashMap<&str, NodeIndex> = HashMap::new();

    for task in tasks.iter().filter(|t| stuck_set.contains(t.id.as_str())) {
        index
            .entry(task.id.as_str())
            .or_insert_with(|| graph.add_node(task.id.as_str()));
    }

    let mut explained: HashSet<&str> = HashSet::new();
    for task in tasks.iter().filter(|t| stuck_set.contains(t.id.as_str())) {
        for dep in &task.dependencies {
            if !known.contains(dep.as_str()) {
                let pair = (task.id.clone(), dep.clone());
                if !diagnosis.missing.contains(&pair) {
                    diagnosis.missing.push(pair);
                }
                explained.insert(task.id.as_str());
            } else if let (Some(&from), Some(&to)) =
                (index.get(dep.as_str()), index.get(task.id.as_str()))
            {
                graph.update_edge(from, to, ());
            }
        }
    }

    for component in tarjan_scc(&graph) {
        let is_cycle = component.len() > 1
            || component
                .first()
                .is_some_and(|&n| graph.find_edge(n, n).is_some());
        if !is_cycle {
            continue;
        }
        let members: HashSet<&str> = component.iter().map(|&n| graph[n]).collect();
        // report members in input order
        let cycle: Vec<TaskId> = stuck
            .iter()
            .filter(|id| members.contains(id.as_str()))
            .cloned()
            .collect();
        explained.extend(members);
        diagnosis.cycles.push(cycle);
    }
    diagnosis.cycles.sort();

    diagnosis.blocked = stuck
        .iter()
        .filter(|id| !explained.contains(id.as_str()))
        .cloned()
        .collect();

    diagnosis
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan;

    #[test]
    fn test_cycle_members_reported() {
        let tasks = vec![
            Task::bare("X").depends_on("Y"),
            Task::bare("Y").depends_on("X"),
        ];

        let err = plan(&tasks).unwrap_err();
        let diagnosis = err.diagnosis(&tasks);
        assert_eq!(diagnosis.cycles, vec![vec!["X".to_string(), "Y".to_string()]]);
        assert!(diagnosis.missing.is_empty());
        assert!(diagnosis.blocked.is_empty());
    }

    #[test]
    fn test_missing_reference_reported() {
        let tasks = vec![Task::bare("P").depends_on("Q")];

        let err = plan(&tasks).unwrap_err();
        let diagnosis = err.diagnosis(&tasks);
        assert_eq!(diagnosis.missing, vec![("P".to_string(), "Q".to_string())]);
        assert!(diagnosis.cycles.is_empty());
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let tasks = vec![Task::bare("loop").depends_on("loop")];

        let diagnosis = plan(&tasks).unwrap_err().diagnosis(&tasks);
        assert_eq!(diagnosis.cycles, vec![vec!["loop".to_string()]]);
    }

    #[test]
    fn test_downstream_tasks_are_blocked() {
        let tasks = vec![
            Task::bare("a").depends_on("b"),
            Task::bare("b").depends_on("a"),
            Task::bare("c").depends_on("a"),
            Task::bare("d").depends_on("ghost"),
            Task::bare("e").depends_on("d"),
        ];

        let diagnosis = plan(&tasks).unwrap_err().diagnosis(&tasks);
        assert_eq!(diagnosis.cycles, vec![vec!["a".to_string(), "b".to_string()]]);
        assert_eq!(diagnosis.missing, vec![("d".to_string(), "ghost".to_string())]);
        assert_eq!(diagnosis.blocked, vec!["c".to_string(), "e".to_string()]);

        let rendered = diagnosis.to_string();
        assert!(rendered.contains("unknown task 'ghost'"));
        assert!(rendered.contains("a -> b"));
    }
}
