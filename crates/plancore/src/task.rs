use serde::{Deserialize, Serialize};

pub type TaskId = String;

/// A named unit of work with declared dependencies on other tasks
///
/// The payload is carried through planning untouched; only `id` and
/// `dependencies` are ever read by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task<P> {
    pub id: TaskId,
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    pub payload: P,
}

impl<P> Task<P> {
    pub fn new(id: impl Into<TaskId>, payload: P) -> Self {
        Self {
            id: id.into(),
            dependencies: Vec::new(),
            payload,
        }
    }

    pub fn depends_on(mut self, id: impl Into<TaskId>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    pub fn with_dependencies<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        self.dependencies.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn has_dependencies(&self) -> bool {
        !self.dependencies.is_empty()
    }

    /// Replace the payload, keeping id and dependencies
    pub fn map_payload<Q>(self, f: impl FnOnce(P) -> Q) -> Task<Q> {
        Task {
            id: self.id,
            dependencies: self.dependencies,
            payload: f(self.payload),
        }
    }
}

impl Task<()> {
    /// Task without a payload, mostly useful in tests and dry runs
    pub fn bare(id: impl Into<TaskId>) -> Self {
        Self::new(id, ())
    }
}
