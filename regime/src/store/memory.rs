use std::collections::HashMap;
use std::sync::RwLock;

use super::{decode, encode, StepStore, StoreError, StoreResult};
use crate::task::Step;

/// Process-local step store.
///
/// Steps are kept serialized, so reads go through the same decoding path
/// as the file store.
#[derive(Debug, Default)]
pub struct InMemoryStepStore {
    logs: RwLock<HashMap<String, Vec<String>>>,
}

impl InMemoryStepStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Memory ids with at least one stored step
    pub fn memory_ids(&self) -> StoreResult<Vec<String>> {
        let logs = self.logs.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut ids: Vec<String> = logs.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

impl StepStore for InMemoryStepStore {
    fn append(&self, memory_id: &str, step: &Step) -> StoreResult<()> {
        let json = encode(step)?;
        self.logs
            .write()
            .map_err(|_| StoreError::LockPoisoned)?
            .entry(memory_id.to_string())
            .or_default()
            .push(json);
        Ok(())
    }

    fn load_all(&self, memory_id: &str) -> StoreResult<Vec<Step>> {
        let logs = self.logs.read().map_err(|_| StoreError::LockPoisoned)?;
        logs.get(memory_id)
            .map(|entries| {
                entries
                    .iter()
                    .enumerate()
                    .map(|(i, json)| decode(i + 1, json))
                    .collect()
            })
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn clear(&self, memory_id: &str) -> StoreResult<()> {
        self.logs
            .write()
            .map_err(|_| StoreError::LockPoisoned)?
            .remove(memory_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{StepKind, Task};

    #[test]
    fn test_logs_are_isolated_by_memory_id() {
        let store = InMemoryStepStore::new();
        let mut task = Task::new("q");
        task.record(StepKind::UserMessage { content: "q".into() });

        store.append("a", &task.steps()[0]).unwrap();
        assert_eq!(store.load_all("a").unwrap(), task.steps());
        assert!(store.load_all("b").unwrap().is_empty());
        assert_eq!(store.memory_ids().unwrap(), vec!["a"]);

        store.clear("a").unwrap();
        assert!(store.load_all("a").unwrap().is_empty());
    }
}
