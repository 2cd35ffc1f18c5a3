//! InMemoryTaskStore - ディスクを使わない TaskStore（テスト、組み込み用）

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{OrchestratorError, TaskId, TaskRecord};
use crate::ports::TaskStore;
use crate::ports::task_store::sort_newest_first;

#[derive(Default)]
pub struct InMemoryTaskStore {
    records: Mutex<HashMap<TaskId, TaskRecord>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, record: &TaskRecord) -> Result<(), OrchestratorError> {
        let mut records = self.records.lock().await;
        if records.contains_key(&record.id) {
            return Err(OrchestratorError::Conflict(record.id.to_string()));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &TaskId) -> Result<Option<TaskRecord>, OrchestratorError> {
        Ok(self.records.lock().await.get(id).cloned())
    }

    async fn update(&self, record: &TaskRecord) -> Result<(), OrchestratorError> {
        let mut records = self.records.lock().await;
        match records.get_mut(&record.id) {
            Some(slot) => {
                *slot = record.clone();
                Ok(())
            }
            None => Err(OrchestratorError::not_found("task", record.id.to_string())),
        }
    }

    async fn remove(&self, id: &TaskId) -> Result<(), OrchestratorError> {
        self.records.lock().await.remove(id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<TaskRecord>, OrchestratorError> {
        let mut records: Vec<TaskRecord> = self.records.lock().await.values().cloned().collect();
        sort_newest_first(&mut records);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskPaths;
    use chrono::{Duration, TimeZone, Utc};

    #[tokio::test]
    async fn behaves_like_a_store() {
        let store = InMemoryTaskStore::new();
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let a = TaskRecord::new(TaskId::parse("a-1").unwrap(), "a", None, TaskPaths::default(), t0);
        let b = TaskRecord::new(
            TaskId::parse("b-1").unwrap(),
            "b",
            None,
            TaskPaths::default(),
            t0 + Duration::seconds(1),
        );

        store.create(&a).await.unwrap();
        store.create(&b).await.unwrap();
        assert!(store.create(&a).await.is_err());
        assert_eq!(store.len().await, 2);

        let listed = store.list().await.unwrap();
        assert_eq!(listed[0].id, b.id);

        store.remove(&a.id).await.unwrap();
        assert!(store.get(&a.id).await.unwrap().is_none());
        assert!(store.update(&a).await.is_err());
    }
}
