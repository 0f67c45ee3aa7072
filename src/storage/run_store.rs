// src/storage/run_store.rs
//! Keyed run tables
//!
//! The store is the single source of truth for run status and output.
//! Each table is a sharded map, so a read-modify-write on one key holds
//! that key's shard lock for the duration of the closure while other
//! runs proceed concurrently.

use crate::model::{Run, RunInfo, RunSearch, RunStatus, Thread, ThreadSearch};
use crate::utils::errors::{EngineError, Result};
use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

/// Persistence collaborator used by the engine
///
/// Update methods take a closure that runs while the key is locked and
/// return the record as it was after the update, or `None` when the key
/// does not exist.
pub trait RunStore: Send + Sync {
    fn create_run(&self, run: Run) -> Result<Run>;
    fn get_run(&self, run_id: &str) -> Option<Run>;
    fn update_run(&self, run_id: &str, update: &mut dyn FnMut(&mut Run)) -> Option<Run>;
    fn delete_run(&self, run_id: &str) -> bool;
    fn search_runs(&self, search: &RunSearch) -> Vec<Run>;
    fn list_runs(&self) -> Vec<Run>;

    fn get_run_status(&self, run_id: &str) -> Option<RunStatus> {
        self.get_run(run_id).map(|run| run.status)
    }

    fn update_run_status(&self, run_id: &str, status: RunStatus) -> Option<Run> {
        self.update_run(run_id, &mut |run| run.status = status)
    }

    fn create_run_info(&self, info: RunInfo) -> RunInfo;
    fn get_run_info(&self, run_id: &str) -> Option<RunInfo>;
    fn update_run_info(&self, run_id: &str, update: &mut dyn FnMut(&mut RunInfo)) -> Option<RunInfo>;

    fn list_run_infos(&self) -> Vec<RunInfo>;

    fn add_run_output(&self, run_id: &str, output: Value);
    fn get_run_output(&self, run_id: &str) -> Option<Value>;
    fn list_outputs(&self) -> Vec<(String, Value)>;

    fn create_thread(&self, thread: Thread) -> Result<Thread>;
    fn get_thread(&self, thread_id: &str) -> Option<Thread>;
    fn update_thread(&self, thread_id: &str, update: &mut dyn FnMut(&mut Thread)) -> Option<Thread>;
    fn delete_thread(&self, thread_id: &str) -> bool;
    fn search_threads(&self, search: &ThreadSearch) -> Vec<Thread>;

    fn list_threads(&self) -> Vec<Thread> {
        self.search_threads(&ThreadSearch::default())
    }
}

/// In-memory run store
#[derive(Default)]
pub struct MemoryRunStore {
    runs: DashMap<String, Run>,
    infos: DashMap<String, RunInfo>,
    outputs: DashMap<String, Value>,
    threads: DashMap<String, Thread>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated from snapshot tables
    pub fn from_parts(
        runs: Vec<Run>,
        infos: Vec<RunInfo>,
        outputs: Vec<(String, Value)>,
        threads: Vec<Thread>,
    ) -> Self {
        let store = Self::new();
        for run in runs {
            store.runs.insert(run.run_id.clone(), run);
        }
        for info in infos {
            store.infos.insert(info.run_id.clone(), info);
        }
        for (run_id, output) in outputs {
            store.outputs.insert(run_id, output);
        }
        for thread in threads {
            store.threads.insert(thread.thread_id.clone(), thread);
        }
        debug!(
            "Store restored: {} runs, {} infos, {} outputs, {} threads",
            store.runs.len(),
            store.infos.len(),
            store.outputs.len(),
            store.threads.len()
        );
        store
    }
}

fn paginate<T>(items: Vec<T>, offset: usize, limit: Option<usize>) -> Vec<T> {
    let iter = items.into_iter().skip(offset);
    match limit {
        Some(limit) => iter.take(limit).collect(),
        None => iter.collect(),
    }
}

impl RunStore for MemoryRunStore {
    fn create_run(&self, run: Run) -> Result<Run> {
        use dashmap::mapref::entry::Entry;

        match self.runs.entry(run.run_id.clone()) {
            Entry::Occupied(_) => Err(EngineError::Storage(format!(
                "Run with ID {} already exists",
                run.run_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(run.clone());
                Ok(run)
            }
        }
    }

    fn get_run(&self, run_id: &str) -> Option<Run> {
        self.runs.get(run_id).map(|r| r.value().clone())
    }

    fn update_run(&self, run_id: &str, update: &mut dyn FnMut(&mut Run)) -> Option<Run> {
        let mut entry = self.runs.get_mut(run_id)?;
        update(entry.value_mut());
        entry.updated_at = crate::model::now();
        Some(entry.value().clone())
    }

    fn delete_run(&self, run_id: &str) -> bool {
        if self.runs.remove(run_id).is_none() {
            return false;
        }
        self.infos.remove(run_id);
        self.outputs.remove(run_id);
        true
    }

    fn search_runs(&self, search: &RunSearch) -> Vec<Run> {
        let mut matched: Vec<Run> = self
            .runs
            .iter()
            .filter(|e| search.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.run_id.cmp(&b.run_id)));
        paginate(matched, search.offset, search.limit)
    }

    fn list_runs(&self) -> Vec<Run> {
        self.search_runs(&RunSearch::default())
    }

    fn create_run_info(&self, info: RunInfo) -> RunInfo {
        self.infos.insert(info.run_id.clone(), info.clone());
        info
    }

    fn get_run_info(&self, run_id: &str) -> Option<RunInfo> {
        self.infos.get(run_id).map(|i| i.value().clone())
    }

    fn update_run_info(&self, run_id: &str, update: &mut dyn FnMut(&mut RunInfo)) -> Option<RunInfo> {
        let mut entry = self.infos.get_mut(run_id)?;
        update(entry.value_mut());
        Some(entry.value().clone())
    }

    fn list_run_infos(&self) -> Vec<RunInfo> {
        self.infos.iter().map(|e| e.value().clone()).collect()
    }

    fn add_run_output(&self, run_id: &str, output: Value) {
        self.outputs.insert(run_id.to_string(), output);
    }

    fn get_run_output(&self, run_id: &str) -> Option<Value> {
        self.outputs.get(run_id).map(|o| o.value().clone())
    }

    fn list_outputs(&self) -> Vec<(String, Value)> {
        self.outputs
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    fn create_thread(&self, thread: Thread) -> Result<Thread> {
        use dashmap::mapref::entry::Entry;

        match self.threads.entry(thread.thread_id.clone()) {
            Entry::Occupied(_) => Err(EngineError::DuplicatedThread(thread.thread_id)),
            Entry::Vacant(slot) => {
                slot.insert(thread.clone());
                Ok(thread)
            }
        }
    }

    fn get_thread(&self, thread_id: &str) -> Option<Thread> {
        self.threads.get(thread_id).map(|t| t.value().clone())
    }

    fn update_thread(&self, thread_id: &str, update: &mut dyn FnMut(&mut Thread)) -> Option<Thread> {
        let mut entry = self.threads.get_mut(thread_id)?;
        update(entry.value_mut());
        entry.updated_at = crate::model::now();
        Some(entry.value().clone())
    }

    fn delete_thread(&self, thread_id: &str) -> bool {
        self.threads.remove(thread_id).is_some()
    }

    fn search_threads(&self, search: &ThreadSearch) -> Vec<Thread> {
        let mut matched: Vec<Thread> = self
            .threads
            .iter()
            .filter(|e| search.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.thread_id.cmp(&b.thread_id)));
        paginate(matched, search.offset, search.limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RunCreate;
    use serde_json::json;
    use std::sync::Arc;

    fn make_run(agent_id: &str) -> Run {
        Run::from_create(RunCreate::new(agent_id), crate::model::new_id())
    }

    #[test]
    fn test_create_get_delete() {
        let store = MemoryRunStore::new();
        let run = store.create_run(make_run("a")).unwrap();
        store.create_run_info(RunInfo::new(&run.run_id));
        store.add_run_output(&run.run_id, json!({"x": 1}));

        assert_eq!(store.get_run(&run.run_id).unwrap().run_id, run.run_id);
        assert!(store.create_run(run.clone()).is_err());

        assert!(store.delete_run(&run.run_id));
        assert!(store.get_run(&run.run_id).is_none());
        assert!(store.get_run_info(&run.run_id).is_none());
        assert!(store.get_run_output(&run.run_id).is_none());
        assert!(!store.delete_run(&run.run_id));
    }

    #[test]
    fn test_update_status() {
        let store = MemoryRunStore::new();
        let run = store.create_run(make_run("a")).unwrap();

        let updated = store.update_run_status(&run.run_id, RunStatus::Success).unwrap();
        assert_eq!(updated.status, RunStatus::Success);
        assert!(updated.updated_at >= run.updated_at);
        assert_eq!(store.get_run_status(&run.run_id), Some(RunStatus::Success));
        assert!(store.update_run_status("missing", RunStatus::Success).is_none());
    }

    #[test]
    fn test_search_filters_and_pagination() {
        let store = MemoryRunStore::new();
        for _ in 0..5 {
            store.create_run(make_run("a")).unwrap();
        }
        for _ in 0..3 {
            store.create_run(make_run("b")).unwrap();
        }

        let by_agent = RunSearch {
            agent_id: Some("a".into()),
            ..Default::default()
        };
        assert_eq!(store.search_runs(&by_agent).len(), 5);

        let page = RunSearch {
            agent_id: Some("a".into()),
            offset: 1,
            limit: Some(2),
            ..Default::default()
        };
        let results = store.search_runs(&page);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].run_id, store.search_runs(&by_agent)[1].run_id);

        let past_end = RunSearch {
            offset: 10,
            ..Default::default()
        };
        assert!(store.search_runs(&past_end).is_empty());
    }

    #[test]
    fn test_concurrent_read_modify_write() {
        let store = Arc::new(MemoryRunStore::new());
        let run = store.create_run(make_run("a")).unwrap();
        store.create_run_info(RunInfo::new(&run.run_id));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let run_id = run.run_id.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        store.update_run_info(&run_id, &mut |info| info.attempts += 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.get_run_info(&run.run_id).unwrap().attempts, 800);
    }

    #[test]
    fn test_threads() {
        let store = MemoryRunStore::new();
        let thread = store.create_thread(Thread::new("t1".into(), None)).unwrap();
        assert!(matches!(
            store.create_thread(thread.clone()),
            Err(EngineError::DuplicatedThread(_))
        ));
        assert_eq!(store.search_threads(&ThreadSearch::default()).len(), 1);
        assert!(store.delete_thread("t1"));
        assert!(store.get_thread("t1").is_none());
    }
}
