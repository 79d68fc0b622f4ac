//! Run-record persistence.
//!
//! Every run lands in a timestamped directory under the configured data
//! folder:
//!
//! ```text
//!   <data_folder>/<YYYY-MM-DD>/#<idx>_<node>/
//!       parameters.json     — the parameters the node ran with
//!       data.json           — the assembled dataset
//!       analysis.json       — per-target fit records
//!       state_updates.json  — (path, old, new) list applied to the state
//!       state.json          — snapshot of the updated machine
//! ```
//!
//! Run indices increase monotonically per day; `load_run` restores a
//! dataset for offline re-analysis.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;
use tracing::debug;

use crate::error::{NodeError, NodeResult};

/// Store rooted at a data folder.
#[derive(Debug, Clone)]
pub struct RunStore {
    root: PathBuf,
}

/// One created run directory.
#[derive(Debug, Clone)]
pub struct RunDir {
    pub id: u32,
    pub path: PathBuf,
}

impl RunDir {
    /// Write one JSON artifact into the run directory.
    pub fn save_json(&self, name: &str, value: &impl Serialize) -> NodeResult<()> {
        let path = self.path.join(name);
        fs::write(&path, serde_json::to_string_pretty(value)?)?;
        debug!(path = %path.display(), "saved run artifact");
        Ok(())
    }
}

/// Summary row for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub id: u32,
    pub node: String,
    pub date: String,
    pub path: PathBuf,
}

impl RunStore {
    /// Open a store at the given root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the next run directory for a node.
    pub fn create_run_dir(&self, node: &str) -> NodeResult<RunDir> {
        let date = Local::now().format("%Y-%m-%d").to_string();
        let day_dir = self.root.join(&date);
        fs::create_dir_all(&day_dir)?;

        let id = next_index(&day_dir)?;
        let path = day_dir.join(format!("#{id}_{node}"));
        fs::create_dir(&path)?;
        Ok(RunDir { id, path })
    }

    /// All persisted runs, newest date first.
    pub fn list_runs(&self) -> NodeResult<Vec<RunSummary>> {
        let mut out = Vec::new();
        if !self.root.exists() {
            return Ok(out);
        }
        let mut dates: Vec<PathBuf> = fs::read_dir(&self.root)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dates.sort();
        dates.reverse();

        for day_dir in dates {
            let date = day_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mut runs: Vec<RunSummary> = fs::read_dir(&day_dir)?
                .filter_map(|e| e.ok())
                .filter_map(|e| {
                    let name = e.file_name().to_string_lossy().into_owned();
                    let (id, node) = parse_run_name(&name)?;
                    Some(RunSummary {
                        id,
                        node,
                        date: date.clone(),
                        path: e.path(),
                    })
                })
                .collect();
            runs.sort_by_key(|r| r.id);
            out.extend(runs);
        }
        Ok(out)
    }

    /// Find a run by id, searching newest dates first.
    pub fn find_run(&self, id: u32) -> NodeResult<RunSummary> {
        self.list_runs()?
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| NodeError::Store(format!("no run with id {id}")))
    }

    /// Load the dataset JSON of a persisted run.
    pub fn load_run(&self, id: u32) -> NodeResult<(RunSummary, serde_json::Value)> {
        let summary = self.find_run(id)?;
        let raw = fs::read_to_string(summary.path.join("data.json"))?;
        Ok((summary, serde_json::from_str(&raw)?))
    }
}

fn next_index(day_dir: &Path) -> NodeResult<u32> {
    let mut max = 0;
    for entry in fs::read_dir(day_dir)? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if let Some((id, _)) = parse_run_name(&name) {
            max = max.max(id);
        }
    }
    Ok(max + 1)
}

fn parse_run_name(name: &str) -> Option<(u32, String)> {
    let rest = name.strip_prefix('#')?;
    let (id, node) = rest.split_once('_')?;
    Some((id.parse().ok()?, node.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (RunStore, PathBuf) {
        let root = std::env::temp_dir().join(format!(
            "alsvid-store-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .subsec_nanos()
        ));
        (RunStore::new(&root), root)
    }

    #[test]
    fn test_run_ids_increase() {
        let (store, root) = temp_store();
        let a = store.create_run_dir("ramsey").unwrap();
        let b = store.create_run_dir("t2_echo").unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn test_save_and_load_run() {
        let (store, root) = temp_store();
        let run = store.create_run_dir("ramsey").unwrap();
        run.save_json("data.json", &serde_json::json!({"dims": ["qubit"]}))
            .unwrap();

        let (summary, data) = store.load_run(run.id).unwrap();
        assert_eq!(summary.node, "ramsey");
        assert_eq!(data["dims"][0], "qubit");
        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn test_list_runs() {
        let (store, root) = temp_store();
        store.create_run_dir("a").unwrap();
        store.create_run_dir("b").unwrap();
        let runs = store.list_runs().unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].node, "a");
        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn test_parse_run_name() {
        assert_eq!(
            parse_run_name("#12_single_qubit_rb"),
            Some((12, "single_qubit_rb".to_string()))
        );
        assert_eq!(parse_run_name("notes.txt"), None);
    }

    #[test]
    fn test_missing_run() {
        let (store, root) = temp_store();
        assert!(matches!(store.find_run(99), Err(NodeError::Store(_))));
        fs::remove_dir_all(root).ok();
    }
}
