//! Task identity and target placement.
//!
//! The orchestrator hands each target a [`TaskIdentity`] and a shared
//! [`TargetContext`]. From those two a target derives its local path
//! (`target_dir/<namespace>/<file_id>.<ext>`) and its remote key
//! (`<namespace>/<file_id>.<ext>`, with the storage parent folder added by
//! [`Storage`]).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use stowage_storage::Storage;

/// Who produced an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskIdentity {
    namespace: String,
    task_id: String,
}

impl TaskIdentity {
    /// `task_id` is the orchestrator's unique id for the task instance,
    /// which usually repeats the namespace as a dotted prefix.
    pub fn new(namespace: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            task_id: task_id.into(),
        }
    }

    /// Module namespace of the task.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// The task id without its `<namespace>.` module prefix.
    ///
    /// Everything up to the last occurrence of the prefix is dropped, so
    /// `pipeline.tasks.Train_abc` in namespace `pipeline.tasks` becomes
    /// `Train_abc`.
    pub fn file_id(&self) -> &str {
        if self.namespace.is_empty() {
            return &self.task_id;
        }
        let prefix = format!("{}.", self.namespace);
        match self.task_id.rfind(&prefix) {
            Some(idx) => &self.task_id[idx + prefix.len()..],
            None => &self.task_id,
        }
    }

    /// `<namespace>/<file_id>.<ext>`, shared by local paths and remote keys.
    pub fn relative_path(&self, ext: &str) -> String {
        let file_name = format!("{}.{ext}", self.file_id());
        if self.namespace.is_empty() {
            file_name
        } else {
            format!("{}/{file_name}", self.namespace)
        }
    }
}

/// Where targets persist: a local directory, plus an optional remote
/// storage that takes precedence when present.
#[derive(Debug, Clone)]
pub struct TargetContext {
    target_dir: PathBuf,
    storage: Option<Arc<Storage>>,
}

impl TargetContext {
    /// Targets persist under `target_dir` on the local filesystem.
    pub fn local(target_dir: impl Into<PathBuf>) -> Self {
        Self {
            target_dir: target_dir.into(),
            storage: None,
        }
    }

    /// Targets persist through `storage`. `target_dir` still hosts the
    /// local files some targets write before uploading.
    pub fn remote(target_dir: impl Into<PathBuf>, storage: Arc<Storage>) -> Self {
        Self {
            target_dir: target_dir.into(),
            storage: Some(storage),
        }
    }

    /// Root of local target paths.
    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    /// The remote storage, if targets persist remotely.
    pub fn storage(&self) -> Option<&Arc<Storage>> {
        self.storage.as_ref()
    }

    /// Local path of the artifact `identity` produces with extension `ext`.
    pub fn local_path(&self, identity: &TaskIdentity, ext: &str) -> PathBuf {
        self.target_dir.join(identity.relative_path(ext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_id_strips_namespace_prefix() {
        let id = TaskIdentity::new("pipeline.tasks", "pipeline.tasks.Train_2024_ab12");
        assert_eq!(id.file_id(), "Train_2024_ab12");
        assert_eq!(id.relative_path("pkl"), "pipeline.tasks/Train_2024_ab12.pkl");
    }

    #[test]
    fn test_file_id_without_prefix() {
        let id = TaskIdentity::new("etl", "Extract_1");
        assert_eq!(id.file_id(), "Extract_1");
        let empty = TaskIdentity::new("", "Extract_1");
        assert_eq!(empty.relative_path("json"), "Extract_1.json");
    }

    #[test]
    fn test_local_path() {
        let ctx = TargetContext::local("/data/targets");
        let id = TaskIdentity::new("etl", "etl.Load_x");
        assert_eq!(
            ctx.local_path(&id, "parquet"),
            PathBuf::from("/data/targets/etl/Load_x.parquet")
        );
        assert!(ctx.storage().is_none());
    }
}
