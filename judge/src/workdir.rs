//! Work-Dir Scope: scoped acquisition of a per-task working directory under `BASE_DIR`.

use std::path::{Path, PathBuf};

use crate::{Error, ErrorKind, Result};

/// RAII handle to a task's working directory. Created by `with_workdir`; removes the directory
/// tree on drop unless `retain_on_exit` was requested, so cleanup happens on every exit path,
/// including an early return or a panic unwinding through the Grader.
pub struct WorkDirScope {
    path: PathBuf,
    retain_on_exit: bool,
}

impl WorkDirScope {
    /// Create `base_dir/task_id`, mode `0o711`, and return a scope guarding it.
    pub fn enter(base_dir: &Path, task_id: &str, retain_on_exit: bool) -> Result<WorkDirScope> {
        let path = base_dir.join(task_id);

        std::fs::create_dir_all(&path)
            .map_err(|_| Error::from(ErrorKind::WorkDirInitFailed))?;
        set_mode(&path, 0o711)
            .map_err(|_| Error::from(ErrorKind::WorkDirInitFailed))?;

        Ok(WorkDirScope { path, retain_on_exit })
    }

    /// The absolute path of the working directory.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

impl Drop for WorkDirScope {
    fn drop(&mut self) {
        if !self.retain_on_exit {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                error!("Failed to clean runtime dir {}: {}", self.path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_creates_directory_and_cleans_up() {
        let base = tempfile::tempdir().unwrap();
        let workdir_path;
        {
            let scope = WorkDirScope::enter(base.path(), "task-1", false).unwrap();
            workdir_path = scope.path().to_path_buf();
            assert!(workdir_path.exists());
        }
        assert!(!workdir_path.exists());
    }

    #[test]
    fn test_retain_on_exit_keeps_directory() {
        let base = tempfile::tempdir().unwrap();
        let workdir_path;
        {
            let scope = WorkDirScope::enter(base.path(), "task-2", true).unwrap();
            workdir_path = scope.path().to_path_buf();
        }
        assert!(workdir_path.exists());
    }
}
