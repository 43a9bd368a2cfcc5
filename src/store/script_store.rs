use std::fs::{self, DirBuilder, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use log::warn;

const FILE_MODE: u32 = 0o755;

/// Script and log files of tasks, keyed by task id inside one directory.
#[derive(Debug, Clone)]
pub struct ScriptStore {
    dir: PathBuf,
}

/// Outcome of removing a task's files. Each deletion is attempted on its own.
#[derive(Debug)]
pub struct Removal {
    pub script: io::Result<()>,
    pub log: io::Result<()>,
}

impl Removal {
    pub fn is_clean(&self) -> bool {
        self.script.is_ok() && self.log.is_ok()
    }
}

impl ScriptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn script_path(&self, id: i64) -> PathBuf {
        self.dir.join(id.to_string())
    }

    pub fn log_path(&self, id: i64) -> PathBuf {
        self.dir.join(format!("{}.log", id))
    }

    /// Creates the directory if needed. Returns whether it had to be created.
    pub fn ensure_dir(&self) -> io::Result<bool> {
        if self.dir.is_dir() {
            return Ok(false);
        }
        DirBuilder::new()
            .recursive(true)
            .mode(FILE_MODE)
            .create(&self.dir)?;
        Ok(true)
    }

    pub fn write_script(&self, id: i64, content: &str) -> io::Result<()> {
        let mut file = open_truncated(&self.script_path(id))?;
        file.write_all(content.as_bytes())?;
        file.flush()
    }

    pub fn create_log(&self, id: i64) -> io::Result<File> {
        open_truncated(&self.log_path(id))
    }

    pub fn read_output(&self, id: i64) -> io::Result<Vec<u8>> {
        fs::read(self.log_path(id))
    }

    pub fn remove(&self, id: i64) -> Removal {
        let script = fs::remove_file(self.script_path(id));
        if let Err(e) = &script {
            warn!("Task {}: failed to remove script: {}", id, e);
        }
        let log = fs::remove_file(self.log_path(id));
        if let Err(e) = &log {
            warn!("Task {}: failed to remove output: {}", id, e);
        }
        Removal { script, log }
    }
}

fn open_truncated(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(FILE_MODE)
        .open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn script_is_overwritten_on_each_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScriptStore::new(dir.path());
        store.write_script(7, "echo first\necho again").unwrap();
        store.write_script(7, "true").unwrap();
        assert_eq!(fs::read_to_string(store.script_path(7)).unwrap(), "true");
        let mode = fs::metadata(store.script_path(7)).unwrap().permissions().mode();
        assert_eq!(mode & 0o100, 0o100);
    }

    #[test]
    fn missing_output_surfaces_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScriptStore::new(dir.path());
        let err = store.read_output(99).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn remove_attempts_log_even_without_script() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScriptStore::new(dir.path());
        store.create_log(3).unwrap();

        let removal = store.remove(3);
        assert_eq!(removal.script.unwrap_err().kind(), io::ErrorKind::NotFound);
        assert!(removal.log.is_ok());
        assert!(!store.log_path(3).exists());
    }

    #[test]
    fn ensure_dir_creates_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScriptStore::new(dir.path().join("a/b"));
        assert!(store.ensure_dir().unwrap());
        assert!(!store.ensure_dir().unwrap());
        assert!(store.dir().is_dir());
    }
}
