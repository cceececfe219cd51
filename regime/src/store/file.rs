//! JSON-lines step store: one file per memory id, one step per line.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use super::{decode, encode, StepStore, StoreError, StoreResult};
use crate::task::Step;

/// File-backed step store rooted at a directory
#[derive(Debug)]
pub struct JsonlStepStore {
    root: PathBuf,
    // Serializes appends so concurrent writers never interleave lines
    write_lock: Mutex<()>,
}

impl JsonlStepStore {
    /// Open a store, creating the directory if needed
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn log_path(&self, memory_id: &str) -> StoreResult<PathBuf> {
        let valid = !memory_id.is_empty()
            && memory_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            && memory_id != "."
            && memory_id != "..";
        if !valid {
            return Err(StoreError::InvalidMemoryId(memory_id.to_string()));
        }
        Ok(self.root.join(format!("{memory_id}.jsonl")))
    }
}

impl StepStore for JsonlStepStore {
    fn append(&self, memory_id: &str, step: &Step) -> StoreResult<()> {
        let path = self.log_path(memory_id)?;
        let line = encode(step)?;

        let _guard = self.write_lock.lock().map_err(|_| StoreError::LockPoisoned)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{line}")?;
        debug!(memory_id, step_type = step.step_type(), "Step persisted");
        Ok(())
    }

    fn load_all(&self, memory_id: &str) -> StoreResult<Vec<Step>> {
        let path = self.log_path(memory_id)?;
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(fs::File::open(&path)?);
        let mut steps = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            steps.push(decode(index + 1, &line)?);
        }
        Ok(steps)
    }

    fn clear(&self, memory_id: &str) -> StoreResult<()> {
        let path = self.log_path(memory_id)?;
        let _guard = self.write_lock.lock().map_err(|_| StoreError::LockPoisoned)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
