//! In-memory repo used by tests.

use crate::{BatchFile, Repo};
use ahash::AHashMap as HashMap;
use anyhow::{bail, Result};
use parking_lot::Mutex;
use std::sync::Arc;

/// A repo that records every operation in memory. Cloning shares the store,
/// so a test can keep a handle for assertions while the publisher owns
/// another.
#[derive(Clone, Debug, Default)]
pub struct MemoryRepo {
    state: Arc<Mutex<State>>,
}

#[derive(Debug, Default)]
struct State {
    codebases: HashMap<String, Codebase>,
    files: HashMap<(String, String), Vec<u8>>,
    fail_batches: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Codebase {
    pub parent: String,
    pub parent_version: u64,
    /// The version of the last batch written into this codebase.
    pub version: Option<u64>,
}

// === impl MemoryRepo ===

impl MemoryRepo {
    /// Makes every subsequent `batch` fail until cleared.
    pub fn fail_batches(&self, fail: bool) {
        self.state.lock().fail_batches = fail;
    }

    pub fn codebase(&self, path: &str) -> Option<Codebase> {
        self.state.lock().codebases.get(path).cloned()
    }

    pub fn file(&self, path: &str, file: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .files
            .get(&(path.to_string(), file.to_string()))
            .cloned()
    }
}

#[async_trait::async_trait]
impl Repo for MemoryRepo {
    async fn derive(&self, path: &str, parent: &str, parent_version: u64) -> Result<()> {
        let mut state = self.state.lock();
        state.codebases.insert(
            path.to_string(),
            Codebase {
                parent: parent.to_string(),
                parent_version,
                version: None,
            },
        );
        Ok(())
    }

    async fn batch(&self, version: u64, files: Vec<BatchFile>) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_batches {
            bail!("batch write refused");
        }
        for file in files {
            let Some(codebase) = state.codebases.get_mut(&file.path) else {
                bail!("no codebase at {}", file.path);
            };
            codebase.version = Some(version);
            state.files.insert((file.path, file.file), file.bytes);
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.codebases.remove(path);
        state.files.retain(|(p, _), _| p != path);
        Ok(())
    }
}
