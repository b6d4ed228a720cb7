use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::RwLock,
};
use tempfile::NamedTempFile;

pub const DEFAULT_VERTICAL: &str = "systemOn";

/// Ordered, distinct project names persisted as a JSON list.
pub struct VerticalsStore {
    path: PathBuf,
    data: RwLock<Vec<String>>,
}

impl VerticalsStore {
    pub fn load(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read verticals from {}", path.display()))?;
            let parsed: Vec<String> = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse verticals in {}", path.display()))?;
            dedup(parsed)
        } else {
            vec![DEFAULT_VERTICAL.to_string()]
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn list(&self) -> Vec<String> {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        let name = name.trim();
        match self.data.read() {
            Ok(guard) => guard.iter().any(|v| v == name),
            Err(poisoned) => poisoned.into_inner().iter().any(|v| v == name),
        }
    }

    /// Returns `Ok(false)` when the name is already registered.
    pub fn add(&self, name: &str) -> Result<bool> {
        let name = name.trim();
        if name.is_empty() {
            return Err(anyhow!("vertical name must not be empty"));
        }

        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.iter().any(|v| v == name) {
            return Ok(false);
        }

        let mut next = guard.clone();
        next.push(name.to_string());
        self.persist(&next)?;
        *guard = next;
        info!("Added vertical '{name}'");
        Ok(true)
    }

    fn persist(&self, data: &[String]) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        tmp.write_all(serialized.as_bytes())
            .with_context(|| format!("Failed to write verticals for {}", self.path.display()))?;
        tmp.flush()?;
        tmp.persist(&self.path)
            .map_err(|err| anyhow!("Failed to persist {}: {}", self.path.display(), err.error))?;
        Ok(())
    }
}

fn dedup(names: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let name = name.trim().to_string();
        if name.is_empty() || out.contains(&name) {
            warn!("Dropping empty or duplicate vertical '{name}'");
            continue;
        }
        out.push(name);
    }
    out
}
