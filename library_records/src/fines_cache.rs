use std::path::{Path, PathBuf};

use library_ledger::api::{Amount, Fine, FineId, FinePatch, MemberId, NewFine};

#[derive(thiserror::Error, Debug)]
pub enum FinesCacheError {
    #[error("Fine {0} not found in local cache")]
    NotFound(FineId),

    #[error("Failed to access fines cache file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to (de)serialize fines cache: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Manually entered fines kept in a local JSON file between sessions
/// Every mutation rewrites the whole file
pub struct LocalFinesCache {
    path: PathBuf,
    fines: parking_lot::RwLock<Vec<Fine>>,
}

impl LocalFinesCache {
    /// Loads the cache, a missing file is an empty cache
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FinesCacheError> {
        let path = path.as_ref().to_path_buf();
        let fines = match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => vec![],
            Ok(content) => serde_json::from_str(&content)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No fines cache at {}, starting empty", path.display());
                vec![]
            }
            Err(source) => return Err(FinesCacheError::Io { path, source }),
        };
        Ok(Self {
            path,
            fines: parking_lot::RwLock::new(fines),
        })
    }

    pub fn list(&self) -> Vec<Fine> {
        self.fines.read().clone()
    }

    pub fn list_for_member(&self, member_id: MemberId) -> Vec<Fine> {
        self.fines
            .read()
            .iter()
            .filter(|fine| fine.member_id == member_id)
            .cloned()
            .collect()
    }

    pub fn add(&self, new_fine: NewFine) -> Result<Fine, FinesCacheError> {
        let fine = self.modify(|fines| {
            let id = fines.iter().map(|fine| fine.id).max().unwrap_or(0) + 1;
            let fine = new_fine.with_id(id);
            fines.push(fine.clone());
            Ok(fine)
        })?;
        tracing::info!(
            "Cached manual fine {} of {} for member {}",
            fine.id,
            fine.amount,
            fine.member_id
        );
        Ok(fine)
    }

    pub fn update(&self, id: FineId, patch: FinePatch) -> Result<Fine, FinesCacheError> {
        self.modify(|fines| {
            let fine = fines
                .iter_mut()
                .find(|fine| fine.id == id)
                .ok_or(FinesCacheError::NotFound(id))?;
            if let Some(reason) = patch.reason {
                fine.reason = reason;
            }
            if let Some(amount) = patch.amount {
                fine.amount = amount;
            }
            if let Some(collected) = patch.collected {
                fine.collected = collected;
            }
            Ok(fine.clone())
        })
    }

    pub fn remove(&self, id: FineId) -> Result<Fine, FinesCacheError> {
        self.modify(|fines| {
            let position = fines
                .iter()
                .position(|fine| fine.id == id)
                .ok_or(FinesCacheError::NotFound(id))?;
            Ok(fines.remove(position))
        })
    }

    /// Marks outstanding fines of the member as collected, returns the collected amount
    pub fn collect_for_member(&self, member_id: MemberId) -> Result<Amount, FinesCacheError> {
        self.modify(|fines| {
            let mut collected = 0;
            for fine in fines
                .iter_mut()
                .filter(|fine| fine.member_id == member_id && !fine.collected)
            {
                fine.collected = true;
                collected += fine.amount;
            }
            Ok(collected)
        })
    }

    /// Applies `change` to a copy of the fines and keeps it only once the file is written
    fn modify<T>(
        &self,
        change: impl FnOnce(&mut Vec<Fine>) -> Result<T, FinesCacheError>,
    ) -> Result<T, FinesCacheError> {
        let mut fines = self.fines.write();
        let mut changed = fines.clone();
        let result = change(&mut changed)?;
        if changed != *fines {
            self.persist(&changed)?;
            *fines = changed;
        }
        Ok(result)
    }

    fn persist(&self, fines: &[Fine]) -> Result<(), FinesCacheError> {
        let content = serde_json::to_string_pretty(fines)?;
        std::fs::write(&self.path, content).map_err(|source| {
            tracing::error!("Failed to write fines cache {}: {}", self.path.display(), source);
            FinesCacheError::Io {
                path: self.path.clone(),
                source,
            }
        })
    }
}
