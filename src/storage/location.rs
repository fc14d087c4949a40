//! Storage Locations
//!
//! A location is the canonical identity of a path inside the storage and the
//! key of the container map. It is immutable: parents and relocated paths are
//! always new values.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::drive::StorageDrive;
use crate::platform::Execute;

#[derive(Debug, Clone)]
pub struct StorageLocation {
    full_path: String,
    friendly_name: String,
    drive: Option<Arc<StorageDrive>>,
    is_rooted: bool,
    execute: Execute,
    key: String,
}

impl StorageLocation {
    /// `full_path` must already be canonical for `execute`.
    pub(crate) fn new(
        execute: Execute,
        drive: Option<Arc<StorageDrive>>,
        full_path: String,
        friendly_name: String,
    ) -> Self {
        let is_rooted = execute.get_directory_name(&full_path).is_none();
        let key = execute.comparison_key(&full_path);
        Self {
            full_path,
            friendly_name,
            drive,
            is_rooted,
            execute,
            key,
        }
    }

    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    /// The path as the caller spelled it.
    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    pub fn drive(&self) -> Option<&Arc<StorageDrive>> {
        self.drive.as_ref()
    }

    /// True when the location is a root (`C:\`, `/`, `\\server\share`).
    pub fn is_rooted(&self) -> bool {
        self.is_rooted
    }

    /// Final path segment; empty for roots.
    pub fn name(&self) -> &str {
        if self.is_rooted {
            return "";
        }
        self.execute.get_file_name(&self.full_path)
    }

    pub fn get_parent(&self) -> Option<StorageLocation> {
        let parent = self.execute.get_directory_name(&self.full_path)?;
        Some(Self::new(
            self.execute,
            self.drive.clone(),
            parent.clone(),
            parent,
        ))
    }

    /// True if `self` lies strictly below `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &StorageLocation) -> bool {
        let prefix = self.execute.with_trailing_separator(&ancestor.key);
        self.key.len() > prefix.len() && self.key.starts_with(&prefix)
    }

    /// Number of separators between `ancestor` and `self` (`0` for a direct child).
    pub(crate) fn depth_below(&self, ancestor: &StorageLocation) -> usize {
        let prefix = self.execute.with_trailing_separator(&ancestor.key);
        self.key
            .get(prefix.len()..)
            .map(|rest| rest.chars().filter(|c| *c == self.execute.separator()).count())
            .unwrap_or(0)
    }
}

impl PartialEq for StorageLocation {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for StorageLocation {}

impl Hash for StorageLocation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for StorageLocation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StorageLocation {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_path)
    }
}
