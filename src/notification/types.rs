//! Change Notification Types

use bitflags::bitflags;
use std::fmt;

use crate::storage::FileSystemTypes;

bitflags! {
    /// Kinds of change a notification reports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WatcherChangeTypes: u8 {
        const CREATED = 1;
        const DELETED = 2;
        const CHANGED = 4;
        const RENAMED = 8;
        const ALL = Self::CREATED.bits()
            | Self::DELETED.bits()
            | Self::CHANGED.bits()
            | Self::RENAMED.bits();
    }
}

impl fmt::Display for WatcherChangeTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self
            .iter_names()
            .filter(|(name, _)| *name != "ALL")
            .map(|(name, _)| match name {
                "CREATED" => "Created",
                "DELETED" => "Deleted",
                "CHANGED" => "Changed",
                _ => "Renamed",
            })
            .collect();
        write!(f, "{}", names.join(", "))
    }
}

bitflags! {
    /// Categories of change a watcher can subscribe to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NotifyFilters: u32 {
        const FILE_NAME = 0x1;
        const DIRECTORY_NAME = 0x2;
        const ATTRIBUTES = 0x4;
        const SIZE = 0x8;
        const LAST_WRITE = 0x10;
        const LAST_ACCESS = 0x20;
        const CREATION_TIME = 0x40;
        const SECURITY = 0x100;
    }
}

impl NotifyFilters {
    /// The name filter that applies to an entry of the given type.
    pub fn name_filter_for(file_system_type: FileSystemTypes) -> Self {
        if file_system_type == FileSystemTypes::DIRECTORY {
            Self::DIRECTORY_NAME
        } else {
            Self::FILE_NAME
        }
    }
}

/// A single change, as captured before it is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeDescription {
    pub change_type: WatcherChangeTypes,
    pub file_system_type: FileSystemTypes,
    pub notify_filters: NotifyFilters,
    pub path: String,
    pub name: Option<String>,
    pub old_path: Option<String>,
    pub old_name: Option<String>,
}

impl fmt::Display for ChangeDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.change_type, self.file_system_type, self.path)?;
        if let Some(old_path) = &self.old_path {
            write!(f, " (from {})", old_path)?;
        }
        write!(f, " [{:?}]", self.notify_filters)
    }
}

/// What a watcher subscribes to.
#[derive(Debug, Clone)]
pub struct WatcherOptions {
    /// Absolute directory to watch.
    pub path: String,
    /// Wildcard applied to the changed entry's name.
    pub filter: String,
    pub notify_filters: NotifyFilters,
    pub include_subdirectories: bool,
}

impl WatcherOptions {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn with_notify_filters(mut self, notify_filters: NotifyFilters) -> Self {
        self.notify_filters = notify_filters;
        self
    }

    pub fn include_subdirectories(mut self, include: bool) -> Self {
        self.include_subdirectories = include;
        self
    }
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            path: String::new(),
            filter: "*".to_string(),
            notify_filters: NotifyFilters::FILE_NAME
                | NotifyFilters::DIRECTORY_NAME
                | NotifyFilters::LAST_WRITE,
            include_subdirectories: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_type_display() {
        assert_eq!(WatcherChangeTypes::CREATED.to_string(), "Created");
        assert_eq!(
            (WatcherChangeTypes::DELETED | WatcherChangeTypes::RENAMED).to_string(),
            "Deleted, Renamed"
        );
    }

    #[test]
    fn test_name_filter_for() {
        assert_eq!(
            NotifyFilters::name_filter_for(FileSystemTypes::DIRECTORY),
            NotifyFilters::DIRECTORY_NAME
        );
        assert_eq!(
            NotifyFilters::name_filter_for(FileSystemTypes::FILE),
            NotifyFilters::FILE_NAME
        );
    }

    #[test]
    fn test_watcher_options_builder() {
        let options = WatcherOptions::new("/tmp")
            .with_filter("*.log")
            .include_subdirectories(true);
        assert_eq!(options.path, "/tmp");
        assert_eq!(options.filter, "*.log");
        assert!(options.include_subdirectories);
        assert!(options.notify_filters.contains(NotifyFilters::FILE_NAME));
    }
}
