//! Storage Configuration
//!
//! Options for building an `InMemoryStorage`, loadable from TOML:
//!
//! ```toml
//! simulated_os = "windows"
//! current_directory = "C:\\work"
//!
//! [main_drive]
//! total_size = 1048576
//! drive_format = "NTFS"
//! drive_type = "Fixed"
//! ```

use serde::Deserialize;
use thiserror::Error;

use crate::platform::SimulatedOs;
use crate::storage::drive::DEFAULT_TOTAL_SIZE;
use crate::storage::DriveType;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid storage configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Settings for a single drive.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DriveOptions {
    pub total_size: u64,
    /// Defaults to the simulated OS's native format when unset.
    pub drive_format: Option<String>,
    pub drive_type: DriveType,
    pub is_ready: bool,
}

impl Default for DriveOptions {
    fn default() -> Self {
        Self {
            total_size: DEFAULT_TOTAL_SIZE,
            drive_format: None,
            drive_type: DriveType::Fixed,
            is_ready: true,
        }
    }
}

/// Settings for a whole storage.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    pub simulated_os: SimulatedOs,
    /// Working directory relative paths resolve against. Defaults to the
    /// main drive's root.
    pub current_directory: Option<String>,
    pub main_drive: DriveOptions,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            simulated_os: SimulatedOs::host(),
            current_directory: None,
            main_drive: DriveOptions::default(),
        }
    }
}

impl StorageOptions {
    pub fn for_os(simulated_os: SimulatedOs) -> Self {
        Self {
            simulated_os,
            ..Self::default()
        }
    }

    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = StorageOptions::default();
        assert_eq!(options.simulated_os, SimulatedOs::host());
        assert_eq!(options.current_directory, None);
        assert_eq!(options.main_drive.total_size, DEFAULT_TOTAL_SIZE);
        assert!(options.main_drive.is_ready);
    }

    #[test]
    fn test_from_toml_str() {
        let options = StorageOptions::from_toml_str(
            r#"
simulated_os = "windows"
current_directory = 'C:\work'

[main_drive]
total_size = 2048
drive_format = "FAT32"
drive_type = "Removable"
"#,
        )
        .unwrap();
        assert_eq!(options.simulated_os, SimulatedOs::Windows);
        assert_eq!(options.current_directory.as_deref(), Some("C:\\work"));
        assert_eq!(options.main_drive.total_size, 2048);
        assert_eq!(options.main_drive.drive_format.as_deref(), Some("FAT32"));
        assert_eq!(options.main_drive.drive_type, DriveType::Removable);
        assert!(options.main_drive.is_ready);
    }

    #[test]
    fn test_from_toml_str_accepts_os_aliases() {
        let options = StorageOptions::from_toml_str("simulated_os = \"osx\"").unwrap();
        assert_eq!(options.simulated_os, SimulatedOs::MacOs);
        let options = StorageOptions::from_toml_str("simulated_os = \"linux\"").unwrap();
        assert_eq!(options.simulated_os, SimulatedOs::Linux);
    }

    #[test]
    fn test_from_toml_str_rejects_unknown_os() {
        let err = StorageOptions::from_toml_str("simulated_os = \"beos\"").unwrap_err();
        assert!(err.to_string().starts_with("invalid storage configuration"));
    }
}
