//! Storage Drives
//!
//! A drive is a named root (`C:\`, `\\server\share\` or `/`) that tracks its
//! capacity and how many bytes the files on it occupy.

use parking_lot::RwLock;
use std::fmt;

use super::types::{DriveType, Result, StorageError};
use crate::config::DriveOptions;
use crate::platform::{Execute, SimulatedOs};

/// 1 TiB
pub const DEFAULT_TOTAL_SIZE: u64 = 1024 * 1024 * 1024 * 1024;

#[derive(Debug, Clone)]
struct DriveState {
    total_size: u64,
    used_bytes: u64,
    drive_format: String,
    drive_type: DriveType,
    is_ready: bool,
}

/// A mounted drive of the in-memory storage.
#[derive(Debug)]
pub struct StorageDrive {
    name: String,
    state: RwLock<DriveState>,
}

impl StorageDrive {
    /// Creates a drive with the defaults of the simulated OS.
    pub fn new(execute: &Execute, name: &str) -> Result<Self> {
        Self::with_options(execute, name, &DriveOptions::default())
    }

    pub fn with_options(execute: &Execute, name: &str, options: &DriveOptions) -> Result<Self> {
        let name = Self::normalize_name(execute, name)?;
        Ok(Self::named(name, execute, options))
    }

    /// The drive the simulated OS boots from (`C:\` or `/`).
    pub(crate) fn main(execute: &Execute, options: &DriveOptions) -> Self {
        Self::named(execute.default_root(), execute, options)
    }

    fn named(name: String, execute: &Execute, options: &DriveOptions) -> Self {
        let drive_format = options
            .drive_format
            .clone()
            .unwrap_or_else(|| default_drive_format(execute.os()).to_string());
        Self {
            name,
            state: RwLock::new(DriveState {
                total_size: options.total_size,
                used_bytes: 0,
                drive_format,
                drive_type: options.drive_type,
                is_ready: options.is_ready,
            }),
        }
    }

    /// Brings a drive name into its root form.
    ///
    /// On Windows `c`, `c:` and `c:\foo` all become `C:\`; UNC shares keep
    /// their server and share segments. Unix-like systems only have `/`
    /// (plus UNC-style `//server/share/` roots).
    pub fn normalize_name(execute: &Execute, name: &str) -> Result<String> {
        let sep = execute.separator();
        let invalid = || StorageError::InvalidDriveName {
            name: name.to_string(),
        };
        if name.trim().is_empty() {
            return Err(invalid());
        }
        if execute.is_unc_path(name) {
            let root = execute.get_path_root(name).ok_or_else(invalid)?;
            return Ok(execute.with_trailing_separator(&root));
        }
        if !execute.is_windows() {
            return Ok(sep.to_string());
        }

        let mut chars = name.chars();
        let letter = chars.next().filter(|c| c.is_ascii_alphabetic()).ok_or_else(invalid)?;
        match (chars.next(), chars.next()) {
            (None, _) | (Some(':'), None) => {}
            (Some(':'), Some(c)) if execute.is_separator(c) => {}
            _ => return Err(invalid()),
        }
        Ok(format!("{}:{}", letter.to_ascii_uppercase(), sep))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn total_size(&self) -> u64 {
        self.state.read().total_size
    }

    pub fn used_bytes(&self) -> u64 {
        self.state.read().used_bytes
    }

    pub fn available_free_space(&self) -> u64 {
        let state = self.state.read();
        state.total_size.saturating_sub(state.used_bytes)
    }

    pub fn drive_format(&self) -> String {
        self.state.read().drive_format.clone()
    }

    pub fn drive_type(&self) -> DriveType {
        self.state.read().drive_type
    }

    pub fn is_ready(&self) -> bool {
        self.state.read().is_ready
    }

    pub fn set_total_size(&self, total_size: u64) -> &Self {
        self.state.write().total_size = total_size;
        tracing::debug!(drive = %self.name, total_size, "drive resized");
        self
    }

    pub fn set_drive_format(&self, drive_format: impl Into<String>) -> &Self {
        self.state.write().drive_format = drive_format.into();
        self
    }

    pub fn set_drive_type(&self, drive_type: DriveType) -> &Self {
        self.state.write().drive_type = drive_type;
        self
    }

    pub fn set_is_ready(&self, is_ready: bool) -> &Self {
        self.state.write().is_ready = is_ready;
        tracing::debug!(drive = %self.name, is_ready, "drive readiness changed");
        self
    }

    /// Adjusts the used bytes by `delta`.
    ///
    /// Growing beyond the available free space fails with `NotEnoughSpace`
    /// and leaves the usage untouched. Usage never drops below zero.
    pub fn change_used_bytes(&self, delta: i64) -> Result<()> {
        let mut state = self.state.write();
        if delta > 0 {
            let requested = delta.unsigned_abs();
            if state.total_size.saturating_sub(state.used_bytes) < requested {
                return Err(StorageError::NotEnoughSpace {
                    drive: self.name.clone(),
                    requested,
                });
            }
            state.used_bytes += requested;
        } else {
            state.used_bytes = state.used_bytes.saturating_sub(delta.unsigned_abs());
        }
        Ok(())
    }
}

impl fmt::Display for StorageDrive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        write!(
            f,
            "{} ({} bytes used of {})",
            self.name, state.used_bytes, state.total_size
        )
    }
}

fn default_drive_format(os: SimulatedOs) -> &'static str {
    match os {
        SimulatedOs::Windows => "NTFS",
        SimulatedOs::Linux => "ext4",
        SimulatedOs::MacOs => "APFS",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn windows() -> Execute {
        Execute::new(SimulatedOs::Windows)
    }

    #[test]
    fn test_normalize_name_windows() {
        let exec = windows();
        assert_eq!(StorageDrive::normalize_name(&exec, "c").unwrap(), "C:\\");
        assert_eq!(StorageDrive::normalize_name(&exec, "d:").unwrap(), "D:\\");
        assert_eq!(StorageDrive::normalize_name(&exec, "E:/").unwrap(), "E:\\");
        assert_eq!(
            StorageDrive::normalize_name(&exec, "\\\\srv\\share\\dir").unwrap(),
            "\\\\srv\\share\\"
        );
        assert!(matches!(
            StorageDrive::normalize_name(&exec, "1:"),
            Err(StorageError::InvalidDriveName { .. })
        ));
        assert!(StorageDrive::normalize_name(&exec, "cd").is_err());
        assert!(StorageDrive::normalize_name(&exec, " ").is_err());
    }

    #[test]
    fn test_normalize_name_unix() {
        let exec = Execute::new(SimulatedOs::Linux);
        assert_eq!(StorageDrive::normalize_name(&exec, "/").unwrap(), "/");
        assert_eq!(StorageDrive::normalize_name(&exec, "/mnt/data").unwrap(), "/");
        assert_eq!(
            StorageDrive::normalize_name(&exec, "//srv/share").unwrap(),
            "//srv/share/"
        );
    }

    #[test]
    fn test_defaults_follow_simulated_os() {
        let drive = StorageDrive::new(&windows(), "C").unwrap();
        assert_eq!(drive.total_size(), DEFAULT_TOTAL_SIZE);
        assert_eq!(drive.drive_format(), "NTFS");
        assert_eq!(drive.drive_type(), DriveType::Fixed);
        assert!(drive.is_ready());

        let mac = StorageDrive::new(&Execute::new(SimulatedOs::MacOs), "/").unwrap();
        assert_eq!(mac.drive_format(), "APFS");
        let linux = StorageDrive::new(&Execute::new(SimulatedOs::Linux), "/").unwrap();
        assert_eq!(linux.drive_format(), "ext4");
    }

    #[test]
    fn test_change_used_bytes() {
        let drive = StorageDrive::new(&windows(), "C").unwrap();
        drive.set_total_size(100);

        drive.change_used_bytes(60).unwrap();
        assert_eq!(drive.used_bytes(), 60);
        assert_eq!(drive.available_free_space(), 40);

        let err = drive.change_used_bytes(41).unwrap_err();
        assert_eq!(
            err,
            StorageError::NotEnoughSpace { drive: "C:\\".to_string(), requested: 41 }
        );
        assert_eq!(drive.used_bytes(), 60);

        drive.change_used_bytes(-100).unwrap();
        assert_eq!(drive.used_bytes(), 0);
    }

    #[test]
    fn test_setters() {
        let drive = StorageDrive::new(&windows(), "C").unwrap();
        drive
            .set_drive_format("FAT32")
            .set_drive_type(DriveType::Removable)
            .set_is_ready(false);
        assert_eq!(drive.drive_format(), "FAT32");
        assert_eq!(drive.drive_type(), DriveType::Removable);
        assert!(!drive.is_ready());
    }
}
