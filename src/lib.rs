//! mockfs - an in-memory, thread-safe file system for tests
//!
//! Emulates paths, directories, files, drives, attributes, timestamps,
//! sharing modes and change notifications of a simulated operating system
//! (Windows, Linux or macOS), independent of the host it runs on.
//!
//! ```
//! use mockfs::{InMemoryStorage, SimulatedOs, StorageContainer, StorageOptions};
//!
//! let storage = InMemoryStorage::with_options(StorageOptions::for_os(SimulatedOs::Linux)).unwrap();
//! let dir = storage.get_location(Some("/work/logs")).unwrap();
//! storage.get_or_create_container(&dir, StorageContainer::new_directory).unwrap();
//!
//! let file = storage.get_location(Some("/work/logs/app.log")).unwrap();
//! let container = storage.get_or_create_container(&file, StorageContainer::new_file).unwrap();
//! container.write_bytes(b"started").unwrap();
//! assert_eq!(storage.to_string(), "directories: 3, files: 1");
//! ```

pub mod config;
pub mod notification;
pub mod platform;
pub mod storage;
pub mod time;

pub use config::{ConfigError, DriveOptions, StorageOptions};
pub use notification::{ChangeDescription, ChangeHandler, NotifyFilters, WatcherChangeTypes, WatcherOptions};
pub use platform::{Execute, SimulatedOs};
pub use storage::{
    AccessRequest, ErrorKind, FileAccess, FileAttributes, FileShare, FileSystemTypes,
    InMemoryStorage, Result, StorageContainer, StorageDrive, StorageError, StorageLocation,
};
pub use time::{ManualTimeProvider, SystemTimeProvider, TimeProvider};
