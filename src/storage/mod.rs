//! Storage Module
//!
//! The in-memory storage engine and the values it manages:
//! - `StorageLocation`: canonical path identity, the map key
//! - `StorageContainer`: content and metadata of one file or directory
//! - `StorageDrive`: capacity and usage of a root
//! - `InMemoryStorage`: create/copy/move/delete/replace/enumerate/links

pub mod access;
pub mod container;
pub mod drive;
pub mod encryption;
pub mod enumeration;
pub mod in_memory_storage;
pub mod location;
pub mod types;

pub use access::{AccessHandle, AccessRequest};
pub use container::{ContainerType, Extensibility, StorageContainer, TimeContainer};
pub use drive::StorageDrive;
pub use enumeration::EnumerateLocations;
pub use in_memory_storage::InMemoryStorage;
pub use location::StorageLocation;
pub use types::*;
