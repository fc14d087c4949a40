//! Storage Containers
//!
//! The mutable record behind one file-system entry: content, attributes,
//! timestamps, link target and access handles.

use chrono::{DateTime, Local, Utc};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::access::{AccessHandle, AccessRequest, HandleInfo, HandleRegistry};
use super::encryption;
use super::in_memory_storage::InMemoryStorage;
use super::location::StorageLocation;
use super::types::{
    FileAccess, FileAttributes, FileSystemTypes, FileTime, Result, StorageError, TimeAdjustments,
    TimeKind,
};
use crate::notification::{ChangeHandler, NotifyFilters, WatcherChangeTypes};
use crate::platform::Execute;
use crate::time::TimeProvider;

/// Shared services every container of a storage needs.
pub(crate) struct StorageContext {
    pub execute: Execute,
    pub time: Arc<dyn TimeProvider>,
    pub changes: ChangeHandler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerType {
    File,
    Directory,
}

impl ContainerType {
    pub fn as_file_system_types(self) -> FileSystemTypes {
        match self {
            Self::File => FileSystemTypes::FILE,
            Self::Directory => FileSystemTypes::DIRECTORY,
        }
    }
}

#[derive(Debug)]
enum Content {
    File { bytes: Vec<u8>, encrypted: bool },
    Directory,
}

/// Attributes derived from the container itself; never stored.
const DERIVED_ATTRIBUTES: FileAttributes = FileAttributes::DIRECTORY
    .union(FileAttributes::REPARSE_POINT)
    .union(FileAttributes::ENCRYPTED)
    .union(FileAttributes::NORMAL);

/// One timestamp of a container.
///
/// Stored as UTC together with the kind it was last set with.
#[derive(Debug)]
pub struct TimeContainer {
    value: RwLock<(DateTime<Utc>, TimeKind)>,
}

impl TimeContainer {
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            value: RwLock::new((time, TimeKind::Utc)),
        }
    }

    /// Reads the time in the requested kind; `Unspecified` returns it in the
    /// kind it was stored with.
    pub fn get(&self, kind: TimeKind) -> FileTime {
        let (utc, stored_kind) = *self.value.read();
        let kind = if kind == TimeKind::Unspecified {
            stored_kind
        } else {
            kind
        };
        match kind {
            TimeKind::Utc => FileTime::utc(utc),
            TimeKind::Local => FileTime::local(utc.with_timezone(&Local)),
            TimeKind::Unspecified => {
                FileTime::new(utc.with_timezone(&Local).naive_local(), TimeKind::Unspecified)
            }
        }
    }

    pub fn get_utc(&self) -> DateTime<Utc> {
        self.value.read().0
    }

    /// Stores `time`. A time of unspecified kind adopts `kind` without conversion.
    pub fn set(&self, time: FileTime, kind: TimeKind) {
        let time = if time.kind() == TimeKind::Unspecified {
            time.specify_kind(kind)
        } else {
            time
        };
        *self.value.write() = (time.to_utc(), time.kind());
    }

    pub fn set_utc(&self, time: DateTime<Utc>) {
        *self.value.write() = (time, TimeKind::Utc);
    }
}

impl fmt::Display for TimeContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get_utc().format("%Y-%m-%d %H:%M:%SZ"))
    }
}

/// Typed metadata attached to a container by adapters.
#[derive(Default)]
pub struct Extensibility {
    metadata: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl Extensibility {
    pub fn store_metadata<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.metadata.write().insert(key.into(), Arc::new(value));
    }

    /// Returns the value under `key` if it exists and has type `T`.
    pub fn retrieve_metadata<T: Any + Clone>(&self, key: &str) -> Option<T> {
        self.metadata
            .read()
            .get(key)
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    pub fn copy_metadata_to(&self, target: &Extensibility) {
        let source = self.metadata.read().clone();
        target.metadata.write().extend(source);
    }
}

impl fmt::Debug for Extensibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self.metadata.read().keys().cloned().collect();
        keys.sort();
        f.debug_struct("Extensibility").field("keys", &keys).finish()
    }
}

/// A file or directory held by the storage.
pub struct StorageContainer {
    context: Arc<StorageContext>,
    location: RwLock<StorageLocation>,
    content: RwLock<Content>,
    attributes: RwLock<FileAttributes>,
    creation_time: TimeContainer,
    last_access_time: TimeContainer,
    last_write_time: TimeContainer,
    link_target: RwLock<Option<String>>,
    extensibility: Extensibility,
    handles: HandleRegistry,
    next_handle_id: AtomicU64,
}

impl StorageContainer {
    pub fn new(container_type: ContainerType, location: &StorageLocation, storage: &InMemoryStorage) -> Self {
        let context = storage.context();
        let now = context.time.now();
        let content = match container_type {
            ContainerType::File => Content::File {
                bytes: Vec::new(),
                encrypted: false,
            },
            ContainerType::Directory => Content::Directory,
        };
        Self {
            context,
            location: RwLock::new(location.clone()),
            content: RwLock::new(content),
            attributes: RwLock::new(FileAttributes::empty()),
            creation_time: TimeContainer::new(now),
            last_access_time: TimeContainer::new(now),
            last_write_time: TimeContainer::new(now),
            link_target: RwLock::new(None),
            extensibility: Extensibility::default(),
            handles: HandleRegistry::default(),
            next_handle_id: AtomicU64::new(1),
        }
    }

    /// Generator for an empty file.
    pub fn new_file(location: &StorageLocation, storage: &InMemoryStorage) -> Self {
        Self::new(ContainerType::File, location, storage)
    }

    /// Generator for a directory.
    pub fn new_directory(location: &StorageLocation, storage: &InMemoryStorage) -> Self {
        Self::new(ContainerType::Directory, location, storage)
    }

    pub fn container_type(&self) -> ContainerType {
        match *self.content.read() {
            Content::File { .. } => ContainerType::File,
            Content::Directory => ContainerType::Directory,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.container_type() == ContainerType::Directory
    }

    pub fn is_file(&self) -> bool {
        self.container_type() == ContainerType::File
    }

    /// The location this container is currently stored under.
    pub fn location(&self) -> StorageLocation {
        self.location.read().clone()
    }

    pub(crate) fn relocate(&self, location: StorageLocation) {
        *self.location.write() = location;
    }

    fn execute(&self) -> &Execute {
        &self.context.execute
    }

    pub fn creation_time(&self) -> &TimeContainer {
        &self.creation_time
    }

    pub fn last_access_time(&self) -> &TimeContainer {
        &self.last_access_time
    }

    pub fn last_write_time(&self) -> &TimeContainer {
        &self.last_write_time
    }

    pub fn extensibility(&self) -> &Extensibility {
        &self.extensibility
    }

    pub fn link_target(&self) -> Option<String> {
        self.link_target.read().clone()
    }

    pub fn set_link_target(&self, target: Option<String>) {
        *self.link_target.write() = target;
    }

    /// A copy of the raw content. Directories have none.
    pub fn get_bytes(&self) -> Vec<u8> {
        match &*self.content.read() {
            Content::File { bytes, .. } => bytes.clone(),
            Content::Directory => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        match &*self.content.read() {
            Content::File { bytes, .. } => bytes.len(),
            Content::Directory => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replaces the content, charging the difference to the drive.
    pub fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        let location = self.location();
        if self.is_directory() {
            return Err(StorageError::AccessDenied {
                path: location.full_path().to_string(),
            });
        }
        let change = self.context.changes.notify_pending_change(
            WatcherChangeTypes::CHANGED,
            FileSystemTypes::FILE,
            NotifyFilters::LAST_WRITE | NotifyFilters::SIZE,
            &location,
            None,
        )?;
        self.load_bytes(bytes)?;
        self.context.changes.notify_completed_change(change);
        Ok(())
    }

    /// Replaces the content without notifying, charging the difference to the drive.
    pub(crate) fn load_bytes(&self, bytes: &[u8]) -> Result<()> {
        let location = self.location();
        let mut content = self.content.write();
        if let Content::File { bytes: current, .. } = &mut *content {
            let delta = bytes.len() as i64 - current.len() as i64;
            if let Some(drive) = location.drive() {
                drive.change_used_bytes(delta)?;
            }
            *current = bytes.to_vec();
        }
        Ok(())
    }

    /// Takes over the content of `source`, keeping its encryption state,
    /// and charges the difference to the drive.
    pub(crate) fn load_content_from(&self, source: &StorageContainer) -> Result<()> {
        let (source_bytes, source_encrypted) = match &*source.content.read() {
            Content::File { bytes, encrypted } => (bytes.clone(), *encrypted),
            Content::Directory => (Vec::new(), false),
        };
        let location = self.location();
        let mut content = self.content.write();
        if let Content::File { bytes, encrypted } = &mut *content {
            let delta = source_bytes.len() as i64 - bytes.len() as i64;
            if let Some(drive) = location.drive() {
                drive.change_used_bytes(delta)?;
            }
            *bytes = source_bytes;
            *encrypted = source_encrypted;
        }
        Ok(())
    }

    /// Drops the content without touching drive usage; the caller has
    /// already accounted for it.
    pub(crate) fn discard_bytes(&self) {
        if let Content::File { bytes, encrypted } = &mut *self.content.write() {
            *bytes = Vec::new();
            *encrypted = false;
        }
    }

    /// Drops the content and releases its drive usage.
    pub fn clear_bytes(&self) {
        let location = self.location();
        let mut content = self.content.write();
        if let Content::File { bytes, encrypted } = &mut *content {
            if let Some(drive) = location.drive() {
                if let Err(err) = drive.change_used_bytes(-(bytes.len() as i64)) {
                    tracing::warn!(path = %location, error = %err, "could not release drive usage");
                }
            }
            *bytes = Vec::new();
            *encrypted = false;
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(&*self.content.read(), Content::File { encrypted: true, .. })
    }

    /// Encrypts file content. Already encrypted content is left alone.
    pub fn encrypt(&self) {
        let mut content = self.content.write();
        if let Content::File { bytes, encrypted } = &mut *content {
            if !*encrypted {
                *bytes = encryption::encrypt(bytes);
                *encrypted = true;
            }
        }
    }

    /// Decrypts file content. Plain content is left alone.
    pub fn decrypt(&self) {
        let mut content = self.content.write();
        if let Content::File { bytes, encrypted } = &mut *content {
            if *encrypted {
                *bytes = encryption::decrypt(bytes);
                *encrypted = false;
            }
        }
    }

    /// Effective attributes, including the ones derived from the container.
    pub fn attributes(&self) -> FileAttributes {
        self.adjust_attributes(*self.attributes.read())
    }

    pub fn set_attributes(&self, attributes: FileAttributes) -> Result<()> {
        let location = self.location();
        let change = self.context.changes.notify_pending_change(
            WatcherChangeTypes::CHANGED,
            self.container_type().as_file_system_types(),
            NotifyFilters::ATTRIBUTES,
            &location,
            None,
        )?;
        *self.attributes.write() = attributes.difference(DERIVED_ATTRIBUTES);
        self.context.changes.notify_completed_change(change);
        Ok(())
    }

    /// Attributes as stored, without derived bits.
    pub(crate) fn stored_attributes(&self) -> FileAttributes {
        *self.attributes.read()
    }

    pub(crate) fn restore_attributes(&self, attributes: FileAttributes) {
        *self.attributes.write() = attributes.difference(DERIVED_ATTRIBUTES);
    }

    /// Applies the bits that follow from the container to `base`.
    pub fn adjust_attributes(&self, base: FileAttributes) -> FileAttributes {
        let mut attributes = base.difference(FileAttributes::NORMAL);
        attributes.set(FileAttributes::DIRECTORY, self.is_directory());
        if self.execute().is_linux() {
            let location = self.location.read();
            attributes.set(FileAttributes::HIDDEN, location.name().starts_with('.'));
        }
        attributes.set(FileAttributes::REPARSE_POINT, self.link_target.read().is_some());
        attributes.set(FileAttributes::ENCRYPTED, self.is_encrypted());
        if attributes.is_empty() {
            FileAttributes::NORMAL
        } else {
            attributes
        }
    }

    /// Stamps the selected timestamps with the current time.
    pub fn adjust_times(&self, adjustments: TimeAdjustments) {
        let now = self.context.time.now();
        if adjustments.contains(TimeAdjustments::CREATION_TIME) {
            self.creation_time.set_utc(now);
        }
        if adjustments.contains(TimeAdjustments::LAST_ACCESS_TIME) {
            self.last_access_time.set_utc(now);
        }
        if adjustments.contains(TimeAdjustments::LAST_WRITE_TIME) {
            self.last_write_time.set_utc(now);
        }
    }

    /// Grants access or fails immediately.
    pub fn request_access(&self, request: AccessRequest) -> Result<AccessHandle> {
        let location = self.location();
        let path = location.full_path().to_string();
        let drive = location
            .drive()
            .ok_or_else(|| StorageError::DirectoryNotFound { path: path.clone() })?;
        if !drive.is_ready() {
            return Err(StorageError::DriveNotReady { path });
        }
        if !request.ignore_metadata_errors
            && request.access.contains(FileAccess::WRITE)
            && self.stored_attributes().contains(FileAttributes::READ_ONLY)
        {
            return Err(StorageError::AccessDenied { path });
        }

        let info = HandleInfo {
            access: request.access,
            share: request.share,
            delete_access: request.delete_access,
        };
        let id = {
            let mut handles = self.handles.lock();
            if handles.values().any(|h| !h.admits(&request, self.execute())) {
                return Err(StorageError::SharingViolation {
                    path,
                    hresult: request.sharing_violation_hresult(),
                });
            }
            let id = self.next_handle_id.fetch_add(1, Ordering::Relaxed);
            handles.insert(id, info);
            id
        };
        Ok(AccessHandle::new(id, info, path, self.handles.clone()))
    }

    /// Number of outstanding access handles.
    pub fn open_handles(&self) -> usize {
        self.handles.lock().len()
    }
}

impl fmt::Display for StorageContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let location = self.location.read();
        match &*self.content.read() {
            Content::Directory => write!(f, "{}: Directory", location.full_path()),
            Content::File { bytes, .. } => {
                write!(f, "{}: File ({} bytes)", location.full_path(), bytes.len())
            }
        }
    }
}

impl fmt::Debug for StorageContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageContainer")
            .field("location", &self.location.read().full_path())
            .field("type", &self.container_type())
            .field("attributes", &self.attributes())
            .field("len", &self.len())
            .finish()
    }
}
