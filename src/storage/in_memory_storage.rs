//! In-Memory Storage
//!
//! The engine that owns every container and drive. Containers live in a
//! concurrent map keyed by their location; there is no global lock. A map
//! guard is never held while the map is re-entered or while notification
//! callbacks run.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

use super::access::AccessRequest;
use super::container::{ContainerType, StorageContainer, StorageContext};
use super::drive::StorageDrive;
use super::enumeration::{validate_expression, EnumerateLocations, NameMatcher};
use super::location::StorageLocation;
use super::types::{
    hresult, EnumerationOptions, FileAccess, FileAttributes, FileShare, FileSystemTypes, Result,
    StorageError, TimeAdjustments, TimeKind,
};
use crate::config::StorageOptions;
use crate::notification::{ChangeDescription, ChangeHandler, NotifyFilters, WatcherChangeTypes};
use crate::platform::Execute;
use crate::time::{SystemTimeProvider, TimeProvider};

/// One completed relocation of a move, kept until the move commits.
struct MoveStep {
    container: Arc<StorageContainer>,
    source: StorageLocation,
    destination: StorageLocation,
    displaced: Option<Arc<StorageContainer>>,
    previous_attributes: FileAttributes,
    len: usize,
}

/// The in-memory file system storage.
pub struct InMemoryStorage {
    context: Arc<StorageContext>,
    containers: DashMap<StorageLocation, Arc<StorageContainer>>,
    drives: DashMap<String, Arc<StorageDrive>>,
    main_drive: Arc<StorageDrive>,
    current_directory: RwLock<String>,
}

impl InMemoryStorage {
    /// A storage simulating the host OS family, rooted at its default drive.
    pub fn new() -> Self {
        Self::bare(&StorageOptions::default(), Arc::new(SystemTimeProvider))
    }

    pub fn with_options(options: StorageOptions) -> Result<Self> {
        Self::with_time_provider(options, Arc::new(SystemTimeProvider))
    }

    pub fn with_time_provider(options: StorageOptions, time: Arc<dyn TimeProvider>) -> Result<Self> {
        let storage = Self::bare(&options, time);
        if let Some(current_directory) = options.current_directory.as_deref() {
            let location = storage.get_location(Some(current_directory))?;
            storage.get_or_create_container(&location, StorageContainer::new_directory)?;
            *storage.current_directory.write() = location.full_path().to_string();
        }
        Ok(storage)
    }

    /// Main drive and its root directory only.
    fn bare(options: &StorageOptions, time: Arc<dyn TimeProvider>) -> Self {
        let execute = Execute::new(options.simulated_os);
        let context = Arc::new(StorageContext {
            execute,
            time,
            changes: ChangeHandler::new(execute),
        });
        let main_drive = Arc::new(StorageDrive::main(&execute, &options.main_drive));
        let drives = DashMap::new();
        drives.insert(drive_key(main_drive.name()), main_drive.clone());

        let storage = Self {
            context,
            containers: DashMap::new(),
            drives,
            current_directory: RwLock::new(main_drive.name().to_string()),
            main_drive,
        };
        storage.insert_root(&storage.main_drive);
        tracing::debug!(os = %execute.os(), root = %storage.main_drive.name(), "storage initialized");
        storage
    }

    fn insert_root(&self, drive: &Arc<StorageDrive>) {
        let root = self.execute().get_full_path(drive.name(), drive.name());
        let location = StorageLocation::new(*self.execute(), Some(drive.clone()), root.clone(), root);
        let container = Arc::new(StorageContainer::new_directory(&location, self));
        self.containers.entry(location).or_insert(container);
    }

    pub(crate) fn context(&self) -> Arc<StorageContext> {
        self.context.clone()
    }

    pub fn execute(&self) -> &Execute {
        &self.context.execute
    }

    pub fn change_handler(&self) -> &ChangeHandler {
        &self.context.changes
    }

    pub fn main_drive(&self) -> Arc<StorageDrive> {
        self.main_drive.clone()
    }

    pub fn current_directory(&self) -> String {
        self.current_directory.read().clone()
    }

    /// Changes the directory relative paths resolve against. It must exist.
    pub fn set_current_directory(&self, path: &str) -> Result<()> {
        let location = self.get_location(Some(path))?;
        match self.get_container(&location) {
            Some(container) if container.is_directory() => {
                *self.current_directory.write() = location.full_path().to_string();
                Ok(())
            }
            _ => Err(StorageError::DirectoryNotFound {
                path: location.full_path().to_string(),
            }),
        }
    }

    // ---- drives ----

    /// Looks up the registered drive a path or drive name belongs to.
    pub fn get_drive(&self, name: &str) -> Option<Arc<StorageDrive>> {
        if name.trim().is_empty() {
            return None;
        }
        let execute = self.execute();
        let root = if execute.is_unc_path(name) {
            name.to_string()
        } else {
            execute.get_path_root(name)?
        };
        let normalized = StorageDrive::normalize_name(execute, &root).ok()?;
        self.drives
            .get(&drive_key(&normalized))
            .map(|entry| entry.value().clone())
    }

    pub fn get_drives(&self) -> Vec<Arc<StorageDrive>> {
        let mut drives: Vec<Arc<StorageDrive>> =
            self.drives.iter().map(|entry| entry.value().clone()).collect();
        drives.sort_by(|a, b| a.name().cmp(b.name()));
        drives
    }

    /// Mounts a drive (and its root directory) unless it already exists.
    pub fn get_or_add_drive(&self, name: &str) -> Result<Arc<StorageDrive>> {
        let drive = Arc::new(StorageDrive::new(self.execute(), name)?);
        let (drive, added) = match self.drives.entry(drive_key(drive.name())) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                entry.insert(drive.clone());
                (drive, true)
            }
        };
        if added {
            self.insert_root(&drive);
            tracing::debug!(drive = %drive.name(), "drive added");
        }
        Ok(drive)
    }

    /// Unmounts a drive together with every entry on it.
    pub fn remove_drive(&self, name: &str) -> Result<Option<Arc<StorageDrive>>> {
        let normalized = StorageDrive::normalize_name(self.execute(), name)?;
        if drive_key(&normalized) == drive_key(self.main_drive.name()) {
            return Err(StorageError::AccessDenied { path: normalized });
        }
        let Some((_, drive)) = self.drives.remove(&drive_key(&normalized)) else {
            return Ok(None);
        };
        self.containers.retain(|location, _| {
            !location
                .drive()
                .map(|d| Arc::ptr_eq(d, &drive))
                .unwrap_or(false)
        });
        tracing::debug!(drive = %drive.name(), "drive removed");
        Ok(Some(drive))
    }

    // ---- locations and lookup ----

    /// Resolves a user path against the current directory.
    ///
    /// A path on a drive letter that was never added gets no drive, so
    /// operations on it fail once access is requested. Only the main drive
    /// and drives added with `get_or_add_drive` are attached.
    pub fn get_location(&self, path: Option<&str>) -> Result<StorageLocation> {
        let current_directory = self.current_directory();
        self.location_relative_to(path, &current_directory)
    }

    fn location_relative_to(&self, path: Option<&str>, base: &str) -> Result<StorageLocation> {
        let execute = self.execute();
        let path = execute.validate_path(path)?;
        let full_path = execute.get_full_path(path, base);
        let drive = self.get_drive(&full_path);
        Ok(StorageLocation::new(
            *execute,
            drive,
            full_path,
            path.to_string(),
        ))
    }

    pub fn get_container(&self, location: &StorageLocation) -> Option<Arc<StorageContainer>> {
        self.containers
            .get(location)
            .map(|entry| entry.value().clone())
    }

    pub fn contains(&self, location: &StorageLocation) -> bool {
        self.containers.contains_key(location)
    }

    /// All containers, ordered by path.
    pub fn get_containers(&self) -> Vec<Arc<StorageContainer>> {
        let mut entries: Vec<(StorageLocation, Arc<StorageContainer>)> = self
            .containers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.full_path().cmp(b.0.full_path()));
        entries.into_iter().map(|(_, container)| container).collect()
    }

    /// Snapshot of every stored location strictly below `base`, ordered by path.
    pub(crate) fn locations_below(&self, base: &StorageLocation) -> Vec<StorageLocation> {
        let mut locations: Vec<StorageLocation> = self
            .containers
            .iter()
            .filter(|entry| entry.key().is_descendant_of(base))
            .map(|entry| entry.key().clone())
            .collect();
        locations.sort_by(|a, b| a.full_path().cmp(b.full_path()));
        locations
    }

    fn direct_children(&self, location: &StorageLocation) -> Vec<StorageLocation> {
        self.locations_below(location)
            .into_iter()
            .filter(|candidate| candidate.get_parent().as_ref() == Some(location))
            .collect()
    }

    // ---- creation ----

    /// Returns the container at `location`, creating it with `generator` if
    /// absent. Concurrent callers all receive the single winning container.
    ///
    /// Directories get their missing ancestors created; files require an
    /// existing parent.
    pub fn get_or_create_container<F>(
        &self,
        location: &StorageLocation,
        generator: F,
    ) -> Result<Arc<StorageContainer>>
    where
        F: FnOnce(&StorageLocation, &InMemoryStorage) -> StorageContainer,
    {
        if let Some(existing) = self.get_container(location) {
            return Ok(existing);
        }
        let container = Arc::new(generator(location, self));
        if container.is_directory() {
            self.create_parents(location)?;
        } else {
            self.require_parent(location)?;
        }
        self.check_parent_writable(location)?;
        let change = self.notify_created(&container, location)?;

        let winner = match self.containers.entry(location.clone()) {
            Entry::Occupied(entry) => Some(entry.get().clone()),
            Entry::Vacant(entry) => {
                entry.insert(container.clone());
                None
            }
        };
        if let Some(existing) = winner {
            return Ok(existing);
        }

        tracing::debug!(path = %location, kind = ?container.container_type(), "created");
        self.adjust_parent_times(location);
        self.change_handler().notify_completed_change(change);
        Ok(container)
    }

    /// Adds a new container; returns `None` if one already exists.
    pub fn try_add_container<F>(
        &self,
        location: &StorageLocation,
        generator: F,
    ) -> Result<Option<Arc<StorageContainer>>>
    where
        F: FnOnce(&StorageLocation, &InMemoryStorage) -> StorageContainer,
    {
        self.require_parent(location)?;
        if self.contains(location) {
            return Ok(None);
        }
        let container = Arc::new(generator(location, self));
        self.check_parent_writable(location)?;
        let change = self.notify_created(&container, location)?;

        match self.containers.entry(location.clone()) {
            Entry::Occupied(_) => return Ok(None),
            Entry::Vacant(entry) => {
                entry.insert(container.clone());
            }
        }

        tracing::debug!(path = %location, kind = ?container.container_type(), "added");
        self.adjust_parent_times(location);
        self.change_handler().notify_completed_change(change);
        Ok(Some(container))
    }

    /// Pending `Created` notification, raised while holding a write handle on
    /// the new container.
    fn notify_created(
        &self,
        container: &StorageContainer,
        location: &StorageLocation,
    ) -> Result<Option<ChangeDescription>> {
        let _handle = container.request_access(AccessRequest::new(FileAccess::WRITE, FileShare::READ_WRITE))?;
        let file_system_type = container.container_type().as_file_system_types();
        self.change_handler().notify_pending_change(
            WatcherChangeTypes::CREATED,
            file_system_type,
            NotifyFilters::name_filter_for(file_system_type),
            location,
            None,
        )
    }

    fn create_parents(&self, location: &StorageLocation) -> Result<()> {
        let mut parents = Vec::new();
        let mut next = location.get_parent();
        while let Some(parent) = next {
            next = parent.get_parent();
            parents.push(parent);
        }
        parents.reverse();

        for parent in parents {
            if let Some(existing) = self.get_container(&parent) {
                if existing.is_directory() {
                    continue;
                }
                return Err(StorageError::DirectoryNotFound {
                    path: location.full_path().to_string(),
                });
            }
            let container = Arc::new(StorageContainer::new_directory(&parent, self));
            let _handle = container.request_access(AccessRequest::new(FileAccess::WRITE, FileShare::READ_WRITE))?;
            let change = self.change_handler().notify_pending_change(
                WatcherChangeTypes::CREATED,
                FileSystemTypes::DIRECTORY,
                NotifyFilters::DIRECTORY_NAME,
                &parent,
                None,
            )?;
            let inserted = match self.containers.entry(parent.clone()) {
                Entry::Occupied(_) => false,
                Entry::Vacant(entry) => {
                    entry.insert(container);
                    true
                }
            };
            if inserted {
                tracing::debug!(path = %parent, "created parent directory");
                self.change_handler().notify_completed_change(change);
            }
        }
        Ok(())
    }

    /// Fails unless the parent is an existing directory; roots count as
    /// existing.
    fn require_parent(&self, location: &StorageLocation) -> Result<()> {
        self.ensure_parent_exists(location, |_| StorageError::DirectoryNotFound {
            path: location.full_path().to_string(),
        })
    }

    fn ensure_parent_exists<E>(&self, location: &StorageLocation, error: E) -> Result<()>
    where
        E: FnOnce(&StorageLocation) -> StorageError,
    {
        match location.get_parent() {
            Some(parent) if !parent.is_rooted() && !self.is_directory(&parent) => Err(error(&parent)),
            _ => Ok(()),
        }
    }

    fn is_directory(&self, location: &StorageLocation) -> bool {
        self.get_container(location)
            .map(|container| container.is_directory())
            .unwrap_or(false)
    }

    /// Outside Windows a read-only directory rejects changes to its entries.
    fn check_parent_writable(&self, location: &StorageLocation) -> Result<()> {
        if self.execute().is_windows() {
            return Ok(());
        }
        let read_only = location
            .get_parent()
            .and_then(|parent| self.get_container(&parent))
            .map(|parent| parent.stored_attributes().contains(FileAttributes::READ_ONLY))
            .unwrap_or(false);
        if read_only {
            return Err(StorageError::AccessDenied {
                path: location.full_path().to_string(),
            });
        }
        Ok(())
    }

    fn adjust_parent_times(&self, location: &StorageLocation) {
        let Some(parent) = location.get_parent().and_then(|p| self.get_container(&p)) else {
            return;
        };
        let mut adjustments = TimeAdjustments::LAST_WRITE_TIME;
        self.execute()
            .on_windows(|| adjustments |= TimeAdjustments::LAST_ACCESS_TIME);
        parent.adjust_times(adjustments);
    }

    // ---- copy ----

    /// Copies a file. Returns `None` if the source does not exist.
    pub fn copy(
        &self,
        source: &StorageLocation,
        destination: &StorageLocation,
        overwrite: bool,
    ) -> Result<Option<StorageLocation>> {
        self.ensure_parent_exists(destination, |parent| StorageError::DirectoryNotFound {
            path: parent.full_path().to_string(),
        })?;
        let Some(source_container) = self.get_container(source) else {
            return Ok(None);
        };
        if !source_container.is_file() {
            return Err(StorageError::AccessDenied {
                path: source.full_path().to_string(),
            });
        }

        let _handle = source_container.request_access(AccessRequest::new(FileAccess::READ, FileShare::READ))?;
        let existing = self.get_container(destination);
        if let Some(existing) = &existing {
            if existing.is_directory() {
                return Err(StorageError::AccessDenied {
                    path: destination.full_path().to_string(),
                });
            }
            if !overwrite {
                return Err(self.already_exists(destination));
            }
        }
        self.check_parent_writable(destination)?;

        let execute = *self.execute();
        let copied = Arc::new(StorageContainer::new_file(destination, self));
        let _copied_handle = copied.request_access(AccessRequest::new(FileAccess::WRITE, FileShare::NONE))?;
        copied.load_content_from(&source_container)?;
        let mut attributes = source_container.stored_attributes();
        if execute.is_windows() {
            attributes |= FileAttributes::ARCHIVE;
        }
        copied.restore_attributes(attributes);
        if execute.is_mac() {
            copied
                .last_access_time()
                .set(source_container.last_access_time().get(TimeKind::Local), TimeKind::Local);
        }
        if !execute.is_windows() {
            copied
                .creation_time()
                .set(source_container.creation_time().get(TimeKind::Local), TimeKind::Local);
        }
        copied
            .last_write_time()
            .set(source_container.last_write_time().get(TimeKind::Local), TimeKind::Local);
        source_container
            .extensibility()
            .copy_metadata_to(copied.extensibility());

        let (change_type, notify_filters) = if existing.is_some() {
            (WatcherChangeTypes::CHANGED, NotifyFilters::LAST_WRITE | NotifyFilters::SIZE)
        } else {
            (WatcherChangeTypes::CREATED, NotifyFilters::FILE_NAME)
        };
        let change = match self.change_handler().notify_pending_change(
            change_type,
            FileSystemTypes::FILE,
            notify_filters,
            destination,
            None,
        ) {
            Ok(change) => change,
            Err(err) => {
                copied.clear_bytes();
                return Err(err);
            }
        };

        let replaced = match self.containers.entry(destination.clone()) {
            Entry::Occupied(mut entry) if overwrite => Ok(Some(entry.insert(copied.clone()))),
            Entry::Occupied(_) => Err(self.already_exists(destination)),
            Entry::Vacant(entry) => {
                entry.insert(copied.clone());
                Ok(None)
            }
        };
        let replaced = match replaced {
            Ok(replaced) => replaced,
            Err(err) => {
                copied.clear_bytes();
                return Err(err);
            }
        };
        if let Some(replaced) = replaced {
            replaced.clear_bytes();
        } else {
            self.adjust_parent_times(destination);
        }
        execute.on_linux(|| source_container.adjust_times(TimeAdjustments::LAST_ACCESS_TIME));

        tracing::debug!(source = %source, destination = %destination, "copied");
        self.change_handler().notify_completed_change(change);
        Ok(Some(destination.clone()))
    }

    fn already_exists(&self, location: &StorageLocation) -> StorageError {
        StorageError::AlreadyExists {
            path: location.full_path().to_string(),
            hresult: self.execute().windows_or(hresult::FILE_EXISTS, hresult::EEXIST),
        }
    }

    // ---- delete ----

    /// Deletes an entry. Returns `false` if it was already absent.
    pub fn delete_container(&self, location: &StorageLocation, recursive: bool) -> Result<bool> {
        let Some(container) = self.get_container(location) else {
            if let Some(parent) = location.get_parent() {
                if !self.contains(&parent) {
                    return Err(StorageError::DirectoryNotFound {
                        path: parent.full_path().to_string(),
                    });
                }
            }
            return Ok(false);
        };

        if container.is_directory() {
            let children = self.direct_children(location);
            if recursive {
                for child in &children {
                    self.delete_container(child, true)?;
                }
            } else if !children.is_empty() {
                return Err(self.directory_not_empty(location));
            }
        }
        self.check_parent_writable(location)?;

        let file_system_type = container.container_type().as_file_system_types();
        let change = self.change_handler().notify_pending_change(
            WatcherChangeTypes::DELETED,
            file_system_type,
            NotifyFilters::name_filter_for(file_system_type),
            location,
            None,
        )?;

        let mut request = AccessRequest::new(FileAccess::WRITE, FileShare::READ_WRITE).with_delete_access();
        if !self.execute().is_windows() {
            request = request.ignoring_metadata_errors();
        }
        let removed = {
            let _handle = container.request_access(request)?;
            self.containers
                .remove_if(location, |_, stored| Arc::ptr_eq(stored, &container))
        };
        let Some((_, removed)) = removed else {
            return Ok(false);
        };
        removed.clear_bytes();

        tracing::debug!(path = %location, recursive, "deleted");
        self.change_handler().notify_completed_change(change);
        self.adjust_parent_times(location);
        Ok(true)
    }

    fn directory_not_empty(&self, location: &StorageLocation) -> StorageError {
        let execute = self.execute();
        let hresult = if execute.is_windows() {
            hresult::DIRECTORY_NOT_EMPTY
        } else if execute.is_mac() {
            hresult::ENOTEMPTY_MAC
        } else {
            hresult::ENOTEMPTY_LINUX
        };
        StorageError::DirectoryNotEmpty {
            path: location.full_path().to_string(),
            hresult,
        }
    }

    // ---- move ----

    /// Moves an entry (and with `recursive` its subtree).
    ///
    /// Every relocation is recorded; if any step fails, the recorded steps are
    /// undone in reverse order before the error is returned. Containers
    /// displaced by `overwrite` are only cleared once the whole move has
    /// succeeded. Returns `None` if the source does not exist.
    pub fn move_location(
        &self,
        source: &StorageLocation,
        destination: &StorageLocation,
        overwrite: bool,
        recursive: bool,
    ) -> Result<Option<StorageLocation>> {
        self.ensure_parent_exists(destination, |parent| StorageError::DirectoryNotFound {
            path: parent.full_path().to_string(),
        })?;
        if destination.is_descendant_of(source) {
            return Err(StorageError::MoveIntoSelf {
                path: source.full_path().to_string(),
            });
        }

        let mut steps = Vec::new();
        match self.move_internal(source, destination, overwrite, recursive, None, &mut steps) {
            Ok(moved) => {
                for displaced in steps.iter().filter_map(|step| step.displaced.as_ref()) {
                    displaced.discard_bytes();
                }
                if moved.is_some() {
                    tracing::debug!(source = %source, destination = %destination, entries = steps.len(), "moved");
                }
                Ok(moved)
            }
            Err(err) => {
                if !steps.is_empty() {
                    tracing::warn!(
                        source = %source,
                        destination = %destination,
                        error = %err,
                        steps = steps.len(),
                        "move failed, rolling back"
                    );
                }
                for step in steps.iter().rev() {
                    self.undo_move_step(step);
                }
                Err(err)
            }
        }
    }

    fn move_internal(
        &self,
        source: &StorageLocation,
        destination: &StorageLocation,
        overwrite: bool,
        recursive: bool,
        source_type: Option<ContainerType>,
        steps: &mut Vec<MoveStep>,
    ) -> Result<Option<StorageLocation>> {
        let Some(container) = self.get_container(source) else {
            return Ok(None);
        };
        let execute = *self.execute();
        let container_type = container.container_type();
        if container_type == ContainerType::Directory
            && execute.paths_equal(source.full_path(), destination.full_path())
        {
            return Err(StorageError::SameSourceAndDestination);
        }
        let source_type = source_type.unwrap_or(container_type);
        if overwrite && container_type == ContainerType::File && self.is_directory(destination) {
            return Err(StorageError::AccessDenied {
                path: destination.full_path().to_string(),
            });
        }

        let children = self.direct_children(source);
        if !children.is_empty() && !recursive {
            return Err(self.directory_not_empty(source));
        }

        let access_hresult = if source_type == ContainerType::Directory {
            hresult::ACCESS_DENIED
        } else {
            hresult::SHARING_VIOLATION
        };
        let _handle = container.request_access(
            AccessRequest::new(FileAccess::WRITE, FileShare::NONE)
                .ignoring_metadata_errors()
                .with_hresult(access_hresult),
        )?;

        for child in &children {
            let child_destination = self.rebase(child, source, destination)?;
            self.move_internal(child, &child_destination, overwrite, recursive, Some(source_type), steps)?;
        }

        let file_system_type = container_type.as_file_system_types();
        let change = self.change_handler().notify_pending_change(
            WatcherChangeTypes::RENAMED,
            file_system_type,
            NotifyFilters::name_filter_for(file_system_type),
            destination,
            Some(source),
        )?;

        let Some((_, moved)) = self
            .containers
            .remove_if(source, |_, stored| Arc::ptr_eq(stored, &container))
        else {
            return Ok(None);
        };

        let mut displaced = None;
        if overwrite {
            if let Some((_, existing)) = self.containers.remove(destination) {
                if let Some(drive) = existing.location().drive() {
                    drive.change_used_bytes(-(existing.len() as i64))?;
                }
                displaced = Some(existing);
            }
        }

        let step = MoveStep {
            container: moved.clone(),
            source: source.clone(),
            destination: destination.clone(),
            displaced,
            previous_attributes: moved.stored_attributes(),
            len: moved.len(),
        };

        let inserted = match self.containers.entry(destination.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(moved.clone());
                true
            }
        };
        if !inserted {
            self.containers.insert(source.clone(), moved);
            self.restore_displaced(&step);
            let hresult = if source_type == ContainerType::Directory {
                hresult::ACCESS_DENIED
            } else {
                execute.windows_or(hresult::ALREADY_EXISTS, hresult::EEXIST)
            };
            return Err(StorageError::AlreadyExists {
                path: destination.full_path().to_string(),
                hresult,
            });
        }

        if let Err(err) = transfer_used_bytes(source.drive(), destination.drive(), step.len) {
            self.containers
                .remove_if(destination, |_, stored| Arc::ptr_eq(stored, &moved));
            self.containers.insert(source.clone(), moved);
            self.restore_displaced(&step);
            return Err(err);
        }
        moved.relocate(destination.clone());
        if execute.is_windows() && container_type == ContainerType::File {
            moved.restore_attributes(step.previous_attributes | FileAttributes::ARCHIVE);
        }

        steps.push(step);
        self.change_handler().notify_completed_change(change);
        Ok(Some(destination.clone()))
    }

    /// The path `child` takes when its ancestor `source` moves to `destination`.
    fn rebase(
        &self,
        child: &StorageLocation,
        source: &StorageLocation,
        destination: &StorageLocation,
    ) -> Result<StorageLocation> {
        let execute = self.execute();
        let prefix = execute.with_trailing_separator(source.full_path());
        let relative = child.full_path().get(prefix.len()..).unwrap_or_default();
        let path = execute.combine(destination.full_path(), relative);
        self.get_location(Some(&path))
    }

    fn undo_move_step(&self, step: &MoveStep) {
        self.containers
            .remove_if(&step.destination, |_, stored| Arc::ptr_eq(stored, &step.container));
        if let Err(err) = transfer_used_bytes(step.destination.drive(), step.source.drive(), step.len) {
            tracing::warn!(path = %step.source, error = %err, "could not restore drive usage");
        }
        step.container.relocate(step.source.clone());
        step.container.restore_attributes(step.previous_attributes);
        self.containers
            .insert(step.source.clone(), step.container.clone());
        self.restore_displaced(step);

        let file_system_type = step.container.container_type().as_file_system_types();
        match self.change_handler().notify_pending_change(
            WatcherChangeTypes::RENAMED,
            file_system_type,
            NotifyFilters::name_filter_for(file_system_type),
            &step.source,
            Some(&step.destination),
        ) {
            Ok(change) => self.change_handler().notify_completed_change(change),
            Err(err) => {
                tracing::warn!(path = %step.source, error = %err, "rollback notification rejected")
            }
        }
    }

    fn restore_displaced(&self, step: &MoveStep) {
        let Some(displaced) = &step.displaced else {
            return;
        };
        match self.containers.entry(step.destination.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(displaced.clone());
            }
            Entry::Occupied(_) => {
                tracing::warn!(path = %step.destination, "displaced entry could not be restored");
                displaced.discard_bytes();
                return;
            }
        }
        if let Some(drive) = displaced.location().drive() {
            if let Err(err) = drive.change_used_bytes(displaced.len() as i64) {
                tracing::warn!(path = %step.destination, error = %err, "could not restore drive usage");
            }
        }
    }

    // ---- replace ----

    /// Replaces `destination` with `source`, optionally keeping the old
    /// destination at `backup`. Returns `None` if either file is missing.
    /// The three locations must be distinct.
    ///
    /// Handles are taken on the source first, then on the destination. Two
    /// concurrent replaces with swapped arguments can each hold their first
    /// handle; because requests fail instead of waiting, one of them then
    /// fails with a sharing violation.
    pub fn replace(
        &self,
        source: &StorageLocation,
        destination: &StorageLocation,
        backup: Option<&StorageLocation>,
        ignore_metadata_errors: bool,
    ) -> Result<Option<StorageLocation>> {
        let windows = self.execute().is_windows();
        self.ensure_parent_exists(destination, |parent| {
            let path = parent.full_path().to_string();
            if windows {
                StorageError::DirectoryNotFound { path }
            } else {
                StorageError::FileNotFound { path }
            }
        })?;
        if source == destination || backup.is_some_and(|b| b == source || b == destination) {
            return Err(StorageError::SameSourceAndDestination);
        }
        let Some(source_container) = self.get_container(source) else {
            return Ok(None);
        };
        let Some(destination_container) = self.get_container(destination) else {
            return Ok(None);
        };
        if !source_container.is_file() || !destination_container.is_file() {
            return Err(StorageError::AccessDenied {
                path: source.full_path().to_string(),
            });
        }

        let mut request = AccessRequest::new(FileAccess::READ_WRITE, FileShare::NONE);
        if ignore_metadata_errors {
            request = request.ignoring_metadata_errors();
        }
        let _source_handle = source_container.request_access(request)?;
        let _destination_handle = destination_container.request_access(request)?;

        let destination_len = destination_container.len();
        let source_len = source_container.len();
        match backup {
            Some(backup) => transfer_used_bytes(destination.drive(), backup.drive(), destination_len)?,
            None => transfer_used_bytes(destination.drive(), None, destination_len)?,
        }
        if let Err(err) = transfer_used_bytes(source.drive(), destination.drive(), source_len) {
            let backup_drive = backup.and_then(|b| b.drive());
            if let Err(undo) = transfer_used_bytes(backup_drive, destination.drive(), destination_len) {
                tracing::warn!(path = %destination, error = %undo, "could not restore drive usage");
            }
            return Err(err);
        }

        self.containers
            .remove_if(destination, |_, stored| Arc::ptr_eq(stored, &destination_container));
        match backup {
            Some(backup) => {
                if let Some((_, previous)) = self.containers.remove(backup) {
                    previous.clear_bytes();
                }
                if windows {
                    let attributes = destination_container.stored_attributes() | FileAttributes::ARCHIVE;
                    destination_container.restore_attributes(attributes);
                }
                destination_container.relocate(backup.clone());
                self.containers
                    .insert(backup.clone(), destination_container.clone());
            }
            None => destination_container.discard_bytes(),
        }

        self.containers
            .remove_if(source, |_, stored| Arc::ptr_eq(stored, &source_container));
        let mut attributes = destination_container.stored_attributes();
        if source_container.stored_attributes().contains(FileAttributes::READ_ONLY) {
            attributes |= FileAttributes::READ_ONLY;
        }
        if windows {
            attributes |= FileAttributes::ARCHIVE;
        }
        source_container.restore_attributes(attributes);
        source_container
            .creation_time()
            .set_utc(destination_container.creation_time().get_utc());
        source_container.relocate(destination.clone());
        self.containers
            .insert(destination.clone(), source_container.clone());

        tracing::debug!(
            source = %source,
            destination = %destination,
            backup = backup.map(|b| b.full_path()).unwrap_or("-"),
            "replaced"
        );
        Ok(Some(destination.clone()))
    }

    // ---- enumeration ----

    /// Lazily enumerates the entries below `location`.
    ///
    /// The pattern and the existence of `location` are checked immediately;
    /// the entries themselves are read on first iteration.
    pub fn enumerate_locations(
        &self,
        location: &StorageLocation,
        types: FileSystemTypes,
        pattern: &str,
        options: Option<EnumerationOptions>,
    ) -> Result<EnumerateLocations<'_>> {
        validate_expression(pattern)?;
        if !self.contains(location) {
            return Err(StorageError::DirectoryNotFound {
                path: location.full_path().to_string(),
            });
        }
        let options = options.unwrap_or_default();
        let matcher = NameMatcher::for_options(pattern, self.execute(), &options)?;
        Ok(EnumerateLocations::new(
            self,
            location.clone(),
            types,
            matcher,
            options,
        ))
    }

    // ---- links ----

    /// Resolves the target of a symbolic link at `location`.
    ///
    /// Returns `None` if `location` is not a link. With `return_final_target`
    /// the chain is followed until it reaches a non-link or a missing entry;
    /// chains longer than the OS limit fail with `NameCannotBeResolved`.
    /// Relative targets resolve against the link's directory.
    pub fn resolve_link_target(
        &self,
        location: &StorageLocation,
        return_final_target: bool,
    ) -> Result<Option<StorageLocation>> {
        let Some(target) = self.get_container(location).and_then(|c| c.link_target()) else {
            return Ok(None);
        };
        let mut next = self.link_location(location, &target)?;
        if !return_final_target {
            return Ok(Some(next));
        }

        let max_hops = self.execute().max_link_hops();
        let mut hops = 1;
        loop {
            let Some(target) = self.get_container(&next).and_then(|c| c.link_target()) else {
                return Ok(Some(next));
            };
            hops += 1;
            if hops > max_hops {
                return Err(StorageError::NameCannotBeResolved {
                    path: location.full_path().to_string(),
                });
            }
            next = self.link_location(&next, &target)?;
        }
    }

    fn link_location(&self, link: &StorageLocation, target: &str) -> Result<StorageLocation> {
        let base = match link.get_parent() {
            Some(parent) => parent.full_path().to_string(),
            None => self.current_directory(),
        };
        self.location_relative_to(Some(target), &base)
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InMemoryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (mut directories, mut files) = (0, 0);
        for entry in self.containers.iter() {
            if entry.value().is_directory() {
                directories += 1;
            } else {
                files += 1;
            }
        }
        write!(f, "directories: {}, files: {}", directories, files)
    }
}

impl fmt::Debug for InMemoryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryStorage")
            .field("os", &self.execute().os())
            .field("current_directory", &self.current_directory())
            .field("containers", &self.containers.len())
            .field("drives", &self.drives.len())
            .finish()
    }
}

fn drive_key(name: &str) -> String {
    name.to_lowercase()
}

/// Moves `len` bytes of usage between drives. `None` on either side means the
/// bytes appear or disappear. The target is charged first, so a full target
/// leaves both drives untouched.
fn transfer_used_bytes(
    from: Option<&Arc<StorageDrive>>,
    to: Option<&Arc<StorageDrive>>,
    len: usize,
) -> Result<()> {
    if len == 0 {
        return Ok(());
    }
    if let (Some(from), Some(to)) = (from, to) {
        if Arc::ptr_eq(from, to) {
            return Ok(());
        }
    }
    let len = len as i64;
    if let Some(to) = to {
        to.change_used_bytes(len)?;
    }
    if let Some(from) = from {
        from.change_used_bytes(-len)?;
    }
    Ok(())
}
