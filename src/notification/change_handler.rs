//! Change Handler
//!
//! Two-phase delivery of change notifications. The engine calls
//! `notify_pending_change` before it applies a mutation and
//! `notify_completed_change` once the mutation has succeeded. Callbacks run
//! synchronously on the mutating thread; no registry lock is held while they
//! run, so a callback may register or drop subscriptions.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::types::{ChangeDescription, NotifyFilters, WatcherChangeTypes, WatcherOptions};
use crate::platform::Execute;
use crate::storage::enumeration::NameMatcher;
use crate::storage::{FileSystemTypes, MatchType, Result, StorageLocation};

type PendingCallback = dyn Fn(&ChangeDescription) -> Result<()> + Send + Sync;
type ChangeCallback = dyn Fn(&ChangeDescription) + Send + Sync;

struct Watcher {
    path: String,
    matcher: NameMatcher,
    notify_filters: NotifyFilters,
    include_subdirectories: bool,
    callback: Arc<ChangeCallback>,
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    interceptors: RwLock<Vec<(u64, Arc<PendingCallback>)>>,
    observers: RwLock<Vec<(u64, Arc<ChangeCallback>)>>,
    watchers: RwLock<Vec<(u64, Arc<Watcher>)>>,
}

impl Registry {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn is_empty(&self) -> bool {
        self.interceptors.read().is_empty()
            && self.observers.read().is_empty()
            && self.watchers.read().is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
enum SubscriptionKind {
    Interceptor,
    Observer,
    Watcher,
}

/// Keeps a registration alive; dropping it unregisters the callback.
#[must_use = "dropping a Subscription unregisters it immediately"]
pub struct Subscription {
    registry: Weak<Registry>,
    kind: SubscriptionKind,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        match self.kind {
            SubscriptionKind::Interceptor => registry.interceptors.write().retain(|(id, _)| *id != self.id),
            SubscriptionKind::Observer => registry.observers.write().retain(|(id, _)| *id != self.id),
            SubscriptionKind::Watcher => registry.watchers.write().retain(|(id, _)| *id != self.id),
        }
    }
}

/// Dispatches change notifications of one storage.
#[derive(Clone)]
pub struct ChangeHandler {
    execute: Execute,
    registry: Arc<Registry>,
}

impl ChangeHandler {
    pub fn new(execute: Execute) -> Self {
        Self {
            execute,
            registry: Arc::new(Registry::default()),
        }
    }

    /// Registers a callback that sees every change before it is applied.
    ///
    /// Returning an error aborts the mutation; the error is propagated to the
    /// caller of the storage operation unchanged.
    pub fn on_pending<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ChangeDescription) -> Result<()> + Send + Sync + 'static,
    {
        let id = self.registry.next_id();
        self.registry.interceptors.write().push((id, Arc::new(callback)));
        self.subscription(SubscriptionKind::Interceptor, id)
    }

    /// Registers a callback that sees every completed change.
    pub fn on_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ChangeDescription) + Send + Sync + 'static,
    {
        let id = self.registry.next_id();
        self.registry.observers.write().push((id, Arc::new(callback)));
        self.subscription(SubscriptionKind::Observer, id)
    }

    /// Registers a watcher on a directory.
    pub fn watch<F>(&self, options: WatcherOptions, callback: F) -> Result<Subscription>
    where
        F: Fn(&ChangeDescription) + Send + Sync + 'static,
    {
        let path = self.execute.validate_path(Some(&options.path))?;
        let path = self.execute.get_full_path(path, &self.execute.default_root());
        let matcher = NameMatcher::new(&options.filter, self.execute.ignore_case(), MatchType::Win32)?;
        let watcher = Watcher {
            path,
            matcher,
            notify_filters: options.notify_filters,
            include_subdirectories: options.include_subdirectories,
            callback: Arc::new(callback),
        };
        let id = self.registry.next_id();
        self.registry.watchers.write().push((id, Arc::new(watcher)));
        Ok(self.subscription(SubscriptionKind::Watcher, id))
    }

    fn subscription(&self, kind: SubscriptionKind, id: u64) -> Subscription {
        Subscription {
            registry: Arc::downgrade(&self.registry),
            kind,
            id,
        }
    }

    /// Describes an upcoming change and runs the interceptors.
    ///
    /// Returns `Ok(None)` when nobody is listening.
    pub fn notify_pending_change(
        &self,
        change_type: WatcherChangeTypes,
        file_system_type: FileSystemTypes,
        notify_filters: NotifyFilters,
        location: &StorageLocation,
        old_location: Option<&StorageLocation>,
    ) -> Result<Option<ChangeDescription>> {
        if self.registry.is_empty() {
            return Ok(None);
        }
        let change = ChangeDescription {
            change_type,
            file_system_type,
            notify_filters,
            path: location.full_path().to_string(),
            name: Some(location.name().to_string()),
            old_path: old_location.map(|l| l.full_path().to_string()),
            old_name: old_location.map(|l| l.name().to_string()),
        };
        let interceptors: Vec<Arc<PendingCallback>> = self
            .registry
            .interceptors
            .read()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for interceptor in interceptors {
            interceptor(&change)?;
        }
        Ok(Some(change))
    }

    /// Delivers a change captured by `notify_pending_change`.
    pub fn notify_completed_change(&self, change: Option<ChangeDescription>) {
        let Some(change) = change else {
            return;
        };
        tracing::trace!(change = %change, "delivering change notification");

        let observers: Vec<Arc<ChangeCallback>> = self
            .registry
            .observers
            .read()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for observer in observers {
            observer(&change);
        }

        let watchers: Vec<Arc<Watcher>> = self
            .registry
            .watchers
            .read()
            .iter()
            .filter(|(_, watcher)| self.matches(watcher, &change))
            .map(|(_, watcher)| watcher.clone())
            .collect();
        for watcher in watchers {
            (watcher.callback)(&change);
        }
    }

    fn matches(&self, watcher: &Watcher, change: &ChangeDescription) -> bool {
        if !watcher.notify_filters.intersects(change.notify_filters) {
            return false;
        }
        let candidates = std::iter::once((&change.path, &change.name))
            .chain(change.old_path.as_ref().map(|p| (p, &change.old_name)));
        for (path, name) in candidates {
            let in_scope = match self.execute.get_directory_name(path) {
                Some(parent) if self.execute.paths_equal(&parent, &watcher.path) => true,
                Some(_) if watcher.include_subdirectories => {
                    let prefix = self.execute.with_trailing_separator(&watcher.path);
                    self.execute.path_starts_with(path, &prefix)
                }
                _ => false,
            };
            let name = name.as_deref().unwrap_or_default();
            if in_scope && watcher.matcher.is_match(name) {
                return true;
            }
        }
        false
    }
}

impl std::fmt::Debug for ChangeHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeHandler")
            .field("interceptors", &self.registry.interceptors.read().len())
            .field("observers", &self.registry.observers.read().len())
            .field("watchers", &self.registry.watchers.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::SimulatedOs;
    use crate::storage::StorageError;
    use parking_lot::Mutex;

    fn linux() -> Execute {
        Execute::new(SimulatedOs::Linux)
    }

    fn location(path: &str) -> StorageLocation {
        StorageLocation::new(linux(), None, path.to_string(), path.to_string())
    }

    fn created(handler: &ChangeHandler, path: &str) -> Result<Option<ChangeDescription>> {
        handler.notify_pending_change(
            WatcherChangeTypes::CREATED,
            FileSystemTypes::FILE,
            NotifyFilters::FILE_NAME,
            &location(path),
            None,
        )
    }

    #[test]
    fn test_pending_without_listeners_is_none() {
        let handler = ChangeHandler::new(linux());
        let change = created(&handler, "/a.txt").unwrap();
        assert!(change.is_none());
        handler.notify_completed_change(change);
    }

    #[test]
    fn test_observer_receives_completed_change_only() {
        let handler = ChangeHandler::new(linux());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _guard = handler.on_change(move |c| sink.lock().push(c.path.clone()));

        let change = created(&handler, "/a.txt").unwrap();
        assert!(seen.lock().is_empty());
        assert_eq!(change.as_ref().and_then(|c| c.name.clone()).as_deref(), Some("a.txt"));
        handler.notify_completed_change(change);
        assert_eq!(*seen.lock(), vec!["/a.txt".to_string()]);
    }

    #[test]
    fn test_interceptor_error_aborts() {
        let handler = ChangeHandler::new(linux());
        let _guard = handler.on_pending(|c| {
            Err(StorageError::AccessDenied { path: c.path.clone() })
        });
        assert_eq!(
            created(&handler, "/a.txt").unwrap_err(),
            StorageError::AccessDenied { path: "/a.txt".to_string() }
        );
    }

    #[test]
    fn test_dropping_subscription_unregisters() {
        let handler = ChangeHandler::new(linux());
        let guard = handler.on_change(|_| {});
        assert!(created(&handler, "/a").unwrap().is_some());
        drop(guard);
        assert!(created(&handler, "/a").unwrap().is_none());
    }

    #[test]
    fn test_watcher_scope_and_filter() {
        let handler = ChangeHandler::new(linux());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _guard = handler
            .watch(WatcherOptions::new("/logs").with_filter("*.log"), move |c| {
                sink.lock().push(c.path.clone())
            })
            .unwrap();

        for path in ["/logs/a.log", "/logs/a.txt", "/logs/sub/b.log", "/other/c.log"] {
            let change = created(&handler, path).unwrap();
            handler.notify_completed_change(change);
        }
        assert_eq!(*seen.lock(), vec!["/logs/a.log".to_string()]);
    }

    #[test]
    fn test_watcher_include_subdirectories_and_notify_filters() {
        let handler = ChangeHandler::new(linux());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let options = WatcherOptions::new("/logs")
            .include_subdirectories(true)
            .with_notify_filters(NotifyFilters::FILE_NAME);
        let _guard = handler
            .watch(options, move |c| sink.lock().push(c.path.clone()))
            .unwrap();

        let change = created(&handler, "/logs/sub/b.log").unwrap();
        handler.notify_completed_change(change);
        let change = handler
            .notify_pending_change(
                WatcherChangeTypes::CHANGED,
                FileSystemTypes::FILE,
                NotifyFilters::ATTRIBUTES,
                &location("/logs/sub/b.log"),
                None,
            )
            .unwrap();
        handler.notify_completed_change(change);
        assert_eq!(*seen.lock(), vec!["/logs/sub/b.log".to_string()]);
    }

    #[test]
    fn test_rename_carries_old_location() {
        let handler = ChangeHandler::new(linux());
        let _guard = handler.on_change(|_| {});
        let change = handler
            .notify_pending_change(
                WatcherChangeTypes::RENAMED,
                FileSystemTypes::FILE,
                NotifyFilters::FILE_NAME,
                &location("/b.txt"),
                Some(&location("/a.txt")),
            )
            .unwrap()
            .unwrap();
        assert_eq!(change.old_path.as_deref(), Some("/a.txt"));
        assert_eq!(change.old_name.as_deref(), Some("a.txt"));
        assert!(change.to_string().starts_with("Renamed File /b.txt (from /a.txt)"));
    }
}
