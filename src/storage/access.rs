//! Access Handles
//!
//! A container grants access through scoped handles. While a handle is alive
//! it is recorded on the container; later requests are checked against every
//! outstanding handle and fail immediately on conflict. Dropping the handle
//! releases it.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::types::{hresult, FileAccess, FileShare};
use crate::platform::Execute;

/// Parameters of an access request. Defaults match a plain open: no delete
/// access, metadata errors enforced, standard sharing-violation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessRequest {
    pub access: FileAccess,
    pub share: FileShare,
    pub delete_access: bool,
    pub ignore_metadata_errors: bool,
    pub hresult: Option<i32>,
}

impl AccessRequest {
    pub fn new(access: FileAccess, share: FileShare) -> Self {
        Self {
            access,
            share,
            delete_access: false,
            ignore_metadata_errors: false,
            hresult: None,
        }
    }

    pub fn with_delete_access(mut self) -> Self {
        self.delete_access = true;
        self
    }

    pub fn ignoring_metadata_errors(mut self) -> Self {
        self.ignore_metadata_errors = true;
        self
    }

    pub fn with_hresult(mut self, hresult: i32) -> Self {
        self.hresult = Some(hresult);
        self
    }

    pub(crate) fn sharing_violation_hresult(&self) -> i32 {
        self.hresult.unwrap_or(hresult::SHARING_VIOLATION)
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct HandleInfo {
    pub access: FileAccess,
    pub share: FileShare,
    pub delete_access: bool,
}

impl HandleInfo {
    /// Whether a new `request` can coexist with this outstanding handle.
    ///
    /// Windows enforces share modes. Other systems only lock advisorily, so
    /// every share is treated as `ReadWrite` and delete is always allowed.
    pub fn admits(&self, request: &AccessRequest, execute: &Execute) -> bool {
        if !execute.is_windows() {
            return true;
        }
        if request.delete_access || self.delete_access {
            let existing_allows = !request.delete_access || self.share.contains(FileShare::DELETE);
            let request_allows = !self.delete_access || request.share.contains(FileShare::DELETE);
            return existing_allows && request_allows;
        }
        share_allows(self.share, request.access) && share_allows(request.share, self.access)
    }
}

fn share_allows(share: FileShare, access: FileAccess) -> bool {
    (!access.contains(FileAccess::READ) || share.contains(FileShare::READ))
        && (!access.contains(FileAccess::WRITE) || share.contains(FileShare::WRITE))
}

pub(crate) type HandleRegistry = Arc<Mutex<HashMap<u64, HandleInfo>>>;

/// A granted access on a container, released on drop.
#[must_use = "dropping an AccessHandle releases the access immediately"]
pub struct AccessHandle {
    id: u64,
    info: HandleInfo,
    path: String,
    registry: HandleRegistry,
}

impl AccessHandle {
    pub(crate) fn new(id: u64, info: HandleInfo, path: String, registry: HandleRegistry) -> Self {
        tracing::trace!(path = %path, id, access = %info.access, share = %info.share, "access granted");
        Self {
            id,
            info,
            path,
            registry,
        }
    }

    pub fn access(&self) -> FileAccess {
        self.info.access
    }

    pub fn share(&self) -> FileShare {
        self.info.share
    }

    pub fn delete_access(&self) -> bool {
        self.info.delete_access
    }
}

impl Drop for AccessHandle {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
        tracing::trace!(path = %self.path, id = self.id, "access released");
    }
}

impl fmt::Display for AccessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.info.delete_access {
            write!(f, "Delete | {}", self.info.share)
        } else {
            write!(f, "{} | {}", self.info.access, self.info.share)
        }
    }
}

impl fmt::Debug for AccessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessHandle")
            .field("path", &self.path)
            .field("access", &self.info.access)
            .field("share", &self.info.share)
            .field("delete_access", &self.info.delete_access)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::SimulatedOs;

    fn info(access: FileAccess, share: FileShare) -> HandleInfo {
        HandleInfo {
            access,
            share,
            delete_access: false,
        }
    }

    #[test]
    fn test_share_lattice_on_windows() {
        let exec = Execute::new(SimulatedOs::Windows);
        let read = AccessRequest::new(FileAccess::READ, FileShare::READ);
        let write = AccessRequest::new(FileAccess::WRITE, FileShare::READ_WRITE);

        assert!(!info(FileAccess::READ, FileShare::NONE).admits(&read, &exec));
        assert!(info(FileAccess::READ, FileShare::READ).admits(&read, &exec));
        assert!(!info(FileAccess::READ, FileShare::READ).admits(&write, &exec));
        assert!(info(FileAccess::READ, FileShare::READ_WRITE).admits(&write, &exec));
        // the new request must also tolerate the existing access
        assert!(!info(FileAccess::WRITE, FileShare::READ_WRITE).admits(&read, &exec));
    }

    #[test]
    fn test_delete_access_requires_delete_share_on_windows() {
        let exec = Execute::new(SimulatedOs::Windows);
        let delete = AccessRequest::new(FileAccess::READ_WRITE, FileShare::NONE).with_delete_access();
        assert!(!info(FileAccess::READ, FileShare::READ_WRITE).admits(&delete, &exec));
        assert!(info(FileAccess::READ, FileShare::READ | FileShare::DELETE).admits(&delete, &exec));
    }

    #[test]
    fn test_sharing_is_advisory_off_windows() {
        let exec = Execute::new(SimulatedOs::Linux);
        let request = AccessRequest::new(FileAccess::READ_WRITE, FileShare::NONE).with_delete_access();
        assert!(info(FileAccess::READ_WRITE, FileShare::NONE).admits(&request, &exec));
    }

    #[test]
    fn test_request_defaults() {
        let request = AccessRequest::new(FileAccess::READ, FileShare::NONE);
        assert!(!request.delete_access);
        assert!(!request.ignore_metadata_errors);
        assert_eq!(request.sharing_violation_hresult(), hresult::SHARING_VIOLATION);
        assert_eq!(request.with_hresult(-1).sharing_violation_hresult(), -1);
    }

    #[test]
    fn test_handle_releases_on_drop() {
        let registry: HandleRegistry = Arc::default();
        let handle_info = info(FileAccess::READ, FileShare::NONE);
        registry.lock().insert(1, handle_info);
        let handle = AccessHandle::new(1, handle_info, "/a".to_string(), registry.clone());
        assert_eq!(handle.to_string(), "Read | None");
        drop(handle);
        assert!(registry.lock().is_empty());
    }
}
