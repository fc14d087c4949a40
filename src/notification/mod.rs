//! Change Notification Module
//!
//! Watchers, observers and interceptors of storage mutations.

pub mod change_handler;
pub mod types;

pub use change_handler::{ChangeHandler, Subscription};
pub use types::{ChangeDescription, NotifyFilters, WatcherChangeTypes, WatcherOptions};
