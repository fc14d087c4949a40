//! Storage Types
//!
//! Errors, flag sets and small value types shared by locations, containers,
//! drives and the storage engine.

use bitflags::bitflags;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// Diagnostic codes attached to errors (Windows HRESULTs or Unix errno values).
pub mod hresult {
    pub const ARGUMENT_NULL: i32 = -2147467261;
    pub const INVALID_ARGUMENT: i32 = -2147024809;
    pub const INVALID_NAME: i32 = -2147024773;
    pub const FILE_NOT_FOUND: i32 = -2147024894;
    pub const DIRECTORY_NOT_FOUND: i32 = -2147024893;
    pub const ACCESS_DENIED: i32 = -2147024891;
    pub const SHARING_VIOLATION: i32 = -2147024864;
    pub const FILE_EXISTS: i32 = -2147024816;
    pub const ALREADY_EXISTS: i32 = -2147024713;
    pub const DIRECTORY_NOT_EMPTY: i32 = -2147024751;
    pub const NOT_ENOUGH_SPACE: i32 = -2147024784;
    pub const BAD_NETPATH: i32 = -2147024843;
    pub const CANT_RESOLVE_FILENAME: i32 = -2147022975;
    pub const IO_ERROR: i32 = -2146232800;

    pub const EEXIST: i32 = 17;
    pub const ENOTEMPTY_LINUX: i32 = 39;
    pub const ENOTEMPTY_MAC: i32 = 66;
}

/// Storage errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Value cannot be null. (Parameter '{param}')")]
    ArgumentNull { param: String },

    #[error("The path cannot be empty. (Parameter 'path')")]
    EmptyPath,

    #[error("Illegal characters in path '{path}'.")]
    IllegalCharacters { path: String },

    #[error("The filename, directory name, or volume label syntax is incorrect: '{path}'")]
    IncorrectSyntax { path: String },

    #[error("Drive name must be a root directory, a drive letter or a UNC share: '{name}'")]
    InvalidDriveName { name: String },

    #[error("Could not find a part of the path '{path}'.")]
    DirectoryNotFound { path: String },

    #[error("Could not find file '{path}'.")]
    FileNotFound { path: String },

    #[error("Cannot create '{path}' because a file or directory with the same name already exists.")]
    AlreadyExists { path: String, hresult: i32 },

    #[error("Access to the path '{path}' is denied.")]
    AccessDenied { path: String },

    #[error("The process cannot access the file '{path}' because it is being used by another process.")]
    SharingViolation { path: String, hresult: i32 },

    #[error("Directory not empty: '{path}'")]
    DirectoryNotEmpty { path: String, hresult: i32 },

    #[error("Source and destination path must be different.")]
    SameSourceAndDestination,

    #[error("Cannot move '{path}' into a subdirectory of itself.")]
    MoveIntoSelf { path: String },

    #[error("The name of the file cannot be resolved by the system: '{path}'")]
    NameCannotBeResolved { path: String },

    #[error("The network path was not found: '{path}'")]
    DriveNotReady { path: String },

    #[error("There is not enough space on the disk '{drive}' (requested {requested} bytes).")]
    NotEnoughSpace { drive: String, requested: u64 },
}

/// Coarse classification of a `StorageError`, for callers that map errors
/// onto their own platform conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    PathInvalid,
    NotFound,
    AlreadyExists,
    AccessDenied,
    SharingViolation,
    NotEmpty,
    LinkResolutionFailure,
    Io,
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ArgumentNull { .. }
            | Self::EmptyPath
            | Self::IllegalCharacters { .. }
            | Self::IncorrectSyntax { .. }
            | Self::InvalidDriveName { .. } => ErrorKind::PathInvalid,
            Self::DirectoryNotFound { .. } | Self::FileNotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::AccessDenied { .. } => ErrorKind::AccessDenied,
            Self::SharingViolation { .. } => ErrorKind::SharingViolation,
            Self::DirectoryNotEmpty { .. } => ErrorKind::NotEmpty,
            Self::NameCannotBeResolved { .. } => ErrorKind::LinkResolutionFailure,
            Self::SameSourceAndDestination
            | Self::MoveIntoSelf { .. }
            | Self::DriveNotReady { .. }
            | Self::NotEnoughSpace { .. } => ErrorKind::Io,
        }
    }

    pub fn hresult(&self) -> i32 {
        match self {
            Self::ArgumentNull { .. } => hresult::ARGUMENT_NULL,
            Self::EmptyPath | Self::IllegalCharacters { .. } | Self::InvalidDriveName { .. } => {
                hresult::INVALID_ARGUMENT
            }
            Self::IncorrectSyntax { .. } => hresult::INVALID_NAME,
            Self::DirectoryNotFound { .. } => hresult::DIRECTORY_NOT_FOUND,
            Self::FileNotFound { .. } => hresult::FILE_NOT_FOUND,
            Self::AccessDenied { .. } => hresult::ACCESS_DENIED,
            Self::AlreadyExists { hresult, .. }
            | Self::SharingViolation { hresult, .. }
            | Self::DirectoryNotEmpty { hresult, .. } => *hresult,
            Self::SameSourceAndDestination | Self::MoveIntoSelf { .. } => hresult::IO_ERROR,
            Self::NameCannotBeResolved { .. } => hresult::CANT_RESOLVE_FILENAME,
            Self::DriveNotReady { .. } => hresult::BAD_NETPATH,
            Self::NotEnoughSpace { .. } => hresult::NOT_ENOUGH_SPACE,
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

bitflags! {
    /// Which kinds of entries an operation applies to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FileSystemTypes: u8 {
        const FILE = 1;
        const DIRECTORY = 2;
        const DIRECTORY_OR_FILE = Self::FILE.bits() | Self::DIRECTORY.bits();
    }
}

impl fmt::Display for FileSystemTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::DIRECTORY_OR_FILE {
            write!(f, "DirectoryOrFile")
        } else if *self == Self::FILE {
            write!(f, "File")
        } else if *self == Self::DIRECTORY {
            write!(f, "Directory")
        } else {
            write!(f, "Unknown")
        }
    }
}

bitflags! {
    /// File attributes, using the Windows bit values.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FileAttributes: u32 {
        const READ_ONLY = 0x1;
        const HIDDEN = 0x2;
        const SYSTEM = 0x4;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
        const DEVICE = 0x40;
        const NORMAL = 0x80;
        const TEMPORARY = 0x100;
        const SPARSE_FILE = 0x200;
        const REPARSE_POINT = 0x400;
        const COMPRESSED = 0x800;
        const OFFLINE = 0x1000;
        const NOT_CONTENT_INDEXED = 0x2000;
        const ENCRYPTED = 0x4000;
        const INTEGRITY_STREAM = 0x8000;
        const NO_SCRUB_DATA = 0x20000;
    }
}

bitflags! {
    /// Requested access on an access handle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FileAccess: u8 {
        const READ = 1;
        const WRITE = 2;
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl fmt::Display for FileAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.contains(Self::READ_WRITE) {
            write!(f, "ReadWrite")
        } else if self.contains(Self::WRITE) {
            write!(f, "Write")
        } else if self.contains(Self::READ) {
            write!(f, "Read")
        } else {
            write!(f, "0")
        }
    }
}

bitflags! {
    /// Concurrent access an access handle tolerates.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FileShare: u8 {
        const READ = 1;
        const WRITE = 2;
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
        const DELETE = 4;
        const INHERITABLE = 16;
    }
}

impl FileShare {
    pub const NONE: Self = Self::empty();
}

impl fmt::Display for FileShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "None");
        }
        let mut parts = Vec::new();
        if self.contains(Self::READ_WRITE) {
            parts.push("ReadWrite");
        } else if self.contains(Self::READ) {
            parts.push("Read");
        } else if self.contains(Self::WRITE) {
            parts.push("Write");
        }
        if self.contains(Self::DELETE) {
            parts.push("Delete");
        }
        if self.contains(Self::INHERITABLE) {
            parts.push("Inheritable");
        }
        write!(f, "{}", parts.join(", "))
    }
}

bitflags! {
    /// Which timestamps `adjust_times` refreshes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TimeAdjustments: u8 {
        const CREATION_TIME = 1;
        const LAST_ACCESS_TIME = 2;
        const LAST_WRITE_TIME = 4;
        const ALL = Self::CREATION_TIME.bits()
            | Self::LAST_ACCESS_TIME.bits()
            | Self::LAST_WRITE_TIME.bits();
    }
}

/// How a `FileTime` value is to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeKind {
    Unspecified,
    Utc,
    Local,
}

/// A point in time tagged with its kind, as handed out by a time container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileTime {
    value: NaiveDateTime,
    kind: TimeKind,
}

impl FileTime {
    pub fn new(value: NaiveDateTime, kind: TimeKind) -> Self {
        Self { value, kind }
    }

    pub fn utc(time: DateTime<Utc>) -> Self {
        Self::new(time.naive_utc(), TimeKind::Utc)
    }

    pub fn local(time: DateTime<Local>) -> Self {
        Self::new(time.naive_local(), TimeKind::Local)
    }

    pub fn value(&self) -> NaiveDateTime {
        self.value
    }

    pub fn kind(&self) -> TimeKind {
        self.kind
    }

    /// Same wall-clock value, different kind (no conversion).
    pub fn specify_kind(self, kind: TimeKind) -> Self {
        Self::new(self.value, kind)
    }

    /// Converts to UTC; `Unspecified` is interpreted as local time.
    pub fn to_utc(&self) -> DateTime<Utc> {
        match self.kind {
            TimeKind::Utc => self.value.and_utc(),
            TimeKind::Local | TimeKind::Unspecified => Local
                .from_local_datetime(&self.value)
                .earliest()
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|| self.value.and_utc()),
        }
    }
}

/// Casing rule for search patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchCasing {
    #[default]
    PlatformDefault,
    CaseSensitive,
    CaseInsensitive,
}

/// Wildcard dialect for search patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchType {
    Simple,
    #[default]
    Win32,
}

/// Options for enumerating locations below a directory.
#[derive(Debug, Clone)]
pub struct EnumerationOptions {
    pub recurse_subdirectories: bool,
    pub match_casing: MatchCasing,
    pub match_type: MatchType,
    pub attributes_to_skip: FileAttributes,
    /// Depth below the enumerated directory; `0` yields direct children only.
    pub max_recursion_depth: usize,
}

impl EnumerationOptions {
    pub fn recursive() -> Self {
        Self {
            recurse_subdirectories: true,
            ..Self::default()
        }
    }
}

impl Default for EnumerationOptions {
    fn default() -> Self {
        Self {
            recurse_subdirectories: false,
            match_casing: MatchCasing::PlatformDefault,
            match_type: MatchType::Win32,
            attributes_to_skip: FileAttributes::empty(),
            max_recursion_depth: usize::MAX,
        }
    }
}

/// Kind of a drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum DriveType {
    Unknown,
    NoRootDirectory,
    Removable,
    #[default]
    Fixed,
    Network,
    CdRom,
    Ram,
}
