//! Simulated Operating System Policy
//!
//! The storage never looks at the host it runs on. Every OS-dependent branch
//! (path rules, case sensitivity, attribute and time defaults) asks an
//! `Execute` value which family it is currently pretending to be.

use serde::Deserialize;
use std::fmt;

/// Operating system family the storage emulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulatedOs {
    Windows,
    Linux,
    #[serde(alias = "mac", alias = "osx")]
    MacOs,
}

impl SimulatedOs {
    /// The family of the machine the tests are running on.
    pub fn host() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Linux
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Windows => "Windows",
            Self::Linux => "Linux",
            Self::MacOs => "MacOS",
        }
    }
}

impl Default for SimulatedOs {
    fn default() -> Self {
        Self::host()
    }
}

impl fmt::Display for SimulatedOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How two paths are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringComparison {
    Ordinal,
    OrdinalIgnoreCase,
}

/// Platform policy consulted by every OS-conditional branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Execute {
    os: SimulatedOs,
}

impl Execute {
    pub fn new(os: SimulatedOs) -> Self {
        Self { os }
    }

    pub fn os(&self) -> SimulatedOs {
        self.os
    }

    pub fn is_windows(&self) -> bool {
        self.os == SimulatedOs::Windows
    }

    pub fn is_linux(&self) -> bool {
        self.os == SimulatedOs::Linux
    }

    pub fn is_mac(&self) -> bool {
        self.os == SimulatedOs::MacOs
    }

    /// Primary directory separator.
    pub fn separator(&self) -> char {
        if self.is_windows() {
            '\\'
        } else {
            '/'
        }
    }

    /// Alternative directory separator (`/` everywhere).
    pub fn alt_separator(&self) -> char {
        '/'
    }

    pub fn is_separator(&self, c: char) -> bool {
        c == self.separator() || c == self.alt_separator()
    }

    /// Windows and macOS (default APFS) compare paths case-insensitively.
    pub fn string_comparison(&self) -> StringComparison {
        match self.os {
            SimulatedOs::Linux => StringComparison::Ordinal,
            SimulatedOs::Windows | SimulatedOs::MacOs => StringComparison::OrdinalIgnoreCase,
        }
    }

    pub fn ignore_case(&self) -> bool {
        self.string_comparison() == StringComparison::OrdinalIgnoreCase
    }

    pub fn paths_equal(&self, a: &str, b: &str) -> bool {
        if self.ignore_case() {
            a.len() == b.len() && a.to_lowercase() == b.to_lowercase()
        } else {
            a == b
        }
    }

    pub fn path_starts_with(&self, path: &str, prefix: &str) -> bool {
        if self.ignore_case() {
            path.to_lowercase().starts_with(&prefix.to_lowercase())
        } else {
            path.starts_with(prefix)
        }
    }

    /// Normalizes a path into the form used for hashing and equality.
    pub fn comparison_key(&self, path: &str) -> String {
        if self.ignore_case() {
            path.to_lowercase()
        } else {
            path.to_string()
        }
    }

    /// Maximum number of symbolic links followed when resolving a final target.
    pub fn max_link_hops(&self) -> usize {
        if self.is_windows() {
            63
        } else {
            40
        }
    }

    pub fn on_windows(&self, f: impl FnOnce()) {
        if self.is_windows() {
            f();
        }
    }

    pub fn on_windows_if(&self, condition: bool, f: impl FnOnce()) {
        if condition && self.is_windows() {
            f();
        }
    }

    pub fn not_on_windows(&self, f: impl FnOnce()) {
        if !self.is_windows() {
            f();
        }
    }

    pub fn not_on_windows_if(&self, condition: bool, f: impl FnOnce()) {
        if condition && !self.is_windows() {
            f();
        }
    }

    pub fn on_linux(&self, f: impl FnOnce()) {
        if self.is_linux() {
            f();
        }
    }

    pub fn on_mac(&self, f: impl FnOnce()) {
        if self.is_mac() {
            f();
        }
    }

    /// Picks one of two values depending on whether Windows is simulated.
    pub fn windows_or<T>(&self, windows: T, other: T) -> T {
        if self.is_windows() {
            windows
        } else {
            other
        }
    }
}

impl Default for Execute {
    fn default() -> Self {
        Self::new(SimulatedOs::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_separators() {
        assert_eq!(Execute::new(SimulatedOs::Windows).separator(), '\\');
        assert_eq!(Execute::new(SimulatedOs::Linux).separator(), '/');
        assert_eq!(Execute::new(SimulatedOs::MacOs).separator(), '/');
        assert!(Execute::new(SimulatedOs::Windows).is_separator('/'));
        assert!(!Execute::new(SimulatedOs::Linux).is_separator('\\'));
    }

    #[test]
    fn test_case_sensitivity_follows_simulated_os() {
        assert!(Execute::new(SimulatedOs::Windows).paths_equal("C:\\Foo", "c:\\fOO"));
        assert!(Execute::new(SimulatedOs::MacOs).paths_equal("/Foo", "/foo"));
        assert!(!Execute::new(SimulatedOs::Linux).paths_equal("/Foo", "/foo"));
        assert!(Execute::new(SimulatedOs::Linux).path_starts_with("/foo/bar", "/foo"));
        assert!(!Execute::new(SimulatedOs::Linux).path_starts_with("/Foo/bar", "/foo"));
    }

    #[test]
    fn test_conditional_execution() {
        let mut hits = Vec::new();
        let windows = Execute::new(SimulatedOs::Windows);
        windows.on_windows(|| hits.push("on"));
        windows.not_on_windows(|| hits.push("not"));
        windows.on_windows_if(false, || hits.push("if-false"));
        assert_eq!(hits, vec!["on"]);

        let linux = Execute::new(SimulatedOs::Linux);
        let mut linux_hits = Vec::new();
        linux.on_linux(|| linux_hits.push("linux"));
        linux.not_on_windows_if(true, || linux_hits.push("not-windows"));
        linux.on_mac(|| linux_hits.push("mac"));
        assert_eq!(linux_hits, vec!["linux", "not-windows"]);
    }

    #[test]
    fn test_max_link_hops() {
        assert_eq!(Execute::new(SimulatedOs::Windows).max_link_hops(), 63);
        assert_eq!(Execute::new(SimulatedOs::Linux).max_link_hops(), 40);
    }
}
