//! Path Rules of the Simulated OS
//!
//! Path parsing and canonicalization that follows the rules of the
//! simulated operating system, independent of the host:
//!
//! - Windows: `\` separator (`/` accepted), drive letters (`C:\`),
//!   drive-relative paths (`C:foo`), UNC shares (`\\server\share`)
//! - Linux / macOS: `/` separator, single root, `//server/share` is kept
//!   distinct as a UNC-style path

use crate::storage::{Result, StorageError};

use super::types::Execute;

lazy_static::lazy_static! {
    static ref DRIVE_PREFIX: regex_lite::Regex = regex_lite::Regex::new(r"^[a-zA-Z]:").unwrap();
}

/// Characters that are illegal in Windows paths in addition to NUL.
const WINDOWS_INVALID_CHARS: &[char] = &['"', '<', '>', '|', '*', '?'];

impl Execute {
    /// Rejects missing, empty and syntactically illegal paths.
    pub fn validate_path<'a>(&self, path: Option<&'a str>) -> Result<&'a str> {
        let path = path.ok_or_else(|| StorageError::ArgumentNull {
            param: "path".to_string(),
        })?;
        if path.is_empty() {
            return Err(StorageError::EmptyPath);
        }
        if path.contains('\0') {
            return Err(StorageError::IllegalCharacters {
                path: path.to_string(),
            });
        }
        if self.has_illegal_characters(path) {
            return Err(StorageError::IncorrectSyntax {
                path: path.to_string(),
            });
        }
        Ok(path)
    }

    /// Checks for characters the simulated OS does not allow in a path.
    pub fn has_illegal_characters(&self, path: &str) -> bool {
        if path.contains('\0') {
            return true;
        }
        self.is_windows()
            && path
                .chars()
                .any(|c| (c as u32) < 32 || WINDOWS_INVALID_CHARS.contains(&c))
    }

    /// A UNC path starts with two separators followed by a server name.
    pub fn is_unc_path(&self, path: &str) -> bool {
        let mut chars = path.chars();
        match (chars.next(), chars.next(), chars.next()) {
            (Some(a), Some(b), Some(c)) => {
                let is_sep = |ch: char| {
                    if self.is_windows() {
                        self.is_separator(ch)
                    } else {
                        ch == '/'
                    }
                };
                is_sep(a) && is_sep(b) && !is_sep(c)
            }
            _ => false,
        }
    }

    pub fn is_path_rooted(&self, path: &str) -> bool {
        self.get_path_root(path).is_some()
    }

    /// Returns the root of `path`: `C:\`, `C:`, `\\server\share`, `\` or `/`.
    pub fn get_path_root(&self, path: &str) -> Option<String> {
        let sep = self.separator();
        if self.is_unc_path(path) {
            return Some(self.unc_root(path));
        }
        if self.is_windows() && DRIVE_PREFIX.is_match(path) {
            let letter = &path[..2];
            return match path[2..].chars().next() {
                Some(c) if self.is_separator(c) => Some(format!("{}{}", letter, sep)),
                _ => Some(letter.to_string()),
            };
        }
        match path.chars().next() {
            Some(c) if self.is_separator(c) => Some(sep.to_string()),
            _ => None,
        }
    }

    /// `\\server\share` (or `//server/share`) with normalized separators.
    fn unc_root(&self, path: &str) -> String {
        let sep = self.separator();
        let body: Vec<&str> = path[2..]
            .split(|c: char| self.is_separator(c))
            .take(2)
            .collect();
        let mut root = format!("{}{}", sep, sep);
        root.push_str(body[0]);
        if let Some(share) = body.get(1).filter(|s| !s.is_empty()) {
            root.push(sep);
            root.push_str(share);
        }
        root
    }

    /// Resolves `path` against `current_directory` into a canonical absolute path.
    ///
    /// The result uses the primary separator, contains no `.`/`..` segments or
    /// duplicate separators, and has no trailing separator unless it is a root.
    pub fn get_full_path(&self, path: &str, current_directory: &str) -> String {
        let sep = self.separator();
        let trimmed = if self.is_windows() {
            path.trim_end_matches(' ')
        } else {
            path
        };
        let normalized = if self.is_windows() {
            trimmed.replace(self.alt_separator(), &sep.to_string())
        } else {
            trimmed.to_string()
        };

        let (root, rest) = match self.get_path_root(&normalized) {
            Some(root) if self.is_unc_path(&normalized) => {
                let rest = normalized[root.len().min(normalized.len())..].to_string();
                (root, rest)
            }
            Some(root) if root.ends_with(':') => {
                // drive-relative, e.g. `C:foo`
                let rest = &normalized[2..];
                let cwd_root = self.get_path_root(current_directory).unwrap_or_default();
                if self.path_starts_with(&cwd_root, &root) {
                    let joined = format!("{}{}{}", current_directory, sep, rest);
                    return self.get_full_path(&joined, current_directory);
                }
                (format!("{}{}", root, sep), rest.to_string())
            }
            Some(root) if root.len() == 1 => {
                // rooted without drive: root of the current directory
                let cwd_root = self
                    .get_path_root(current_directory)
                    .filter(|r| !r.ends_with(':'))
                    .unwrap_or(root);
                (cwd_root, normalized.clone())
            }
            Some(root) => {
                let rest = normalized[root.len()..].to_string();
                (root, rest)
            }
            None => {
                let base = if self.is_path_rooted(current_directory) {
                    current_directory.to_string()
                } else {
                    self.default_root()
                };
                let joined = format!("{}{}{}", base, sep, normalized);
                return self.get_full_path(&joined, &base);
            }
        };

        let mut segments: Vec<&str> = Vec::new();
        for part in rest.split(|c: char| self.is_separator(c)) {
            match part {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                _ => segments.push(part),
            }
        }

        if segments.is_empty() {
            return root;
        }
        let mut full = root;
        if !full.ends_with(sep) {
            full.push(sep);
        }
        full.push_str(&segments.join(&sep.to_string()));
        full
    }

    /// The root the simulated OS boots into: `C:\` or `/`.
    pub fn default_root(&self) -> String {
        self.windows_or("C:\\".to_string(), "/".to_string())
    }

    /// Returns the parent of `path`, or `None` when `path` is a root.
    pub fn get_directory_name(&self, path: &str) -> Option<String> {
        let root = self.get_path_root(path).unwrap_or_default();
        let mut trimmed = path;
        while trimmed.len() > root.len() && trimmed.ends_with(|c: char| self.is_separator(c)) {
            trimmed = &trimmed[..trimmed.len() - 1];
        }
        if trimmed.len() <= root.len() {
            return None;
        }
        let rest = &trimmed[root.len()..];
        match rest.rfind(|c: char| self.is_separator(c)) {
            Some(idx) if idx > 0 => Some(trimmed[..root.len() + idx].to_string()),
            _ if root.is_empty() => None,
            _ => Some(root),
        }
    }

    /// The last segment of `path` (empty when `path` ends with a separator).
    pub fn get_file_name<'a>(&self, path: &'a str) -> &'a str {
        match path.rfind(|c: char| self.is_separator(c)) {
            Some(idx) => &path[idx + 1..],
            None if self.is_windows() && DRIVE_PREFIX.is_match(path) => &path[2..],
            None => path,
        }
    }

    pub fn combine(&self, base: &str, path: &str) -> String {
        if base.is_empty() || self.is_path_rooted(path) {
            return path.to_string();
        }
        if base.ends_with(|c: char| self.is_separator(c)) {
            format!("{}{}", base, path)
        } else {
            format!("{}{}{}", base, self.separator(), path)
        }
    }

    /// Appends a separator unless `path` already ends with one.
    pub fn with_trailing_separator(&self, path: &str) -> String {
        if path.ends_with(|c: char| self.is_separator(c)) {
            path.to_string()
        } else {
            format!("{}{}", path, self.separator())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::SimulatedOs;
    use crate::storage::ErrorKind;

    fn windows() -> Execute {
        Execute::new(SimulatedOs::Windows)
    }

    fn linux() -> Execute {
        Execute::new(SimulatedOs::Linux)
    }

    #[test]
    fn test_validate_path() {
        let exec = linux();
        assert_eq!(
            exec.validate_path(None).unwrap_err(),
            StorageError::ArgumentNull { param: "path".to_string() }
        );
        assert_eq!(exec.validate_path(Some("")).unwrap_err(), StorageError::EmptyPath);
        assert_eq!(
            exec.validate_path(Some("a\0b")).unwrap_err().kind(),
            ErrorKind::PathInvalid
        );
        assert_eq!(exec.validate_path(Some("a*b")).unwrap(), "a*b");
        assert!(matches!(
            windows().validate_path(Some("a*b")),
            Err(StorageError::IncorrectSyntax { .. })
        ));
        assert!(windows().validate_path(Some("a?b")).is_err());
        assert!(windows().validate_path(Some("C:\\a\\b.txt")).is_ok());
    }

    #[test]
    fn test_unc_detection() {
        assert!(windows().is_unc_path("\\\\server\\share"));
        assert!(windows().is_unc_path("//server/share"));
        assert!(linux().is_unc_path("//server/share"));
        assert!(!linux().is_unc_path("\\\\server\\share"));
        assert!(!linux().is_unc_path("/server"));
        assert!(!windows().is_unc_path("C:\\server"));
    }

    #[test]
    fn test_get_path_root() {
        assert_eq!(windows().get_path_root("C:\\foo").as_deref(), Some("C:\\"));
        assert_eq!(windows().get_path_root("d:/foo").as_deref(), Some("d:\\"));
        assert_eq!(windows().get_path_root("C:foo").as_deref(), Some("C:"));
        assert_eq!(windows().get_path_root("\\foo").as_deref(), Some("\\"));
        assert_eq!(
            windows().get_path_root("\\\\srv\\share\\dir").as_deref(),
            Some("\\\\srv\\share")
        );
        assert_eq!(windows().get_path_root("foo"), None);
        assert_eq!(linux().get_path_root("/foo").as_deref(), Some("/"));
        assert_eq!(linux().get_path_root("C:\\foo"), None);
    }

    #[test]
    fn test_get_full_path_linux() {
        let exec = linux();
        assert_eq!(exec.get_full_path("/foo/bar", "/"), "/foo/bar");
        assert_eq!(exec.get_full_path("/foo/bar/", "/"), "/foo/bar");
        assert_eq!(exec.get_full_path("foo/bar", "/work"), "/work/foo/bar");
        assert_eq!(exec.get_full_path("/foo/./bar", "/"), "/foo/bar");
        assert_eq!(exec.get_full_path("/foo/../bar", "/"), "/bar");
        assert_eq!(exec.get_full_path("/foo//bar", "/"), "/foo/bar");
        assert_eq!(exec.get_full_path("/../..", "/"), "/");
        assert_eq!(exec.get_full_path("..", "/work/sub"), "/work");
        assert_eq!(exec.get_full_path("//srv/share/x/../y", "/"), "//srv/share/y");
    }

    #[test]
    fn test_get_full_path_windows() {
        let exec = windows();
        assert_eq!(exec.get_full_path("C:\\foo\\bar", "C:\\"), "C:\\foo\\bar");
        assert_eq!(exec.get_full_path("c:/foo/bar/", "C:\\"), "c:\\foo\\bar");
        assert_eq!(exec.get_full_path("bar", "C:\\work"), "C:\\work\\bar");
        assert_eq!(exec.get_full_path("\\bar", "D:\\work"), "D:\\bar");
        assert_eq!(exec.get_full_path("C:bar", "C:\\work"), "C:\\work\\bar");
        assert_eq!(exec.get_full_path("E:bar", "C:\\work"), "E:\\bar");
        assert_eq!(exec.get_full_path("foo  ", "C:\\"), "C:\\foo");
        assert_eq!(exec.get_full_path("C:\\", "C:\\work"), "C:\\");
        assert_eq!(
            exec.get_full_path("\\\\srv\\share\\a\\..\\b", "C:\\"),
            "\\\\srv\\share\\b"
        );
    }

    #[test]
    fn test_get_full_path_is_idempotent() {
        let cases = [
            (linux(), "a/./b/../c//d/", "/cwd"),
            (linux(), "//srv/share/x", "/"),
            (windows(), "a/./b/../c//d/", "C:\\cwd"),
            (windows(), "D:", "C:\\cwd"),
            (windows(), "\\\\srv\\share", "C:\\"),
        ];
        for (exec, path, cwd) in cases {
            let once = exec.get_full_path(path, cwd);
            assert_eq!(exec.get_full_path(&once, cwd), once, "{}", path);
        }
    }

    #[test]
    fn test_get_directory_name() {
        assert_eq!(linux().get_directory_name("/"), None);
        assert_eq!(linux().get_directory_name("/foo").as_deref(), Some("/"));
        assert_eq!(linux().get_directory_name("/foo/bar").as_deref(), Some("/foo"));
        assert_eq!(linux().get_directory_name("/foo/bar/").as_deref(), Some("/foo"));
        assert_eq!(windows().get_directory_name("C:\\"), None);
        assert_eq!(windows().get_directory_name("C:\\foo").as_deref(), Some("C:\\"));
        assert_eq!(
            windows().get_directory_name("C:\\foo\\bar").as_deref(),
            Some("C:\\foo")
        );
        assert_eq!(
            windows().get_directory_name("\\\\srv\\share\\x").as_deref(),
            Some("\\\\srv\\share")
        );
        assert_eq!(windows().get_directory_name("\\\\srv\\share"), None);
    }

    #[test]
    fn test_get_file_name_and_combine() {
        assert_eq!(linux().get_file_name("/foo/bar.txt"), "bar.txt");
        assert_eq!(linux().get_file_name("bar.txt"), "bar.txt");
        assert_eq!(windows().get_file_name("C:\\foo\\bar.txt"), "bar.txt");
        assert_eq!(windows().get_file_name("C:/foo/bar.txt"), "bar.txt");
        assert_eq!(linux().combine("/foo", "bar"), "/foo/bar");
        assert_eq!(linux().combine("/foo/", "bar"), "/foo/bar");
        assert_eq!(linux().combine("/foo", "/bar"), "/bar");
        assert_eq!(windows().combine("C:\\foo", "bar"), "C:\\foo\\bar");
    }
}
