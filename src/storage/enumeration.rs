//! Location Enumeration
//!
//! Wildcard search patterns (`*`, `?`) and the lazy iterator returned by
//! `InMemoryStorage::enumerate_locations`.

use regex_lite::Regex;
use std::sync::Arc;

use super::container::StorageContainer;
use super::in_memory_storage::InMemoryStorage;
use super::location::StorageLocation;
use super::types::{EnumerationOptions, FileSystemTypes, MatchCasing, MatchType, Result, StorageError};
use crate::platform::Execute;

/// Rejects search patterns that can never be valid.
pub fn validate_expression(pattern: &str) -> Result<()> {
    if pattern.contains('\0') {
        return Err(StorageError::IllegalCharacters {
            path: pattern.to_string(),
        });
    }
    Ok(())
}

/// Matches file names against a wildcard pattern.
#[derive(Debug, Clone)]
pub struct NameMatcher {
    regex: Regex,
}

impl NameMatcher {
    pub fn new(pattern: &str, ignore_case: bool, match_type: MatchType) -> Result<Self> {
        validate_expression(pattern)?;
        let source = wildcard_to_regex(pattern, ignore_case, match_type);
        let regex = Regex::new(&source).map_err(|_| StorageError::IncorrectSyntax {
            path: pattern.to_string(),
        })?;
        Ok(Self { regex })
    }

    /// Builds a matcher with the casing rule resolved against the simulated OS.
    pub fn for_options(pattern: &str, execute: &Execute, options: &EnumerationOptions) -> Result<Self> {
        let ignore_case = match options.match_casing {
            MatchCasing::PlatformDefault => execute.ignore_case(),
            MatchCasing::CaseSensitive => false,
            MatchCasing::CaseInsensitive => true,
        };
        Self::new(pattern, ignore_case, options.match_type)
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }
}

/// Converts a wildcard pattern to an anchored regex.
fn wildcard_to_regex(pattern: &str, ignore_case: bool, match_type: MatchType) -> String {
    let pattern = match pattern {
        "" => "*",
        "*.*" if match_type == MatchType::Win32 => "*",
        p => p,
    };

    let mut regex = String::from(if ignore_case { "(?is)^" } else { "(?s)^" });
    for c in pattern.chars() {
        match c {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            c if is_regex_special(c) => {
                regex.push('\\');
                regex.push(c);
            }
            c => regex.push(c),
        }
    }
    regex.push('$');
    regex
}

fn is_regex_special(c: char) -> bool {
    "\\^$.|+(){}[]*?".contains(c)
}

/// Lazily yields the locations below a directory that match a pattern.
///
/// Candidate keys are collected on the first call to `next`, so entries
/// created afterwards are not seen. Every candidate is looked up again before
/// it is yielded, so entries removed in the meantime are skipped. No map lock
/// is held between calls, which lets callers mutate the storage while
/// iterating.
pub struct EnumerateLocations<'a> {
    storage: &'a InMemoryStorage,
    base: StorageLocation,
    types: FileSystemTypes,
    matcher: NameMatcher,
    options: EnumerationOptions,
    pending: Option<std::vec::IntoIter<StorageLocation>>,
}

impl<'a> EnumerateLocations<'a> {
    pub(crate) fn new(
        storage: &'a InMemoryStorage,
        base: StorageLocation,
        types: FileSystemTypes,
        matcher: NameMatcher,
        options: EnumerationOptions,
    ) -> Self {
        Self {
            storage,
            base,
            types,
            matcher,
            options,
            pending: None,
        }
    }

    fn accepts(&self, candidate: &StorageLocation, container: &Arc<StorageContainer>) -> bool {
        if self.options.recurse_subdirectories {
            if candidate.depth_below(&self.base) > self.options.max_recursion_depth {
                return false;
            }
        } else if candidate.get_parent().as_ref() != Some(&self.base) {
            return false;
        }
        if !self.types.contains(container.container_type().as_file_system_types()) {
            return false;
        }
        if container.attributes().intersects(self.options.attributes_to_skip) {
            return false;
        }
        self.matcher.is_match(candidate.name())
    }
}

impl Iterator for EnumerateLocations<'_> {
    type Item = StorageLocation;

    fn next(&mut self) -> Option<StorageLocation> {
        if self.pending.is_none() {
            self.pending = Some(self.storage.locations_below(&self.base).into_iter());
        }
        loop {
            let candidate = self.pending.as_mut()?.next()?;
            let Some(container) = self.storage.get_container(&candidate) else {
                continue;
            };
            if self.accepts(&candidate, &container) {
                return Some(candidate);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcards() {
        let m = NameMatcher::new("*.txt", false, MatchType::Simple).unwrap();
        assert!(m.is_match("a.txt"));
        assert!(m.is_match(".txt"));
        assert!(!m.is_match("a.txt.bak"));
        assert!(!m.is_match("a.TXT"));

        let m = NameMatcher::new("f?o", false, MatchType::Simple).unwrap();
        assert!(m.is_match("foo"));
        assert!(!m.is_match("fo"));
    }

    #[test]
    fn test_regex_characters_are_literal() {
        let m = NameMatcher::new("a+(b).[c]", false, MatchType::Simple).unwrap();
        assert!(m.is_match("a+(b).[c]"));
        assert!(!m.is_match("aa(b)x[c]"));
    }

    #[test]
    fn test_case_insensitive() {
        let m = NameMatcher::new("*.TXT", true, MatchType::Simple).unwrap();
        assert!(m.is_match("readme.txt"));
    }

    #[test]
    fn test_win32_star_dot_star_matches_names_without_extension() {
        let win32 = NameMatcher::new("*.*", false, MatchType::Win32).unwrap();
        assert!(win32.is_match("Makefile"));
        let simple = NameMatcher::new("*.*", false, MatchType::Simple).unwrap();
        assert!(!simple.is_match("Makefile"));
        assert!(NameMatcher::new("", false, MatchType::Simple).unwrap().is_match("x"));
    }

    #[test]
    fn test_nul_in_pattern_is_rejected() {
        assert!(matches!(
            NameMatcher::new("a\0", false, MatchType::Simple),
            Err(StorageError::IllegalCharacters { .. })
        ));
    }
}
