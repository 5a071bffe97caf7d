//! Package security validation
//!
//! Uploaded SCORM archives are untrusted. Every archive is checked here
//! before a single entry is extracted or served; the first violation ends
//! the scan.
//!
//! Checks, in order:
//!
//! 1. Entry count ceiling (before any content is touched)
//! 2. Per entry: path traversal, blocked extension, decompressed size
//! 3. Per HTML/JS entry: suspicious script patterns
//! 4. The manifest's entry point exists in the archive

use std::io::{Read, Seek};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::config::PackageLimits;
use crate::manifest::PackageManifest;

pub const MANIFEST_FILE: &str = "imsmanifest.xml";

/// Outcome of validating a package: `{ valid, error? }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityVerdict {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SecurityVerdict {
    pub fn valid() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(reason.into()),
        }
    }
}

impl From<Result<(), Violation>> for SecurityVerdict {
    fn from(result: Result<(), Violation>) -> Self {
        match result {
            Ok(()) => Self::valid(),
            Err(violation) => Self::invalid(violation.to_string()),
        }
    }
}

/// First reason an archive was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    #[error("Package contains too many files ({count} > {max})")]
    TooManyEntries { count: usize, max: usize },

    #[error("Path traversal detected: {0}")]
    PathTraversal(String),

    #[error("Dangerous file type not allowed: {0}")]
    BlockedFileType(String),

    #[error("File too large: {path} ({size} bytes > {max} bytes)")]
    EntryTooLarge { path: String, size: u64, max: u64 },

    #[error("Suspicious pattern {pattern} detected in {path}")]
    SuspiciousContent { path: String, pattern: &'static str },

    #[error("Unreadable entry {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("Entry point not found in package: {0}")]
    EntryPointMissing(String),
}

struct SuspiciousPattern {
    label: &'static str,
    regex: Regex,
}

const PATTERN_SOURCES: &[(&str, &str)] = &[
    ("eval()", r"\beval\s*\("),
    ("document.cookie", r"document\.cookie"),
    ("WebSocket", r"new\s+WebSocket\b"),
    (
        "external window.location redirect",
        r#"window\.location(?:\.href)?\s*=\s*["'`](?:[a-zA-Z][a-zA-Z0-9+.\-]*:)?//"#,
    ),
];

/// Compiled once; `Regex` carries no match cursor between scans.
fn suspicious_patterns() -> &'static [SuspiciousPattern] {
    static PATTERNS: OnceLock<Vec<SuspiciousPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        PATTERN_SOURCES
            .iter()
            .filter_map(|(label, source)| {
                Regex::new(source)
                    .ok()
                    .map(|regex| SuspiciousPattern { label, regex })
            })
            .collect()
    })
}

/// Label of the first suspicious pattern found in `text`.
pub fn find_suspicious_pattern(text: &str) -> Option<&'static str> {
    suspicious_patterns()
        .iter()
        .find(|p| p.regex.is_match(text))
        .map(|p| p.label)
}

fn is_traversal(path: &str) -> bool {
    path.contains("..") || path.starts_with('/') || path.starts_with('\\')
}

fn extension_of(path: &str) -> Option<String> {
    let file_name = path.rsplit(['/', '\\']).next()?;
    let (_, ext) = file_name.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

/// Validates uploaded archives against [`PackageLimits`].
#[derive(Debug, Clone, Default)]
pub struct PackageValidator {
    limits: PackageLimits,
}

impl PackageValidator {
    pub fn new(limits: PackageLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &PackageLimits {
        &self.limits
    }

    /// Validate `archive` for serving `manifest`.
    pub fn validate<R: Read + Seek>(
        &self,
        archive: &mut ZipArchive<R>,
        manifest: &PackageManifest,
    ) -> SecurityVerdict {
        let verdict = SecurityVerdict::from(self.check(archive, manifest));
        match &verdict.error {
            Some(reason) => warn!(reason = %reason, "Rejected SCORM package"),
            None => info!(entries = archive.len(), "SCORM package passed validation"),
        }
        verdict
    }

    fn check<R: Read + Seek>(
        &self,
        archive: &mut ZipArchive<R>,
        manifest: &PackageManifest,
    ) -> Result<(), Violation> {
        let count = archive.len();
        if count > self.limits.max_entries {
            return Err(Violation::TooManyEntries {
                count,
                max: self.limits.max_entries,
            });
        }

        for index in 0..count {
            let (path, size, is_dir) = {
                let entry = archive.by_index_raw(index).map_err(|e| Violation::Unreadable {
                    path: format!("#{index}"),
                    reason: e.to_string(),
                })?;
                (entry.name().to_string(), entry.size(), entry.is_dir())
            };

            self.check_entry_metadata(&path, size)?;
            if is_dir || !self.is_scanned(&path) {
                continue;
            }

            let text = self.read_bounded(archive, index, &path)?;
            if let Some(pattern) = find_suspicious_pattern(&text) {
                return Err(Violation::SuspiciousContent { path, pattern });
            }
            debug!(path = %path, "Scanned entry");
        }

        let entry_point = manifest
            .entry_point
            .split(['?', '#'])
            .next()
            .unwrap_or_default();
        if !archive.file_names().any(|name| name == entry_point) {
            return Err(Violation::EntryPointMissing(entry_point.to_string()));
        }

        Ok(())
    }

    fn check_entry_metadata(&self, path: &str, size: u64) -> Result<(), Violation> {
        if is_traversal(path) {
            return Err(Violation::PathTraversal(path.to_string()));
        }
        if let Some(ext) = extension_of(path) {
            if self.limits.blocked_extensions.iter().any(|b| *b == ext) {
                return Err(Violation::BlockedFileType(path.to_string()));
            }
        }
        if size > self.limits.max_entry_bytes {
            return Err(Violation::EntryTooLarge {
                path: path.to_string(),
                size,
                max: self.limits.max_entry_bytes,
            });
        }
        Ok(())
    }

    fn is_scanned(&self, path: &str) -> bool {
        extension_of(path).is_some_and(|ext| self.limits.scanned_extensions.iter().any(|s| *s == ext))
    }

    /// Decompress at most `max_scan_bytes + 1` bytes so a lying size header
    /// cannot force an unbounded read.
    fn read_bounded<R: Read + Seek>(
        &self,
        archive: &mut ZipArchive<R>,
        index: usize,
        path: &str,
    ) -> Result<String, Violation> {
        let unreadable = |e: &dyn std::fmt::Display| Violation::Unreadable {
            path: path.to_string(),
            reason: e.to_string(),
        };

        let entry = archive.by_index(index).map_err(|e| unreadable(&e))?;
        let limit = self.limits.max_scan_bytes.min(self.limits.max_entry_bytes);
        let mut bytes = Vec::new();
        entry
            .take(limit + 1)
            .read_to_end(&mut bytes)
            .map_err(|e| unreadable(&e))?;

        if bytes.len() as u64 > limit {
            return Err(Violation::EntryTooLarge {
                path: path.to_string(),
                size: bytes.len() as u64,
                max: limit,
            });
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Name of the root-level manifest entry, matched case-insensitively.
pub fn manifest_entry_name<R: Read + Seek>(archive: &ZipArchive<R>) -> Option<String> {
    archive
        .file_names()
        .find(|name| name.eq_ignore_ascii_case(MANIFEST_FILE))
        .map(str::to_string)
}

/// Whether the archive carries `imsmanifest.xml` at its root.
pub fn has_manifest<R: Read + Seek>(archive: &ZipArchive<R>) -> bool {
    manifest_entry_name(archive).is_some()
}

/// Sum of declared decompressed sizes across all entries.
pub fn total_uncompressed_size<R: Read + Seek>(archive: &mut ZipArchive<R>) -> u64 {
    (0..archive.len())
        .filter_map(|i| archive.by_index_raw(i).ok().map(|entry| entry.size()))
        .sum()
}
