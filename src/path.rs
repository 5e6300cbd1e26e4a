//! Path resolution for references found inside a package
//!
//! Every component that turns an archive-relative reference into a concrete
//! location goes through [PathResolver]. References are interpreted against
//! the package document's directory inside the book directory; `..` segments
//! are dropped rather than followed, so a resolved path never leaves the
//! book directory beneath the storage root.
//!
//! Public paths start with the book directory. A reference that already has
//! that form resolves to itself, unless the archive holds a file at the
//! package-relative reading of the same reference.

use std::path::{Path, PathBuf};

use log::warn;

/// A reference resolved to both of its forms
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Location on disk: `storage_root/book/.../file`
    pub disk: PathBuf,

    /// Location relative to the storage root, `/`-separated, with any
    /// `#fragment` or `?query` of the reference kept at the end
    pub public: String,
}

/// Resolves package references for one book
#[derive(Debug, Clone)]
pub struct PathResolver {
    storage_root: PathBuf,

    /// Book directory followed by the package document's directory
    base: Vec<String>,
}

impl PathResolver {
    /// Creates a resolver for a book whose package document sits at
    /// `package_path` (relative to the archive root)
    ///
    /// The internal directory prefix is the package document's parent path.
    /// `book_directory` is a single directory name and is never split.
    pub fn new<P: AsRef<Path>>(storage_root: P, book_directory: &str, package_path: &str) -> Self {
        let mut base = vec![book_directory.to_string()];

        let package_segments = split_segments(package_path)
            .filter(|segment| !matches!(*segment, "." | ".."))
            .collect::<Vec<_>>();
        if let Some((_, directories)) = package_segments.split_last() {
            base.extend(directories.iter().map(|segment| segment.to_string()));
        }

        Self {
            storage_root: storage_root.as_ref().to_path_buf(),
            base,
        }
    }

    /// Returns the package document's directory relative to the archive root
    pub fn package_directory(&self) -> String {
        self.base[1..].join("/")
    }

    /// Returns the book directory on disk
    pub fn book_root(&self) -> PathBuf {
        self.storage_root.join(&self.base[0])
    }

    /// Resolves a reference emitted by the package or a navigation document
    ///
    /// Starting from the book directory and the package directory, each
    /// segment of the reference is appended unless it is empty, `.`, `..`,
    /// or a directory component already present below the book directory.
    /// The last segment (the file name) is always appended.
    pub fn resolve(&self, reference: &str) -> ResolvedPath {
        let (path_part, suffix) = split_suffix(reference);
        let segments = split_segments(path_part).collect::<Vec<_>>();

        let mut accumulated = self.accumulate(&segments, reference);

        let is_public_form = segments.len() > 1 && self.base[0] == segments[0];
        if is_public_form && !self.disk_path(&accumulated).exists() {
            accumulated = self.accumulate(&segments[1..], reference);
        }

        ResolvedPath {
            disk: self.disk_path(&accumulated),
            public: format!("{}{}", accumulated.join("/"), suffix),
        }
    }

    fn accumulate(&self, segments: &[&str], reference: &str) -> Vec<String> {
        let mut accumulated = self.base.clone();
        let last_index = segments.len().saturating_sub(1);

        for (index, segment) in segments.iter().enumerate() {
            match *segment {
                "." => continue,
                ".." => {
                    warn!("Dropping \"..\" segment of reference \"{}\"", reference);
                    continue;
                }
                _ => {}
            }

            // The book directory itself never counts as a repeat
            if index != last_index && accumulated[1..].iter().any(|existing| existing == segment) {
                continue;
            }

            accumulated.push(segment.to_string());
        }

        accumulated
    }

    fn disk_path(&self, segments: &[String]) -> PathBuf {
        segments
            .iter()
            .fold(self.storage_root.clone(), |path, segment| path.join(segment))
    }
}

/// Whether a reference points outside the book and must be left alone
///
/// This is the case for references carrying a URI scheme (`http:`,
/// `https:`, `ftp:`, `mailto:`, `data:` ...) and for pure fragment
/// references into the same document.
pub fn is_external_reference(reference: &str) -> bool {
    let reference = reference.trim();
    if reference.is_empty() || reference.starts_with('#') {
        return true;
    }

    match reference.split_once(':') {
        Some((scheme, _)) => {
            let mut chars = scheme.chars();
            scheme.len() > 1
                && chars.next().is_some_and(|c| c.is_ascii_alphabetic())
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Splits a path on both separators, skipping empty segments
fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(['/', '\\']).filter(|segment| !segment.is_empty())
}

/// Splits a reference into its path and its `#fragment`/`?query` suffix
fn split_suffix(reference: &str) -> (&str, &str) {
    match reference.find(['#', '?']) {
        Some(index) => reference.split_at(index),
        None => (reference, ""),
    }
}
