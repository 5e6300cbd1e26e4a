use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// The book produced by one extraction
///
/// A `Book` is built once per extraction call and handed to the caller fully
/// populated. Its serialized form is the record persisted by the library
/// service; the on-disk files it points to outlive the value itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Book {
    /// Name derived from the uploaded file name, extension stripped
    #[serde(skip)]
    pub name: String,

    /// Directory reserved for this book beneath the storage root
    ///
    /// Usually equal to `name`; a numeric suffix is appended when another
    /// book already occupies that directory.
    #[serde(skip)]
    pub directory: String,

    pub info: Metadata,

    /// Content documents in spine order
    pub files: Vec<ContentFile>,

    /// Public path of the cover image, empty when none was found
    pub cover_image_path: String,

    /// `(label, public path)` pairs in navigation order
    pub table_of_contents: Vec<(String, String)>,

    pub is_fixed_layout: bool,

    /// Path of the package document relative to the archive root
    #[serde(skip)]
    pub(crate) package_path: String,

    /// On-disk path of the navigation map
    #[serde(skip)]
    pub(crate) navigation_path: PathBuf,
}

impl Book {
    /// Returns the path of the package document relative to the archive root
    pub fn package_path(&self) -> &str {
        &self.package_path
    }

    /// Returns the on-disk path of the NCX navigation map
    pub fn navigation_path(&self) -> &PathBuf {
        &self.navigation_path
    }
}

/// Descriptive metadata copied from the package document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Metadata {
    pub title: String,
    pub author: String,
    pub language: String,
    pub identifier: String,
    pub contributor: String,
    pub rights: String,
    pub source: String,
    pub coverage: String,
    pub relation: String,
    pub publisher: String,
    pub description: String,
    pub date: String,

    /// Every `dc:subject`, in document order, duplicates kept
    pub subjects: Vec<String>,

    /// `<meta>` name/content pairs in document order
    ///
    /// EPUB 3 `<meta property="...">value</meta>` entries are recorded with
    /// the property as the name and the element text as the content.
    #[serde(skip)]
    pub raw_meta: Vec<MetaItem>,
}

/// A `<meta>` name/content pair
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaItem {
    pub name: String,
    pub content: String,
}

impl MetaItem {
    pub fn new(name: &str, content: &str) -> Self {
        Self {
            name: name.to_string(),
            content: content.to_string(),
        }
    }
}

/// Markup flavour of a content document, inferred from its extension
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    #[serde(rename = "text/html")]
    Html,

    #[serde(rename = "application/xhtml+xml")]
    Xhtml,

    /// Unrecognized extension; the document is still listed and rewritten
    #[default]
    #[serde(rename = "")]
    Unknown,
}

impl ContentType {
    /// Infers the content type from a file name or path
    pub fn from_path(path: &str) -> Self {
        let extension = path
            .rsplit_once('.')
            .map(|(_, extension)| extension.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "html" | "htm" => ContentType::Html,
            "xhtml" => ContentType::Xhtml,
            _ => ContentType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Html => "text/html",
            ContentType::Xhtml => "application/xhtml+xml",
            ContentType::Unknown => "",
        }
    }

    /// Whether the document is a markup document this crate can parse
    pub fn is_markup(&self) -> bool {
        !matches!(self, ContentType::Unknown)
    }
}

/// A content document in reading order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContentFile {
    /// Public path, relative to the storage root
    pub path: String,

    pub content_type: ContentType,

    /// Where the document lives on disk
    #[serde(skip)]
    pub disk_path: PathBuf,
}

/// The decoded `META-INF/container.xml`
///
/// Only the first `rootfile` is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerDescriptor {
    /// Path of the package document relative to the archive root
    pub full_path: String,

    /// Declared media type of the package document
    pub media_type: String,
}

/// The decoded OPF package document
#[derive(Debug, Clone, Default)]
pub struct PackageDocument {
    pub metadata: Metadata,

    /// Manifest item id to href, in document order
    pub manifest: IndexMap<String, ManifestItem>,

    pub spine: Spine,

    pub guide: Vec<GuideReference>,
}

/// Represents a resource item declared in the EPUB manifest
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestItem {
    /// The href attribute, relative to the package document
    pub href: String,

    /// The media type of the resource
    pub media_type: String,
}

/// The reading order of the publication
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Spine {
    /// Manifest id of the NCX navigation map, empty when not declared
    pub toc: String,

    /// Manifest ids of the content documents, in reading order
    pub itemrefs: Vec<String>,
}

/// A `<reference>` of the package guide
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuideReference {
    /// Semantic type, e.g. "cover", "toc", "title-page"
    pub kind: String,
    pub href: String,
    pub title: String,
}

/// The decoded NCX navigation map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationMap {
    /// `<meta>` entries of the NCX head
    pub head: Vec<MetaItem>,

    /// The `<docTitle>` text
    pub title: String,

    /// Top-level navigation points of the `<navMap>`
    pub nav_points: Vec<NavPoint>,
}

/// Represents a navigation point in an NCX table of contents
///
/// Navigation points nest to arbitrary depth. Their document order is the
/// reading order; `play_order` is carried along for information only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavPoint {
    pub id: String,

    /// The playOrder attribute, when present and numeric
    pub play_order: Option<usize>,

    /// The display label of this navigation point
    pub label: String,

    /// The `src` of the `<content>` element, as written in the NCX
    pub content: String,

    /// Child navigation points (sub-sections)
    pub children: Vec<NavPoint>,
}

impl Drop for NavPoint {
    // Unlinks descendants one at a time, deep tables of contents would
    // otherwise exhaust the stack
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut nav_point) = pending.pop() {
            pending.append(&mut nav_point.children);
        }
    }
}
