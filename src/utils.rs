use std::{
    collections::HashMap,
    fs::{self, File},
    io::{self, Read, Seek},
    mem,
    path::Path,
};

use log::{debug, warn};
use quick_xml::{Reader, escape::resolve_predefined_entity, events::Event};
use zip::ZipArchive;

use crate::error::EpubError;

/// How many suffixed directory names are tried before giving up
const MAX_DIRECTORY_ATTEMPTS: usize = 1000;

/// Extracts every entry of a ZIP archive beneath `destination`
///
/// Directory entries create empty directories; file entries are written to
/// `destination/entry-name`, creating parent directories as needed. Entries
/// whose name would escape `destination` (absolute paths, `..`) are skipped.
///
/// ## Notes
/// - Output written before a failure is left in place.
pub fn extract_archive<R: Read + Seek>(reader: R, destination: &Path) -> Result<(), EpubError> {
    let mut archive = ZipArchive::new(reader)?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let relative_path = match entry.enclosed_name() {
            Some(path) => path,
            None => {
                warn!("Skipping archive entry with unsafe name \"{}\"", entry.name());
                continue;
            }
        };

        let output_path = destination.join(relative_path);
        if entry.is_dir() {
            fs::create_dir_all(&output_path)?;
            continue;
        }

        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut output = File::create(&output_path)?;
        io::copy(&mut entry, &mut output)?;
    }

    debug!("Extracted {} archive entries into {:?}", archive.len(), destination);
    Ok(())
}

/// Atomically reserves a directory for a book beneath the storage root
///
/// The storage root is created if needed. The first free name out of
/// `name`, `name-2`, `name-3`, ... is claimed with a single `create_dir`,
/// so two extractions never end up sharing a directory.
///
/// ## Return
/// - `Ok(String)`: The directory name that was reserved
/// - `Err(EpubError)`: No name could be reserved
pub fn reserve_book_directory(storage_root: &Path, name: &str) -> Result<String, EpubError> {
    fs::create_dir_all(storage_root)?;

    for attempt in 1..=MAX_DIRECTORY_ATTEMPTS {
        let candidate = match attempt {
            1 => name.to_string(),
            _ => format!("{}-{}", name, attempt),
        };

        match fs::create_dir(storage_root.join(&candidate)) {
            Ok(()) => return Ok(candidate),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err.into()),
        }
    }

    Err(EpubError::StorageExhausted {
        name: name.to_string(),
    })
}

/// Derives a book name from an uploaded file name
///
/// Leading directories, `/` or `\` separated, and the final extension are
/// removed, so `/uploads/Dune.epub` and `C:\Uploads\Dune.epub` both become
/// `Dune`. Names that would not make a usable directory fall back to `book`.
pub fn book_name_from_filename(filename: &str) -> String {
    let filename = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let name = Path::new(filename)
        .file_stem()
        .map(|stem| stem.to_string_lossy().trim().to_string())
        .unwrap_or_default();

    match name.as_str() {
        "" | "." | ".." => "book".to_string(),
        _ => name,
    }
}

/// Whether the file name carries the `.epub` extension, in any case
pub fn has_epub_extension(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case("epub"))
}

/// Reads a file that the EPUB is required to contain
///
/// A missing file is reported as a non-canonical EPUB rather than as a
/// bare IO error.
pub fn read_required_file(path: &Path, expected_file: &str) -> Result<Vec<u8>, EpubError> {
    match fs::read(path) {
        Ok(data) => Ok(data),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Err(EpubError::NonCanonicalEpub {
            expected_file: expected_file.to_string(),
        }),
        Err(err) => Err(err.into()),
    }
}

/// Provides functionality to decode byte data into strings
///
/// Supports UTF-8 (with or without BOM), UTF-16 BE and UTF-16 LE.
///
/// ## Notes
/// - When attempting to parse a byte stream lacking a BOM (Byte Order Mark), the parsing
///   results may be unreadable; caution should be exercised when using such streams.
pub trait DecodeBytes {
    fn decode(&self) -> Result<String, EpubError>;
}

impl DecodeBytes for [u8] {
    fn decode(&self) -> Result<String, EpubError> {
        match self {
            [] => Err(EpubError::EmptyDataError),

            // UTF-8 BOM (0xEF, 0xBB, 0xBF)
            [0xEF, 0xBB, 0xBF, rest @ ..] => String::from_utf8(rest.to_vec()).map_err(EpubError::from),

            // UTF-16 BE BOM (0xFE, 0xFF)
            [0xFE, 0xFF, rest @ ..] => {
                let units = rest
                    .chunks_exact(2)
                    .map(|b| u16::from_be_bytes([b[0], b[1]]))
                    .collect::<Vec<u16>>();
                String::from_utf16(&units).map_err(EpubError::from)
            }

            // UTF-16 LE BOM (0xFF, 0xFE)
            [0xFF, 0xFE, rest @ ..] => {
                let units = rest
                    .chunks_exact(2)
                    .map(|b| u16::from_le_bytes([b[0], b[1]]))
                    .collect::<Vec<u16>>();
                String::from_utf16(&units).map_err(EpubError::from)
            }

            // No BOM: UTF-8 or bust
            _ => match String::from_utf8(self.to_vec()) {
                Ok(text) => Ok(text),
                Err(_) => Ok(String::from_utf8_lossy(self).to_string()),
            },
        }
    }
}

impl DecodeBytes for Vec<u8> {
    fn decode(&self) -> Result<String, EpubError> {
        self.as_slice().decode()
    }
}

/// Provides functionality for normalizing whitespace characters
///
/// Runs of whitespace collapse into a single space; leading and trailing
/// whitespace is removed.
pub trait NormalizeWhitespace {
    fn normalize_whitespace(&self) -> String;
}

impl NormalizeWhitespace for &str {
    fn normalize_whitespace(&self) -> String {
        self.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

impl NormalizeWhitespace for String {
    fn normalize_whitespace(&self) -> String {
        self.as_str().normalize_whitespace()
    }
}

/// Represents an element node in an XML document
#[derive(Debug, Default)]
pub struct XmlElement {
    /// The local name of the element (excluding namespace prefix)
    pub name: String,

    /// The attributes of the element, keyed by their qualified name
    pub attributes: HashMap<String, String>,

    /// The text directly inside the element, entity references resolved
    pub text: String,

    /// The children of the element
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    /// Create a new element
    pub fn new(name: String) -> Self {
        Self {
            name,
            attributes: HashMap::new(),
            text: String::new(),
            children: vec![],
        }
    }

    /// Gets the text content of the element and all its child elements,
    /// with leading and trailing whitespace removed
    pub fn text(&self) -> String {
        let mut result = self.text.clone();
        for child in &self.children {
            result.push_str(&child.text());
        }

        result.trim().to_string()
    }

    /// Returns the value of the specified attribute, or an empty string
    ///
    /// The lookup matches the qualified name first, then any attribute with
    /// the same local name (`opf:role` matches `role`).
    pub fn attr(&self, name: &str) -> String {
        if let Some(value) = self.attributes.get(name) {
            return value.clone();
        }

        self.attributes
            .iter()
            .find(|(key, _)| key.rsplit(':').next() == Some(name))
            .map(|(_, value)| value.clone())
            .unwrap_or_default()
    }

    /// Find the first element with the specified name, the element itself included
    pub fn find_element(&self, name: &str) -> Option<&XmlElement> {
        self.find_elements_by_name(name).next()
    }

    /// Find all elements with the specified name, in document order
    pub fn find_elements_by_name(&self, name: &str) -> impl Iterator<Item = &XmlElement> {
        SearchElementsByNameIter::new(self, name)
    }

    /// Find all elements with the specified name among the child elements of the current element
    pub fn find_children_by_name(&self, name: &str) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter(move |child| child.name == name)
    }

    /// Get children elements
    pub fn children(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter()
    }
}

impl Drop for XmlElement {
    // Unlinks descendants one at a time, deep documents would otherwise
    // exhaust the stack
    fn drop(&mut self) {
        let mut pending = mem::take(&mut self.children);
        while let Some(mut element) = pending.pop() {
            pending.append(&mut element.children);
        }
    }
}

struct SearchElementsByNameIter<'a> {
    stack: Vec<&'a XmlElement>,
    target_name: String,
}

impl<'a> SearchElementsByNameIter<'a> {
    fn new(root: &'a XmlElement, name: &str) -> Self {
        Self {
            stack: vec![root],
            target_name: name.to_string(),
        }
    }
}

impl<'a> Iterator for SearchElementsByNameIter<'a> {
    type Item = &'a XmlElement;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(element) = self.stack.pop() {
            self.stack.extend(element.children.iter().rev());
            if element.name == self.target_name {
                return Some(element);
            }
        }
        None
    }
}

/// XML parser used to parse XML content and build an XML element tree
pub struct XmlReader {}

impl XmlReader {
    /// Parses an XML from string and builds the root element
    ///
    /// Comments, processing instructions, declarations and doctypes are
    /// ignored. Predefined and numeric entity references are resolved into
    /// the surrounding text.
    ///
    /// ## Return
    /// - `Ok(XmlElement)`: The root element of the XML element tree
    /// - `Err(EpubError)`: The document is empty or malformed
    pub fn parse(content: &str) -> Result<XmlElement, EpubError> {
        if content.trim().is_empty() {
            return Err(EpubError::EmptyDataError);
        }

        let mut reader = Reader::from_str(content);
        let mut stack = Vec::<XmlElement>::new();
        let mut root = None;

        loop {
            match reader.read_event()? {
                Event::Eof => break,

                Event::Start(e) => {
                    stack.push(Self::make_element(&e));
                }

                Event::End(_) => {
                    if let Some(element) = stack.pop() {
                        match stack.last_mut() {
                            Some(parent) => parent.children.push(element),
                            None => root = Some(element),
                        }
                    }
                }

                Event::Empty(e) => {
                    let element = Self::make_element(&e);
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => root = Some(element),
                    }
                }

                Event::Text(e) => {
                    if let Some(element) = stack.last_mut() {
                        element.text.push_str(&String::from_utf8_lossy(e.as_ref()));
                    }
                }

                Event::CData(e) => {
                    if let Some(element) = stack.last_mut() {
                        element.text.push_str(&String::from_utf8_lossy(e.as_ref()));
                    }
                }

                Event::GeneralRef(e) => {
                    if let Some(element) = stack.last_mut() {
                        let name = String::from_utf8_lossy(e.as_ref()).to_string();
                        if let Some(resolved) = resolve_predefined_entity(&name) {
                            element.text.push_str(resolved);
                        } else if let Ok(Some(ch)) = e.resolve_char_ref() {
                            element.text.push(ch);
                        } else {
                            element.text.push_str(&format!("&{};", name));
                        }
                    }
                }

                // Ignore the following events (elements):
                // Comment, PI, Declaration, Doctype
                _ => continue,
            }
        }

        root.ok_or(EpubError::FailedParsingXml)
    }

    /// Parse XML from bytes and builds the root element
    pub fn parse_bytes(bytes: &[u8]) -> Result<XmlElement, EpubError> {
        let content = bytes.decode()?;
        Self::parse(&content)
    }

    fn make_element(start: &quick_xml::events::BytesStart) -> XmlElement {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).to_string();
        let mut element = XmlElement::new(name);

        for attr in start.attributes().flatten() {
            let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
            if key == "xmlns" || key.starts_with("xmlns:") {
                continue;
            }

            let raw = String::from_utf8_lossy(&attr.value).to_string();
            let value = match quick_xml::escape::unescape(&raw) {
                Ok(value) => value.to_string(),
                Err(_) => raw,
            };
            element.attributes.insert(key, value);
        }

        element
    }
}
