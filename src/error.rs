//! Error Type Definition Module
//!
//! This module defines the error types that may be encountered while an EPUB
//! archive is extracted and normalized. All errors are uniformly wrapped in the
//! `EpubError` enumeration, and every variant belongs to one of the two
//! [ErrorKind]s so callers can map failures to user-facing responses.

use thiserror::Error;

/// The two families of failure an extraction can end with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The input is not an EPUB this crate can handle: wrong extension,
    /// wrong mimetype or media type, undecodable zip/XML, dangling references.
    Format,

    /// A filesystem operation failed, or a content document could not be
    /// read, parsed, rewritten or written back.
    Io,
}

/// Types of errors that can occur during EPUB extraction
#[derive(Debug, Error)]
pub enum EpubError {
    /// ZIP archive related errors
    ///
    /// Errors occur when the uploaded data cannot be opened or decoded
    /// as a ZIP archive, such as file corruption or truncation.
    #[error("Archive error: {source}")]
    ArchiveError { source: zip::result::ZipError },

    /// Data Decoding Error - Null data
    ///
    /// This error occurs when trying to decode an empty stream.
    #[error("Decode error: The data is empty.")]
    EmptyDataError,

    /// XML parsing failure error
    ///
    /// The document was read to the end without producing a root element.
    #[error("Failed parsing XML error: The document does not contain a root element.")]
    FailedParsingXml,

    #[error("IO error: {source}")]
    IOError { source: std::io::Error },

    /// The uploaded file name does not carry the `.epub` extension
    #[error("Invalid extension: \"{filename}\" is not an epub file.")]
    InvalidExtension { filename: String },

    /// The `mimetype` entry does not hold `application/epub+zip`
    #[error("Mimetype mismatch: Expected \"application/epub+zip\", found \"{found}\".")]
    MimetypeMismatch { found: String },

    /// The container rootfile does not point to an OPF package document
    #[error(
        "Media type mismatch: Expected \"application/oebps-package+xml\" rootfile, found \"{found}\"."
    )]
    MediaTypeMismatch { found: String },

    /// Non-canonical EPUB structure error
    ///
    /// This error occurs when an EPUB file lacks some file that is
    /// required to locate its content.
    #[error("Non-canonical epub: The \"{expected_file}\" file was not found.")]
    NonCanonicalEpub { expected_file: String },

    /// Unable to find the resource id error
    ///
    /// This error occurs when the spine or the toc reference names an id
    /// that doesn't exist in the manifest.
    #[error("Resource Id Not Exist: There is no resource item with id \"{id}\".")]
    ResourceIdNotExist { id: String },

    /// A `<link rel="stylesheet">` points at a file that cannot be read
    #[error("Missing stylesheet: Unable to read \"{path}\": {source}")]
    MissingStylesheet {
        path: String,
        source: std::io::Error,
    },

    /// Rewriting a single content document failed
    #[error("Content rewrite failed for \"{file}\": {source}")]
    ContentRewrite {
        file: String,
        source: Box<EpubError>,
    },

    /// Every candidate directory name for the book is already taken
    #[error("Storage exhausted: No free directory is left for book \"{name}\".")]
    StorageExhausted { name: String },

    /// UTF-8 decoding error
    #[error("Decode error: {source}")]
    Utf8DecodeError { source: std::string::FromUtf8Error },

    /// UTF-16 decoding error
    #[error("Decode error: {source}")]
    Utf16DecodeError { source: std::string::FromUtf16Error },

    /// QuickXml error
    ///
    /// This error occurs when one of the package XML documents is malformed.
    #[error("QuickXml error: {source}")]
    QuickXmlError { source: quick_xml::Error },
}

impl EpubError {
    /// Classifies the error into one of the two failure families
    pub fn kind(&self) -> ErrorKind {
        match self {
            EpubError::IOError { .. }
            | EpubError::MissingStylesheet { .. }
            | EpubError::ContentRewrite { .. }
            | EpubError::StorageExhausted { .. } => ErrorKind::Io,

            EpubError::ArchiveError { source } => match source {
                zip::result::ZipError::Io(_) => ErrorKind::Io,
                _ => ErrorKind::Format,
            },

            EpubError::EmptyDataError
            | EpubError::FailedParsingXml
            | EpubError::InvalidExtension { .. }
            | EpubError::MimetypeMismatch { .. }
            | EpubError::MediaTypeMismatch { .. }
            | EpubError::NonCanonicalEpub { .. }
            | EpubError::ResourceIdNotExist { .. }
            | EpubError::Utf8DecodeError { .. }
            | EpubError::Utf16DecodeError { .. }
            | EpubError::QuickXmlError { .. } => ErrorKind::Format,
        }
    }
}

impl From<zip::result::ZipError> for EpubError {
    fn from(value: zip::result::ZipError) -> Self {
        EpubError::ArchiveError { source: value }
    }
}

impl From<quick_xml::Error> for EpubError {
    fn from(value: quick_xml::Error) -> Self {
        EpubError::QuickXmlError { source: value }
    }
}

impl From<std::io::Error> for EpubError {
    fn from(value: std::io::Error) -> Self {
        EpubError::IOError { source: value }
    }
}

impl From<std::string::FromUtf8Error> for EpubError {
    fn from(value: std::string::FromUtf8Error) -> Self {
        EpubError::Utf8DecodeError { source: value }
    }
}

impl From<std::string::FromUtf16Error> for EpubError {
    fn from(value: std::string::FromUtf16Error) -> Self {
        EpubError::Utf16DecodeError { source: value }
    }
}

#[cfg(test)]
impl PartialEq for EpubError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::InvalidExtension { filename: l_filename },
                Self::InvalidExtension { filename: r_filename },
            ) => l_filename == r_filename,
            (Self::MimetypeMismatch { found: l_found }, Self::MimetypeMismatch { found: r_found }) => {
                l_found == r_found
            }
            (
                Self::MediaTypeMismatch { found: l_found },
                Self::MediaTypeMismatch { found: r_found },
            ) => l_found == r_found,
            (
                Self::NonCanonicalEpub {
                    expected_file: l_expected_file,
                },
                Self::NonCanonicalEpub {
                    expected_file: r_expected_file,
                },
            ) => l_expected_file == r_expected_file,
            (Self::ResourceIdNotExist { id: l_id }, Self::ResourceIdNotExist { id: r_id }) => {
                l_id == r_id
            }
            (Self::MissingStylesheet { path: l_path, .. }, Self::MissingStylesheet { path: r_path, .. }) => {
                l_path == r_path
            }
            (
                Self::ContentRewrite {
                    file: l_file,
                    source: l_source,
                },
                Self::ContentRewrite {
                    file: r_file,
                    source: r_source,
                },
            ) => l_file == r_file && l_source == r_source,
            (Self::StorageExhausted { name: l_name }, Self::StorageExhausted { name: r_name }) => {
                l_name == r_name
            }
            (
                Self::Utf8DecodeError { source: l_source },
                Self::Utf8DecodeError { source: r_source },
            ) => l_source == r_source,

            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}
