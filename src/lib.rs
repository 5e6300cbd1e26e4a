//! Epub unpack
//!
//! A Rust library that turns uploaded EPUB files into a self-contained,
//! web-servable directory tree.
//!
//! An extraction unpacks the archive beneath a storage root, reads the
//! container, package document and NCX navigation map, and rewrites every
//! content document of the reading order so that stylesheets are inlined and
//! image and link references point at stable public paths. The resulting
//! [Book](types::Book) lists the metadata, the reading order, the table of
//! contents and the cover image, and serializes into the record the library
//! service persists.
//!
//! ## Features
//!
//! - Extract archives safely: entries escaping the book directory are skipped
//!   and every resolved reference stays inside it.
//! - Decode `container.xml`, OPF package documents and NCX navigation maps
//!   permissively.
//! - Locate the cover through the guide, the `cover` meta or the cover page.
//! - Give every book its own directory, even when uploads share a name.
//!
//! ## Quick Start
//!
//! ```rust, ignore
//! # use epub_unpack::{config::Config, types::Book};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_env();
//! let book = Book::new(&config, "uploads/Dune.epub")?;
//!
//! println!("Title: {}", book.info.title);
//! for (label, path) in &book.table_of_contents {
//!     println!("{label}: {path}");
//! }
//!
//! let record = serde_json::to_string(&book)?;
//! # Ok(())
//! # }
//! ```

pub(crate) mod html;
pub(crate) mod utils;

pub mod config;
pub mod content;
pub mod epub;
pub mod error;
pub mod path;
pub mod schema;
pub mod toc;
pub mod types;

pub use utils::{DecodeBytes, extract_archive, reserve_book_directory};
