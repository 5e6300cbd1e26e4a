use std::{
    fs::{self, File},
    io::{BufReader, Read, Seek},
    path::Path,
};

use log::{debug, info, warn};

use crate::{
    config::Config,
    content::{MarkupDocument, rewrite_content_file},
    error::EpubError,
    path::PathResolver,
    schema::{parse_container, parse_navigation_map, parse_package},
    toc::{detect_fixed_layout, flatten_nav_map},
    types::{Book, ContainerDescriptor, ContentFile, ContentType, PackageDocument},
    utils::{
        DecodeBytes, book_name_from_filename, extract_archive, has_epub_extension,
        read_required_file, reserve_book_directory,
    },
};

/// Content of the `mimetype` entry of every EPUB
const EPUB_MIMETYPE: &str = "application/epub+zip";

/// Media type the container rootfile must declare
const PACKAGE_MEDIA_TYPE: &str = "application/oebps-package+xml";

/// Media type of NCX navigation maps in the manifest
const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";

const CONTAINER_PATH: &str = "META-INF/container.xml";

/// Progress of one extraction
///
/// The states follow each other strictly in declaration order; any error
/// moves the pipeline to `Failed`, which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Unextracted,
    MimetypeVerified,
    ContainerParsed,
    PackageParsed,
    FilesRewritten,
    TocAssembled,
    Complete,
    Failed,
}

/// Extraction and normalization of one EPUB archive into a [Book]
///
/// The pipeline unpacks the archive beneath the configured storage root,
/// checks its `mimetype`, follows the container to the package document,
/// lists the reading order, locates the cover, rewrites every content
/// document and finally flattens the NCX table of contents. The first
/// error stops the run and is returned as is.
///
/// ## Notes
/// - Files extracted before a failure stay on disk unless
///   [Config::cleanup_on_failure] is set.
pub struct Pipeline<'a> {
    config: &'a Config,
    state: PipelineState,
    book: Book,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            state: PipelineState::Unextracted,
            book: Book::default(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Runs the extraction to completion
    ///
    /// ## Parameters
    /// - `reader`: The uploaded archive
    /// - `filename`: The uploaded file name, used for the extension check
    ///   and to name the book directory
    ///
    /// ## Return
    /// - `Ok(Book)`: The fully built book
    /// - `Err(EpubError)`: The first error encountered
    pub fn run<R: Read + Seek>(&mut self, reader: R, filename: &str) -> Result<Book, EpubError> {
        if self.state != PipelineState::Unextracted {
            warn!("Pipeline reused after reaching {:?}, starting over", self.state);
            self.state = PipelineState::Unextracted;
            self.book = Book::default();
        }

        info!(
            "Extracting \"{}\" into {:?}",
            filename, self.config.storage_root
        );

        match self.execute(reader, filename) {
            Ok(()) => {
                self.transition(PipelineState::Complete);
                info!(
                    "Extracted \"{}\" into \"{}\": {} files, {} table of contents entries",
                    filename,
                    self.book.directory,
                    self.book.files.len(),
                    self.book.table_of_contents.len()
                );
                Ok(std::mem::take(&mut self.book))
            }

            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    fn execute<R: Read + Seek>(&mut self, reader: R, filename: &str) -> Result<(), EpubError> {
        if !has_epub_extension(filename) {
            return Err(EpubError::InvalidExtension {
                filename: filename.to_string(),
            });
        }

        self.book.name = book_name_from_filename(filename);
        self.book.directory = reserve_book_directory(&self.config.storage_root, &self.book.name)?;
        let book_root = self.config.storage_root.join(&self.book.directory);

        extract_archive(reader, &book_root)?;
        self.verify_mimetype(&book_root)?;

        let container = self.parse_container(&book_root)?;
        let resolver = PathResolver::new(
            &self.config.storage_root,
            &self.book.directory,
            &container.full_path,
        );

        let package = self.parse_package(&container, &resolver)?;
        self.resolve_package(&package, &resolver)?;
        self.resolve_cover(&package, &resolver);

        self.rewrite_files(&resolver)?;
        self.assemble_toc(&resolver)?;

        Ok(())
    }

    fn verify_mimetype(&mut self, book_root: &Path) -> Result<(), EpubError> {
        let data = read_required_file(&book_root.join("mimetype"), "mimetype")?;
        let mimetype = String::from_utf8_lossy(&data);

        if mimetype.trim() != EPUB_MIMETYPE {
            return Err(EpubError::MimetypeMismatch {
                found: mimetype.trim().to_string(),
            });
        }

        self.transition(PipelineState::MimetypeVerified);
        Ok(())
    }

    fn parse_container(&mut self, book_root: &Path) -> Result<ContainerDescriptor, EpubError> {
        let data = read_required_file(&book_root.join(CONTAINER_PATH), CONTAINER_PATH)?;
        let container = parse_container(&data)?;

        if container.media_type != PACKAGE_MEDIA_TYPE {
            return Err(EpubError::MediaTypeMismatch {
                found: container.media_type,
            });
        }
        if container.full_path.is_empty() {
            return Err(EpubError::NonCanonicalEpub {
                expected_file: "package document".to_string(),
            });
        }

        self.transition(PipelineState::ContainerParsed);
        Ok(container)
    }

    fn parse_package(
        &mut self,
        container: &ContainerDescriptor,
        resolver: &PathResolver,
    ) -> Result<PackageDocument, EpubError> {
        let package_path = resolver.resolve(&container.full_path);
        let data = read_required_file(&package_path.disk, &container.full_path)?;
        let package = parse_package(&data)?;

        self.book.package_path = container.full_path.clone();
        self.transition(PipelineState::PackageParsed);
        Ok(package)
    }

    /// Lists the reading order and locates the navigation map
    ///
    /// Every spine itemref is looked up in the manifest and resolved into a
    /// [ContentFile]. The navigation map is the item named by the spine's
    /// `toc` attribute or, when the spine names none, the first NCX item of
    /// the manifest.
    pub fn resolve_package(
        &mut self,
        package: &PackageDocument,
        resolver: &PathResolver,
    ) -> Result<(), EpubError> {
        let mut files = Vec::with_capacity(package.spine.itemrefs.len());
        for idref in &package.spine.itemrefs {
            let item = package
                .manifest
                .get(idref)
                .ok_or_else(|| EpubError::ResourceIdNotExist { id: idref.clone() })?;

            let resolved = resolver.resolve(&item.href);
            files.push(ContentFile {
                path: resolved.public,
                content_type: ContentType::from_path(&resolved.disk.to_string_lossy()),
                disk_path: resolved.disk,
            });
        }

        let toc_href = match package.spine.toc.as_str() {
            "" => package
                .manifest
                .values()
                .find(|item| item.media_type == NCX_MEDIA_TYPE)
                .map(|item| item.href.as_str())
                .ok_or_else(|| EpubError::NonCanonicalEpub {
                    expected_file: "toc.ncx".to_string(),
                })?,
            toc_id => package
                .manifest
                .get(toc_id)
                .map(|item| item.href.as_str())
                .ok_or_else(|| EpubError::ResourceIdNotExist {
                    id: toc_id.to_string(),
                })?,
        };

        self.book.navigation_path = resolver.resolve(toc_href).disk;
        self.book.info = package.metadata.clone();
        self.book.files = files;
        Ok(())
    }

    /// Locates the cover image
    ///
    /// The first tier that yields a target wins:
    /// 1. the guide reference of type `cover`;
    /// 2. the `<meta name="cover">` content, taken as a manifest id.
    ///
    /// When the target is an HTML or XHTML page, the first `<img>` of the
    /// page, or else its first `<image>`, is the cover. A book without a
    /// cover keeps an empty cover path.
    pub fn resolve_cover(&mut self, package: &PackageDocument, resolver: &PathResolver) {
        let guide_target = package
            .guide
            .iter()
            .find(|reference| reference.kind == "cover" && !reference.href.trim().is_empty())
            .map(|reference| reference.href.trim().to_string());

        let target = guide_target.or_else(|| {
            let meta = package
                .metadata
                .raw_meta
                .iter()
                .find(|meta| meta.name == "cover")?;

            match package.manifest.get(meta.content.trim()) {
                Some(item) => Some(item.href.clone()),
                None => {
                    warn!(
                        "Cover meta names \"{}\", which is not a manifest id",
                        meta.content
                    );
                    None
                }
            }
        });

        let target = match target {
            Some(target) => resolver.resolve(&target),
            None => {
                debug!("No cover declared for \"{}\"", self.book.name);
                return;
            }
        };

        if !ContentType::from_path(&target.disk.to_string_lossy()).is_markup() {
            self.book.cover_image_path = target.public;
            return;
        }

        match Self::find_cover_in_page(&target.disk) {
            Ok(Some(source)) => self.book.cover_image_path = resolver.resolve(&source).public,
            Ok(None) => debug!("Cover page \"{}\" holds no image", target.public),
            Err(err) => warn!("Unable to read cover page \"{}\": {}", target.public, err),
        }
    }

    fn find_cover_in_page(page: &Path) -> Result<Option<String>, EpubError> {
        let content = fs::read(page)?.decode()?;
        let content_type = ContentType::from_path(&page.to_string_lossy());
        let document = MarkupDocument::parse_content(&content, content_type)?;
        Ok(document.find_image_source().map(|source| source.trim().to_string()))
    }

    fn rewrite_files(&mut self, resolver: &PathResolver) -> Result<(), EpubError> {
        for file in &self.book.files {
            rewrite_content_file(file, resolver)?;
        }

        self.transition(PipelineState::FilesRewritten);
        Ok(())
    }

    fn assemble_toc(&mut self, resolver: &PathResolver) -> Result<(), EpubError> {
        let expected_file = self.book.navigation_path.to_string_lossy().to_string();
        let data = read_required_file(&self.book.navigation_path, &expected_file)?;
        let map = parse_navigation_map(&data)?;

        self.book.table_of_contents = flatten_nav_map(&map, resolver);
        self.book.is_fixed_layout = detect_fixed_layout(&map.head);

        self.transition(PipelineState::TocAssembled);
        Ok(())
    }

    fn transition(&mut self, state: PipelineState) {
        debug!("Pipeline {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn fail(&mut self, err: &EpubError) {
        warn!("Extraction failed in state {:?}: {}", self.state, err);
        self.transition(PipelineState::Failed);

        if self.config.cleanup_on_failure && !self.book.directory.is_empty() {
            let book_root = self.config.storage_root.join(&self.book.directory);
            if let Err(err) = fs::remove_dir_all(&book_root) {
                warn!("Unable to remove {:?}: {}", book_root, err);
            }
        }
    }
}

impl Book {
    /// Extracts the EPUB file at `path`
    ///
    /// The extension is checked before the file is opened.
    pub fn new<P: AsRef<Path>>(config: &Config, path: P) -> Result<Self, EpubError> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();

        if !has_epub_extension(&filename) {
            return Err(EpubError::InvalidExtension { filename });
        }

        let file = File::open(path)?;
        Self::from_reader(config, BufReader::new(file), &filename)
    }

    /// Extracts an uploaded EPUB held by `reader`
    ///
    /// `filename` is the name the archive was uploaded under.
    pub fn from_reader<R: Read + Seek>(
        config: &Config,
        reader: R,
        filename: &str,
    ) -> Result<Self, EpubError> {
        Pipeline::new(config).run(reader, filename)
    }
}
