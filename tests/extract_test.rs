//! End-to-end extraction tests over in-memory fixture archives

mod common;

use std::{fs, path::Path};

use common::{EpubFixture, container, container_with_media_type, dune_ncx, dune_part};
use epub_unpack::{
    config::Config,
    content::rewrite_content_file,
    epub::{Pipeline, PipelineState},
    error::{EpubError, ErrorKind},
    path::PathResolver,
    types::{Book, ContentType},
};

fn extract(root: &Path, fixture: &EpubFixture) -> Result<Book, EpubError> {
    Book::from_reader(&Config::new(root), fixture.build(), "Dune.epub")
}

/// Strips a `#fragment` or `?query` so the path can be looked up on disk
fn on_disk(root: &Path, public: &str) -> std::path::PathBuf {
    let path = public.split(['#', '?']).next().unwrap_or_default();
    root.join(path)
}

#[test]
fn test_dune_scenario() {
    let root = tempfile::tempdir().unwrap();
    let book = extract(root.path(), &EpubFixture::dune()).unwrap();

    assert_eq!(book.name, "Dune");
    assert_eq!(book.directory, "Dune");
    assert_eq!(book.package_path(), "content.opf");
    assert_eq!(book.info.title, "Dune");
    assert_eq!(book.info.author, "Herbert, Frank");
    assert_eq!(book.info.language, "en");
    assert_eq!(book.info.publisher, "Ace");
    assert_eq!(book.info.subjects, vec!["Fiction", "Science Fiction"]);

    assert_eq!(book.files.len(), 10);
    assert_eq!(book.files[0].path, "Dune/titlepage.xhtml");
    assert_eq!(book.files[1].path, "Dune/OEBPS/part1.xhtml");
    assert!(
        book.files
            .iter()
            .all(|file| file.content_type == ContentType::Xhtml)
    );

    assert_eq!(
        book.table_of_contents[0],
        ("Dune".to_string(), "Dune/OEBPS/part1.xhtml".to_string())
    );
    assert_eq!(
        on_disk(root.path(), &book.table_of_contents[0].1),
        root.path().join("Dune/OEBPS/part1.xhtml")
    );

    assert_eq!(book.cover_image_path, "Dune/cover.jpeg");
    assert!(!book.is_fixed_layout);
}

#[test]
fn test_every_path_exists() {
    let root = tempfile::tempdir().unwrap();
    let book = extract(root.path(), &EpubFixture::dune()).unwrap();

    for file in &book.files {
        assert!(on_disk(root.path(), &file.path).is_file(), "{}", file.path);
        assert!(file.disk_path.starts_with(root.path().join("Dune")));
    }
    for (label, path) in &book.table_of_contents {
        assert!(on_disk(root.path(), path).is_file(), "{label}: {path}");
    }
    assert!(on_disk(root.path(), &book.cover_image_path).is_file());
    assert!(book.navigation_path().is_file());
}

/// Parents precede their children, which precede the next sibling,
/// whatever the `playOrder` attributes say
#[test]
fn test_table_of_contents_pre_order() {
    let root = tempfile::tempdir().unwrap();
    let book = extract(root.path(), &EpubFixture::dune()).unwrap();

    let labels = book
        .table_of_contents
        .iter()
        .map(|(label, _)| label.as_str())
        .collect::<Vec<_>>();
    assert_eq!(
        labels,
        vec![
            "Dune",
            "Book One: Dune",
            "Chapter 1",
            "Book Two: Muad'Dib",
            "Appendix"
        ]
    );
    assert_eq!(book.table_of_contents[2].1, "Dune/OEBPS/part2.xhtml#ch1");
}

#[test]
fn test_serialized_record() {
    let root = tempfile::tempdir().unwrap();
    let book = extract(root.path(), &EpubFixture::dune()).unwrap();

    let value = serde_json::to_value(&book).unwrap();
    assert_eq!(value["Info"]["Title"], "Dune");
    assert_eq!(value["Info"]["Author"], "Herbert, Frank");
    assert_eq!(value["Files"].as_array().unwrap().len(), 10);
    assert_eq!(value["Files"][1]["Path"], "Dune/OEBPS/part1.xhtml");
    assert_eq!(value["Files"][1]["ContentType"], "application/xhtml+xml");
    assert_eq!(
        value["TableOfContents"][0],
        serde_json::json!(["Dune", "Dune/OEBPS/part1.xhtml"])
    );
    assert_eq!(value["CoverImagePath"], "Dune/cover.jpeg");
    assert_eq!(value["IsFixedLayout"], false);
}

#[test]
fn test_content_is_rewritten() {
    let root = tempfile::tempdir().unwrap();
    extract(root.path(), &EpubFixture::dune()).unwrap();

    let part = fs::read_to_string(root.path().join("Dune/OEBPS/part1.xhtml")).unwrap();
    assert!(!part.contains("<link"));
    assert_eq!(part.matches("<style>").count(), 1);
    assert!(part.contains("<style>body { font-family: serif; }\n@page { margin: 5pt; }</style>"));
    assert!(part.contains(r#"<img src="Dune/images/map.png" alt="Map of Arrakis"/>"#));
    assert!(part.contains(r#"<a href="Dune/OEBPS/part2.xhtml#ch2">Next</a>"#));
    assert!(part.contains(r#"<a href="https://example.com/dune">Web</a>"#));
    assert!(part.contains(r##"<a href="#ch1">Top</a>"##));
    assert!(part.starts_with("<?xml version='1.0' encoding='utf-8'?>"));

    let title_page = fs::read_to_string(root.path().join("Dune/titlepage.xhtml")).unwrap();
    assert!(title_page.contains(r#"xlink:href="Dune/cover.jpeg""#));
    assert!(!title_page.contains("<style>"));
}

/// Rewriting already rewritten documents changes nothing
#[test]
fn test_rewrite_is_idempotent() {
    let root = tempfile::tempdir().unwrap();
    let book = extract(root.path(), &EpubFixture::dune()).unwrap();
    let resolver = PathResolver::new(root.path(), &book.directory, book.package_path());

    for file in &book.files {
        let before = fs::read(&file.disk_path).unwrap();
        rewrite_content_file(file, &resolver).unwrap();
        assert_eq!(fs::read(&file.disk_path).unwrap(), before, "{}", file.path);
    }
}

#[test]
fn test_fixed_layout() {
    let root = tempfile::tempdir().unwrap();
    let fixture = EpubFixture::dune().file("toc.ncx", dune_ncx("320"));
    let book = extract(root.path(), &fixture).unwrap();
    assert!(book.is_fixed_layout);
}

/// A wrong `mimetype` stops the pipeline before any XML is parsed
#[test]
fn test_mimetype_mismatch() {
    let root = tempfile::tempdir().unwrap();
    let config = Config::new(root.path());
    let fixture = EpubFixture::dune()
        .file("mimetype", "application/zip")
        .file("META-INF/container.xml", "<container><rootfiles>");

    let mut pipeline = Pipeline::new(&config);
    let err = pipeline.run(fixture.build(), "Dune.epub").unwrap_err();

    assert!(matches!(
        err,
        EpubError::MimetypeMismatch { ref found } if found == "application/zip"
    ));
    assert_eq!(err.kind(), ErrorKind::Format);
    assert_eq!(pipeline.state(), PipelineState::Failed);
}

#[test]
fn test_mimetype_with_trailing_newline() {
    let root = tempfile::tempdir().unwrap();
    let fixture = EpubFixture::dune().file("mimetype", "application/epub+zip\n");
    assert!(extract(root.path(), &fixture).is_ok());
}

#[test]
fn test_missing_mimetype() {
    let root = tempfile::tempdir().unwrap();
    let fixture = EpubFixture::dune().remove("mimetype");
    let err = extract(root.path(), &fixture).unwrap_err();
    assert!(matches!(
        err,
        EpubError::NonCanonicalEpub { ref expected_file } if expected_file == "mimetype"
    ));
}

#[test]
fn test_invalid_extension() {
    let root = tempfile::tempdir().unwrap();
    let storage = root.path().join("storage");
    let config = Config::new(&storage);

    let err = Book::from_reader(&config, EpubFixture::dune().build(), "Dune.pdf").unwrap_err();
    assert!(matches!(
        err,
        EpubError::InvalidExtension { ref filename } if filename == "Dune.pdf"
    ));
    assert_eq!(err.kind(), ErrorKind::Format);
    assert!(!storage.exists());

    let book = Book::from_reader(&config, EpubFixture::dune().build(), "DUNE.EPUB").unwrap();
    assert_eq!(book.directory, "DUNE");
}

#[test]
fn test_not_a_zip() {
    let root = tempfile::tempdir().unwrap();
    let config = Config::new(root.path());
    let reader = std::io::Cursor::new(b"PK definitely not a zip".to_vec());

    let err = Book::from_reader(&config, reader, "Dune.epub").unwrap_err();
    assert!(matches!(err, EpubError::ArchiveError { .. }));
    assert_eq!(err.kind(), ErrorKind::Format);
}

#[test]
fn test_media_type_mismatch() {
    let root = tempfile::tempdir().unwrap();
    let fixture = EpubFixture::dune().file(
        "META-INF/container.xml",
        container_with_media_type("content.opf", "text/xml"),
    );

    let err = extract(root.path(), &fixture).unwrap_err();
    assert!(matches!(
        err,
        EpubError::MediaTypeMismatch { ref found } if found == "text/xml"
    ));
    assert_eq!(err.kind(), ErrorKind::Format);
}

#[test]
fn test_unresolvable_spine_reference() {
    let root = tempfile::tempdir().unwrap();
    let package = common::dune_package().replace(
        r#"<itemref idref="part4"/>"#,
        r#"<itemref idref="part-four"/>"#,
    );
    let fixture = EpubFixture::dune().file("content.opf", package);

    let err = extract(root.path(), &fixture).unwrap_err();
    assert!(matches!(
        err,
        EpubError::ResourceIdNotExist { ref id } if id == "part-four"
    ));
    assert_eq!(err.kind(), ErrorKind::Format);
}

#[test]
fn test_malformed_package() {
    let root = tempfile::tempdir().unwrap();
    let fixture = EpubFixture::dune().file("content.opf", "<package><metadata></package>");

    let err = extract(root.path(), &fixture).unwrap_err();
    assert!(matches!(err, EpubError::QuickXmlError { .. }));
    assert_eq!(err.kind(), ErrorKind::Format);
}

/// A package in a subdirectory sets the prefix of every resolved path
#[test]
fn test_package_in_subdirectory() {
    let root = tempfile::tempdir().unwrap();
    let package = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/"><dc:title>Nested</dc:title></metadata>
  <manifest>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="c1" href="Text/chapter1.xhtml" media-type="application/xhtml+xml"/>
    <item id="img" href="Images/cover.png" media-type="image/png"/>
  </manifest>
  <spine><itemref idref="c1"/></spine>
</package>"#;
    let ncx = r#"<ncx><navMap><navPoint><navLabel><text>One</text></navLabel><content src="Text/chapter1.xhtml"/></navPoint></navMap></ncx>"#;
    let chapter = r#"<html><head><link rel="stylesheet" href="../Styles/main.css"/></head><body><img src="../Images/cover.png"/></body></html>"#;

    let fixture = EpubFixture::new()
        .file("mimetype", "application/epub+zip")
        .file("META-INF/container.xml", container("OEBPS/content.opf"))
        .file("OEBPS/content.opf", package)
        .file("OEBPS/toc.ncx", ncx)
        .file("OEBPS/Text/chapter1.xhtml", chapter)
        .file("OEBPS/Styles/main.css", "p { text-indent: 1em; }")
        .file("OEBPS/Images/cover.png", b"\x89PNG");

    let book = Book::from_reader(&Config::new(root.path()), fixture.build(), "nested.epub").unwrap();

    assert_eq!(book.package_path(), "OEBPS/content.opf");
    assert_eq!(book.files[0].path, "nested/OEBPS/Text/chapter1.xhtml");
    assert_eq!(
        book.table_of_contents,
        vec![(
            "One".to_string(),
            "nested/OEBPS/Text/chapter1.xhtml".to_string()
        )]
    );
    assert_eq!(book.cover_image_path, "");

    let chapter = fs::read_to_string(root.path().join("nested/OEBPS/Text/chapter1.xhtml")).unwrap();
    assert_eq!(
        chapter,
        r#"<html><head><style>p { text-indent: 1em; }</style></head><body><img src="nested/OEBPS/Images/cover.png"/></body></html>"#
    );
}

#[test]
fn test_cover_from_meta_id() {
    let root = tempfile::tempdir().unwrap();
    let package = common::dune_package().replace(
        r#"<reference type="cover" title="Cover" href="titlepage.xhtml"/>"#,
        "",
    );
    let fixture = EpubFixture::dune().file("content.opf", package);

    let book = extract(root.path(), &fixture).unwrap();
    assert_eq!(book.cover_image_path, "Dune/cover.jpeg");
}

/// A missing linked stylesheet fails the rewrite of that document
#[test]
fn test_missing_stylesheet() {
    let root = tempfile::tempdir().unwrap();
    let fixture = EpubFixture::dune().remove("page_styles.css");

    let err = extract(root.path(), &fixture).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    match err {
        EpubError::ContentRewrite { file, source } => {
            assert_eq!(file, "Dune/OEBPS/part1.xhtml");
            assert!(matches!(
                *source,
                EpubError::MissingStylesheet { ref path, .. } if path == "Dune/page_styles.css"
            ));
        }
        other => panic!("unexpected error: {other}"),
    }

    // Partial output stays on disk by default
    assert!(root.path().join("Dune/mimetype").is_file());
}

#[test]
fn test_cleanup_on_failure() {
    let root = tempfile::tempdir().unwrap();
    let config = Config::new(root.path()).with_cleanup_on_failure(true);
    let fixture = EpubFixture::dune().remove("page_styles.css");

    assert!(Book::from_reader(&config, fixture.build(), "Dune.epub").is_err());
    assert!(!root.path().join("Dune").exists());
    assert!(root.path().exists());
}

#[test]
fn test_path_confinement() {
    let root = tempfile::tempdir().unwrap();
    let storage = root.path().join("storage");
    let escaping_part = dune_part(3).replace(
        r#"<a href="https://example.com/dune">"#,
        r#"<a href="../../../../etc/passwd">"#,
    );
    let fixture = EpubFixture::dune()
        .file("../../evil.txt", "escaped")
        .file("OEBPS/part3.xhtml", escaping_part);

    let book = Book::from_reader(&Config::new(&storage), fixture.build(), "Dune.epub").unwrap();

    assert!(!root.path().join("evil.txt").exists());
    assert!(!storage.join("evil.txt").exists());

    let part = fs::read_to_string(storage.join("Dune/OEBPS/part3.xhtml")).unwrap();
    assert!(part.contains(r#"<a href="Dune/etc/passwd">"#));

    let public_paths = book
        .files
        .iter()
        .map(|file| file.path.as_str())
        .chain(book.table_of_contents.iter().map(|(_, path)| path.as_str()))
        .chain(std::iter::once(book.cover_image_path.as_str()));
    for path in public_paths {
        assert!(path.starts_with("Dune/"), "{path}");
        assert!(path.split('/').all(|segment| segment != ".."), "{path}");
    }
}

/// Uploads sharing a name each get their own directory
#[test]
fn test_name_collision() {
    let root = tempfile::tempdir().unwrap();
    let first = extract(root.path(), &EpubFixture::dune()).unwrap();
    let second = extract(root.path(), &EpubFixture::dune()).unwrap();

    assert_eq!(first.directory, "Dune");
    assert_eq!(second.directory, "Dune-2");
    assert_eq!(second.name, "Dune");
    assert_eq!(second.files[1].path, "Dune-2/OEBPS/part1.xhtml");
    assert_eq!(
        second.table_of_contents[0].1,
        "Dune-2/OEBPS/part1.xhtml"
    );
    assert_eq!(second.cover_image_path, "Dune-2/cover.jpeg");

    let part = fs::read_to_string(root.path().join("Dune-2/OEBPS/part1.xhtml")).unwrap();
    assert!(part.contains(r#"<img src="Dune-2/images/map.png""#));

    // The first book is untouched by the second extraction
    let part = fs::read_to_string(root.path().join("Dune/OEBPS/part1.xhtml")).unwrap();
    assert!(part.contains(r#"<img src="Dune/images/map.png""#));
}

#[test]
fn test_book_from_path() {
    let root = tempfile::tempdir().unwrap();
    let upload = root.path().join("Dune.epub");
    fs::write(&upload, EpubFixture::dune().build().into_inner()).unwrap();

    let config = Config::new(root.path().join("books"));
    let book = Book::new(&config, &upload).unwrap();
    assert_eq!(book.info.title, "Dune");
    assert!(root.path().join("books/Dune/OEBPS/part1.xhtml").is_file());

    let err = Book::new(&config, root.path().join("missing.pdf")).unwrap_err();
    assert!(matches!(err, EpubError::InvalidExtension { .. }));

    let err = Book::new(&config, root.path().join("missing.epub")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}

/// Builds an archive with the package at the root, a one-entry NCX and the
/// given spine documents
fn single_package_fixture(documents: &[(&str, &str, &str)]) -> EpubFixture {
    let manifest = documents
        .iter()
        .enumerate()
        .map(|(index, (href, media_type, _))| {
            format!(r#"<item id="doc{index}" href="{href}" media-type="{media_type}"/>"#)
        })
        .collect::<String>();
    let spine = (0..documents.len())
        .map(|index| format!(r#"<itemref idref="doc{index}"/>"#))
        .collect::<String>();

    let package = format!(
        r#"<package xmlns="http://www.idpf.org/2007/opf" version="2.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/"><dc:title>Arrakis</dc:title></metadata>
  <manifest><item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>{manifest}</manifest>
  <spine toc="ncx">{spine}</spine>
</package>"#
    );
    let ncx = format!(
        r#"<ncx><navMap><navPoint><navLabel><text>Start</text></navLabel><content src="{}"/></navPoint></navMap></ncx>"#,
        documents[0].0
    );

    let mut fixture = EpubFixture::new()
        .file("mimetype", "application/epub+zip")
        .file("META-INF/container.xml", container("content.opf"))
        .file("content.opf", package)
        .file("toc.ncx", ncx);
    for (href, _, content) in documents {
        fixture = fixture.file(href, content);
    }
    fixture
}

#[test]
fn test_book_named_after_package_directory() {
    let root = tempfile::tempdir().unwrap();
    let chapter = r#"<html><head><title>One</title></head><body><img src="Images/map.png"/></body></html>"#;
    let fixture = single_package_fixture(&[("Text/ch1.xhtml", "application/xhtml+xml", chapter)])
        .file("Images/map.png", b"\x89PNG");

    let book = Book::from_reader(&Config::new(root.path()), fixture.build(), "Text.epub").unwrap();

    assert_eq!(book.directory, "Text");
    assert_eq!(book.files[0].path, "Text/Text/ch1.xhtml");
    assert_eq!(
        book.table_of_contents,
        vec![("Start".to_string(), "Text/Text/ch1.xhtml".to_string())]
    );
    assert!(root.path().join("Text/Text/ch1.xhtml").is_file());

    let chapter = fs::read_to_string(root.path().join("Text/Text/ch1.xhtml")).unwrap();
    assert!(chapter.contains(r#"<img src="Text/Images/map.png"/>"#));
    assert!(root.path().join("Text/Images/map.png").is_file());
}

#[test]
fn test_html_content_document() {
    let root = tempfile::tempdir().unwrap();
    let chapter = r#"<!DOCTYPE html><HTML><HEAD><TITLE>Arrakis</TITLE><LINK REL=stylesheet HREF=style.css><STYLE>p > em { content: "&"; }</STYLE><SCRIPT>if (a < b && c) { go(); }</SCRIPT></HEAD><BODY><P CLASS=lead>Tom &amp; Jerry<IMG SRC=images/map.png ALT=Map><P><A HREF=chapter.html#top>Top</A> <a href=https://example.com/dune>Web</a></BODY></HTML>"#;
    let fixture = single_package_fixture(&[("chapter.html", "text/html", chapter)])
        .file("style.css", "body { color: black; }")
        .file("images/map.png", b"\x89PNG");

    let book = Book::from_reader(&Config::new(root.path()), fixture.build(), "Arrakis.epub").unwrap();
    assert_eq!(book.files[0].content_type, ContentType::Html);

    let path = root.path().join("Arrakis/chapter.html");
    let rewritten = fs::read_to_string(&path).unwrap();

    assert!(rewritten.starts_with("<!DOCTYPE html><html><head><title>Arrakis</title>"));
    assert!(!rewritten.contains("<link"));
    assert!(rewritten.contains(r#"<style>p > em { content: "&"; }</style>"#));
    assert!(rewritten.contains("<script>if (a < b && c) { go(); }</script>"));
    assert!(rewritten.contains("<style>body { color: black; }</style></head>"));
    assert!(rewritten.contains(
        r#"<p class="lead">Tom &amp; Jerry<img src="Arrakis/images/map.png" alt="Map"></p>"#
    ));
    assert!(rewritten.contains(r##"<a href="Arrakis/chapter.html#top">Top</a>"##));
    assert!(rewritten.contains(r#"<a href="https://example.com/dune">Web</a>"#));

    let resolver = PathResolver::new(root.path(), "Arrakis", book.package_path());
    rewrite_content_file(&book.files[0], &resolver).unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), rewritten);
}

#[test]
fn test_empty_content_document() {
    let root = tempfile::tempdir().unwrap();
    let chapter = r#"<html><head><title>One</title></head><body><p>One</p></body></html>"#;
    let fixture = single_package_fixture(&[
        ("one.xhtml", "application/xhtml+xml", chapter),
        ("blank.xhtml", "application/xhtml+xml", ""),
    ]);

    let book = Book::from_reader(&Config::new(root.path()), fixture.build(), "Arrakis.epub").unwrap();

    assert_eq!(book.files.len(), 2);
    assert_eq!(book.files[1].path, "Arrakis/blank.xhtml");
    assert!(fs::read(root.path().join("Arrakis/blank.xhtml")).unwrap().is_empty());
}
