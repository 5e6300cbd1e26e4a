//! In-memory EPUB fixtures
//!
//! Archives are assembled with `zip::ZipWriter` straight into a byte buffer,
//! `mimetype` first and stored uncompressed.

#![allow(dead_code)]

use std::io::{Cursor, Write};

use zip::{CompressionMethod, ZipWriter, write::FileOptions};

/// Number of `OEBPS/partN.xhtml` documents in the Dune fixture
pub const DUNE_PARTS: usize = 9;

pub struct EpubFixture {
    entries: Vec<(String, Vec<u8>)>,
}

impl EpubFixture {
    pub fn new() -> Self {
        Self { entries: vec![] }
    }

    /// A small rendition of Frank Herbert's Dune
    ///
    /// - `content.opf` at the archive root, guide cover pointing at
    ///   `titlepage.xhtml`, which shows `cover.jpeg` through an SVG `<image>`
    /// - a spine of ten documents: the title page and `OEBPS/part1.xhtml`
    ///   to `OEBPS/part9.xhtml`, each linking `stylesheet.css`
    /// - a nested NCX whose `playOrder` values are shuffled
    pub fn dune() -> Self {
        let mut fixture = Self::new()
            .file("mimetype", "application/epub+zip")
            .file("META-INF/container.xml", container("content.opf"))
            .file("content.opf", dune_package())
            .file("toc.ncx", dune_ncx("0"))
            .file("stylesheet.css", "body { font-family: serif; }")
            .file("page_styles.css", "@page { margin: 5pt; }")
            .file("cover.jpeg", b"\xFF\xD8\xFF\xE0")
            .file("images/map.png", b"\x89PNG")
            .file("titlepage.xhtml", TITLE_PAGE);

        for part in 1..=DUNE_PARTS {
            fixture = fixture.file(&format!("OEBPS/part{part}.xhtml"), dune_part(part));
        }

        fixture
    }

    /// Adds an entry, replacing any entry with the same name
    pub fn file(mut self, name: &str, content: impl AsRef<[u8]>) -> Self {
        let content = content.as_ref().to_vec();
        match self.entries.iter_mut().find(|(entry, _)| entry == name) {
            Some((_, existing)) => *existing = content,
            None => self.entries.push((name.to_string(), content)),
        }
        self
    }

    pub fn remove(mut self, name: &str) -> Self {
        self.entries.retain(|(entry, _)| entry != name);
        self
    }

    pub fn build(&self) -> Cursor<Vec<u8>> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::<()>::default().compression_method(CompressionMethod::Stored);

        for (name, content) in &self.entries {
            zip.start_file(name.as_str(), options).unwrap();
            zip.write_all(content).unwrap();
        }

        Cursor::new(zip.finish().unwrap().into_inner())
    }
}

pub fn container(full_path: &str) -> String {
    container_with_media_type(full_path, "application/oebps-package+xml")
}

pub fn container_with_media_type(full_path: &str, media_type: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="{full_path}" media-type="{media_type}"/>
  </rootfiles>
</container>"#
    )
}

pub fn dune_package() -> String {
    let mut manifest = String::new();
    let mut spine = String::from(r#"    <itemref idref="titlepage"/>"#);
    for part in 1..=DUNE_PARTS {
        manifest.push_str(&format!(
            "\n    <item id=\"part{part}\" href=\"OEBPS/part{part}.xhtml\" media-type=\"application/xhtml+xml\"/>"
        ));
        spine.push_str(&format!("\n    <itemref idref=\"part{part}\"/>"));
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0" unique-identifier="uuid_id">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf">
    <dc:title>Dune</dc:title>
    <dc:creator opf:role="aut" opf:file-as="Herbert, Frank">Herbert, Frank</dc:creator>
    <dc:language>en</dc:language>
    <dc:identifier id="uuid_id" opf:scheme="uuid">3a6b6a2c-5c1e-4d2f-9c43-0d1e2f3a4b5c</dc:identifier>
    <dc:publisher>Ace</dc:publisher>
    <dc:date>1990-09-01T00:00:00+00:00</dc:date>
    <dc:description>Set on the desert planet Arrakis.</dc:description>
    <dc:subject>Fiction</dc:subject>
    <dc:subject>Science Fiction</dc:subject>
    <meta name="cover" content="cover"/>
  </metadata>
  <manifest>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="cover" href="cover.jpeg" media-type="image/jpeg"/>
    <item id="css" href="stylesheet.css" media-type="text/css"/>
    <item id="page_css" href="page_styles.css" media-type="text/css"/>
    <item id="titlepage" href="titlepage.xhtml" media-type="application/xhtml+xml"/>{manifest}
  </manifest>
  <spine toc="ncx">
{spine}
  </spine>
  <guide>
    <reference type="cover" title="Cover" href="titlepage.xhtml"/>
  </guide>
</package>"#
    )
}

pub fn dune_ncx(total_page_count: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1" xml:lang="en">
  <head>
    <meta content="3a6b6a2c-5c1e-4d2f-9c43-0d1e2f3a4b5c" name="dtb:uid"/>
    <meta content="3" name="dtb:depth"/>
    <meta content="{total_page_count}" name="dtb:totalPageCount"/>
    <meta content="0" name="dtb:maxPageNumber"/>
  </head>
  <docTitle><text>Dune</text></docTitle>
  <navMap>
    <navPoint id="num_1" playOrder="1">
      <navLabel><text>Dune</text></navLabel>
      <content src="OEBPS/part1.xhtml"/>
      <navPoint id="num_2" playOrder="5">
        <navLabel><text>Book One: Dune</text></navLabel>
        <content src="OEBPS/part2.xhtml"/>
        <navPoint id="num_3" playOrder="2">
          <navLabel><text>Chapter 1</text></navLabel>
          <content src="OEBPS/part2.xhtml#ch1"/>
        </navPoint>
      </navPoint>
      <navPoint id="num_4" playOrder="3">
        <navLabel><text>Book Two: Muad'Dib</text></navLabel>
        <content src="OEBPS/part5.xhtml"/>
      </navPoint>
    </navPoint>
    <navPoint id="num_5" playOrder="4">
      <navLabel><text>Appendix</text></navLabel>
      <content src="OEBPS/part9.xhtml"/>
    </navPoint>
  </navMap>
</ncx>"#
    )
}

pub fn dune_part(part: usize) -> String {
    let next = part % DUNE_PARTS + 1;
    format!(
        r##"<?xml version='1.0' encoding='utf-8'?>
<html xmlns="http://www.w3.org/1999/xhtml">
<head>
<title>Dune</title>
<link rel="stylesheet" type="text/css" href="../stylesheet.css"/>
<link rel="stylesheet" type="text/css" href="../page_styles.css"/>
</head>
<body>
<h2 id="ch{part}">Part {part}</h2>
<p><img src="images/map.png" alt="Map of Arrakis"/></p>
<p><a href="OEBPS/part{next}.xhtml#ch{next}">Next</a> <a href="https://example.com/dune">Web</a> <a href="#ch{part}">Top</a></p>
</body>
</html>"##
    )
}

pub const TITLE_PAGE: &str = r#"<?xml version='1.0' encoding='utf-8'?>
<html xmlns="http://www.w3.org/1999/xhtml" xml:lang="en">
<head><title>Cover</title></head>
<body>
<div>
<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" version="1.1" width="100%" height="100%" viewBox="0 0 600 900">
<image width="600" height="900" xlink:href="cover.jpeg"/>
</svg>
</div>
</body>
</html>"#;
