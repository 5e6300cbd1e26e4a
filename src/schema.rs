//! Typed decoding of the three XML documents of an EPUB
//!
//! `META-INF/container.xml`, the OPF package document and the NCX navigation
//! map are first read into an [XmlElement] tree, then copied into their typed
//! counterparts. Decoding is permissive: unknown elements are ignored and
//! missing attributes are left empty. Only a document that cannot be parsed
//! as XML at all is an error.

use std::vec::IntoIter;

use indexmap::IndexMap;

use crate::{
    error::EpubError,
    types::{
        ContainerDescriptor, GuideReference, ManifestItem, MetaItem, Metadata, NavPoint,
        NavigationMap, PackageDocument, Spine,
    },
    utils::{NormalizeWhitespace, XmlElement, XmlReader},
};

/// Decodes `META-INF/container.xml`
///
/// Only the first `rootfile` is used; when there is none, the descriptor is
/// left empty and the media-type check of the caller rejects it.
pub fn parse_container(bytes: &[u8]) -> Result<ContainerDescriptor, EpubError> {
    let root = XmlReader::parse_bytes(bytes)?;

    let descriptor = match root.find_element("rootfile") {
        Some(rootfile) => ContainerDescriptor {
            full_path: rootfile.attr("full-path").trim().to_string(),
            media_type: rootfile.attr("media-type").trim().to_string(),
        },
        None => ContainerDescriptor::default(),
    };

    Ok(descriptor)
}

/// Decodes the OPF package document
pub fn parse_package(bytes: &[u8]) -> Result<PackageDocument, EpubError> {
    let root = XmlReader::parse_bytes(bytes)?;

    let mut package = PackageDocument::default();
    if let Some(metadata) = root.find_element("metadata") {
        package.metadata = parse_metadata(metadata);
    }
    if let Some(manifest) = root.find_element("manifest") {
        package.manifest = parse_manifest(manifest);
    }
    if let Some(spine) = root.find_element("spine") {
        package.spine = parse_spine(spine);
    }
    if let Some(guide) = root.find_element("guide") {
        package.guide = parse_guide(guide);
    }

    Ok(package)
}

/// Decodes the NCX navigation map
pub fn parse_navigation_map(bytes: &[u8]) -> Result<NavigationMap, EpubError> {
    let root = XmlReader::parse_bytes(bytes)?;

    let head = match root.find_element("head") {
        Some(head) => head
            .find_children_by_name("meta")
            .map(|meta| MetaItem::new(&meta.attr("name"), &meta.attr("content")))
            .collect(),
        None => vec![],
    };

    let title = root
        .find_element("docTitle")
        .map(|element| element.text().normalize_whitespace())
        .unwrap_or_default();

    let nav_points = match root.find_element("navMap") {
        Some(nav_map) => parse_nav_points(nav_map),
        None => vec![],
    };

    Ok(NavigationMap {
        head,
        title,
        nav_points,
    })
}

/// Copies the Dublin Core fields and `<meta>` entries of `<metadata>`
///
/// Scalar fields keep their first occurrence. OPF 2.0 `<dc-metadata>` and
/// `<x-metadata>` wrappers are looked through.
fn parse_metadata(metadata_element: &XmlElement) -> Metadata {
    let mut metadata = Metadata::default();

    let elements = metadata_element
        .children()
        .flat_map(|child| match child.name.as_str() {
            "dc-metadata" | "x-metadata" => child.children().collect::<Vec<_>>(),
            _ => vec![child],
        });

    for element in elements {
        let field = match element.name.as_str() {
            "title" => &mut metadata.title,
            "creator" => &mut metadata.author,
            "language" => &mut metadata.language,
            "identifier" => &mut metadata.identifier,
            "contributor" => &mut metadata.contributor,
            "rights" => &mut metadata.rights,
            "source" => &mut metadata.source,
            "coverage" => &mut metadata.coverage,
            "relation" => &mut metadata.relation,
            "publisher" => &mut metadata.publisher,
            "description" => &mut metadata.description,
            "date" => &mut metadata.date,

            "subject" => {
                metadata.subjects.push(element.text().normalize_whitespace());
                continue;
            }

            "meta" => {
                if let Some(item) = parse_meta_element(element) {
                    metadata.raw_meta.push(item);
                }
                continue;
            }

            _ => continue,
        };

        if field.is_empty() {
            *field = element.text().normalize_whitespace();
        }
    }

    metadata
}

/// Reads an EPUB 2 `name`/`content` meta or an EPUB 3 `property` meta
fn parse_meta_element(element: &XmlElement) -> Option<MetaItem> {
    let name = element.attr("name");
    if !name.is_empty() {
        return Some(MetaItem::new(&name, element.attr("content").trim()));
    }

    let property = element.attr("property");
    if !property.is_empty() {
        return Some(MetaItem::new(
            &property,
            &element.text().normalize_whitespace(),
        ));
    }

    None
}

/// Builds the id to item mapping of `<manifest>`, in document order
///
/// Items without an id cannot be referenced and are skipped; when an id is
/// declared twice the first declaration is kept.
fn parse_manifest(manifest_element: &XmlElement) -> IndexMap<String, ManifestItem> {
    let mut manifest = IndexMap::with_capacity(manifest_element.children.len());

    for element in manifest_element.find_children_by_name("item") {
        let id = element.attr("id");
        if id.is_empty() {
            continue;
        }

        manifest.entry(id).or_insert_with(|| ManifestItem {
            href: element.attr("href"),
            media_type: element.attr("media-type"),
        });
    }

    manifest
}

fn parse_spine(spine_element: &XmlElement) -> Spine {
    Spine {
        toc: spine_element.attr("toc"),
        itemrefs: spine_element
            .find_children_by_name("itemref")
            .map(|element| element.attr("idref"))
            .collect(),
    }
}

fn parse_guide(guide_element: &XmlElement) -> Vec<GuideReference> {
    guide_element
        .find_children_by_name("reference")
        .map(|element| GuideReference {
            kind: element.attr("type"),
            href: element.attr("href"),
            title: element.attr("title"),
        })
        .collect()
}

/// Parses the nested `<navPoint>` children of an element, keeping document order
///
/// The tree is built with an explicit stack: a point is attached to its
/// parent once all of its own children have been parsed.
fn parse_nav_points(parent_element: &XmlElement) -> Vec<NavPoint> {
    let mut nav_points = Vec::new();
    let mut top_level = nav_point_children(parent_element);
    let mut stack = Vec::<(NavPoint, IntoIter<&XmlElement>)>::new();

    loop {
        let next = match stack.last_mut() {
            Some((_, pending)) => pending.next(),
            None => top_level.next(),
        };

        if let Some(element) = next {
            stack.push((make_nav_point(element), nav_point_children(element)));
            continue;
        }

        match stack.pop() {
            Some((nav_point, _)) => match stack.last_mut() {
                Some((parent, _)) => parent.children.push(nav_point),
                None => nav_points.push(nav_point),
            },
            None => break,
        }
    }

    nav_points
}

fn nav_point_children(element: &XmlElement) -> IntoIter<&XmlElement> {
    element
        .find_children_by_name("navPoint")
        .collect::<Vec<_>>()
        .into_iter()
}

/// Reads one `<navPoint>`, without its children
fn make_nav_point(nav_point: &XmlElement) -> NavPoint {
    let label = nav_point
        .find_children_by_name("navLabel")
        .next()
        .map(|element| element.text().normalize_whitespace())
        .unwrap_or_default();

    let content = nav_point
        .find_children_by_name("content")
        .next()
        .map(|element| element.attr("src"))
        .unwrap_or_default();

    NavPoint {
        id: nav_point.attr("id"),
        play_order: nav_point.attr("playOrder").trim().parse::<usize>().ok(),
        label,
        content,
        children: vec![],
    }
}
