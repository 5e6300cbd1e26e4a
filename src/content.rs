//! Content document rewriting
//!
//! Every document of the reading order is parsed into a [MarkupDocument], an
//! owned tree. XHTML goes through quick-xml and serializes back to the same
//! markup it was read from; `text/html` goes through html5ever and comes out
//! normalized by the HTML tree construction rules. Rewriting then happens in
//! two passes over that tree:
//!
//! 1. `<link rel="stylesheet">` children of `<head>` are read, removed and
//!    replaced by a single `<style>` element holding their concatenated CSS.
//! 2. `<img src>`, `<image href>` and `<a href>` values are resolved through
//!    the [PathResolver] and replaced by their public path.
//!
//! The result overwrites the original file. Empty files are left untouched.

use std::{fs, io::Cursor};

use log::{debug, warn};
use quick_xml::{
    Reader, Writer,
    escape::{escape, unescape},
    events::{BytesEnd, BytesStart, BytesText, Event},
};

use crate::{
    error::EpubError,
    html,
    path::{PathResolver, is_external_reference},
    types::{ContentFile, ContentType},
    utils::DecodeBytes,
};

type XmlWriter = Writer<Cursor<Vec<u8>>>;

/// HTML elements that never have content or an end tag
pub(crate) const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// A node of a parsed content document
#[derive(Debug, Clone)]
pub enum MarkupNode {
    Element(MarkupElement),

    /// Character data exactly as written, entity references included
    Text(String),

    /// Comments, CDATA sections, declarations, processing instructions and
    /// doctypes, kept so they are written back unchanged
    Other(Event<'static>),
}

/// An element of a parsed content document
///
/// Attribute values are stored in their escaped form.
#[derive(Debug, Clone, Default)]
pub struct MarkupElement {
    /// The qualified name, as written
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<MarkupNode>,

    /// Written as `<name/>`
    pub self_closing: bool,

    /// Whether an end tag is written after the children
    ///
    /// HTML void elements and elements whose end tag is missing from the
    /// source are not closed.
    pub closed: bool,
}

impl MarkupElement {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            closed: true,
            ..Default::default()
        }
    }

    /// The name without namespace prefix, in lowercase
    pub fn local_name(&self) -> String {
        self.name
            .rsplit(':')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase()
    }

    /// Returns the unescaped value of an attribute, matched case-insensitively
    pub fn attr(&self, name: &str) -> Option<String> {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| match unescape(value) {
                Ok(value) => value.to_string(),
                Err(_) => value.clone(),
            })
    }

    /// Replaces the value of an existing attribute
    pub fn set_attr(&mut self, name: &str, value: &str) {
        if let Some((_, current)) = self
            .attributes
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            *current = escape(value).to_string();
        }
    }

    /// First non-empty value among the given attributes
    fn first_attr(&self, names: &[&str]) -> Option<String> {
        names
            .iter()
            .filter_map(|name| self.attr(name))
            .find(|value| !value.trim().is_empty())
    }

    fn is_stylesheet_link(&self) -> bool {
        self.local_name() == "link"
            && self.attr("rel").is_some_and(|rel| {
                rel.split_whitespace()
                    .any(|token| token.eq_ignore_ascii_case("stylesheet"))
            })
    }
}

/// A parsed content document
#[derive(Debug, Clone, Default)]
pub struct MarkupDocument {
    pub nodes: Vec<MarkupNode>,
}

impl MarkupDocument {
    /// Parses a content document the way its content type calls for
    pub fn parse_content(content: &str, content_type: ContentType) -> Result<Self, EpubError> {
        match content_type {
            ContentType::Html => Ok(Self::parse_html(content)),
            ContentType::Xhtml | ContentType::Unknown => Self::parse(content),
        }
    }

    /// Parses an HTML document with the HTML tree construction rules
    pub fn parse_html(content: &str) -> Self {
        Self {
            nodes: html::parse_html(content),
        }
    }

    /// Parses XHTML markup into an owned tree
    ///
    /// Mismatched end tags are tolerated: an end tag closes the nearest open
    /// element with the same name, and elements left open on the way are
    /// written back without an end tag.
    pub fn parse(content: &str) -> Result<Self, EpubError> {
        let mut reader = Reader::from_str(content);
        reader.config_mut().check_end_names = false;
        reader.config_mut().allow_unmatched_ends = true;

        let mut stack = Vec::<MarkupElement>::new();
        let mut nodes = Vec::<MarkupNode>::new();

        loop {
            match reader.read_event()? {
                Event::Eof => break,

                Event::Start(e) => {
                    let element = Self::make_element(&e);
                    if VOID_ELEMENTS.contains(&element.local_name().as_str()) {
                        let mut element = element;
                        element.closed = false;
                        Self::append(&mut stack, &mut nodes, MarkupNode::Element(element));
                    } else {
                        stack.push(element);
                    }
                }

                Event::Empty(e) => {
                    let mut element = Self::make_element(&e);
                    element.self_closing = true;
                    Self::append(&mut stack, &mut nodes, MarkupNode::Element(element));
                }

                Event::End(e) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    Self::close(&mut stack, &mut nodes, &name);
                }

                Event::Text(e) => {
                    let text = String::from_utf8_lossy(e.as_ref()).to_string();
                    Self::append_text(&mut stack, &mut nodes, &text);
                }

                Event::GeneralRef(e) => {
                    let text = format!("&{};", String::from_utf8_lossy(e.as_ref()));
                    Self::append_text(&mut stack, &mut nodes, &text);
                }

                event => {
                    Self::append(&mut stack, &mut nodes, MarkupNode::Other(event.into_owned()));
                }
            }
        }

        while let Some(mut element) = stack.pop() {
            element.closed = false;
            Self::append(&mut stack, &mut nodes, MarkupNode::Element(element));
        }

        Ok(Self { nodes })
    }

    /// Serializes the tree back to markup
    pub fn serialize(&self) -> Result<Vec<u8>, EpubError> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        for node in &self.nodes {
            Self::write_node(&mut writer, node)?;
        }

        Ok(writer.into_inner().into_inner())
    }

    /// Finds the first element with the given local name, depth first
    pub fn find_element(&self, name: &str) -> Option<&MarkupElement> {
        let mut stack = self.nodes.iter().rev().collect::<Vec<_>>();
        while let Some(node) = stack.pop() {
            if let MarkupNode::Element(element) = node {
                if element.local_name() == name {
                    return Some(element);
                }
                stack.extend(element.children.iter().rev());
            }
        }
        None
    }

    fn find_element_mut(&mut self, name: &str) -> Option<&mut MarkupElement> {
        let mut stack = self.nodes.iter_mut().rev().collect::<Vec<_>>();
        while let Some(node) = stack.pop() {
            if let MarkupNode::Element(element) = node {
                if element.local_name() == name {
                    return Some(element);
                }
                stack.extend(element.children.iter_mut().rev());
            }
        }
        None
    }

    /// Returns the image reference of the first `<img>`, or failing that of
    /// the first `<image>`, as written in the document
    pub fn find_image_source(&self) -> Option<String> {
        self.find_element("img")
            .or_else(|| self.find_element("image"))
            .and_then(|element| element.first_attr(&["src", "href", "xlink:href"]))
    }

    /// Replaces the stylesheet links of `<head>` with one inline `<style>`
    ///
    /// ## Return
    /// - `Ok(true)`: At least one stylesheet was inlined
    /// - `Ok(false)`: The document has no `<head>` or no stylesheet link
    /// - `Err(EpubError)`: A linked stylesheet could not be read
    pub fn inline_stylesheets(&mut self, resolver: &PathResolver) -> Result<bool, EpubError> {
        let head = match self.find_element_mut("head") {
            Some(head) => head,
            None => return Ok(false),
        };

        let mut stylesheets = Vec::new();
        let mut children = Vec::with_capacity(head.children.len());
        for child in head.children.drain(..) {
            let href = match &child {
                MarkupNode::Element(element) if element.is_stylesheet_link() => {
                    element.attr("href").filter(|href| !is_external_reference(href))
                }
                _ => None,
            };

            match href {
                Some(href) => stylesheets.push(href),
                None => children.push(child),
            }
        }
        head.children = children;

        if stylesheets.is_empty() {
            return Ok(false);
        }

        let mut css = Vec::with_capacity(stylesheets.len());
        for href in &stylesheets {
            let resolved = resolver.resolve(href);
            let data = fs::read(&resolved.disk).map_err(|source| EpubError::MissingStylesheet {
                path: resolved.public.clone(),
                source,
            })?;

            if data.is_empty() {
                css.push(String::new());
            } else {
                css.push(data.decode()?);
            }
        }

        let mut style = MarkupElement::new("style");
        style.children.push(MarkupNode::Text(css.join("\n")));
        head.children.push(MarkupNode::Element(style));

        Ok(true)
    }

    /// Rewrites `<img src>`, `<image href>` and `<a href>` to public paths
    ///
    /// References carrying a URI scheme and pure fragments are left alone.
    pub fn rewrite_references(&mut self, resolver: &PathResolver) {
        let mut stack = self.nodes.iter_mut().collect::<Vec<_>>();
        while let Some(node) = stack.pop() {
            if let MarkupNode::Element(element) = node {
                let attributes: &[&str] = match element.local_name().as_str() {
                    "img" => &["src"],
                    "image" => &["href", "xlink:href"],
                    "a" => &["href"],
                    _ => &[],
                };

                for name in attributes {
                    let value = match element.attr(name) {
                        Some(value) if !is_external_reference(&value) => value,
                        _ => continue,
                    };
                    element.set_attr(name, &resolver.resolve(value.trim()).public);
                }

                stack.extend(element.children.iter_mut());
            }
        }
    }

    fn make_element(start: &BytesStart) -> MarkupElement {
        let name = String::from_utf8_lossy(start.name().as_ref()).to_string();
        let mut element = MarkupElement::new(&name);

        let mut attributes = start.html_attributes();
        attributes.with_checks(false);
        for attr in attributes.flatten() {
            let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
            // Values are written back between double quotes
            let value = String::from_utf8_lossy(&attr.value).replace('"', "&quot;");
            element.attributes.push((key, value));
        }

        element
    }

    fn append(stack: &mut [MarkupElement], nodes: &mut Vec<MarkupNode>, node: MarkupNode) {
        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => nodes.push(node),
        }
    }

    fn append_text(stack: &mut [MarkupElement], nodes: &mut Vec<MarkupNode>, text: &str) {
        let siblings = match stack.last_mut() {
            Some(parent) => &mut parent.children,
            None => nodes,
        };

        match siblings.last_mut() {
            Some(MarkupNode::Text(previous)) => previous.push_str(text),
            _ => siblings.push(MarkupNode::Text(text.to_string())),
        }
    }

    fn close(stack: &mut Vec<MarkupElement>, nodes: &mut Vec<MarkupNode>, name: &str) {
        let position = match stack.iter().rposition(|element| element.name == name) {
            Some(position) => position,
            None => {
                // `<link ...></link>` closes a void element that was never pushed
                let siblings = match stack.last_mut() {
                    Some(parent) => &mut parent.children,
                    None => nodes,
                };
                if let Some(MarkupNode::Element(element)) = siblings.last_mut() {
                    if element.name == name && !element.closed && element.children.is_empty() {
                        element.closed = true;
                    }
                }
                return;
            }
        };

        while stack.len() > position + 1 {
            if let Some(mut element) = stack.pop() {
                element.closed = false;
                Self::append(stack, nodes, MarkupNode::Element(element));
            }
        }

        if let Some(element) = stack.pop() {
            Self::append(stack, nodes, MarkupNode::Element(element));
        }
    }

    fn write_node(writer: &mut XmlWriter, node: &MarkupNode) -> Result<(), EpubError> {
        match node {
            MarkupNode::Element(element) => {
                let mut start = BytesStart::new(element.name.as_str());
                for (key, value) in &element.attributes {
                    start.push_attribute((key.as_bytes(), value.as_bytes()));
                }

                if element.self_closing {
                    writer.write_event(Event::Empty(start))?;
                    return Ok(());
                }

                writer.write_event(Event::Start(start))?;
                for child in &element.children {
                    Self::write_node(writer, child)?;
                }
                if element.closed {
                    writer.write_event(Event::End(BytesEnd::new(element.name.as_str())))?;
                }
            }

            MarkupNode::Text(text) => {
                writer.write_event(Event::Text(BytesText::from_escaped(text.as_str())))?
            }

            MarkupNode::Other(event) => writer.write_event(event.borrow())?,
        }

        Ok(())
    }
}

/// Rewrites one content document in place
///
/// Any failure is reported as [EpubError::ContentRewrite] naming the file.
pub fn rewrite_content_file(file: &ContentFile, resolver: &PathResolver) -> Result<(), EpubError> {
    rewrite_document(file, resolver).map_err(|err| EpubError::ContentRewrite {
        file: file.path.clone(),
        source: Box::new(err),
    })
}

fn rewrite_document(file: &ContentFile, resolver: &PathResolver) -> Result<(), EpubError> {
    let data = fs::read(&file.disk_path)?;
    if data.is_empty() {
        debug!("Skipping empty document \"{}\"", file.path);
        return Ok(());
    }

    let content = data.decode()?;
    let mut document = MarkupDocument::parse_content(&content, file.content_type)?;

    if document.find_element("head").is_none() && file.content_type.is_markup() {
        warn!("No <head> in \"{}\", stylesheets are not inlined", file.path);
    }

    let inlined = document.inline_stylesheets(resolver)?;
    document.rewrite_references(resolver);

    fs::write(&file.disk_path, document.serialize()?)?;
    debug!("Rewrote \"{}\" (stylesheets inlined: {})", file.path, inlined);

    Ok(())
}
