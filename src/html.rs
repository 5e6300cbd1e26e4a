//! HTML parsing for `text/html` content documents
//!
//! html5ever runs the HTML tree construction rules against [HtmlSink], which
//! keeps a small reference-counted tree. That tree is then converted into
//! owned [MarkupNode]s, escaped the way the content writer expects, and
//! dropped. Nothing of it outlives [parse_html].

use std::{
    borrow::Cow,
    cell::{Cell, RefCell},
    mem,
    rc::{Rc, Weak},
    vec::IntoIter,
};

use html5ever::{
    Attribute, ParseOpts, QualName, local_name, ns, parse_document,
    tendril::{StrTendril, TendrilSink},
    tree_builder::{ElementFlags, NodeOrText, QuirksMode, TreeSink},
};
use log::trace;
use quick_xml::{
    escape::{escape, partial_escape},
    events::{BytesPI, BytesText, Event},
};

use crate::content::{MarkupElement, MarkupNode, VOID_ELEMENTS};

/// HTML elements whose text is written without escaping
const RAW_TEXT_ELEMENTS: [&str; 8] = [
    "iframe", "noembed", "noframes", "noscript", "plaintext", "script", "style", "xmp",
];

type Handle = Rc<Node>;

enum NodeData {
    Document,
    Doctype {
        name: StrTendril,
        public_id: StrTendril,
        system_id: StrTendril,
    },
    Text(RefCell<String>),
    Comment(StrTendril),
    ProcessingInstruction {
        target: StrTendril,
        contents: StrTendril,
    },
    Element {
        name: QualName,
        attrs: RefCell<Vec<Attribute>>,
    },
}

pub(crate) struct Node {
    data: NodeData,
    parent: Cell<Option<Weak<Node>>>,
    children: RefCell<Vec<Handle>>,
}

impl Node {
    fn new(data: NodeData) -> Handle {
        Rc::new(Node {
            data,
            parent: Cell::new(None),
            children: RefCell::new(vec![]),
        })
    }

    fn parent(&self) -> Option<Handle> {
        let weak = self.parent.take()?;
        let parent = weak.upgrade();
        self.parent.set(Some(weak));
        parent
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        let mut pending = mem::take(self.children.get_mut());
        while let Some(node) = pending.pop() {
            pending.append(&mut node.children.borrow_mut());
        }
    }
}

fn detach(node: &Handle) {
    if let Some(parent) = node.parent() {
        parent
            .children
            .borrow_mut()
            .retain(|child| !Rc::ptr_eq(child, node));
    }
    node.parent.set(None);
}

fn append_node(parent: &Handle, child: Handle) {
    detach(&child);
    child.parent.set(Some(Rc::downgrade(parent)));
    parent.children.borrow_mut().push(child);
}

fn append_text(parent: &Handle, text: &str) {
    if let Some(last) = parent.children.borrow().last() {
        if let NodeData::Text(contents) = &last.data {
            contents.borrow_mut().push_str(text);
            return;
        }
    }

    append_node(parent, Node::new(NodeData::Text(RefCell::new(text.to_string()))));
}

/// Receives the tree built by html5ever
pub(crate) struct HtmlSink {
    document: Handle,
}

impl Default for HtmlSink {
    fn default() -> Self {
        Self {
            document: Node::new(NodeData::Document),
        }
    }
}

impl TreeSink for HtmlSink {
    type Handle = Handle;
    type Output = Self;
    type ElemName<'a>
        = &'a QualName
    where
        Self: 'a;

    fn finish(self) -> Self::Output {
        self
    }

    fn parse_error(&self, msg: Cow<'static, str>) {
        trace!("Recovered from HTML parse error: {}", msg);
    }

    fn get_document(&self) -> Handle {
        self.document.clone()
    }

    fn elem_name<'a>(&'a self, target: &'a Handle) -> &'a QualName {
        static NOT_AN_ELEMENT: QualName = QualName {
            prefix: None,
            ns: ns!(),
            local: local_name!(""),
        };

        match &target.data {
            NodeData::Element { name, .. } => name,
            _ => &NOT_AN_ELEMENT,
        }
    }

    fn create_element(&self, name: QualName, attrs: Vec<Attribute>, _: ElementFlags) -> Handle {
        Node::new(NodeData::Element {
            name,
            attrs: RefCell::new(attrs),
        })
    }

    fn create_comment(&self, text: StrTendril) -> Handle {
        Node::new(NodeData::Comment(text))
    }

    fn create_pi(&self, target: StrTendril, data: StrTendril) -> Handle {
        Node::new(NodeData::ProcessingInstruction {
            target,
            contents: data,
        })
    }

    fn append(&self, parent: &Handle, child: NodeOrText<Handle>) {
        match child {
            NodeOrText::AppendNode(node) => append_node(parent, node),
            NodeOrText::AppendText(text) => append_text(parent, &text),
        }
    }

    fn append_based_on_parent_node(
        &self,
        element: &Handle,
        prev_element: &Handle,
        child: NodeOrText<Handle>,
    ) {
        if element.parent().is_some() {
            self.append_before_sibling(element, child);
        } else {
            self.append(prev_element, child);
        }
    }

    fn append_doctype_to_document(
        &self,
        name: StrTendril,
        public_id: StrTendril,
        system_id: StrTendril,
    ) {
        let doctype = Node::new(NodeData::Doctype {
            name,
            public_id,
            system_id,
        });
        append_node(&self.document, doctype);
    }

    fn get_template_contents(&self, target: &Handle) -> Handle {
        target.clone()
    }

    fn same_node(&self, x: &Handle, y: &Handle) -> bool {
        Rc::ptr_eq(x, y)
    }

    fn set_quirks_mode(&self, _: QuirksMode) {}

    fn append_before_sibling(&self, sibling: &Handle, new_node: NodeOrText<Handle>) {
        let Some(parent) = sibling.parent() else {
            return;
        };
        let Some(index) = parent
            .children
            .borrow()
            .iter()
            .position(|child| Rc::ptr_eq(child, sibling))
        else {
            return;
        };

        let child = match new_node {
            NodeOrText::AppendNode(node) => {
                detach(&node);
                node
            }
            NodeOrText::AppendText(text) => {
                if index > 0 {
                    if let NodeData::Text(contents) = &parent.children.borrow()[index - 1].data {
                        contents.borrow_mut().push_str(&text);
                        return;
                    }
                }
                Node::new(NodeData::Text(RefCell::new(text.to_string())))
            }
        };

        // Detaching may have shifted the sibling
        let index = parent
            .children
            .borrow()
            .iter()
            .position(|child| Rc::ptr_eq(child, sibling))
            .unwrap_or(index);
        child.parent.set(Some(Rc::downgrade(&parent)));
        parent.children.borrow_mut().insert(index, child);
    }

    fn add_attrs_if_missing(&self, target: &Handle, attrs: Vec<Attribute>) {
        if let NodeData::Element {
            attrs: existing, ..
        } = &target.data
        {
            let mut existing = existing.borrow_mut();
            for attr in attrs {
                if !existing.iter().any(|current| current.name == attr.name) {
                    existing.push(attr);
                }
            }
        }
    }

    fn remove_from_parent(&self, target: &Handle) {
        detach(target);
    }

    fn reparent_children(&self, node: &Handle, new_parent: &Handle) {
        let children = mem::take(&mut *node.children.borrow_mut());
        for child in children {
            child.parent.set(Some(Rc::downgrade(new_parent)));
            new_parent.children.borrow_mut().push(child);
        }
    }
}

/// Parses an HTML document into markup nodes
///
/// Parsing never fails: malformed markup is repaired by the HTML tree
/// construction rules, which also supply missing `<html>`, `<head>` and
/// `<body>` elements. Element names come out in lowercase, except for the
/// case-adjusted names of SVG and MathML content.
pub(crate) fn parse_html(content: &str) -> Vec<MarkupNode> {
    let sink = parse_document(HtmlSink::default(), ParseOpts::default())
        .from_utf8()
        .one(content.as_bytes());

    into_markup(&sink.document)
}

/// An element under conversion, with the nodes still to be converted
struct Frame {
    element: MarkupElement,
    raw_text: bool,
    pending: IntoIter<Handle>,
}

/// Converts the children of `document` without recursing
fn into_markup(document: &Handle) -> Vec<MarkupNode> {
    let mut nodes = Vec::new();
    let mut top_level = document.children.borrow().clone().into_iter();
    let mut stack = Vec::<Frame>::new();

    loop {
        let next = match stack.last_mut() {
            Some(frame) => frame.pending.next(),
            None => top_level.next(),
        };

        let node = match next {
            Some(handle) => match convert_node(&handle, &stack) {
                Some(Converted::Node(node)) => node,
                Some(Converted::Frame(frame)) => {
                    stack.push(frame);
                    continue;
                }
                None => continue,
            },
            None => match stack.pop() {
                Some(frame) => MarkupNode::Element(frame.element),
                None => break,
            },
        };

        match stack.last_mut() {
            Some(parent) => parent.element.children.push(node),
            None => nodes.push(node),
        }
    }

    nodes
}

enum Converted {
    Node(MarkupNode),
    Frame(Frame),
}

fn convert_node(handle: &Handle, stack: &[Frame]) -> Option<Converted> {
    let node = match &handle.data {
        NodeData::Element { name, attrs } => {
            let children = handle.children.borrow().clone();
            let is_html = name.ns == ns!(html);
            let local: &str = &name.local;

            let mut element = MarkupElement::new(local);
            element.attributes = attrs
                .borrow()
                .iter()
                .map(|attr| (attribute_name(&attr.name), escape(&*attr.value).into_owned()))
                .collect();

            if is_html && VOID_ELEMENTS.contains(&local) {
                element.closed = false;
            } else if !is_html && children.is_empty() {
                element.self_closing = true;
            }

            return Some(Converted::Frame(Frame {
                element,
                raw_text: is_html && RAW_TEXT_ELEMENTS.contains(&local),
                pending: children.into_iter(),
            }));
        }

        NodeData::Text(contents) => {
            let contents = contents.borrow();
            if stack.last().is_some_and(|frame| frame.raw_text) {
                MarkupNode::Text(contents.clone())
            } else {
                MarkupNode::Text(partial_escape(contents.as_str()).into_owned())
            }
        }

        NodeData::Comment(contents) => {
            MarkupNode::Other(Event::Comment(BytesText::from_escaped(String::from(&**contents))))
        }

        NodeData::Doctype {
            name,
            public_id,
            system_id,
        } => {
            let mut doctype = String::from(&**name);
            if !public_id.is_empty() {
                doctype.push_str(&format!(" PUBLIC \"{}\"", &**public_id));
            }
            if !system_id.is_empty() {
                if public_id.is_empty() {
                    doctype.push_str(" SYSTEM");
                }
                doctype.push_str(&format!(" \"{}\"", &**system_id));
            }
            MarkupNode::Other(Event::DocType(BytesText::from_escaped(doctype)))
        }

        NodeData::ProcessingInstruction { target, contents } => MarkupNode::Other(Event::PI(
            BytesPI::new(format!("{} {}", &**target, &**contents)),
        )),

        NodeData::Document => return None,
    };

    Some(Converted::Node(node))
}

/// The attribute name as written, `xlink:href` for namespaced SVG attributes
fn attribute_name(name: &QualName) -> String {
    match &name.prefix {
        Some(prefix) => format!("{}:{}", &**prefix, &*name.local),
        None => String::from(&*name.local),
    }
}
