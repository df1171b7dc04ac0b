//! A small owned XML tree for configuration documents.
//!
//! Only what autowiring touches is modelled structurally; everything else
//! round-trips byte-for-byte. Parsed elements keep their raw start tag and
//! are re-emitted verbatim unless their attributes are changed.

use crate::AutowireError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    /// Character data, kept in its escaped source form.
    Text(String),
    CData(String),
    Comment(String),
    Decl(String),
    ProcessingInstruction(String),
    DocType(String),
}

impl Node {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(e) => Some(e),
            _ => None,
        }
    }

    fn is_blank_text(&self) -> bool {
        matches!(self, Node::Text(t) if t.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
    /// Source text between `<` and `>` (or `/>`), cleared on modification.
    raw_start: Option<String>,
    self_closing: bool,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
            raw_start: None,
            self_closing: false,
        }
    }

    #[must_use]
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        self.raw_start = None;
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(Node::as_element)
    }

    fn child_index(&self, name: &str) -> Option<usize> {
        self.children
            .iter()
            .position(|n| n.as_element().is_some_and(|e| e.name == name))
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.child_index(name)
            .and_then(|i| self.children[i].as_element())
    }

    fn element_at_mut(&mut self, index: usize) -> &mut Element {
        match &mut self.children[index] {
            Node::Element(e) => e,
            _ => unreachable!("index from child_index always points at an element"),
        }
    }

    /// First child element named `name`, created as the first child if absent.
    pub fn child_or_prepend(&mut self, name: &str) -> &mut Element {
        let index = match self.child_index(name) {
            Some(i) => i,
            None => self.prepend_child(Node::Element(Element::new(name))),
        };
        self.element_at_mut(index)
    }

    /// First child element named `name`, appended if absent.
    pub fn child_or_append(&mut self, name: &str) -> &mut Element {
        let index = match self.child_index(name) {
            Some(i) => i,
            None => self.append_child(Node::Element(Element::new(name))),
        };
        self.element_at_mut(index)
    }

    /// Insert `node` before all other children, reusing the leading
    /// indentation. Returns the node's index.
    pub fn prepend_child(&mut self, node: Node) -> usize {
        if self.children.first().is_some_and(Node::is_blank_text) {
            let indent = self.children[0].clone();
            self.children.insert(1, node);
            self.children.insert(2, indent);
            1
        } else {
            self.children.insert(0, node);
            0
        }
    }

    /// Insert `node` after the last child, keeping the closing tag's
    /// indentation last. Returns the node's index.
    pub fn append_child(&mut self, node: Node) -> usize {
        let trailing = match self.children.last() {
            Some(last) if last.is_blank_text() => Some(self.children.len() - 1),
            _ => None,
        };
        let Some(trailing) = trailing else {
            self.children.push(node);
            return self.children.len() - 1;
        };
        self.self_closing = false;
        let separator = self.item_separator().or_else(|| match &self.children[trailing] {
            Node::Text(t) => Some(format!("{t}  ")),
            _ => None,
        });
        self.children.insert(trailing, node);
        match separator {
            Some(sep) => {
                self.children.insert(trailing, Node::Text(sep));
                trailing + 1
            }
            None => trailing,
        }
    }

    /// Blank text preceding the last child element.
    fn item_separator(&self) -> Option<String> {
        let last_element = self
            .children
            .iter()
            .rposition(|n| matches!(n, Node::Element(_)))?;
        match self.children.get(last_element.checked_sub(1)?) {
            Some(Node::Text(t)) if t.trim().is_empty() => Some(t.clone()),
            _ => None,
        }
    }

    /// Replace the first `child_name` element whose `key_attr` equals
    /// `entry`'s, dropping later elements with the same key, or append
    /// `entry` when none matches. Elements with an empty key never match.
    pub fn upsert_keyed(&mut self, child_name: &str, key_attr: &str, entry: Element) {
        let Some(key) = entry.attr(key_attr).map(str::to_owned) else {
            self.append_child(Node::Element(entry));
            return;
        };
        let matches: Vec<usize> = self
            .children
            .iter()
            .enumerate()
            .filter_map(|(i, n)| {
                let e = n.as_element()?;
                let k = e.attr(key_attr)?;
                (e.name == child_name && !k.is_empty() && k == key).then_some(i)
            })
            .collect();
        match matches.split_first() {
            Some((&first, rest)) => {
                self.children[first] = Node::Element(entry);
                for &i in rest.iter().rev() {
                    self.children.remove(i);
                }
            }
            None => {
                self.append_child(Node::Element(entry));
            }
        }
    }

    fn write_to(&self, out: &mut String) {
        out.push('<');
        match &self.raw_start {
            Some(raw) => out.push_str(raw),
            None => {
                out.push_str(&self.name);
                for (key, value) in &self.attributes {
                    let _ = write!(out, " {key}=\"{}\"", quick_xml::escape::escape(value.as_str()));
                }
                if self.children.is_empty() {
                    out.push(' ');
                }
            }
        }
        if self.children.is_empty() && (self.self_closing || self.raw_start.is_none()) {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            child.write_to(out);
        }
        let _ = write!(out, "</{}>", self.name);
    }
}

impl Node {
    fn write_to(&self, out: &mut String) {
        match self {
            Node::Element(e) => e.write_to(out),
            Node::Text(t) => out.push_str(t),
            Node::CData(c) => {
                let _ = write!(out, "<![CDATA[{c}]]>");
            }
            Node::Comment(c) => {
                let _ = write!(out, "<!--{c}-->");
            }
            Node::Decl(d) | Node::ProcessingInstruction(d) => {
                let _ = write!(out, "<?{d}?>");
            }
            Node::DocType(d) => {
                let _ = write!(out, "<!DOCTYPE {}>", d.trim_start());
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub prolog: Vec<Node>,
    pub root: Element,
    pub epilog: Vec<Node>,
}

fn utf8(bytes: &[u8]) -> Result<String, AutowireError> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|e| AutowireError::Xml(format!("invalid UTF-8: {e}")))
}

fn element_from(start: &BytesStart<'_>, self_closing: bool) -> Result<Element, AutowireError> {
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| AutowireError::Xml(e.to_string()))?;
        let key = utf8(attr.key.as_ref())?;
        let value = attr
            .unescape_value()
            .map_err(|e| AutowireError::Xml(e.to_string()))?
            .into_owned();
        attributes.push((key, value));
    }
    Ok(Element {
        name: utf8(start.name().as_ref())?,
        attributes,
        children: Vec::new(),
        raw_start: Some(utf8(start)?),
        self_closing,
    })
}

struct TreeBuilder {
    stack: Vec<Element>,
    prolog: Vec<Node>,
    root: Option<Element>,
    epilog: Vec<Node>,
}

impl TreeBuilder {
    fn attach(&mut self, node: Node) -> Result<(), AutowireError> {
        if let Some(parent) = self.stack.last_mut() {
            parent.children.push(node);
            return Ok(());
        }
        match node {
            Node::Element(e) => {
                if self.root.is_some() {
                    return Err(AutowireError::Xml(format!(
                        "multiple root elements (second: <{}>)",
                        e.name
                    )));
                }
                self.root = Some(e);
            }
            other if self.root.is_none() => self.prolog.push(other),
            other => self.epilog.push(other),
        }
        Ok(())
    }
}

impl Document {
    pub fn parse(input: &str) -> Result<Self, AutowireError> {
        let mut reader = Reader::from_str(input);
        let mut tree = TreeBuilder {
            stack: Vec::new(),
            prolog: Vec::new(),
            root: None,
            epilog: Vec::new(),
        };

        loop {
            let event = reader.read_event().map_err(|e| {
                AutowireError::Xml(format!("at byte {}: {e}", reader.buffer_position()))
            })?;
            match event {
                Event::Start(start) => tree.stack.push(element_from(&start, false)?),
                Event::Empty(start) => tree.attach(Node::Element(element_from(&start, true)?))?,
                Event::End(_) => {
                    let element = tree
                        .stack
                        .pop()
                        .ok_or_else(|| AutowireError::Xml("unbalanced end tag".to_owned()))?;
                    tree.attach(Node::Element(element))?;
                }
                Event::Text(text) => tree.attach(Node::Text(utf8(&text)?))?,
                Event::CData(data) => tree.attach(Node::CData(utf8(&data)?))?,
                Event::Comment(comment) => tree.attach(Node::Comment(utf8(&comment)?))?,
                Event::Decl(decl) => tree.attach(Node::Decl(utf8(&decl)?))?,
                Event::PI(pi) => tree.attach(Node::ProcessingInstruction(utf8(&pi)?))?,
                Event::DocType(doctype) => tree.attach(Node::DocType(utf8(&doctype)?))?,
                Event::Eof => break,
            }
        }

        if let Some(open) = tree.stack.last() {
            return Err(AutowireError::Xml(format!("unclosed element <{}>", open.name)));
        }
        let root = tree
            .root
            .ok_or_else(|| AutowireError::Xml("document has no root element".to_owned()))?;
        Ok(Self {
            prolog: tree.prolog,
            root,
            epilog: tree.epilog,
        })
    }

    pub fn to_xml_string(&self) -> String {
        let mut out = String::new();
        for node in &self.prolog {
            node.write_to(&mut out);
        }
        self.root.write_to(&mut out);
        for node in &self.epilog {
            node.write_to(&mut out);
        }
        out
    }
}
