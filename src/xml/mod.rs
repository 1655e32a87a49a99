//! XML element trees
//!
//! This module provides the document model shared by schema and answer trees:
//! - A generic labeled arena tree with parent links ([`tree::Tree`])
//! - Parsing and serialization via `quick-xml`
//! - Namespace-prefix resolution driven by an explicit [`Namespaces`] table

pub mod tree;

pub use tree::{NodeId, Tree};

use crate::error::{MigrationError, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

/// Attributes and character data of one element
///
/// Character data is kept lxml-style: `text` precedes the first child
/// element, and each child's `tail` follows its end tag. Whitespace-only
/// runs are treated as formatting and dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlData {
    /// Attributes in document order, qualified names kept verbatim
    pub attributes: Vec<(String, String)>,
    /// Character data before the first child element
    pub text: String,
    /// Character data between this element's end tag and its next sibling
    pub tail: String,
    /// Comments and processing instructions inside this element
    pub markup: Vec<Markup>,
}

/// Non-element content that is carried through untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkupKind {
    Comment,
    Instruction,
}

/// A comment or processing instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markup {
    pub kind: MarkupKind,
    /// Raw content between the delimiters
    pub content: String,
    /// Number of child elements preceding it
    pub position: usize,
    /// Whether it comes before the character data of its gap
    pub before_text: bool,
}

/// Table of namespace prefixes and URIs understood by a document dialect
#[derive(Debug, Clone, Copy)]
pub struct Namespaces {
    entries: &'static [(&'static str, &'static str)],
}

/// Namespaces used by ODK/OpenRosa XForms
pub const XFORM_NAMESPACES: Namespaces = Namespaces {
    entries: &[
        ("", "http://www.w3.org/2002/xforms"),
        ("h", "http://www.w3.org/1999/xhtml"),
        ("ev", "http://www.w3.org/2001/xml-events"),
        ("xsd", "http://www.w3.org/2001/XMLSchema"),
        ("jr", "http://openrosa.org/javarosa"),
        ("odk", "http://www.opendatakit.org/xforms"),
        ("orx", "http://openrosa.org/xforms"),
    ],
};

impl Namespaces {
    /// Create a namespace table from `(prefix, uri)` pairs
    pub const fn new(entries: &'static [(&'static str, &'static str)]) -> Self {
        Self { entries }
    }

    /// Check whether a namespace URI belongs to this table
    pub fn knows_uri(&self, uri: &str) -> bool {
        self.entries.iter().any(|(_, u)| *u == uri)
    }

    /// Prefixes declared by the table itself
    pub fn prefixes(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries
            .iter()
            .map(|(p, _)| *p)
            .filter(|p| !p.is_empty())
    }
}

/// A parsed XML document
#[derive(Debug, Clone)]
pub struct XmlTree {
    tree: Tree<XmlData>,
    declaration: bool,
    prefixes: Vec<String>,
    /// Markup before and after the root element
    prologue: Vec<Markup>,
    epilogue: Vec<Markup>,
}

impl XmlTree {
    /// Parse a document, resolving prefixes against `namespaces`
    pub fn parse(text: &str, namespaces: &Namespaces) -> Result<Self> {
        let mut reader = Reader::from_str(text);

        let mut tree: Option<Tree<XmlData>> = None;
        let mut stack: Vec<NodeId> = Vec::new();
        let mut declaration = false;
        let mut prologue = Vec::new();
        let mut epilogue = Vec::new();

        loop {
            match reader.read_event()? {
                Event::Decl(_) => declaration = true,
                Event::Start(start) => {
                    let id = open_element(&mut tree, &stack, &start)?;
                    stack.push(id);
                }
                Event::Empty(start) => {
                    open_element(&mut tree, &stack, &start)?;
                }
                Event::End(_) => {
                    if let (Some(tree), Some(id)) = (tree.as_mut(), stack.pop()) {
                        drop_formatting(tree, id);
                    }
                }
                Event::Text(text) => {
                    let value = text.unescape()?;
                    append_text(&mut tree, &stack, &value);
                }
                Event::CData(cdata) => {
                    let value = String::from_utf8_lossy(&cdata.into_inner()).into_owned();
                    append_text(&mut tree, &stack, &value);
                }
                Event::Comment(comment) => {
                    let content = String::from_utf8_lossy(&comment.into_inner()).into_owned();
                    let outside = if tree.is_none() { &mut prologue } else { &mut epilogue };
                    place_markup(&mut tree, &stack, outside, MarkupKind::Comment, content);
                }
                Event::PI(pi) => {
                    let content = String::from_utf8_lossy(&pi.into_inner()).into_owned();
                    let outside = if tree.is_none() { &mut prologue } else { &mut epilogue };
                    place_markup(&mut tree, &stack, outside, MarkupKind::Instruction, content);
                }
                Event::DocType(_) => {}
                Event::Eof => break,
            }
        }

        let tree = tree
            .ok_or_else(|| MigrationError::MalformedDocument("document has no root element".into()))?;

        let mut prefixes: Vec<String> = namespaces.prefixes().map(String::from).collect();
        for (key, value) in &tree.data(tree.root()).attributes {
            if let Some(prefix) = key.strip_prefix("xmlns:") {
                if namespaces.knows_uri(value) && !prefixes.iter().any(|p| p == prefix) {
                    prefixes.push(prefix.to_string());
                }
            }
        }

        Ok(Self {
            tree,
            declaration,
            prefixes,
            prologue,
            epilogue,
        })
    }

    pub fn tree(&self) -> &Tree<XmlData> {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut Tree<XmlData> {
        &mut self.tree
    }

    pub fn root(&self) -> NodeId {
        self.tree.root()
    }

    /// Qualified element name as written in the document
    pub fn name(&self, id: NodeId) -> &str {
        self.tree.label(id)
    }

    /// Element name with a known namespace prefix stripped
    pub fn local_name(&self, id: NodeId) -> &str {
        let name = self.tree.label(id);
        match name.split_once(':') {
            Some((prefix, local)) if self.prefixes.iter().any(|p| p == prefix) => local,
            _ => name,
        }
    }

    pub fn attribute(&self, id: NodeId, key: &str) -> Option<&str> {
        self.tree
            .data(id)
            .attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set or replace an attribute, keeping its position when it exists
    pub fn set_attribute(&mut self, id: NodeId, key: &str, value: &str) {
        let attributes = &mut self.tree.data_mut(id).attributes;
        match attributes.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => attributes.push((key.to_string(), value.to_string())),
        }
    }

    pub fn text(&self, id: NodeId) -> &str {
        &self.tree.data(id).text
    }

    pub fn set_text(&mut self, id: NodeId, text: &str) {
        self.tree.data_mut(id).text = text.to_string();
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.tree.children(id)
    }

    /// First child whose local name matches
    pub fn find_local(&self, parent: NodeId, local: &str) -> Option<NodeId> {
        self.tree
            .children(parent)
            .iter()
            .copied()
            .find(|&c| self.local_name(c) == local)
    }

    /// Follow a chain of local names from `start`
    pub fn find_local_path(&self, start: NodeId, path: &[&str]) -> Option<NodeId> {
        path.iter()
            .try_fold(start, |node, local| self.find_local(node, local))
    }

    /// Serialize with two-space indentation.
    ///
    /// Mixed content is written back in document order; indentation is only
    /// added between elements that carry no surrounding character data.
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        if self.declaration {
            writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        }
        for markup in &self.prologue {
            write_markup(&mut writer, markup)?;
        }
        self.write_element(&mut writer, self.root())?;
        for markup in &self.epilogue {
            write_markup(&mut writer, markup)?;
        }
        String::from_utf8(writer.into_inner())
            .map_err(|e| MigrationError::MalformedDocument(e.to_string()))
    }

    fn write_element(&self, writer: &mut Writer<Vec<u8>>, id: NodeId) -> Result<()> {
        let name = self.tree.label(id);
        let data = self.tree.data(id);
        let start = BytesStart::new(name).with_attributes(
            data.attributes
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
        );

        let children = self.tree.children(id);
        if children.is_empty() && data.text.is_empty() && data.markup.is_empty() {
            writer.write_event(Event::Empty(start))?;
            return Ok(());
        }

        writer.write_event(Event::Start(start))?;
        write_gap(writer, data, 0, children.len(), &data.text)?;
        for (index, &child) in children.iter().enumerate() {
            self.write_element(writer, child)?;
            write_gap(writer, data, index + 1, children.len(), &self.tree.data(child).tail)?;
        }
        writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    /// Compare two documents ignoring whitespace and attribute order
    pub fn same_structure(&self, other: &XmlTree) -> bool {
        self.same_element(self.root(), other, other.root())
    }

    fn same_element(&self, id: NodeId, other: &XmlTree, other_id: NodeId) -> bool {
        if self.name(id) != other.name(other_id) {
            return false;
        }
        if self.text(id).trim() != other.text(other_id).trim() {
            return false;
        }
        if self.tree.data(id).tail.trim() != other.tree.data(other_id).tail.trim() {
            return false;
        }

        let mut attrs = self.tree.data(id).attributes.clone();
        let mut other_attrs = other.tree.data(other_id).attributes.clone();
        attrs.sort();
        other_attrs.sort();
        if attrs != other_attrs {
            return false;
        }

        let children = self.children(id);
        let other_children = other.children(other_id);
        children.len() == other_children.len()
            && children
                .iter()
                .zip(other_children)
                .all(|(&a, &b)| self.same_element(a, other, b))
    }
}

/// Append character data to whatever gap of the open element comes last
fn append_text(tree: &mut Option<Tree<XmlData>>, stack: &[NodeId], value: &str) {
    let (Some(tree), Some(&current)) = (tree.as_mut(), stack.last()) else {
        return;
    };
    match tree.children(current).last().copied() {
        Some(child) => tree.data_mut(child).tail.push_str(value),
        None => tree.data_mut(current).text.push_str(value),
    }
}

fn place_markup(
    tree: &mut Option<Tree<XmlData>>,
    stack: &[NodeId],
    outside: &mut Vec<Markup>,
    kind: MarkupKind,
    content: String,
) {
    let (Some(tree), Some(&current)) = (tree.as_mut(), stack.last()) else {
        outside.push(Markup {
            kind,
            content,
            position: 0,
            before_text: true,
        });
        return;
    };
    let children = tree.children(current);
    let position = children.len();
    let gap = match children.last() {
        Some(&child) => &tree.data(child).tail,
        None => &tree.data(current).text,
    };
    let before_text = gap.trim().is_empty();
    tree.data_mut(current).markup.push(Markup {
        kind,
        content,
        position,
        before_text,
    });
}

/// Clear whitespace-only text and tails of a closed element
fn drop_formatting(tree: &mut Tree<XmlData>, id: NodeId) {
    if tree.data(id).text.trim().is_empty() {
        tree.data_mut(id).text.clear();
    }
    for child in tree.children(id).to_vec() {
        if tree.data(child).tail.trim().is_empty() {
            tree.data_mut(child).tail.clear();
        }
    }
}

/// Write the markup and character data found at one gap of an element.
///
/// Markup recorded past the last child (after removals) lands in the final gap.
fn write_gap(
    writer: &mut Writer<Vec<u8>>,
    data: &XmlData,
    position: usize,
    last: usize,
    text: &str,
) -> Result<()> {
    let in_gap = |m: &&Markup| m.position.min(last) == position;
    for markup in data.markup.iter().filter(in_gap).filter(|m| m.before_text) {
        write_markup(writer, markup)?;
    }
    if !text.is_empty() {
        writer.write_event(Event::Text(BytesText::new(text)))?;
    }
    for markup in data.markup.iter().filter(in_gap).filter(|m| !m.before_text) {
        write_markup(writer, markup)?;
    }
    Ok(())
}

fn write_markup(writer: &mut Writer<Vec<u8>>, markup: &Markup) -> Result<()> {
    let content = BytesText::from_escaped(markup.content.as_str());
    let event = match markup.kind {
        MarkupKind::Comment => Event::Comment(content),
        MarkupKind::Instruction => Event::PI(content),
    };
    writer.write_event(event)?;
    Ok(())
}

fn open_element(
    tree: &mut Option<Tree<XmlData>>,
    stack: &[NodeId],
    start: &BytesStart<'_>,
) -> Result<NodeId> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut data = XmlData::default();
    for attr in start.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        data.attributes.push((key, value));
    }

    match (tree.as_mut(), stack.last()) {
        (None, _) => {
            let new_tree = Tree::new(&name, data);
            let root = new_tree.root();
            *tree = Some(new_tree);
            Ok(root)
        }
        (Some(tree), Some(&parent)) => Ok(tree.add_child(parent, &name, data)),
        (Some(_), None) => Err(MigrationError::MalformedDocument(format!(
            "unexpected second root element <{name}>"
        ))),
    }
}
