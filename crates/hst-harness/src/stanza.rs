//! Hierarchical configuration text builder.
//!
//! A [`Stanza`] is a tree of named sections holding flag lines and child
//! sections. Building is imperative (`new_stanza` descends, `close`
//! ascends); rendering walks the tree depth-first in insertion order and
//! leaves the section delimiters to a [`StanzaSyntax`].

use thiserror::Error;

use crate::error::HarnessError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StanzaError {
    #[error("unclosed sections: {}", .0.join(" > "))]
    Unclosed(Vec<String>),
    #[error("close() called with no open section")]
    ExtraClose,
}

impl From<StanzaError> for HarnessError {
    fn from(e: StanzaError) -> Self {
        HarnessError::Config(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Item {
    Line(String),
    Section(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Node {
    name: String,
    items: Vec<Item>,
}

/// How a consumer delimits sections.
pub trait StanzaSyntax {
    fn open(&self, out: &mut String, name: &str, depth: usize);
    fn line(&self, out: &mut String, line: &str, depth: usize);
    fn close(&self, out: &mut String, name: &str, depth: usize);
}

/// `name {` ... `}` blocks with two-space indentation, as read by the VPP
/// startup configuration parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct BraceSyntax;

impl StanzaSyntax for BraceSyntax {
    fn open(&self, out: &mut String, name: &str, depth: usize) {
        if depth == 0 {
            out.push('\n');
        }
        push_indent(out, depth);
        out.push_str(name);
        out.push_str(" {\n");
    }

    fn line(&self, out: &mut String, line: &str, depth: usize) {
        push_indent(out, depth);
        out.push_str(line);
        out.push('\n');
    }

    fn close(&self, out: &mut String, _name: &str, depth: usize) {
        push_indent(out, depth);
        out.push_str("}\n");
    }
}

fn push_indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stanza {
    nodes: Vec<Node>,
    cursor: Vec<usize>,
    extra_close: bool,
}

impl Default for Stanza {
    fn default() -> Self {
        Self::new()
    }
}

impl Stanza {
    /// Empty stanza positioned at the implicit root section.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                name: String::new(),
                items: Vec::new(),
            }],
            cursor: vec![0],
            extra_close: false,
        }
    }

    fn current(&self) -> usize {
        self.cursor.last().copied().unwrap_or(0)
    }

    /// Descend into child section `name` of the current section, creating
    /// it if this section has no child of that name yet.
    pub fn new_stanza(&mut self, name: &str) -> &mut Self {
        let parent = self.current();
        let existing = self.nodes[parent].items.iter().find_map(|item| match item {
            Item::Section(idx) if self.nodes[*idx].name == name => Some(*idx),
            _ => None,
        });
        let idx = match existing {
            Some(idx) => idx,
            None => {
                self.nodes.push(Node {
                    name: name.to_string(),
                    items: Vec::new(),
                });
                let idx = self.nodes.len() - 1;
                self.nodes[parent].items.push(Item::Section(idx));
                idx
            }
        };
        self.cursor.push(idx);
        self
    }

    /// Add a flag line to the current section.
    pub fn append(&mut self, line: impl Into<String>) -> &mut Self {
        let current = self.current();
        self.nodes[current].items.push(Item::Line(line.into()));
        self
    }

    /// Ascend to the parent section.
    pub fn close(&mut self) -> &mut Self {
        if self.cursor.len() > 1 {
            self.cursor.pop();
        } else {
            self.extra_close = true;
        }
        self
    }

    /// Names of the sections still open, outermost first.
    pub fn open_sections(&self) -> Vec<String> {
        self.cursor[1..]
            .iter()
            .map(|idx| self.nodes[*idx].name.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes[0].items.is_empty()
    }

    /// Render with `syntax`. Fails if any section is still open or `close`
    /// was called once too often.
    pub fn render_with(&self, syntax: &dyn StanzaSyntax) -> Result<String, StanzaError> {
        if self.extra_close {
            return Err(StanzaError::ExtraClose);
        }
        let open = self.open_sections();
        if !open.is_empty() {
            return Err(StanzaError::Unclosed(open));
        }
        let mut out = String::new();
        self.render_items(0, 0, syntax, &mut out);
        Ok(out)
    }

    pub fn render(&self) -> Result<String, StanzaError> {
        self.render_with(&BraceSyntax)
    }

    fn render_items(&self, node: usize, depth: usize, syntax: &dyn StanzaSyntax, out: &mut String) {
        for item in &self.nodes[node].items {
            match item {
                Item::Line(line) => syntax.line(out, line, depth),
                Item::Section(idx) => {
                    let name = &self.nodes[*idx].name;
                    syntax.open(out, name, depth);
                    self.render_items(*idx, depth + 1, syntax, out);
                    syntax.close(out, name, depth);
                }
            }
        }
    }
}
