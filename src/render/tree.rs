//! Markdown to node tree.
//!
//! The tree is deliberately small: it only distinguishes what the target
//! dialect can express. Anything the dialect has no tag for (footnotes,
//! definition lists, unknown HTML) collapses to its text.

use std::sync::LazyLock;

use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag};
use regex::Regex;

/// One node of parsed markdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Text(String),
    InlineCode(String),
    LineBreak,
    Paragraph(Vec<Node>),
    Heading { level: u8, children: Vec<Node> },
    Strong(Vec<Node>),
    Emphasis(Vec<Node>),
    Strikethrough(Vec<Node>),
    Link { href: String, children: Vec<Node> },
    Image { src: String, alt: String },
    List { ordered: bool, items: Vec<Vec<Node>> },
    BlockQuote(Vec<Node>),
    CodeBlock(String),
    Table {
        head: Vec<Vec<Node>>,
        rows: Vec<Vec<Vec<Node>>>,
    },
    /// Preformatted text produced by rewriting (flattened tables).
    Preformatted(String),
    Rule,
}

impl Node {
    /// Children of container nodes, for traversal.
    pub fn children(&self) -> Vec<&Node> {
        match self {
            Node::Paragraph(c)
            | Node::Strong(c)
            | Node::Emphasis(c)
            | Node::Strikethrough(c)
            | Node::BlockQuote(c)
            | Node::Heading { children: c, .. }
            | Node::Link { children: c, .. } => c.iter().collect(),
            Node::List { items, .. } => items.iter().flatten().collect(),
            Node::Table { head, rows } => head
                .iter()
                .flatten()
                .chain(rows.iter().flatten().flatten())
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Concatenated text content; images contribute their alt text.
pub fn plain_text(nodes: &[Node]) -> String {
    let mut out = String::new();
    for node in nodes {
        collect_text(node, &mut out);
    }
    out
}

fn collect_text(node: &Node, out: &mut String) {
    match node {
        Node::Text(t) | Node::InlineCode(t) | Node::CodeBlock(t) | Node::Preformatted(t) => {
            out.push_str(t)
        }
        Node::LineBreak => out.push('\n'),
        Node::Image { alt, .. } => out.push_str(alt),
        other => {
            for child in other.children() {
                collect_text(child, out);
            }
        }
    }
}

/// Parses GitHub-flavored markdown into a node tree.
pub fn parse(markdown: &str) -> Vec<Node> {
    let options =
        Options::ENABLE_TABLES | Options::ENABLE_TASKLISTS | Options::ENABLE_STRIKETHROUGH;
    let mut builder = TreeBuilder::new();
    for event in Parser::new_ext(markdown, options) {
        builder.push(event);
    }
    builder.finish()
}

// ─── Builder ───

#[derive(Debug)]
enum Frame {
    Root,
    Paragraph,
    Heading(u8),
    Strong,
    Emphasis,
    Strikethrough,
    Link(String),
    Image(String),
    List(bool),
    Item,
    BlockQuote,
    CodeBlock,
    HtmlBlock,
    Table,
    TableHead,
    TableRow,
    TableCell,
    /// Containers the dialect can't express; children are spliced into the
    /// parent.
    Transparent,
}

#[derive(Debug)]
struct Open {
    frame: Frame,
    children: Vec<Node>,
    /// List items, or the cells of a table row.
    cells: Vec<Vec<Node>>,
    head: Vec<Vec<Node>>,
    rows: Vec<Vec<Vec<Node>>>,
    raw: String,
}

impl Open {
    fn new(frame: Frame) -> Self {
        Open {
            frame,
            children: Vec::new(),
            cells: Vec::new(),
            head: Vec::new(),
            rows: Vec::new(),
            raw: String::new(),
        }
    }
}

struct TreeBuilder {
    stack: Vec<Open>,
}

impl TreeBuilder {
    fn new() -> Self {
        TreeBuilder {
            stack: vec![Open::new(Frame::Root)],
        }
    }

    fn top(&mut self) -> &mut Open {
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    fn emit(&mut self, node: Node) {
        self.top().children.push(node);
    }

    fn push(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.stack.push(Open::new(frame_for(tag))),
            Event::End(_) => self.close(),
            Event::Text(text) => {
                let top = self.top();
                if matches!(top.frame, Frame::CodeBlock) {
                    top.raw.push_str(&text);
                } else {
                    top.children.push(Node::Text(text.to_string()));
                }
            }
            Event::Code(code) => self.emit(Node::InlineCode(code.to_string())),
            Event::Html(html) => {
                let top = self.top();
                if matches!(top.frame, Frame::HtmlBlock) {
                    top.raw.push_str(&html);
                } else {
                    top.children.extend(html_fragment(&html));
                }
            }
            Event::InlineHtml(html) => {
                let nodes = html_fragment(&html);
                self.top().children.extend(nodes);
            }
            Event::SoftBreak | Event::HardBreak => self.emit(Node::LineBreak),
            Event::Rule => self.emit(Node::Rule),
            Event::TaskListMarker(checked) => {
                self.emit(Node::Text(if checked { "[x] " } else { "[ ] " }.to_string()))
            }
            _ => {}
        }
    }

    fn close(&mut self) {
        if self.stack.len() <= 1 {
            return;
        }
        let Some(open) = self.stack.pop() else {
            return;
        };
        let parent = self.top();
        let Open {
            frame,
            children,
            cells,
            head,
            rows,
            raw,
        } = open;

        let node = match frame {
            Frame::Root => return,
            Frame::Paragraph => Node::Paragraph(children),
            Frame::Heading(level) => Node::Heading { level, children },
            Frame::Strong => Node::Strong(children),
            Frame::Emphasis => Node::Emphasis(children),
            Frame::Strikethrough => Node::Strikethrough(children),
            Frame::Link(href) => Node::Link { href, children },
            Frame::Image(src) => Node::Image {
                src,
                alt: plain_text(&children),
            },
            Frame::List(ordered) => Node::List {
                ordered,
                items: cells,
            },
            Frame::Item => {
                parent.cells.push(children);
                return;
            }
            Frame::BlockQuote => Node::BlockQuote(children),
            Frame::CodeBlock => Node::CodeBlock(raw),
            Frame::HtmlBlock => {
                let nodes = html_fragment(raw.trim_end());
                if nodes.is_empty() {
                    return;
                }
                Node::Paragraph(nodes)
            }
            Frame::Table => Node::Table { head, rows },
            Frame::TableHead => {
                parent.head = if cells.is_empty() {
                    rows.into_iter().next().unwrap_or_default()
                } else {
                    cells
                };
                return;
            }
            Frame::TableRow => {
                parent.rows.push(cells);
                return;
            }
            Frame::TableCell => {
                parent.cells.push(children);
                return;
            }
            Frame::Transparent => {
                parent.children.extend(children);
                return;
            }
        };
        parent.children.push(node);
    }

    fn finish(mut self) -> Vec<Node> {
        while self.stack.len() > 1 {
            self.close();
        }
        self.stack.pop().map(|root| root.children).unwrap_or_default()
    }
}

fn frame_for(tag: Tag<'_>) -> Frame {
    match tag {
        Tag::Paragraph => Frame::Paragraph,
        Tag::Heading { level, .. } => Frame::Heading(heading_level(level)),
        Tag::BlockQuote(_) => Frame::BlockQuote,
        Tag::CodeBlock(_) => Frame::CodeBlock,
        Tag::HtmlBlock => Frame::HtmlBlock,
        Tag::List(start) => Frame::List(start.is_some()),
        Tag::Item => Frame::Item,
        Tag::Table(_) => Frame::Table,
        Tag::TableHead => Frame::TableHead,
        Tag::TableRow => Frame::TableRow,
        Tag::TableCell => Frame::TableCell,
        Tag::Emphasis => Frame::Emphasis,
        Tag::Strong => Frame::Strong,
        Tag::Strikethrough => Frame::Strikethrough,
        Tag::Link { dest_url, .. } => Frame::Link(dest_url.to_string()),
        Tag::Image { dest_url, .. } => Frame::Image(dest_url.to_string()),
        _ => Frame::Transparent,
    }
}

fn heading_level(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

// ─── Raw HTML ───

static HTML_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!--.*?-->|</?[A-Za-z][^>]*>").expect("html token regex is valid")
});

static IMG_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^<img\b").expect("img regex is valid"));

static BR_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^<br\b").expect("br regex is valid"));

static ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b([a-z-]+)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>/]+))"#)
        .expect("attribute regex is valid")
});

/// Converts a raw HTML snippet: `<img>` becomes an image, `<br>` a line
/// break, comments vanish, and every other tag is stripped to its text.
pub fn html_fragment(html: &str) -> Vec<Node> {
    let mut nodes = Vec::new();
    let mut last = 0;

    for token in HTML_TOKEN.find_iter(html) {
        push_html_text(&mut nodes, &html[last..token.start()]);
        last = token.end();

        let tag = token.as_str();
        if tag.starts_with("<!--") {
            continue;
        }
        if IMG_TAG.is_match(tag) {
            if let Some(src) = attribute(tag, "src") {
                let alt = attribute(tag, "alt").unwrap_or_default();
                nodes.push(Node::Image { src, alt });
            }
        } else if BR_TAG.is_match(tag) {
            nodes.push(Node::LineBreak);
        }
    }
    push_html_text(&mut nodes, &html[last..]);
    nodes
}

fn push_html_text(nodes: &mut Vec<Node>, text: &str) {
    if text.is_empty() || (text.trim().is_empty() && text.contains('\n')) {
        return;
    }
    nodes.push(Node::Text(decode_entities(text)));
}

fn attribute(tag: &str, name: &str) -> Option<String> {
    ATTR.captures_iter(tag)
        .find(|c| c[1].eq_ignore_ascii_case(name))
        .and_then(|c| c.get(2).or_else(|| c.get(3)).or_else(|| c.get(4)))
        .map(|m| decode_entities(m.as_str()))
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
