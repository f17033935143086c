//! Serializing a rewritten tree into the tracker's rich-text dialect.
//!
//! The dialect is strict XML with a small tag set: `body`, `h1`, `h2`,
//! `strong`, `em`, `s`, `code`, `pre`, `a`, `ul`, `ol`, `li`, `blockquote`,
//! `hr` and `img` (attachment references only). Paragraphs have no tag; they
//! are separated by newlines.

use std::collections::HashMap;

use crate::types::AttachmentId;

use super::table;
use super::tree::Node;

/// Identifies an image occurrence for attachment lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageKey {
    pub src: String,
    pub alt: String,
}

impl ImageKey {
    pub fn new(src: impl Into<String>, alt: impl Into<String>) -> Self {
        ImageKey {
            src: src.into(),
            alt: alt.into(),
        }
    }
}

/// Attachments available to reference, keyed by image.
pub type ImageAttachments = HashMap<ImageKey, AttachmentId>;

/// Serializes `nodes` inside a single `<body>` root.
///
/// Images found in `attachments` become inline attachment tags; the rest
/// degrade to plain links.
pub fn to_html(nodes: &[Node], attachments: &ImageAttachments) -> String {
    let mut inner = String::new();
    write_nodes(nodes, attachments, &mut inner);
    format!("<body>{}</body>", inner.trim_matches('\n'))
}

fn write_nodes(nodes: &[Node], attachments: &ImageAttachments, out: &mut String) {
    for node in nodes {
        write_node(node, attachments, out);
    }
}

fn write_node(node: &Node, attachments: &ImageAttachments, out: &mut String) {
    match node {
        Node::Text(t) => out.push_str(&escape_text(t)),
        Node::InlineCode(code) => {
            out.push_str("<code>");
            out.push_str(&escape_text(code));
            out.push_str("</code>");
        }
        Node::LineBreak => out.push('\n'),
        Node::Paragraph(children) => {
            write_nodes(children, attachments, out);
            out.push('\n');
        }
        Node::Heading { level, children } => {
            let tag = if *level <= 1 { "h1" } else { "h2" };
            wrap(tag, children, attachments, out);
            out.push('\n');
        }
        Node::Strong(children) => wrap("strong", children, attachments, out),
        Node::Emphasis(children) => wrap("em", children, attachments, out),
        Node::Strikethrough(children) => wrap("s", children, attachments, out),
        Node::Link { href, children } => {
            out.push_str(&format!("<a href=\"{}\">", escape_attr(href)));
            write_nodes(children, attachments, out);
            out.push_str("</a>");
        }
        Node::Image { src, alt } => match attachments.get(&ImageKey::new(src, alt)) {
            Some(gid) => out.push_str(&format!("<img data-asana-gid=\"{}\"/>", escape_attr(gid.as_str()))),
            None => {
                let label = if alt.is_empty() { src } else { alt };
                out.push_str(&format!(
                    "<a href=\"{}\">{}</a>",
                    escape_attr(src),
                    escape_text(label)
                ));
            }
        },
        Node::List { ordered, items } => {
            let tag = if *ordered { "ol" } else { "ul" };
            out.push_str(&format!("<{tag}>"));
            for item in items {
                wrap("li", item, attachments, out);
            }
            out.push_str(&format!("</{tag}>"));
        }
        Node::BlockQuote(children) => wrap("blockquote", children, attachments, out),
        Node::CodeBlock(text) | Node::Preformatted(text) => write_pre(text, out),
        Node::Table { head, rows } => write_pre(&table::flatten(head, rows), out),
        Node::Rule => out.push_str("<hr/>"),
    }
}

/// Writes `<tag>children</tag>` with no trailing newlines inside.
fn wrap(tag: &str, children: &[Node], attachments: &ImageAttachments, out: &mut String) {
    let mut inner = String::new();
    write_nodes(children, attachments, &mut inner);
    out.push_str(&format!("<{tag}>{}</{tag}>", inner.trim_end_matches('\n')));
}

fn write_pre(text: &str, out: &mut String) {
    out.push_str("<pre>");
    out.push_str(&escape_text(text.trim_end_matches('\n')));
    out.push_str("</pre>");
}

pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

fn escape_attr(text: &str) -> String {
    escape_text(text).replace('"', "&quot;")
}
