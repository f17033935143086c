//! Tree rewrites that bring parsed markdown within the dialect.
//!
//! - headings 1-3 become level 1, 4-6 become level 2
//! - links are made absolute; in-page anchors lose their link
//! - tables are flattened to preformatted text
//! - image sources are made absolute

use std::sync::LazyLock;

use regex::Regex;

use super::table;
use super::tree::Node;

const GITHUB_ORIGIN: &str = "https://github.com";

static SCHEME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*:").expect("scheme regex is valid")
});

/// Applies every rewrite to a parsed tree.
pub fn rewrite(nodes: Vec<Node>) -> Vec<Node> {
    nodes.into_iter().flat_map(rewrite_node).collect()
}

fn rewrite_node(node: Node) -> Vec<Node> {
    let node = match node {
        Node::Heading { level, children } => Node::Heading {
            level: if level <= 3 { 1 } else { 2 },
            children: rewrite(children),
        },
        Node::Link { href, children } => match absolute_url(&href) {
            Some(href) => Node::Link {
                href,
                children: rewrite(children),
            },
            None => return rewrite(children),
        },
        Node::Image { src, alt } => Node::Image {
            src: absolute_url(&src).unwrap_or(src),
            alt,
        },
        Node::Table { head, rows } => Node::Preformatted(table::flatten(&head, &rows)),
        Node::Paragraph(c) => Node::Paragraph(rewrite(c)),
        Node::Strong(c) => Node::Strong(rewrite(c)),
        Node::Emphasis(c) => Node::Emphasis(rewrite(c)),
        Node::Strikethrough(c) => Node::Strikethrough(rewrite(c)),
        Node::BlockQuote(c) => Node::BlockQuote(rewrite(c)),
        Node::List { ordered, items } => Node::List {
            ordered,
            items: items.into_iter().map(rewrite).collect(),
        },
        other => other,
    };
    vec![node]
}

/// Makes a link target absolute.
///
/// `//host/x` gets `https:`, `/owner/repo/...` is resolved against GitHub,
/// and a bare `host/x` gets `https://`. Returns `None` for in-page anchors and
/// empty targets, which should render as plain text.
pub fn absolute_url(href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    if let Some(rest) = href.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    if href.starts_with('/') {
        return Some(format!("{GITHUB_ORIGIN}{href}"));
    }
    if SCHEME.is_match(href) {
        return Some(href.to_string());
    }
    Some(format!("https://{href}"))
}
