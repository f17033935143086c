//! Flattening markdown tables into aligned preformatted text.
//!
//! The dialect has no table tags, so a table becomes a `<pre>` block:
//!
//! ```text
//! Name  | Status
//! ------+-------
//! alpha | ok
//! beta  | failing
//! ```
//!
//! Each column is as wide as its widest cell (in chars), cells are right-padded,
//! and a separator rule follows the header row. Images inside cells become
//! `[alt](url)` text since nothing inside `<pre>` can be an attachment.

use super::tree::Node;

/// Renders a table as aligned plain text.
pub fn flatten(head: &[Vec<Node>], rows: &[Vec<Vec<Node>>]) -> String {
    let head: Vec<String> = head.iter().map(|cell| cell_text(cell)).collect();
    let rows: Vec<Vec<String>> = rows
        .iter()
        .map(|row| row.iter().map(|cell| cell_text(cell)).collect())
        .collect();
    layout(&head, &rows)
}

/// Lays out already-extracted cell text.
pub fn layout(head: &[String], rows: &[Vec<String>]) -> String {
    let columns = rows
        .iter()
        .map(Vec::len)
        .chain(std::iter::once(head.len()))
        .max()
        .unwrap_or(0);
    if columns == 0 {
        return String::new();
    }

    let mut widths = vec![0usize; columns];
    for row in std::iter::once(head).chain(rows.iter().map(Vec::as_slice)) {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(format_row(head, &widths));
    lines.push(
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    for row in rows {
        lines.push(format_row(row, &widths));
    }
    lines.join("\n")
}

fn format_row(cells: &[String], widths: &[usize]) -> String {
    widths
        .iter()
        .enumerate()
        .map(|(i, width)| {
            let cell = cells.get(i).map(String::as_str).unwrap_or("");
            let pad = width - cell.chars().count();
            format!("{cell}{}", " ".repeat(pad))
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Single-line text of a cell.
fn cell_text(nodes: &[Node]) -> String {
    let mut out = String::new();
    for node in nodes {
        write_cell_node(node, &mut out);
    }
    out.trim().to_string()
}

fn write_cell_node(node: &Node, out: &mut String) {
    match node {
        Node::Text(t) | Node::InlineCode(t) => out.push_str(&t.replace('\n', " ")),
        Node::LineBreak => out.push(' '),
        Node::Image { src, alt } => {
            out.push_str(&format!("[{alt}]({src})"));
        }
        other => {
            for child in other.children() {
                write_cell_node(child, out);
            }
        }
    }
}
