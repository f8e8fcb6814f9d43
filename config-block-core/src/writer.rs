use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::block::{AttrValue, BlockId, BlockKind, Document};

const INDENT: &str = "    ";

/// Errors that can occur while writing a [`Document`] back to text.
#[derive(Debug, Error)]
pub enum WriteError {
    /// Failed to write output file.
    #[error("failed to write config file: {0}")]
    Io(#[from] std::io::Error),
}

/// Serialize a [`Document`] into block grammar text.
pub fn write(doc: &Document) -> String {
    let mut out = String::new();
    for line in &doc.header {
        out.push_str(line);
        out.push('\n');
    }
    for root in doc.roots() {
        write_block(doc, *root, 0, &mut out);
    }
    out
}

/// Serialize a [`Document`] and write it to `path`.
pub fn write_file(doc: &Document, path: &Path) -> Result<(), WriteError> {
    fs::write(path, write(doc))?;
    Ok(())
}

fn write_block(doc: &Document, id: BlockId, depth: usize, out: &mut String) {
    let block = doc.block(id);
    let indent = INDENT.repeat(depth);

    match block.kind {
        BlockKind::Config => out.push_str(&format!("{indent}config {}\n", block.name)),
        BlockKind::Edit => out.push_str(&format!("{indent}edit {}\n", edit_name(&block.name))),
    }

    let inner = INDENT.repeat(depth + 1);
    for (key, value) in &block.attributes {
        out.push_str(&format!("{inner}set {key} {}\n", render_value(value)));
    }

    for child in block.children() {
        write_block(doc, *child, depth + 1, out);
    }

    match block.kind {
        BlockKind::Config => out.push_str(&format!("{indent}end\n")),
        BlockKind::Edit => out.push_str(&format!("{indent}next\n")),
    }
}

fn edit_name(name: &str) -> String {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_digit()) {
        name.to_string()
    } else {
        quote(name)
    }
}

fn render_value(value: &AttrValue) -> String {
    match value {
        AttrValue::Scalar(token) => token_text(token),
        AttrValue::List(tokens) => tokens
            .iter()
            .map(|token| token_text(token))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

/// Numbers, addresses and masks stay bare; everything else is quoted.
fn token_text(token: &str) -> String {
    let plain = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | ':' | '/'));
    if plain {
        token.to_string()
    } else {
        quote(token)
    }
}

fn quote(token: &str) -> String {
    let mut out = String::with_capacity(token.len() + 2);
    out.push('"');
    for c in token.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::{quote, token_text};

    #[test]
    fn numbers_and_addresses_stay_bare() {
        assert_eq!(token_text("192.168.1.0"), "192.168.1.0");
        assert_eq!(token_text("443"), "443");
    }

    #[test]
    fn names_are_quoted_and_escaped() {
        assert_eq!(token_text("G Suite"), "\"G Suite\"");
        assert_eq!(quote(r#"a"b\c"#), r#""a\"b\\c""#);
        assert_eq!(token_text(""), "\"\"");
    }
}
