use std::borrow::Cow;
use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::block::{AttrValue, BlockId, BlockKind, Document};

/// Errors that abort parsing of a configuration dump.
///
/// Every variant names the input and the 1-based line that triggered it.
#[derive(Debug, Error)]
pub enum ParseError {
    /// `next` or `end` with no open block.
    #[error("{source_name}:{line}: `{keyword}` without an open block")]
    StackUnderflow {
        source_name: String,
        line: usize,
        keyword: &'static str,
    },
    /// `next` while the innermost open block is a `config`.
    #[error("{source_name}:{line}: `next` found while `config {open}` is the innermost block")]
    NextOutsideEdit {
        source_name: String,
        line: usize,
        open: String,
    },
    /// `edit` that is not nested in a `config` block.
    #[error("{source_name}:{line}: `edit {name}` outside of a config block")]
    EditOutsideConfig {
        source_name: String,
        line: usize,
        name: String,
    },
    /// `set`, `unset` or `append` with no open block.
    #[error("{source_name}:{line}: `{keyword}` outside of any block")]
    AttributeOutsideBlock {
        source_name: String,
        line: usize,
        keyword: &'static str,
    },
    /// A double-quoted value was still open at end of input.
    #[error("{source_name}:{line}: unterminated quoted value")]
    UnterminatedQuote { source_name: String, line: usize },
    /// A block was still open at end of input.
    #[error("{source_name}:{line}: `{keyword} {name}` is never closed")]
    UnclosedBlock {
        source_name: String,
        line: usize,
        keyword: &'static str,
        name: String,
    },
    /// A statement keyword outside the block grammar.
    #[error("{source_name}:{line}: unknown statement `{statement}`")]
    UnknownStatement {
        source_name: String,
        line: usize,
        statement: String,
    },
    /// `config`, `edit` or `set` without a name or key.
    #[error("{source_name}:{line}: `{keyword}` requires a name")]
    MissingName {
        source_name: String,
        line: usize,
        keyword: &'static str,
    },
    /// Failed to read the input file.
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

impl ParseError {
    /// Line number the error points at, if it is tied to a line.
    pub fn line(&self) -> Option<usize> {
        match self {
            ParseError::StackUnderflow { line, .. }
            | ParseError::NextOutsideEdit { line, .. }
            | ParseError::EditOutsideConfig { line, .. }
            | ParseError::AttributeOutsideBlock { line, .. }
            | ParseError::UnterminatedQuote { line, .. }
            | ParseError::UnclosedBlock { line, .. }
            | ParseError::UnknownStatement { line, .. }
            | ParseError::MissingName { line, .. } => Some(*line),
            ParseError::Io { .. } => None,
        }
    }
}

/// Parse configuration text with a generic source name.
pub fn parse(text: &str) -> Result<Document, ParseError> {
    parse_named(text, "<input>")
}

/// Parse configuration text; `source_name` is used in error messages.
pub fn parse_named(text: &str, source_name: &str) -> Result<Document, ParseError> {
    BlockParser::new(source_name).run(text)
}

/// Read and parse a configuration dump file.
///
/// Invalid UTF-8 sequences are replaced rather than rejected.
pub fn parse_file(path: &Path) -> Result<Document, ParseError> {
    let bytes = fs::read(path).map_err(|source| ParseError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let text = String::from_utf8_lossy(&bytes);
    if matches!(text, Cow::Owned(_)) {
        tracing::warn!(path = %path.display(), "input is not valid UTF-8; invalid bytes replaced");
    }
    parse_named(&text, &path.display().to_string())
}

struct BlockParser<'a> {
    source_name: &'a str,
    doc: Document,
    stack: Vec<BlockId>,
    seen_statement: bool,
}

impl<'a> BlockParser<'a> {
    fn new(source_name: &'a str) -> Self {
        Self {
            source_name,
            doc: Document::new(),
            stack: Vec::new(),
            seen_statement: false,
        }
    }

    fn run(mut self, text: &str) -> Result<Document, ParseError> {
        let mut lines = text.lines().enumerate().map(|(idx, line)| (idx + 1, line));

        while let Some((line_no, raw)) = lines.next() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('#') {
                if !self.seen_statement {
                    self.doc.header.push(line.to_string());
                }
                continue;
            }
            self.seen_statement = true;

            let (keyword, rest) = split_keyword(line);
            match keyword {
                "config" => self.open_config(rest, line_no)?,
                "edit" => self.open_edit(rest, line_no)?,
                "next" => self.close_edit(line_no)?,
                "end" => self.close_config(line_no)?,
                "set" => self.attribute_statement(AttrOp::Set, rest, raw, line_no, &mut lines)?,
                "append" => {
                    self.attribute_statement(AttrOp::Append, rest, raw, line_no, &mut lines)?
                }
                "unset" => {
                    self.attribute_statement(AttrOp::Unset, rest, raw, line_no, &mut lines)?
                },
                other => {
                    return Err(ParseError::UnknownStatement {
                        source_name: self.source_name.to_string(),
                        line: line_no,
                        statement: other.to_string(),
                    })
                }
            }
        }

        if let Some(open) = self.stack.last() {
            let block = self.doc.block(*open);
            return Err(ParseError::UnclosedBlock {
                source_name: self.source_name.to_string(),
                line: block.line,
                keyword: block.kind.keyword(),
                name: block.name.clone(),
            });
        }

        Ok(self.doc)
    }

    fn open_config(&mut self, rest: &str, line: usize) -> Result<(), ParseError> {
        if rest.is_empty() {
            return Err(self.missing_name(line, "config"));
        }
        let parent = self.stack.last().copied();
        let id = self.doc.add_block(parent, BlockKind::Config, rest, line);
        self.stack.push(id);
        Ok(())
    }

    fn open_edit(&mut self, rest: &str, line: usize) -> Result<(), ParseError> {
        let name = match tokenize(rest) {
            Ok(tokens) if !tokens.is_empty() => tokens.join(" "),
            Ok(_) => return Err(self.missing_name(line, "edit")),
            Err(Unterminated) => {
                return Err(ParseError::UnterminatedQuote {
                    source_name: self.source_name.to_string(),
                    line,
                })
            }
        };
        let parent = match self.stack.last() {
            Some(parent) if self.doc.block(*parent).is_config() => *parent,
            _ => {
                return Err(ParseError::EditOutsideConfig {
                    source_name: self.source_name.to_string(),
                    line,
                    name,
                })
            }
        };
        let id = self.doc.add_block(Some(parent), BlockKind::Edit, name, line);
        self.stack.push(id);
        Ok(())
    }

    fn close_edit(&mut self, line: usize) -> Result<(), ParseError> {
        let Some(top) = self.stack.last().copied() else {
            return Err(self.underflow(line, "next"));
        };
        let block = self.doc.block(top);
        if !block.is_edit() {
            return Err(ParseError::NextOutsideEdit {
                source_name: self.source_name.to_string(),
                line,
                open: block.name.clone(),
            });
        }
        self.stack.pop();
        Ok(())
    }

    fn close_config(&mut self, line: usize) -> Result<(), ParseError> {
        let Some(top) = self.stack.last().copied() else {
            return Err(self.underflow(line, "end"));
        };
        if self.doc.block(top).is_edit() {
            tracing::debug!(
                source = self.source_name,
                line,
                edit = %self.doc.block(top).name,
                "`end` closes an edit block without `next`"
            );
            self.stack.pop();
        }
        self.stack.pop();
        Ok(())
    }

    fn attribute_statement<'t, I>(
        &mut self,
        op: AttrOp,
        rest: &str,
        raw: &str,
        line: usize,
        lines: &mut I,
    ) -> Result<(), ParseError>
    where
        I: Iterator<Item = (usize, &'t str)>,
    {
        let (key, values) = split_keyword(rest);
        if key.is_empty() {
            return Err(self.missing_name(line, op.keyword()));
        }
        let tokens = match op {
            AttrOp::Unset => Vec::new(),
            AttrOp::Set | AttrOp::Append => {
                self.read_value_tokens(values, raw_values(raw), line, lines)?
            }
        };

        let Some(top) = self.stack.last().copied() else {
            return Err(ParseError::AttributeOutsideBlock {
                source_name: self.source_name.to_string(),
                line,
                keyword: op.keyword(),
            });
        };
        let attributes = &mut self.doc.block_mut(top).attributes;
        match op {
            AttrOp::Set => {
                attributes.insert(key.to_string(), AttrValue::from_tokens(tokens));
            }
            AttrOp::Append => match attributes.get_mut(key) {
                Some(existing) => existing.extend(tokens),
                None => {
                    attributes.insert(key.to_string(), AttrValue::from_tokens(tokens));
                }
            },
            AttrOp::Unset => {
                attributes.shift_remove(key);
            }
        }
        Ok(())
    }

    /// Tokenize the value part of a `set` line, pulling in following physical
    /// lines while a double-quoted token is still open.
    ///
    /// An open quote keeps the trailing whitespace of `raw_first`.
    fn read_value_tokens<'t, I>(
        &self,
        first: &str,
        raw_first: &str,
        line: usize,
        lines: &mut I,
    ) -> Result<Vec<String>, ParseError>
    where
        I: Iterator<Item = (usize, &'t str)>,
    {
        match tokenize(first) {
            Ok(tokens) => return Ok(tokens),
            Err(Unterminated) => {}
        }
        let mut buffer = raw_first.to_string();
        loop {
            match tokenize(&buffer) {
                Ok(tokens) => return Ok(tokens),
                Err(Unterminated) => match lines.next() {
                    Some((_, continuation)) => {
                        buffer.push('\n');
                        buffer.push_str(continuation);
                    }
                    None => {
                        return Err(ParseError::UnterminatedQuote {
                            source_name: self.source_name.to_string(),
                            line,
                        })
                    }
                },
            }
        }
    }

    fn underflow(&self, line: usize, keyword: &'static str) -> ParseError {
        ParseError::StackUnderflow {
            source_name: self.source_name.to_string(),
            line,
            keyword,
        }
    }

    fn missing_name(&self, line: usize, keyword: &'static str) -> ParseError {
        ParseError::MissingName {
            source_name: self.source_name.to_string(),
            line,
            keyword,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum AttrOp {
    Set,
    Append,
    Unset,
}

impl AttrOp {
    fn keyword(self) -> &'static str {
        match self {
            AttrOp::Set => "set",
            AttrOp::Append => "append",
            AttrOp::Unset => "unset",
        }
    }
}

/// Marker for a double-quoted token still open at the end of the input.
#[derive(Debug, PartialEq, Eq)]
struct Unterminated;

fn split_keyword(line: &str) -> (&str, &str) {
    match line.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword, rest.trim()),
        None => (line, ""),
    }
}

/// Value text of an attribute line (after keyword and key), untrimmed at
/// the end.
fn raw_values(raw: &str) -> &str {
    let after_keyword = match raw.trim_start().split_once(char::is_whitespace) {
        Some((_, rest)) => rest.trim_start(),
        None => return "",
    };
    match after_keyword.split_once(char::is_whitespace) {
        Some((_, values)) => values.trim_start(),
        None => "",
    }
}

/// Split a value string into tokens.
///
/// Tokens are separated by whitespace. Double-quoted tokens keep embedded
/// whitespace, and `\"` / `\\` inside them are unescaped.
fn tokenize(input: &str) -> Result<Vec<String>, Unterminated> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let mut token = String::new();
        if c == '"' {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => match chars.next() {
                        Some(escaped @ ('"' | '\\')) => token.push(escaped),
                        Some(other) => {
                            token.push('\\');
                            token.push(other);
                        }
                        None => return Err(Unterminated),
                    },
                    '"' => {
                        closed = true;
                        break;
                    }
                    other => token.push(other),
                }
            }
            if !closed {
                return Err(Unterminated);
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                token.push(c);
                chars.next();
            }
        }
        tokens.push(token);
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::{tokenize, Unterminated};

    #[test]
    fn tokenize_splits_quoted_and_bare_tokens() {
        let tokens = tokenize(r#""HTTP" "HTTPS"  PING"#).expect("tokens");
        assert_eq!(tokens, vec!["HTTP", "HTTPS", "PING"]);
    }

    #[test]
    fn tokenize_keeps_embedded_whitespace_and_unescapes() {
        let tokens = tokenize(r#""G Suite" "say \"hi\" \\ bye""#).expect("tokens");
        assert_eq!(tokens, vec!["G Suite", r#"say "hi" \ bye"#]);
    }

    #[test]
    fn tokenize_keeps_unknown_escapes_verbatim() {
        let tokens = tokenize(r#""a\nb""#).expect("tokens");
        assert_eq!(tokens, vec![r"a\nb"]);
    }

    #[test]
    fn tokenize_reports_open_quote() {
        assert_eq!(tokenize(r#""never closed"#), Err(Unterminated));
    }

    #[test]
    fn tokenize_keeps_empty_quoted_token() {
        assert_eq!(tokenize(r#""""#).expect("tokens"), vec![String::new()]);
    }
}
