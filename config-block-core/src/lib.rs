//! Generic parsing, normalization and writing of `config`/`edit`/`set` block
//! text as produced by FortiOS `show` commands.

pub mod block;
pub mod parser;
pub mod record;
pub mod writer;

pub use block::{AttrValue, BlockId, BlockKind, ConfigBlock, Document};
pub use parser::{parse, parse_file, parse_named, ParseError};
pub use record::{normalize, sections, FieldValue, Record, Section};
pub use writer::{write, write_file, WriteError};
