pub mod database;

use serde::{Deserialize, Serialize};

use crate::dump::encoding::{MonikerKind, RangeData};
use crate::xrepo::types::Package;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl From<&RangeData> for Span {
    fn from(range: &RangeData) -> Self {
        Span {
            start: Position {
                line: range.start_line,
                character: range.start_character,
            },
            end: Position {
                line: range.end_line,
                character: range.end_character,
            },
        }
    }
}

/// A resolved location within one dump. Paths are dump-root-relative; the
/// backend qualifies them before they leave the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub dump_id: i64,
    pub path: String,
    pub range: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hover {
    pub contents: String,
    pub range: Span,
}

/// A moniker attached to a range, with its package resolved from the
/// document blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMoniker {
    pub kind: Option<MonikerKind>,
    pub scheme: String,
    pub identifier: String,
    pub package: Option<Package>,
}
