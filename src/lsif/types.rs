//! Serde model of the LSIF 0.4 wire format. Each decompressed line of an
//! upload is one `Element`. Labels we do not consume deserialize into the
//! `Unknown` variants so that newer indexers keep working.

use std::fmt;

use serde::Deserialize;

pub use crate::dump::encoding::MonikerKind;

/// Vertex/edge identifiers are opaque in the source stream and may be JSON
/// numbers or strings. They are normalized to strings so they can key maps
/// uniformly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(from = "RawId")]
pub struct SourceId(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(u64),
    Text(String),
}

impl From<RawId> for SourceId {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Number(n) => SourceId(n.to_string()),
            RawId::Text(s) => SourceId(s),
        }
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        SourceId(s.to_owned())
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LsifPosition {
    pub line: u32,
    pub character: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Element {
    Vertex(Vertex),
    Edge(Edge),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "label")]
pub enum Vertex {
    #[serde(rename = "metaData", rename_all = "camelCase")]
    MetaData {
        version: String,
        #[serde(default)]
        project_root: Option<String>,
    },

    #[serde(rename = "document")]
    Document { id: SourceId, uri: String },

    #[serde(rename = "range")]
    Range {
        id: SourceId,
        start: LsifPosition,
        end: LsifPosition,
    },

    #[serde(rename = "resultSet")]
    ResultSet { id: SourceId },

    #[serde(rename = "definitionResult")]
    DefinitionResult { id: SourceId },

    #[serde(rename = "referenceResult")]
    ReferenceResult { id: SourceId },

    #[serde(rename = "hoverResult")]
    HoverResult {
        id: SourceId,
        result: HoverResultPayload,
    },

    #[serde(rename = "moniker")]
    Moniker {
        id: SourceId,
        scheme: String,
        identifier: String,
        #[serde(default)]
        kind: Option<MonikerKind>,
    },

    #[serde(rename = "packageInformation")]
    PackageInformation {
        id: SourceId,
        name: String,
        #[serde(default)]
        version: Option<String>,
    },

    /// Labels the importer understands but does not consume. Their ids are
    /// still recorded so edges touching them are not mistaken for dangling
    /// references.
    #[serde(
        rename = "project",
        alias = "$event",
        alias = "declarationResult",
        alias = "implementationResult",
        alias = "typeDefinitionResult",
        alias = "documentSymbolResult",
        alias = "foldingRangeResult",
        alias = "documentLinkResult",
        alias = "diagnosticResult"
    )]
    Unsupported { id: SourceId },

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HoverResultPayload {
    pub contents: HoverContents,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HoverContents {
    Many(Vec<HoverPart>),
    One(HoverPart),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HoverPart {
    Marked { language: String, value: String },
    Markup { value: String },
    Plain(String),
}

impl HoverResultPayload {
    /// Flatten the LSP hover shapes into one markdown string.
    pub fn to_markdown(&self) -> String {
        let parts = match &self.contents {
            HoverContents::Many(parts) => parts.as_slice(),
            HoverContents::One(part) => std::slice::from_ref(part),
        };

        parts
            .iter()
            .map(|part| match part {
                HoverPart::Marked { language, value } => {
                    format!("```{}\n{}\n```", language, value)
                }
                HoverPart::Markup { value } => value.clone(),
                HoverPart::Plain(text) => text.clone(),
            })
            .collect::<Vec<_>>()
            .join("\n\n---\n\n")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "label")]
pub enum Edge {
    #[serde(rename = "contains", rename_all = "camelCase")]
    Contains {
        out_v: SourceId,
        in_vs: Vec<SourceId>,
    },

    #[serde(rename = "next", rename_all = "camelCase")]
    Next { out_v: SourceId, in_v: SourceId },

    #[serde(rename = "item", rename_all = "camelCase")]
    Item {
        out_v: SourceId,
        in_vs: Vec<SourceId>,
        document: SourceId,
        #[serde(default)]
        property: Option<ItemProperty>,
    },

    #[serde(rename = "textDocument/definition", rename_all = "camelCase")]
    Definition { out_v: SourceId, in_v: SourceId },

    #[serde(rename = "textDocument/references", rename_all = "camelCase")]
    References { out_v: SourceId, in_v: SourceId },

    #[serde(rename = "textDocument/hover", rename_all = "camelCase")]
    Hover { out_v: SourceId, in_v: SourceId },

    #[serde(rename = "moniker", rename_all = "camelCase")]
    Moniker { out_v: SourceId, in_v: SourceId },

    #[serde(rename = "nextMoniker", rename_all = "camelCase")]
    NextMoniker { out_v: SourceId, in_v: SourceId },

    #[serde(rename = "packageInformation", rename_all = "camelCase")]
    PackageInformation { out_v: SourceId, in_v: SourceId },

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemProperty {
    Definitions,
    References,
    ReferenceResults,
}
