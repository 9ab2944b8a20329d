//! Ingest pass: accumulate the raw vertex/edge graph keyed by the source
//! stream's opaque ids. No resolution happens here; edges are validated
//! eagerly so a dangling reference fails the conversion at the offending
//! line.

use std::collections::{HashMap, HashSet};

use super::types::{Edge, Element, ItemProperty, SourceId, Vertex};
use super::{reader, ImportError};

#[derive(Debug, Default, Clone)]
pub struct RawRange {
    pub start_line: u32,
    pub start_character: u32,
    pub end_line: u32,
    pub end_character: u32,
    pub definition_result: Option<SourceId>,
    pub reference_result: Option<SourceId>,
    pub hover_result: Option<SourceId>,
    pub monikers: Vec<SourceId>,
    pub next: Option<SourceId>,
}

#[derive(Debug, Default, Clone)]
pub struct RawResultSet {
    pub definition_result: Option<SourceId>,
    pub reference_result: Option<SourceId>,
    pub hover_result: Option<SourceId>,
    pub monikers: Vec<SourceId>,
    pub next: Option<SourceId>,
}

#[derive(Debug, Clone)]
pub struct RawMoniker {
    pub kind: Option<super::types::MonikerKind>,
    pub scheme: String,
    pub identifier: String,
    pub package: Option<SourceId>,
}

#[derive(Debug, Clone)]
pub struct RawPackage {
    pub name: String,
    pub version: Option<String>,
}

/// One `(documentPath, rangeId)` member of a definition or reference result,
/// still in source-id space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMember {
    pub document: SourceId,
    pub range: SourceId,
}

#[derive(Debug, Default)]
pub struct Correlator {
    pub lsif_version: Option<String>,
    pub project_root: Option<String>,

    pub documents: HashMap<SourceId, String>,
    pub ranges: HashMap<SourceId, RawRange>,
    pub result_sets: HashMap<SourceId, RawResultSet>,
    pub definition_results: HashMap<SourceId, Vec<RawMember>>,
    pub reference_results: HashMap<SourceId, Vec<RawMember>>,
    pub hover_results: HashMap<SourceId, String>,
    pub monikers: HashMap<SourceId, RawMoniker>,
    pub packages: HashMap<SourceId, RawPackage>,

    /// document -> contained ranges
    pub contains: HashMap<SourceId, Vec<SourceId>>,
    /// moniker -> linked monikers (undirected)
    pub next_monikers: HashMap<SourceId, Vec<SourceId>>,
    /// union edges between linked reference results
    pub linked_reference_results: Vec<(SourceId, SourceId)>,
    /// ids of vertices we parse but do not consume; edges from these are
    /// skipped rather than reported as dangling
    pub unsupported: HashSet<SourceId>,

    elements: u64,
}

impl Correlator {
    /// Run the ingest pass over a gzipped stream.
    pub fn correlate<R: std::io::Read>(input: R) -> Result<Self, ImportError> {
        let mut correlator = Correlator::default();
        for item in reader::elements(input) {
            let (line, element) = item?;
            correlator.insert(line, element)?;
        }
        correlator.finish()
    }

    pub fn insert(&mut self, line: u64, element: Element) -> Result<(), ImportError> {
        if self.elements == 0 {
            match &element {
                Element::Vertex(Vertex::MetaData { version, .. }) => {
                    if !reader::version_supported(version) {
                        return Err(ImportError::UnsupportedVersion {
                            version: version.clone(),
                        });
                    }
                }
                _ => {
                    return Err(ImportError::MalformedInput {
                        line,
                        message: "metaData vertex must precede all other elements".into(),
                    })
                }
            }
        }
        self.elements += 1;

        match element {
            Element::Vertex(vertex) => self.insert_vertex(line, vertex),
            Element::Edge(edge) => self.insert_edge(line, edge),
        }
    }

    fn finish(self) -> Result<Self, ImportError> {
        if self.lsif_version.is_none() {
            return Err(ImportError::MalformedInput {
                line: 0,
                message: "stream contains no metaData vertex".into(),
            });
        }
        Ok(self)
    }

    fn insert_vertex(&mut self, line: u64, vertex: Vertex) -> Result<(), ImportError> {
        match vertex {
            Vertex::MetaData {
                version,
                project_root,
            } => {
                if self.lsif_version.is_some() {
                    return Err(ImportError::MalformedInput {
                        line,
                        message: "duplicate metaData vertex".into(),
                    });
                }
                self.lsif_version = Some(version);
                self.project_root = project_root;
            }
            Vertex::Document { id, uri } => {
                let path = self.relativize(&uri);
                self.documents.insert(id, path);
            }
            Vertex::Range { id, start, end } => {
                if (end.line, end.character) < (start.line, start.character) {
                    return Err(ImportError::MalformedInput {
                        line,
                        message: format!("range {} ends before it starts", id),
                    });
                }
                self.ranges.insert(
                    id,
                    RawRange {
                        start_line: start.line,
                        start_character: start.character,
                        end_line: end.line,
                        end_character: end.character,
                        ..RawRange::default()
                    },
                );
            }
            Vertex::ResultSet { id } => {
                self.result_sets.insert(id, RawResultSet::default());
            }
            Vertex::DefinitionResult { id } => {
                self.definition_results.insert(id, Vec::new());
            }
            Vertex::ReferenceResult { id } => {
                self.reference_results.insert(id, Vec::new());
            }
            Vertex::HoverResult { id, result } => {
                self.hover_results.insert(id, result.to_markdown());
            }
            Vertex::Moniker {
                id,
                scheme,
                identifier,
                kind,
            } => {
                self.monikers.insert(
                    id,
                    RawMoniker {
                        kind,
                        scheme,
                        identifier,
                        package: None,
                    },
                );
            }
            Vertex::PackageInformation { id, name, version } => {
                self.packages.insert(id, RawPackage { name, version });
            }
            Vertex::Unsupported { id } => {
                self.unsupported.insert(id);
            }
            Vertex::Unknown => {}
        }
        Ok(())
    }

    fn insert_edge(&mut self, line: u64, edge: Edge) -> Result<(), ImportError> {
        match edge {
            Edge::Contains { out_v, in_vs } => {
                // `contains` is also emitted from the project vertex, which
                // we do not track; only document containment matters here.
                if self.documents.contains_key(&out_v) {
                    for in_v in &in_vs {
                        if !self.ranges.contains_key(in_v) {
                            return Err(dangling(in_v, line));
                        }
                    }
                    self.contains.entry(out_v).or_default().extend(in_vs);
                }
            }
            Edge::Next { out_v, in_v } => {
                if !self.result_sets.contains_key(&in_v) {
                    return Err(dangling(&in_v, line));
                }
                if let Some(range) = self.ranges.get_mut(&out_v) {
                    range.next = Some(in_v);
                } else if let Some(set) = self.result_sets.get_mut(&out_v) {
                    set.next = Some(in_v);
                } else {
                    return Err(dangling(&out_v, line));
                }
            }
            Edge::Item {
                out_v,
                in_vs,
                document,
                property,
            } => self.insert_item(line, out_v, in_vs, document, property)?,
            Edge::Definition { out_v, in_v } => {
                if !self.definition_results.contains_key(&in_v) {
                    return Err(dangling(&in_v, line));
                }
                self.attach(line, &out_v, |r| r.definition_result = Some(in_v.clone()), |s| {
                    s.definition_result = Some(in_v.clone())
                })?;
            }
            Edge::References { out_v, in_v } => {
                if !self.reference_results.contains_key(&in_v) {
                    return Err(dangling(&in_v, line));
                }
                self.attach(line, &out_v, |r| r.reference_result = Some(in_v.clone()), |s| {
                    s.reference_result = Some(in_v.clone())
                })?;
            }
            Edge::Hover { out_v, in_v } => {
                if !self.hover_results.contains_key(&in_v) {
                    return Err(dangling(&in_v, line));
                }
                self.attach(line, &out_v, |r| r.hover_result = Some(in_v.clone()), |s| {
                    s.hover_result = Some(in_v.clone())
                })?;
            }
            Edge::Moniker { out_v, in_v } => {
                if !self.monikers.contains_key(&in_v) {
                    return Err(dangling(&in_v, line));
                }
                self.attach(line, &out_v, |r| r.monikers.push(in_v.clone()), |s| {
                    s.monikers.push(in_v.clone())
                })?;
            }
            Edge::NextMoniker { out_v, in_v } => {
                if !self.monikers.contains_key(&in_v) {
                    return Err(dangling(&in_v, line));
                }
                if !self.monikers.contains_key(&out_v) {
                    return Err(dangling(&out_v, line));
                }
                self.next_monikers
                    .entry(out_v.clone())
                    .or_default()
                    .push(in_v.clone());
                self.next_monikers.entry(in_v).or_default().push(out_v);
            }
            Edge::PackageInformation { out_v, in_v } => {
                if !self.packages.contains_key(&in_v) {
                    return Err(dangling(&in_v, line));
                }
                match self.monikers.get_mut(&out_v) {
                    Some(moniker) => moniker.package = Some(in_v),
                    None => return Err(dangling(&out_v, line)),
                }
            }
            Edge::Unknown => {}
        }
        Ok(())
    }

    fn insert_item(
        &mut self,
        line: u64,
        out_v: SourceId,
        in_vs: Vec<SourceId>,
        document: SourceId,
        property: Option<ItemProperty>,
    ) -> Result<(), ImportError> {
        if self.definition_results.contains_key(&out_v) {
            let members = self.members(line, &document, in_vs)?;
            if let Some(existing) = self.definition_results.get_mut(&out_v) {
                existing.extend(members);
            }
            return Ok(());
        }

        if self.reference_results.contains_key(&out_v) {
            // A reference result's items either attach ranges or link whole
            // nested reference results, which are merged later.
            let linked = property == Some(ItemProperty::ReferenceResults)
                || in_vs
                    .first()
                    .map(|id| self.reference_results.contains_key(id))
                    .unwrap_or(false);

            if linked {
                for in_v in in_vs {
                    if !self.reference_results.contains_key(&in_v) {
                        return Err(dangling(&in_v, line));
                    }
                    self.linked_reference_results.push((out_v.clone(), in_v));
                }
            } else {
                let members = self.members(line, &document, in_vs)?;
                if let Some(existing) = self.reference_results.get_mut(&out_v) {
                    existing.extend(members);
                }
            }
            return Ok(());
        }

        // item edges also hang off result kinds we do not consume
        if self.unsupported.contains(&out_v) {
            return Ok(());
        }

        Err(dangling(&out_v, line))
    }

    fn members(
        &self,
        line: u64,
        document: &SourceId,
        in_vs: Vec<SourceId>,
    ) -> Result<Vec<RawMember>, ImportError> {
        if !self.documents.contains_key(document) {
            return Err(dangling(document, line));
        }
        in_vs
            .into_iter()
            .map(|range| {
                if !self.ranges.contains_key(&range) {
                    return Err(dangling(&range, line));
                }
                Ok(RawMember {
                    document: document.clone(),
                    range,
                })
            })
            .collect()
    }

    fn attach(
        &mut self,
        line: u64,
        out_v: &SourceId,
        on_range: impl FnOnce(&mut RawRange),
        on_set: impl FnOnce(&mut RawResultSet),
    ) -> Result<(), ImportError> {
        if let Some(range) = self.ranges.get_mut(out_v) {
            on_range(range);
            Ok(())
        } else if let Some(set) = self.result_sets.get_mut(out_v) {
            on_set(set);
            Ok(())
        } else {
            Err(dangling(out_v, line))
        }
    }

    /// Document URIs arrive absolute (`file:///...`); store them relative to
    /// the project root so that dump paths are stable across machines.
    fn relativize(&self, uri: &str) -> String {
        if let Some(root) = &self.project_root {
            let root = root.trim_end_matches('/');
            if let Some(rest) = uri.strip_prefix(root) {
                return rest.trim_start_matches('/').to_owned();
            }
        }
        uri.to_owned()
    }

    /// Ids of monikers transitively linked to `id` through `nextMoniker`
    /// edges, including `id` itself.
    pub fn moniker_closure(&self, id: &SourceId) -> Vec<SourceId> {
        let mut seen: HashSet<SourceId> = HashSet::new();
        let mut queue = vec![id.clone()];
        let mut out = Vec::new();

        while let Some(current) = queue.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            out.push(current.clone());
            if let Some(linked) = self.next_monikers.get(&current) {
                queue.extend(linked.iter().cloned());
            }
        }

        out.sort();
        out
    }
}

fn dangling(id: &SourceId, line: u64) -> ImportError {
    ImportError::DanglingReference {
        id: id.to_string(),
        line,
    }
}
