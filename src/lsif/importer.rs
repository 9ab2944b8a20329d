//! Emit pass: assign dense integer ids, partition results into hash-sharded
//! chunks, and write the dump store. Also derives the cross-repo package
//! summaries handed to the registry after a successful conversion.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::dump::encoding::{
    self, DocumentBlob, MonikerData, MonikerKind, PackageData, RangeData, ResultChunkBlob,
    ResultMember,
};
use crate::dump::store::{self, DumpData, MetaRow, SymbolRow};
use crate::xrepo::types::{Package, PackageReferences};

use super::canonicalize::{canonicalize, Canonicalized};
use super::correlator::{Correlator, RawMember};
use super::types::SourceId;
use super::ImportError;

/// Target number of results per chunk; the chunk count is derived from the
/// total and clamped so tiny dumps get one chunk and huge dumps stay
/// bounded.
const RESULTS_PER_CHUNK: usize = 512;
const MAX_RESULT_CHUNKS: i64 = 1000;

#[derive(Debug, Clone, Copy, Default)]
pub struct ImportStats {
    pub documents: usize,
    pub ranges: usize,
    pub results: usize,
    pub packages: usize,
    pub package_references: usize,
}

#[derive(Debug)]
pub struct ImportOutput {
    pub packages: Vec<Package>,
    pub references: Vec<PackageReferences>,
    pub stats: ImportStats,
}

/// Convert the gzipped LSIF stream in `input` into a dump database at
/// `output`. The correlation pass runs on the blocking pool; the emit pass
/// writes through sqlx.
pub async fn import_file(input: &Path, output: &Path, server_version: &str) -> Result<ImportOutput> {
    let input = input.to_owned();
    let correlator = tokio::task::spawn_blocking(move || -> Result<Correlator> {
        let file = std::fs::File::open(&input)
            .with_context(|| format!("opening upload {}", input.display()))?;
        Ok(Correlator::correlate(file)?)
    })
    .await
    .context("correlation task panicked")??;

    let canonicalized = canonicalize(correlator);
    let (data, output_summary) = emit(canonicalized, server_version)?;

    store::write(output, &data).await?;

    info!(
        documents = output_summary.stats.documents,
        ranges = output_summary.stats.ranges,
        results = output_summary.stats.results,
        packages = output_summary.stats.packages,
        "conversion complete"
    );

    Ok(output_summary)
}

struct DenseIds {
    next: u64,
    ids: HashMap<SourceId, u64>,
}

impl DenseIds {
    fn new() -> Self {
        DenseIds {
            next: 0,
            ids: HashMap::new(),
        }
    }

    fn get(&mut self, id: &SourceId) -> u64 {
        *self.ids.entry(id.clone()).or_insert_with(|| {
            let assigned = self.next;
            self.next += 1;
            assigned
        })
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

pub fn emit(
    canonicalized: Canonicalized,
    server_version: &str,
) -> Result<(DumpData, ImportOutput), ImportError> {
    let Canonicalized {
        correlator,
        ranges: resolved_ranges,
        reference_members,
    } = canonicalized;

    // Documents in path order, so ids are deterministic for a given input.
    let mut documents: Vec<(SourceId, String)> = correlator
        .documents
        .iter()
        .map(|(id, path)| (id.clone(), path.clone()))
        .collect();
    documents.sort_by(|a, b| a.1.cmp(&b.1));

    let document_ids: HashMap<SourceId, u64> = documents
        .iter()
        .enumerate()
        .map(|(index, (id, _))| (id.clone(), index as u64))
        .collect();
    let document_paths: HashMap<u64, String> = documents
        .iter()
        .enumerate()
        .map(|(index, (_, path))| (index as u64, path.clone()))
        .collect();

    // Ranges per document in position order; a range's id is its index.
    let mut ordered_ranges: HashMap<SourceId, Vec<SourceId>> = HashMap::new();
    let mut range_locations: HashMap<SourceId, (u64, u64)> = HashMap::new();

    for (doc_id, _) in &documents {
        let mut contained = correlator
            .contains
            .get(doc_id)
            .cloned()
            .unwrap_or_default();
        contained.sort_by_key(|range_id| {
            let r = &correlator.ranges[range_id];
            (r.start_line, r.start_character, r.end_line, r.end_character)
        });
        contained.dedup();

        for (index, range_id) in contained.iter().enumerate() {
            range_locations.insert(
                range_id.clone(),
                (document_ids[doc_id], index as u64),
            );
        }
        ordered_ranges.insert(doc_id.clone(), contained);
    }

    // Dense result ids, assigned only to results that are reachable from a
    // range and have at least one member; ranges pointing at an empty
    // result behave as if they had none.
    let mut result_ids = DenseIds::new();
    let mut result_members: HashMap<u64, Vec<RawMember>> = HashMap::new();

    let mut resolve_result = |source: &Option<SourceId>,
                              members_of: &dyn Fn(&SourceId) -> Option<Vec<RawMember>>|
     -> Option<u64> {
        let source = source.as_ref()?;
        let members = members_of(source)?;
        if members.is_empty() {
            return None;
        }
        let dense = result_ids.get(source);
        result_members.entry(dense).or_insert(members);
        Some(dense)
    };

    let def_members = |id: &SourceId| correlator.definition_results.get(id).cloned();
    let ref_members = |id: &SourceId| reference_members.get(id).cloned();

    // Dump-wide dense ids for hover/moniker/package records.
    let mut hover_ids = DenseIds::new();
    let mut moniker_ids = DenseIds::new();
    let mut package_ids = DenseIds::new();

    let mut blobs: Vec<(String, DocumentBlob)> = Vec::with_capacity(documents.len());
    let mut definitions: Vec<SymbolRow> = Vec::new();
    let mut references: Vec<SymbolRow> = Vec::new();
    let mut exported: HashSet<Package> = HashSet::new();
    let mut imported: HashMap<Package, Vec<String>> = HashMap::new();
    let mut total_ranges = 0usize;

    for (doc_id, path) in &documents {
        let mut blob = DocumentBlob::default();

        for range_id in &ordered_ranges[doc_id] {
            let raw = &correlator.ranges[range_id];
            let resolved = resolved_ranges
                .get(range_id)
                .ok_or_else(|| unresolved(range_id))?;

            let definition_result = resolve_result(&resolved.definition_result, &def_members);
            let reference_result = resolve_result(&resolved.reference_result, &ref_members);

            let hover_result = match &resolved.hover_result {
                Some(id) => {
                    let text = correlator
                        .hover_results
                        .get(id)
                        .ok_or_else(|| unresolved(id))?;
                    let dense = hover_ids.get(id);
                    blob.hovers.entry(dense).or_insert_with(|| text.clone());
                    Some(dense)
                }
                None => None,
            };

            let mut monikers = Vec::with_capacity(resolved.monikers.len());
            for moniker_id in &resolved.monikers {
                let raw_moniker = correlator
                    .monikers
                    .get(moniker_id)
                    .ok_or_else(|| unresolved(moniker_id))?;

                let package = match &raw_moniker.package {
                    Some(package_id) => {
                        let raw_package = correlator
                            .packages
                            .get(package_id)
                            .ok_or_else(|| unresolved(package_id))?;
                        let dense = package_ids.get(package_id);
                        blob.packages.entry(dense).or_insert_with(|| PackageData {
                            name: raw_package.name.clone(),
                            version: raw_package.version.clone(),
                        });
                        Some(dense)
                    }
                    None => None,
                };

                let dense = moniker_ids.get(moniker_id);
                blob.monikers.entry(dense).or_insert_with(|| MonikerData {
                    kind: raw_moniker.kind,
                    scheme: raw_moniker.scheme.clone(),
                    identifier: raw_moniker.identifier.clone(),
                    package,
                });
                monikers.push(dense);

                // Cross-repo summaries and the moniker-indexed symbol
                // tables skip purely local monikers.
                if raw_moniker.kind == Some(MonikerKind::Local) {
                    continue;
                }

                let symbol = SymbolRow {
                    scheme: raw_moniker.scheme.clone(),
                    identifier: raw_moniker.identifier.clone(),
                    document_path: path.clone(),
                    start_line: raw.start_line,
                    start_character: raw.start_character,
                    end_line: raw.end_line,
                    end_character: raw.end_character,
                };

                let is_definition = resolved
                    .definition_result
                    .as_ref()
                    .and_then(|id| correlator.definition_results.get(id))
                    .map(|members| {
                        members
                            .iter()
                            .any(|m| &m.document == doc_id && &m.range == range_id)
                    })
                    .unwrap_or(false);

                if is_definition {
                    definitions.push(symbol.clone());
                }
                references.push(symbol);

                if let Some(raw_package) = raw_moniker
                    .package
                    .as_ref()
                    .and_then(|id| correlator.packages.get(id))
                {
                    let package = Package {
                        scheme: raw_moniker.scheme.clone(),
                        name: raw_package.name.clone(),
                        version: raw_package.version.clone(),
                    };
                    match raw_moniker.kind {
                        Some(MonikerKind::Export) => {
                            exported.insert(package);
                        }
                        Some(MonikerKind::Import) => {
                            let identifiers = imported.entry(package).or_default();
                            if !identifiers.contains(&raw_moniker.identifier) {
                                identifiers.push(raw_moniker.identifier.clone());
                            }
                        }
                        _ => {}
                    }
                }
            }

            blob.ranges.push(RangeData {
                start_line: raw.start_line,
                start_character: raw.start_character,
                end_line: raw.end_line,
                end_character: raw.end_character,
                definition_result,
                reference_result,
                hover_result,
                monikers,
            });
            total_ranges += 1;
        }

        blobs.push((path.clone(), blob));
    }

    // Partition results across chunks.
    let num_results = result_ids.len();
    let num_result_chunks = (num_results.div_ceil(RESULTS_PER_CHUNK) as i64)
        .clamp(1, MAX_RESULT_CHUNKS);

    let mut chunks: Vec<ResultChunkBlob> = vec![ResultChunkBlob::default(); num_result_chunks as usize];
    for (dense, members) in &result_members {
        let chunk = &mut chunks[encoding::shard_index(*dense, num_result_chunks) as usize];
        let mut converted = Vec::with_capacity(members.len());
        for member in members {
            let (doc, range) = range_locations
                .get(&member.range)
                .ok_or_else(|| unresolved(&member.range))?;
            converted.push(ResultMember {
                document: *doc,
                range: *range,
            });
            chunk
                .paths
                .entry(*doc)
                .or_insert_with(|| document_paths[doc].clone());
        }
        chunk.results.insert(*dense, converted);
    }

    // Encode blobs.
    let mut data = DumpData {
        meta: Some(MetaRow {
            lsif_version: correlator
                .lsif_version
                .clone()
                .unwrap_or_else(|| "0.4.0".to_owned()),
            server_version: server_version.to_owned(),
            encoding_version: encoding::ENCODING_VERSION,
            num_result_chunks,
        }),
        definitions,
        references,
        ..DumpData::default()
    };

    for (path, blob) in &blobs {
        let bytes = encoding::encode(blob).map_err(|err| ImportError::Inconsistent(err.to_string()))?;
        data.documents.push((path.clone(), bytes));
    }
    for (id, chunk) in chunks.iter().enumerate() {
        let bytes = encoding::encode(chunk).map_err(|err| ImportError::Inconsistent(err.to_string()))?;
        data.result_chunks.push((id as i64, bytes));
    }

    let stats = ImportStats {
        documents: documents.len(),
        ranges: total_ranges,
        results: num_results,
        packages: exported.len(),
        package_references: imported.len(),
    };

    let mut packages: Vec<Package> = exported.into_iter().collect();
    packages.sort_by(|a, b| (&a.scheme, &a.name, &a.version).cmp(&(&b.scheme, &b.name, &b.version)));

    let mut references_out: Vec<PackageReferences> = imported
        .into_iter()
        .map(|(package, identifiers)| PackageReferences {
            package,
            identifiers,
        })
        .collect();
    references_out.sort_by(|a, b| {
        (&a.package.scheme, &a.package.name, &a.package.version)
            .cmp(&(&b.package.scheme, &b.package.name, &b.package.version))
    });

    Ok((
        data,
        ImportOutput {
            packages,
            references: references_out,
            stats,
        },
    ))
}

fn unresolved(id: &SourceId) -> ImportError {
    ImportError::Inconsistent(format!("unresolved id {} during emit", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::store::SymbolTable;
    use crate::lsif::testing::{gzip_lines, interface_scenario};

    fn import_scenario(bytes: &[u8]) -> (DumpData, ImportOutput) {
        let correlator = Correlator::correlate(bytes).unwrap();
        emit(canonicalize(correlator), "test").unwrap()
    }

    #[test]
    fn interface_scenario_produces_five_reference_members() {
        let (data, output) = import_scenario(&interface_scenario());

        assert_eq!(output.stats.documents, 1);
        assert_eq!(output.stats.ranges, 5);
        assert_eq!(data.documents.len(), 1);

        let meta = data.meta.as_ref().unwrap();
        assert_eq!(meta.num_result_chunks, 1);

        let blob: DocumentBlob = encoding::decode(&data.documents[0].1).unwrap();
        assert_eq!(blob.ranges.len(), 5);

        // every range resolves the shared reference result
        let reference_result = blob.ranges[0].reference_result.unwrap();
        assert!(blob
            .ranges
            .iter()
            .all(|r| r.reference_result == Some(reference_result)));

        let chunk: ResultChunkBlob = encoding::decode(&data.result_chunks[0].1).unwrap();
        let members = &chunk.results[&reference_result];
        assert_eq!(members.len(), 5);
        assert!(members
            .iter()
            .all(|m| chunk.paths[&m.document] == "src/index.ts"));
    }

    #[test]
    fn hover_text_is_denormalized_into_the_document() {
        let (data, _) = import_scenario(&interface_scenario());
        let blob: DocumentBlob = encoding::decode(&data.documents[0].1).unwrap();
        let hover_id = blob.ranges[0].hover_result.unwrap();
        assert_eq!(blob.hovers[&hover_id], "```ts\nfoo(): void\n```");
    }

    fn cross_repo_scenario() -> Vec<u8> {
        gzip_lines(&[
            r#"{"id":1,"type":"vertex","label":"metaData","version":"0.4.3","projectRoot":"file:///repo"}"#,
            r#"{"id":2,"type":"vertex","label":"document","uri":"file:///repo/src/lib.ts"}"#,
            r#"{"id":3,"type":"vertex","label":"range","start":{"line":0,"character":9},"end":{"line":0,"character":10}}"#,
            r#"{"id":4,"type":"vertex","label":"range","start":{"line":3,"character":2},"end":{"line":3,"character":3}}"#,
            r#"{"id":5,"type":"vertex","label":"definitionResult"}"#,
            r#"{"id":6,"type":"vertex","label":"moniker","scheme":"npm","identifier":"lib:X","kind":"export"}"#,
            r#"{"id":7,"type":"vertex","label":"packageInformation","name":"lib","version":"1"}"#,
            r#"{"id":8,"type":"vertex","label":"moniker","scheme":"npm","identifier":"util:Y","kind":"import"}"#,
            r#"{"id":9,"type":"vertex","label":"packageInformation","name":"util","version":"2"}"#,
            r#"{"id":30,"type":"edge","label":"contains","outV":2,"inVs":[3,4]}"#,
            r#"{"id":31,"type":"edge","label":"textDocument/definition","outV":3,"inV":5}"#,
            r#"{"id":32,"type":"edge","label":"item","outV":5,"inVs":[3],"document":2}"#,
            r#"{"id":33,"type":"edge","label":"moniker","outV":3,"inV":6}"#,
            r#"{"id":34,"type":"edge","label":"packageInformation","outV":6,"inV":7}"#,
            r#"{"id":35,"type":"edge","label":"moniker","outV":4,"inV":8}"#,
            r#"{"id":36,"type":"edge","label":"packageInformation","outV":8,"inV":9}"#,
        ])
    }

    #[test]
    fn cross_repo_summaries_split_exports_and_imports() {
        let (data, output) = import_scenario(&cross_repo_scenario());

        assert_eq!(
            output.packages,
            vec![Package {
                scheme: "npm".into(),
                name: "lib".into(),
                version: Some("1".into()),
            }]
        );
        assert_eq!(output.references.len(), 1);
        assert_eq!(output.references[0].package.name, "util");
        assert_eq!(output.references[0].identifiers, vec!["util:Y".to_owned()]);

        // the exporting range lands in defs and refs; the importing range
        // in refs only
        assert_eq!(data.definitions.len(), 1);
        assert_eq!(data.definitions[0].identifier, "lib:X");
        assert_eq!(data.references.len(), 2);
    }

    #[tokio::test]
    async fn import_file_writes_a_queryable_dump() {
        let dir = tempfile::tempdir().unwrap();
        let upload = dir.path().join("upload.gz");
        let db = dir.path().join("1.lsif.db");
        tokio::fs::write(&upload, interface_scenario()).await.unwrap();

        let output = import_file(&upload, &db, "test").await.unwrap();
        assert_eq!(output.stats.documents, 1);

        let pool = store::open_read_pool(&db).await.unwrap();
        assert!(store::document_exists(&pool, "src/index.ts").await.unwrap());
        let rows = store::symbol_rows(&pool, SymbolTable::References, "npm", "absent")
            .await
            .unwrap();
        assert!(rows.is_empty());
    }
}
