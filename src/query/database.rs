//! Per-dump query resolution. Every operation pins exactly one connection
//! entry and fans out document/result-chunk pins beneath it; a position
//! outside any range yields empty results rather than an error.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use sqlx::SqlitePool;
use thiserror::Error;

use crate::cache::CacheTier;
use crate::dump::encoding::{self, DocumentBlob, ResultChunkBlob};
use crate::dump::store::{self, SymbolTable};
use crate::xrepo::types::{Dump, Package};

use super::{Hover, Location, Position, ResolvedMoniker, Span};

/// Factory-level sentinel for a path with no document; unwrapped back into
/// `None` by the caller so negative lookups are not cached.
#[derive(Debug, Error)]
#[error("document not present in dump")]
struct DocumentMissing;

pub struct QueryDatabase {
    caches: Arc<CacheTier>,
    dump: Dump,
    file: PathBuf,
}

impl QueryDatabase {
    pub fn new(caches: Arc<CacheTier>, dump: Dump, file: PathBuf) -> Self {
        QueryDatabase { caches, dump, file }
    }

    pub fn dump(&self) -> &Dump {
        &self.dump
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        let path = path.to_owned();
        self.caches
            .with_dump_connection(self.file.clone(), |pool| async move {
                store::document_exists(&pool, &path).await
            })
            .await
    }

    pub async fn definitions(&self, path: &str, position: Position) -> Result<Vec<Location>> {
        self.caches
            .with_dump_connection(self.file.clone(), |pool| async move {
                let Some((document, index)) = self.range_at(&pool, path, position).await? else {
                    return Ok(Vec::new());
                };
                match document.ranges[index].definition_result {
                    Some(result) => self.resolve_result(&pool, result).await,
                    None => Ok(Vec::new()),
                }
            })
            .await
    }

    /// The dump-local portion of a references request; cross-dump fan-out
    /// happens in the backend.
    pub async fn references_local(&self, path: &str, position: Position) -> Result<Vec<Location>> {
        self.caches
            .with_dump_connection(self.file.clone(), |pool| async move {
                let Some((document, index)) = self.range_at(&pool, path, position).await? else {
                    return Ok(Vec::new());
                };
                match document.ranges[index].reference_result {
                    Some(result) => self.resolve_result(&pool, result).await,
                    None => Ok(Vec::new()),
                }
            })
            .await
    }

    pub async fn hover(&self, path: &str, position: Position) -> Result<Option<Hover>> {
        self.caches
            .with_dump_connection(self.file.clone(), |pool| async move {
                let Some((document, index)) = self.range_at(&pool, path, position).await? else {
                    return Ok(None);
                };
                let range = &document.ranges[index];
                let Some(hover_id) = range.hover_result else {
                    return Ok(None);
                };
                let contents = document
                    .hovers
                    .get(&hover_id)
                    .with_context(|| format!("hover {} missing from document blob", hover_id))?;
                Ok(Some(Hover {
                    contents: contents.clone(),
                    range: Span::from(range),
                }))
            })
            .await
    }

    /// Monikers on the innermost range at the position, used by the
    /// backend for cross-dump resolution.
    pub async fn monikers_at(&self, path: &str, position: Position) -> Result<Vec<ResolvedMoniker>> {
        self.caches
            .with_dump_connection(self.file.clone(), |pool| async move {
                let Some((document, index)) = self.range_at(&pool, path, position).await? else {
                    return Ok(Vec::new());
                };

                let mut monikers = Vec::new();
                for moniker_id in &document.ranges[index].monikers {
                    let data = document
                        .monikers
                        .get(moniker_id)
                        .with_context(|| format!("moniker {} missing from document blob", moniker_id))?;
                    let package = data
                        .package
                        .and_then(|package_id| document.packages.get(&package_id))
                        .map(|package| Package {
                            scheme: data.scheme.clone(),
                            name: package.name.clone(),
                            version: package.version.clone(),
                        });
                    monikers.push(ResolvedMoniker {
                        kind: data.kind,
                        scheme: data.scheme.clone(),
                        identifier: data.identifier.clone(),
                        package,
                    });
                }
                Ok(monikers)
            })
            .await
    }

    /// Moniker-indexed rows from the dump's defs/refs tables, for
    /// cross-dump lookups arriving from other dumps.
    pub async fn symbol_locations(
        &self,
        table: SymbolTable,
        scheme: &str,
        identifier: &str,
    ) -> Result<Vec<Location>> {
        let scheme = scheme.to_owned();
        let identifier = identifier.to_owned();
        let dump_id = self.dump.id;
        self.caches
            .with_dump_connection(self.file.clone(), |pool| async move {
                let rows = store::symbol_rows(&pool, table, &scheme, &identifier).await?;
                Ok(rows
                    .into_iter()
                    .map(|row| Location {
                        dump_id,
                        path: row.document_path,
                        range: Span {
                            start: Position {
                                line: row.start_line,
                                character: row.start_character,
                            },
                            end: Position {
                                line: row.end_line,
                                character: row.end_character,
                            },
                        },
                    })
                    .collect())
            })
            .await
    }

    /// Innermost range containing the position, along with its document.
    async fn range_at(
        &self,
        pool: &SqlitePool,
        path: &str,
        position: Position,
    ) -> Result<Option<(Arc<DocumentBlob>, usize)>> {
        let Some(document) = self.document(pool, path).await? else {
            return Ok(None);
        };
        Ok(document
            .find_range(position.line, position.character)
            .map(|index| (document, index)))
    }

    async fn document(&self, pool: &SqlitePool, path: &str) -> Result<Option<Arc<DocumentBlob>>> {
        let fetch_pool = pool.clone();
        let fetch_path = path.to_owned();
        let result = self
            .caches
            .documents
            .with_entry(
                (self.dump.id, path.to_owned()),
                move || async move {
                    let Some(bytes) = store::document_data(&fetch_pool, &fetch_path).await? else {
                        bail!(DocumentMissing);
                    };
                    let blob = tokio::task::spawn_blocking(move || {
                        encoding::decode::<DocumentBlob>(&bytes)
                    })
                    .await
                    .context("document decode task panicked")??;
                    Ok(Arc::new(blob))
                },
                |blob| async move { Ok(blob) },
            )
            .await;

        match result {
            Ok(blob) => Ok(Some(blob)),
            Err(err) if err.is::<DocumentMissing>() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn result_chunk(&self, pool: &SqlitePool, chunk_id: i64) -> Result<Arc<ResultChunkBlob>> {
        let fetch_pool = pool.clone();
        self.caches
            .result_chunks
            .with_entry(
                (self.dump.id, chunk_id),
                move || async move {
                    let Some(bytes) = store::result_chunk_data(&fetch_pool, chunk_id).await? else {
                        bail!("result chunk {} missing from dump", chunk_id);
                    };
                    let blob = tokio::task::spawn_blocking(move || {
                        encoding::decode::<ResultChunkBlob>(&bytes)
                    })
                    .await
                    .context("chunk decode task panicked")??;
                    Ok(Arc::new(blob))
                },
                |blob| async move { Ok(blob) },
            )
            .await
    }

    /// Materialize a result id into locations: shard -> chunk -> member
    /// documents -> ranges.
    async fn resolve_result(&self, pool: &SqlitePool, result_id: u64) -> Result<Vec<Location>> {
        let meta = store::read_meta(pool).await?;
        let chunk_id = encoding::shard_index(result_id, meta.num_result_chunks);
        let chunk = self.result_chunk(pool, chunk_id).await?;

        let Some(members) = chunk.results.get(&result_id) else {
            return Ok(Vec::new());
        };

        // Group members per document so each blob is fetched once.
        let mut by_document: BTreeMap<u64, Vec<u64>> = BTreeMap::new();
        for member in members {
            by_document.entry(member.document).or_default().push(member.range);
        }

        let mut locations = Vec::with_capacity(members.len());
        for (document_id, range_ids) in by_document {
            let path = chunk
                .paths
                .get(&document_id)
                .with_context(|| format!("document {} missing from chunk paths", document_id))?;
            let Some(document) = self.document(pool, path).await? else {
                bail!("document {} referenced by result chunk is absent", path);
            };
            for range_id in range_ids {
                let range = document
                    .ranges
                    .get(range_id as usize)
                    .with_context(|| format!("range {} missing from document {}", range_id, path))?;
                locations.push(Location {
                    dump_id: self.dump.id,
                    path: path.clone(),
                    range: Span::from(range),
                });
            }
        }

        Ok(locations)
    }
}
