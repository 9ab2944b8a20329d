//! Facade over the cross-repo index, the cache tier and per-dump query
//! databases. Picks the dump for a `(repository, commit, path)`, answers
//! locally, and joins reference results across dumps through package
//! monikers.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::debug;

use crate::cache::CacheTier;
use crate::dump::encoding::MonikerKind;
use crate::dump::store::SymbolTable;
use crate::query::database::QueryDatabase;
use crate::query::{Hover, Location, Position, ResolvedMoniker, Span};
use crate::storage::StorageLayout;
use crate::xrepo::store::CrossRepoIndex;
use crate::xrepo::types::Dump;

/// A location qualified with the dump's repository and commit; paths are
/// repository-relative (the dump root is folded back in).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct QualifiedLocation {
    pub repository: String,
    pub commit: String,
    pub path: String,
    pub range: Span,
}

fn qualify(dump: &Dump, location: Location) -> QualifiedLocation {
    QualifiedLocation {
        repository: dump.repository.clone(),
        commit: dump.commit.clone(),
        path: format!("{}{}", dump.root, location.path),
        range: location.range,
    }
}

#[derive(Clone)]
pub struct Backend {
    caches: Arc<CacheTier>,
    xrepo: CrossRepoIndex,
    storage: StorageLayout,
}

impl Backend {
    pub fn new(caches: Arc<CacheTier>, xrepo: CrossRepoIndex, storage: StorageLayout) -> Self {
        Backend {
            caches,
            xrepo,
            storage,
        }
    }

    fn database(&self, dump: Dump) -> QueryDatabase {
        let file = self.storage.dump_path(dump.id);
        QueryDatabase::new(self.caches.clone(), dump, file)
    }

    async fn closest_database(
        &self,
        repository: &str,
        commit: &str,
        path: &str,
    ) -> Result<Option<QueryDatabase>> {
        let Some(dump) = self.xrepo.find_closest_dump(repository, commit, path).await? else {
            debug!(repository, commit, path, "no dump covers the request");
            return Ok(None);
        };
        Ok(Some(self.database(dump)))
    }

    pub async fn exists(&self, repository: &str, commit: &str, path: &str) -> Result<bool> {
        let Some(db) = self.closest_database(repository, commit, path).await? else {
            return Ok(false);
        };
        let inner = db.dump().path_in_dump(path).to_owned();
        db.exists(&inner).await
    }

    /// Definitions for the innermost range; falls back to the defining
    /// dump's moniker-indexed rows when the range has no local result.
    /// `None` means the commit is not indexed at all.
    pub async fn definitions(
        &self,
        repository: &str,
        commit: &str,
        path: &str,
        position: Position,
    ) -> Result<Option<Vec<QualifiedLocation>>> {
        let Some(db) = self.closest_database(repository, commit, path).await? else {
            return Ok(None);
        };
        let dump = db.dump().clone();
        let inner = dump.path_in_dump(path).to_owned();

        let local = db.definitions(&inner, position).await?;
        if !local.is_empty() {
            return Ok(Some(
                local.into_iter().map(|l| qualify(&dump, l)).collect(),
            ));
        }

        for moniker in self.portable_monikers(&db, &inner, position).await? {
            let Some(package) = &moniker.package else {
                continue;
            };
            let Some(defining) = self.xrepo.find_defining_dump(package).await? else {
                continue;
            };
            if defining.id == dump.id {
                continue;
            }

            let remote = self.database(defining.clone());
            let rows = remote
                .symbol_locations(SymbolTable::Definitions, &moniker.scheme, &moniker.identifier)
                .await?;
            if !rows.is_empty() {
                return Ok(Some(
                    rows.into_iter().map(|l| qualify(&defining, l)).collect(),
                ));
            }
        }

        Ok(Some(Vec::new()))
    }

    /// Union of the local reference result and every dump related through
    /// the range's package monikers: the defining dump plus all dumps whose
    /// reference filter admits the identifier.
    pub async fn references(
        &self,
        repository: &str,
        commit: &str,
        path: &str,
        position: Position,
    ) -> Result<Option<Vec<QualifiedLocation>>> {
        let Some(db) = self.closest_database(repository, commit, path).await? else {
            return Ok(None);
        };
        let dump = db.dump().clone();
        let inner = dump.path_in_dump(path).to_owned();

        let mut out: Vec<QualifiedLocation> = db
            .references_local(&inner, position)
            .await?
            .into_iter()
            .map(|l| qualify(&dump, l))
            .collect();

        for moniker in self.portable_monikers(&db, &inner, position).await? {
            // same-dump rows for the moniker, beyond the local result
            let rows = db
                .symbol_locations(SymbolTable::References, &moniker.scheme, &moniker.identifier)
                .await?;
            out.extend(rows.into_iter().map(|l| qualify(&dump, l)));

            let Some(package) = &moniker.package else {
                continue;
            };

            let mut visited: HashSet<i64> = HashSet::from([dump.id]);

            if let Some(defining) = self.xrepo.find_defining_dump(package).await? {
                if visited.insert(defining.id) {
                    let remote = self.database(defining.clone());
                    let rows = remote
                        .symbol_locations(
                            SymbolTable::References,
                            &moniker.scheme,
                            &moniker.identifier,
                        )
                        .await?;
                    out.extend(rows.into_iter().map(|l| qualify(&defining, l)));
                }
            }

            for referencing in self
                .xrepo
                .find_referencing_dumps(package, &moniker.identifier)
                .await?
            {
                if !visited.insert(referencing.id) {
                    continue;
                }
                let remote = self.database(referencing.clone());
                let rows = remote
                    .symbol_locations(
                        SymbolTable::References,
                        &moniker.scheme,
                        &moniker.identifier,
                    )
                    .await?;
                out.extend(rows.into_iter().map(|l| qualify(&referencing, l)));
            }
        }

        // preserve order, drop duplicates from overlapping sources
        let mut seen = HashSet::new();
        out.retain(|location| seen.insert(location.clone()));
        Ok(Some(out))
    }

    pub async fn hover(
        &self,
        repository: &str,
        commit: &str,
        path: &str,
        position: Position,
    ) -> Result<Option<Option<Hover>>> {
        let Some(db) = self.closest_database(repository, commit, path).await? else {
            return Ok(None);
        };
        let inner = db.dump().path_in_dump(path).to_owned();
        Ok(Some(db.hover(&inner, position).await?))
    }

    async fn portable_monikers(
        &self,
        db: &QueryDatabase,
        path: &str,
        position: Position,
    ) -> Result<Vec<ResolvedMoniker>> {
        Ok(db
            .monikers_at(path, position)
            .await?
            .into_iter()
            .filter(|m| m.kind != Some(MonikerKind::Local))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheCapacities;
    use crate::lsif::testing::{exporting_dump, importing_dump, interface_scenario};
    use crate::metrics::Metrics;
    use crate::queue::worker::run_convert;
    use crate::xrepo::db::testing;

    const LIB_COMMIT: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const APP_B_COMMIT: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
    const APP_C_COMMIT: &str = "cccccccccccccccccccccccccccccccccccccccc";

    struct Harness {
        _dir: tempfile::TempDir,
        backend: Backend,
        storage: StorageLayout,
        xrepo: CrossRepoIndex,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let pool = testing::pool(&dir).await;
        let xrepo = CrossRepoIndex::new(pool);
        let storage = StorageLayout::new(dir.path().join("storage"));
        storage.ensure_layout().await.unwrap();

        let metrics = Metrics::new();
        let caches = Arc::new(CacheTier::new(
            CacheCapacities {
                connections: 16,
                documents: 1 << 20,
                result_chunks: 1 << 20,
            },
            &metrics,
        ));

        Harness {
            backend: Backend::new(caches, xrepo.clone(), storage.clone()),
            storage,
            xrepo,
            _dir: dir,
        }
    }

    async fn convert(harness: &Harness, repository: &str, commit: &str, bytes: Vec<u8>) -> i64 {
        let upload = harness.storage.new_upload_path();
        tokio::fs::write(&upload, bytes).await.unwrap();
        run_convert(
            &harness.storage,
            &harness.xrepo,
            repository,
            commit,
            "",
            &upload,
            "test",
        )
        .await
        .unwrap()
    }

    fn position(line: u32, character: u32) -> Position {
        Position { line, character }
    }

    #[tokio::test]
    async fn unindexed_repositories_report_not_indexed() {
        let harness = harness().await;
        assert!(!harness
            .backend
            .exists("nope", LIB_COMMIT, "src/a.ts")
            .await
            .unwrap());
        assert!(harness
            .backend
            .definitions("nope", LIB_COMMIT, "src/a.ts", position(0, 0))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn exists_respects_document_paths() {
        let harness = harness().await;
        convert(&harness, "test", LIB_COMMIT, interface_scenario()).await;

        assert!(harness
            .backend
            .exists("test", LIB_COMMIT, "src/index.ts")
            .await
            .unwrap());
        assert!(!harness
            .backend
            .exists("test", LIB_COMMIT, "src/missing.ts")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn references_union_across_importing_dumps() {
        let harness = harness().await;
        convert(&harness, "lib", LIB_COMMIT, exporting_dump("lib:X", "lib", "1")).await;
        convert(&harness, "app-b", APP_B_COMMIT, importing_dump("lib:X", "lib", "1")).await;
        convert(&harness, "app-c", APP_C_COMMIT, importing_dump("lib:X", "lib", "1")).await;

        // from the defining dump: local def + local use + uses in B and C
        let locations = harness
            .backend
            .references("lib", LIB_COMMIT, "src/lib.ts", position(0, 9))
            .await
            .unwrap()
            .unwrap();

        let mut repos: Vec<&str> = locations.iter().map(|l| l.repository.as_str()).collect();
        repos.sort();
        assert_eq!(repos, vec!["app-b", "app-c", "lib", "lib"]);

        // from an importing dump: same closure
        let locations = harness
            .backend
            .references("app-b", APP_B_COMMIT, "src/main.ts", position(2, 4))
            .await
            .unwrap()
            .unwrap();
        let mut repos: Vec<&str> = locations.iter().map(|l| l.repository.as_str()).collect();
        repos.sort();
        assert_eq!(repos, vec!["app-b", "app-c", "lib", "lib"]);
    }

    #[tokio::test]
    async fn definitions_fall_back_to_the_defining_dump() {
        let harness = harness().await;
        convert(&harness, "lib", LIB_COMMIT, exporting_dump("lib:X", "lib", "1")).await;
        convert(&harness, "app-b", APP_B_COMMIT, importing_dump("lib:X", "lib", "1")).await;

        let locations = harness
            .backend
            .definitions("app-b", APP_B_COMMIT, "src/main.ts", position(2, 4))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].repository, "lib");
        assert_eq!(locations[0].path, "src/lib.ts");
        assert_eq!(locations[0].range.start.line, 0);
    }

    #[tokio::test]
    async fn reimporting_replaces_the_dump_and_its_file() {
        let harness = harness().await;
        let first = convert(&harness, "lib", LIB_COMMIT, exporting_dump("lib:X", "lib", "1")).await;
        let second = convert(&harness, "lib", LIB_COMMIT, exporting_dump("lib:X", "lib", "1")).await;
        assert_ne!(first, second);

        assert!(!harness.storage.dump_path(first).exists());
        assert!(harness.storage.dump_path(second).exists());

        let defining = harness
            .xrepo
            .find_defining_dump(&crate::xrepo::types::Package {
                scheme: "npm".into(),
                name: "lib".into(),
                version: Some("1".into()),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(defining.id, second);
    }
}
