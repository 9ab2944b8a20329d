//! Relational operations over the cross-repo index: dump registration,
//! package lookup, reference-filter pruning, and tip visibility.

use std::collections::HashSet;

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use super::commits::{self, CommitGraph, MAX_COMMIT_DISTANCE};
use super::git::GitHost;
use super::packages;
use super::types::{Dump, Package, PackageReferences};

#[derive(Clone)]
pub struct CrossRepoIndex {
    pool: SqlitePool,
}

fn dump_from_row(row: &SqliteRow) -> Result<Dump> {
    Ok(Dump {
        id: row.try_get("id")?,
        repository: row.try_get("repository")?,
        commit: row.try_get("commit")?,
        root: row.try_get("root")?,
        visible_at_tip: row.try_get::<i64, _>("visible_at_tip")? != 0,
        uploaded_at: row.try_get("uploaded_at")?,
    })
}

fn version_column(package: &Package) -> &str {
    package.version.as_deref().unwrap_or("")
}

const DUMP_COLUMNS: &str = r#"id, repository, "commit", root, visible_at_tip, uploaded_at"#;
const JOINED_DUMP_COLUMNS: &str =
    r#"d.id, d.repository, d."commit", d.root, d.visible_at_tip, d.uploaded_at"#;

impl CrossRepoIndex {
    pub fn new(pool: SqlitePool) -> Self {
        CrossRepoIndex { pool }
    }

    /// Register a converted dump: upsert on `(repository, commit, root)`,
    /// replacing any previous dump's rows, then record what the dump
    /// defines and imports. Returns the new dump and the id of the dump it
    /// replaced, whose file the caller must remove.
    pub async fn add_packages_and_references(
        &self,
        repository: &str,
        commit: &str,
        root: &str,
        uploaded_at: &str,
        packages: &[Package],
        references: &[PackageReferences],
    ) -> Result<(Dump, Option<i64>)> {
        let mut tx = self.pool.begin().await?;

        let replaced: Option<i64> = sqlx::query(
            r#"SELECT id FROM lsif_dumps WHERE repository = ? AND "commit" = ? AND root = ?"#,
        )
        .bind(repository)
        .bind(commit)
        .bind(root)
        .fetch_optional(&mut *tx)
        .await?
        .map(|row| row.try_get("id"))
        .transpose()?;

        if let Some(old_id) = replaced {
            sqlx::query("DELETE FROM lsif_packages WHERE dump_id = ?")
                .bind(old_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM lsif_references WHERE dump_id = ?")
                .bind(old_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM lsif_dumps WHERE id = ?")
                .bind(old_id)
                .execute(&mut *tx)
                .await?;
        }

        let id: i64 = sqlx::query(
            r#"INSERT INTO lsif_dumps (repository, "commit", root, visible_at_tip, uploaded_at)
               VALUES (?, ?, ?, 0, ?) RETURNING id"#,
        )
        .bind(repository)
        .bind(commit)
        .bind(root)
        .bind(uploaded_at)
        .fetch_one(&mut *tx)
        .await?
        .try_get("id")?;

        for package in packages {
            sqlx::query(
                "INSERT INTO lsif_packages (scheme, name, version, dump_id) VALUES (?, ?, ?, ?) \
                 ON CONFLICT (scheme, name, version) DO UPDATE SET dump_id = excluded.dump_id",
            )
            .bind(&package.scheme)
            .bind(&package.name)
            .bind(version_column(package))
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        for reference in references {
            let filter = packages::encode_filter(&reference.identifiers)
                .context("encoding reference filter")?;
            sqlx::query(
                "INSERT INTO lsif_references (scheme, name, version, dump_id, filter) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&reference.package.scheme)
            .bind(&reference.package.name)
            .bind(version_column(&reference.package))
            .bind(id)
            .bind(&filter)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(
            repository,
            commit,
            root,
            dump_id = id,
            replaced = ?replaced,
            "registered dump"
        );

        Ok((
            Dump {
                id,
                repository: repository.to_owned(),
                commit: commit.to_owned(),
                root: root.to_owned(),
                visible_at_tip: false,
                uploaded_at: uploaded_at.to_owned(),
            },
            replaced,
        ))
    }

    pub async fn get_dump(&self, repository: &str, commit: &str, root: &str) -> Result<Option<Dump>> {
        let row = sqlx::query(&format!(
            r#"SELECT {DUMP_COLUMNS} FROM lsif_dumps WHERE repository = ? AND "commit" = ? AND root = ?"#
        ))
        .bind(repository)
        .bind(commit)
        .bind(root)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(dump_from_row).transpose()
    }

    pub async fn dump_by_id(&self, id: i64) -> Result<Option<Dump>> {
        let row = sqlx::query(&format!(
            "SELECT {DUMP_COLUMNS} FROM lsif_dumps WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(dump_from_row).transpose()
    }

    /// Nearest dump able to answer queries for `(commit, path)`, walking
    /// the repository's commit graph.
    pub async fn find_closest_dump(
        &self,
        repository: &str,
        commit: &str,
        path: &str,
    ) -> Result<Option<Dump>> {
        let graph = self.load_graph(repository).await?;
        let dumps = self.dumps_for_repository(repository).await?;
        Ok(commits::closest_dump(&graph, commit, path, &dumps).cloned())
    }

    pub async fn find_defining_dump(&self, package: &Package) -> Result<Option<Dump>> {
        let row = sqlx::query(&format!(
            "SELECT {JOINED_DUMP_COLUMNS} FROM lsif_packages p \
             JOIN lsif_dumps d ON d.id = p.dump_id \
             WHERE p.scheme = ? AND p.name = ? AND p.version = ?"
        ))
        .bind(&package.scheme)
        .bind(&package.name)
        .bind(version_column(package))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(dump_from_row).transpose()
    }

    /// Dumps importing `package` whose reference filter may contain
    /// `identifier`. The filter prunes candidates before any dump file is
    /// opened.
    pub async fn find_referencing_dumps(
        &self,
        package: &Package,
        identifier: &str,
    ) -> Result<Vec<Dump>> {
        let rows = sqlx::query(&format!(
            "SELECT r.filter AS filter, {JOINED_DUMP_COLUMNS} FROM lsif_references r \
             JOIN lsif_dumps d ON d.id = r.dump_id \
             WHERE r.scheme = ? AND r.name = ? AND r.version = ?"
        ))
        .bind(&package.scheme)
        .bind(&package.name)
        .bind(version_column(package))
        .fetch_all(&self.pool)
        .await?;

        let mut seen: HashSet<i64> = HashSet::new();
        let mut dumps = Vec::new();
        for row in &rows {
            let filter: Vec<u8> = row.try_get("filter")?;
            if !packages::filter_contains(&filter, identifier)? {
                continue;
            }
            let dump = dump_from_row(row)?;
            if seen.insert(dump.id) {
                dumps.push(dump);
            }
        }

        debug!(
            identifier,
            candidates = rows.len(),
            matched = dumps.len(),
            "reference filter scan"
        );
        Ok(dumps)
    }

    pub async fn update_commits(
        &self,
        repository: &str,
        edges: &[(String, String)],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (commit, parent) in edges {
            sqlx::query(
                r#"INSERT OR IGNORE INTO lsif_commits (repository, "commit", parent_commit)
                   VALUES (?, ?, ?)"#,
            )
            .bind(repository)
            .bind(commit)
            .bind(parent)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn known_commit(&self, repository: &str, commit: &str) -> Result<bool> {
        let row = sqlx::query(
            r#"SELECT 1 FROM lsif_commits WHERE repository = ? AND "commit" = ? LIMIT 1"#,
        )
        .bind(repository)
        .bind(commit)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Pull parentage for a commit we have not seen before, so queries
    /// against fresh commits can reach older dumps.
    pub async fn discover_and_update_commit(
        &self,
        repository: &str,
        commit: &str,
        git: &dyn GitHost,
    ) -> Result<()> {
        if self.known_commit(repository, commit).await? {
            return Ok(());
        }
        let edges = git
            .ancestry(repository, commit, MAX_COMMIT_DISTANCE)
            .await?;
        if !edges.is_empty() {
            self.update_commits(repository, &edges).await?;
        }
        Ok(())
    }

    pub async fn all_dumps(&self) -> Result<Vec<Dump>> {
        let rows = sqlx::query(&format!("SELECT {DUMP_COLUMNS} FROM lsif_dumps"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(dump_from_row).collect()
    }

    pub async fn repositories_with_dumps(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT repository FROM lsif_dumps")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| row.try_get("repository").map_err(Into::into))
            .collect()
    }

    /// Recompute `visible_at_tip` for one repository: per root, the dump
    /// closest to the tip commit stays visible.
    pub async fn update_tip_visibility(&self, repository: &str, tip: &str) -> Result<()> {
        let graph = self.load_graph(repository).await?;
        let dumps = self.dumps_for_repository(repository).await?;

        let distances = graph.distances(tip);
        let ancestor_distances = graph.ancestor_distances(tip);

        let roots: HashSet<&str> = dumps.iter().map(|d| d.root.as_str()).collect();
        let mut visible: HashSet<i64> = HashSet::new();

        for root in roots {
            let best = dumps
                .iter()
                .filter(|d| d.root == root)
                .filter_map(|d| {
                    let distance = *distances.get(&d.commit)?;
                    let is_ancestor = ancestor_distances
                        .get(&d.commit)
                        .map(|a| *a == distance)
                        .unwrap_or(false);
                    Some(((distance, !is_ancestor, d.id), d.id))
                })
                .min_by_key(|(score, _)| *score)
                .map(|(_, id)| id);
            visible.extend(best);
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE lsif_dumps SET visible_at_tip = 0 WHERE repository = ?")
            .bind(repository)
            .execute(&mut *tx)
            .await?;
        for id in &visible {
            sqlx::query("UPDATE lsif_dumps SET visible_at_tip = 1 WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        debug!(repository, tip, visible = visible.len(), "updated tip visibility");
        Ok(())
    }

    async fn dumps_for_repository(&self, repository: &str) -> Result<Vec<Dump>> {
        let rows = sqlx::query(&format!(
            "SELECT {DUMP_COLUMNS} FROM lsif_dumps WHERE repository = ?"
        ))
        .bind(repository)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(dump_from_row).collect()
    }

    async fn load_graph(&self, repository: &str) -> Result<CommitGraph> {
        let rows = sqlx::query(
            r#"SELECT "commit", parent_commit FROM lsif_commits WHERE repository = ?"#,
        )
        .bind(repository)
        .fetch_all(&self.pool)
        .await?;

        let edges = rows
            .into_iter()
            .map(|row| {
                Ok((
                    row.try_get::<String, _>("commit")?,
                    row.try_get::<String, _>("parent_commit")?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(CommitGraph::new(edges))
    }
}
