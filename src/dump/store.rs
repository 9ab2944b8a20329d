//! The per-dump embedded database. One SQLite file per dump: written once
//! by the importer inside a single transaction, read-only afterwards.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Connection, Row, SqliteConnection, SqlitePool};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaRow {
    pub lsif_version: String,
    pub server_version: String,
    pub encoding_version: i64,
    pub num_result_chunks: i64,
}

/// A moniker-indexed definition or reference location, used for cross-dump
/// resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRow {
    pub scheme: String,
    pub identifier: String,
    pub document_path: String,
    pub start_line: u32,
    pub start_character: u32,
    pub end_line: u32,
    pub end_character: u32,
}

#[derive(Debug, Clone, Copy)]
pub enum SymbolTable {
    Definitions,
    References,
}

impl SymbolTable {
    fn table(self) -> &'static str {
        match self {
            SymbolTable::Definitions => "defs",
            SymbolTable::References => "refs",
        }
    }
}

/// The fully assembled contents of a dump, written in one shot.
#[derive(Debug, Default)]
pub struct DumpData {
    pub meta: Option<MetaRow>,
    pub documents: Vec<(String, Vec<u8>)>,
    pub result_chunks: Vec<(i64, Vec<u8>)>,
    pub definitions: Vec<SymbolRow>,
    pub references: Vec<SymbolRow>,
}

const SCHEMA: &str = "
CREATE TABLE meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    lsif_version TEXT NOT NULL,
    server_version TEXT NOT NULL,
    encoding_version INTEGER NOT NULL,
    num_result_chunks INTEGER NOT NULL
);
CREATE TABLE documents (path TEXT PRIMARY KEY, data BLOB NOT NULL);
CREATE TABLE result_chunks (id INTEGER PRIMARY KEY, data BLOB NOT NULL);
CREATE TABLE defs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scheme TEXT NOT NULL,
    identifier TEXT NOT NULL,
    document_path TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    start_character INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    end_character INTEGER NOT NULL
);
CREATE TABLE refs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scheme TEXT NOT NULL,
    identifier TEXT NOT NULL,
    document_path TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    start_character INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    end_character INTEGER NOT NULL
);
CREATE INDEX defs_scheme_identifier ON defs (scheme, identifier);
CREATE INDEX refs_scheme_identifier ON refs (scheme, identifier);
";

/// Create the dump file at `path` and write `data` inside one transaction.
/// The file must not exist yet; conversions write into a temp path and
/// rename into place afterwards.
pub async fn write(path: &Path, data: &DumpData) -> Result<()> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete);

    let mut conn = SqliteConnection::connect_with(&options)
        .await
        .with_context(|| format!("creating dump database at {}", path.display()))?;

    for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
        sqlx::query(statement).execute(&mut conn).await?;
    }

    let meta = data
        .meta
        .as_ref()
        .context("dump data is missing its meta row")?;

    let mut tx = conn.begin().await?;

    sqlx::query(
        "INSERT INTO meta (id, lsif_version, server_version, encoding_version, num_result_chunks) \
         VALUES (1, ?, ?, ?, ?)",
    )
    .bind(&meta.lsif_version)
    .bind(&meta.server_version)
    .bind(meta.encoding_version)
    .bind(meta.num_result_chunks)
    .execute(&mut *tx)
    .await?;

    for (doc_path, blob) in &data.documents {
        sqlx::query("INSERT INTO documents (path, data) VALUES (?, ?)")
            .bind(doc_path)
            .bind(blob)
            .execute(&mut *tx)
            .await?;
    }

    for (id, blob) in &data.result_chunks {
        sqlx::query("INSERT INTO result_chunks (id, data) VALUES (?, ?)")
            .bind(id)
            .bind(blob)
            .execute(&mut *tx)
            .await?;
    }

    for (table, rows) in [
        (SymbolTable::Definitions, &data.definitions),
        (SymbolTable::References, &data.references),
    ] {
        for row in rows.iter() {
            sqlx::query(&format!(
                "INSERT INTO {} (scheme, identifier, document_path, start_line, start_character, end_line, end_character) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                table.table()
            ))
            .bind(&row.scheme)
            .bind(&row.identifier)
            .bind(&row.document_path)
            .bind(row.start_line as i64)
            .bind(row.start_character as i64)
            .bind(row.end_line as i64)
            .bind(row.end_character as i64)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;
    conn.close().await?;
    Ok(())
}

/// Open a read-only pool over a dump file. All query-side access goes
/// through the connection cache, which owns pools produced here.
pub async fn open_read_pool(path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .read_only(true)
        .busy_timeout(Duration::from_secs(5));

    SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .with_context(|| format!("opening dump database at {}", path.display()))
}

pub async fn read_meta(pool: &SqlitePool) -> Result<MetaRow> {
    let row = sqlx::query(
        "SELECT lsif_version, server_version, encoding_version, num_result_chunks FROM meta WHERE id = 1",
    )
    .fetch_one(pool)
    .await?;

    Ok(MetaRow {
        lsif_version: row.try_get("lsif_version")?,
        server_version: row.try_get("server_version")?,
        encoding_version: row.try_get("encoding_version")?,
        num_result_chunks: row.try_get("num_result_chunks")?,
    })
}

pub async fn document_exists(pool: &SqlitePool, path: &str) -> Result<bool> {
    let row = sqlx::query("SELECT 1 FROM documents WHERE path = ?")
        .bind(path)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

pub async fn document_data(pool: &SqlitePool, path: &str) -> Result<Option<Vec<u8>>> {
    let row = sqlx::query("SELECT data FROM documents WHERE path = ?")
        .bind(path)
        .fetch_optional(pool)
        .await?;
    row.map(|r| r.try_get("data").map_err(Into::into)).transpose()
}

pub async fn result_chunk_data(pool: &SqlitePool, id: i64) -> Result<Option<Vec<u8>>> {
    let row = sqlx::query("SELECT data FROM result_chunks WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.map(|r| r.try_get("data").map_err(Into::into)).transpose()
}

pub async fn symbol_rows(
    pool: &SqlitePool,
    table: SymbolTable,
    scheme: &str,
    identifier: &str,
) -> Result<Vec<SymbolRow>> {
    let rows = sqlx::query(&format!(
        "SELECT scheme, identifier, document_path, start_line, start_character, end_line, end_character \
         FROM {} WHERE scheme = ? AND identifier = ?",
        table.table()
    ))
    .bind(scheme)
    .bind(identifier)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            Ok(SymbolRow {
                scheme: row.try_get("scheme")?,
                identifier: row.try_get("identifier")?,
                document_path: row.try_get("document_path")?,
                start_line: row.try_get::<i64, _>("start_line")? as u32,
                start_character: row.try_get::<i64, _>("start_character")? as u32,
                end_line: row.try_get::<i64, _>("end_line")? as u32,
                end_character: row.try_get::<i64, _>("end_character")? as u32,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DumpData {
        DumpData {
            meta: Some(MetaRow {
                lsif_version: "0.4.3".into(),
                server_version: env!("CARGO_PKG_VERSION").into(),
                encoding_version: 1,
                num_result_chunks: 2,
            }),
            documents: vec![("src/index.ts".into(), vec![1, 2, 3])],
            result_chunks: vec![(0, vec![4, 5]), (1, vec![6])],
            definitions: vec![SymbolRow {
                scheme: "npm".into(),
                identifier: "lib:foo".into(),
                document_path: "src/index.ts".into(),
                start_line: 1,
                start_character: 4,
                end_line: 1,
                end_character: 7,
            }],
            references: Vec::new(),
        }
    }

    #[tokio::test]
    async fn writes_and_reads_back_a_dump() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.lsif.db");

        write(&path, &sample()).await.unwrap();

        let pool = open_read_pool(&path).await.unwrap();
        let meta = read_meta(&pool).await.unwrap();
        assert_eq!(meta.num_result_chunks, 2);

        assert!(document_exists(&pool, "src/index.ts").await.unwrap());
        assert!(!document_exists(&pool, "src/missing.ts").await.unwrap());
        assert_eq!(
            document_data(&pool, "src/index.ts").await.unwrap(),
            Some(vec![1, 2, 3])
        );
        assert_eq!(result_chunk_data(&pool, 1).await.unwrap(), Some(vec![6]));
        assert_eq!(result_chunk_data(&pool, 9).await.unwrap(), None);

        let defs = symbol_rows(&pool, SymbolTable::Definitions, "npm", "lib:foo")
            .await
            .unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].document_path, "src/index.ts");
    }
}
