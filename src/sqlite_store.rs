//! SQLite-backed [`CollectionBackend`]: one database file per collection.
//!
//! Documents and their sections live in two tables (see [`crate::migrate`]).
//! The store-native id is the document rowid. Writes go through a
//! per-collection mutex and a single transaction, so a document is either
//! stored with all of its sections or not at all.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use kowalski_core::embedding::{blob_to_vec, vec_to_blob};
use kowalski_core::error::BoxError;
use kowalski_core::models::Line;
use kowalski_core::store::CollectionBackend;
use kowalski_core::{CollectionName, Document, DocumentSummary, Error, Result, Section};

use crate::{db, migrate};

/// File suffix of collection databases inside the store root.
pub const COLLECTION_SUFFIX: &str = "sqlite";

pub struct SqliteCollection {
    name: CollectionName,
    path: PathBuf,
    pool: SqlitePool,
    read_only: bool,
    write_lock: Mutex<()>,
}

impl SqliteCollection {
    /// Path of the database file for `name` under `root`.
    pub fn file_path(root: &Path, name: &CollectionName) -> PathBuf {
        root.join(format!("{}.{}", name, COLLECTION_SUFFIX))
    }

    /// Open an existing collection file. Degrades to read-only when the
    /// file is not writable by the current user.
    pub async fn open(path: &Path, name: CollectionName) -> Result<Self> {
        let read_only = !db::is_writable(path);
        Self::connect(path, name, read_only, false).await
    }

    /// Create the collection file if needed and open it writable.
    pub async fn create(path: &Path, name: CollectionName) -> Result<Self> {
        Self::connect(path, name, false, true).await
    }

    async fn connect(path: &Path, name: CollectionName, read_only: bool, create: bool) -> Result<Self> {
        let label = name.to_string();
        let pool = db::connect(path, read_only, create)
            .await
            .map_err(|e| Error::backend(&label, e))?;
        if !read_only {
            migrate::run_migrations(&pool)
                .await
                .map_err(|e| Error::backend(&label, e))?;
        }
        migrate::verify_schema(&pool)
            .await
            .map_err(|e| Error::backend(&label, e))?;

        if read_only {
            tracing::info!(collection = %label, path = %path.display(), "opened read-only");
        }

        Ok(Self {
            name,
            path: path.to_path_buf(),
            pool,
            read_only,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn err(&self, source: impl Into<BoxError>) -> Error {
        Error::backend(self.name.to_string(), source)
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly(self.name.to_string()));
        }
        Ok(())
    }

    async fn load_sections(&self, document_id: i64) -> Result<Vec<Section>> {
        let rows = sqlx::query(
            "SELECT title, is_alias, lines_json, files_json, commands_json, embedding
             FROM sections WHERE document_id = ? ORDER BY ordinal",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.err(e))?;

        rows.iter().map(|row| self.section_from_row(row)).collect()
    }

    fn section_from_row(&self, row: &SqliteRow) -> Result<Section> {
        let lines: Vec<Line> = self.json_column(row, "lines_json")?;
        let files: Vec<String> = self.json_column(row, "files_json")?;
        let commands: Vec<String> = self.json_column(row, "commands_json")?;
        let embedding: Option<Vec<u8>> = row.try_get("embedding").map_err(|e| self.err(e))?;
        Ok(Section {
            title: row.try_get("title").map_err(|e| self.err(e))?,
            lines,
            files,
            commands,
            embedding: embedding.map(|blob| blob_to_vec(&blob)),
            is_alias: row.try_get::<i64, _>("is_alias").map_err(|e| self.err(e))? != 0,
        })
    }

    fn json_column<T: serde::de::DeserializeOwned>(&self, row: &SqliteRow, column: &str) -> Result<T> {
        let raw: String = row.try_get(column).map_err(|e| self.err(e))?;
        serde_json::from_str(&raw).map_err(|e| self.err(e))
    }

    async fn document_from_row(&self, row: &SqliteRow) -> Result<Document> {
        let id: i64 = row.try_get("id").map_err(|e| self.err(e))?;
        Ok(Document {
            hash: row.try_get("hash").map_err(|e| self.err(e))?,
            source: row.try_get("source").map_err(|e| self.err(e))?,
            sections: self.load_sections(id).await?,
            files: self.json_column(row, "files_json")?,
            commands: self.json_column(row, "commands_json")?,
        })
    }

    async fn fetch_one_where(&self, column: &str, value: impl ToString) -> Result<Option<Document>> {
        let sql = format!(
            "SELECT id, hash, source, files_json, commands_json FROM documents WHERE {} = ?",
            column
        );
        let row = sqlx::query(&sql)
            .bind(value.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.err(e))?;
        match row {
            Some(row) => Ok(Some(self.document_from_row(&row).await?)),
            None => Ok(None),
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> std::result::Result<String, serde_json::Error> {
    serde_json::to_string(value)
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

#[async_trait]
impl CollectionBackend for SqliteCollection {
    fn name(&self) -> &CollectionName {
        &self.name
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    async fn contains(&self, hash: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM documents WHERE hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.err(e))?;
        Ok(row.is_some())
    }

    async fn find_by_hash(&self, hash: &str) -> Result<Option<Document>> {
        self.fetch_one_where("hash", hash).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Document>> {
        let Ok(id) = id.parse::<i64>() else {
            return Ok(None);
        };
        let row = sqlx::query(
            "SELECT id, hash, source, files_json, commands_json FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| self.err(e))?;
        match row {
            Some(row) => Ok(Some(self.document_from_row(&row).await?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, doc: &Document) -> Result<bool> {
        self.ensure_writable()?;
        let _guard = self.write_lock.lock().await;

        let mut tx = self.pool.begin().await.map_err(|e| self.err(e))?;

        let result = sqlx::query(
            r#"
            INSERT INTO documents
                (hash, source, files_json, commands_json,
                 section_count, file_count, command_count, added_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(hash) DO NOTHING
            "#,
        )
        .bind(&doc.hash)
        .bind(&doc.source)
        .bind(to_json(&doc.files).map_err(|e| self.err(e))?)
        .bind(to_json(&doc.commands).map_err(|e| self.err(e))?)
        .bind(doc.sections.len() as i64)
        .bind(doc.files.len() as i64)
        .bind(doc.commands.len() as i64)
        .bind(Utc::now().timestamp())
        .execute(&mut *tx)
        .await
        .map_err(|e| self.err(e))?;

        if result.rows_affected() == 0 {
            tx.rollback().await.map_err(|e| self.err(e))?;
            return Ok(false);
        }
        let document_id = result.last_insert_rowid();

        for (ordinal, section) in doc.sections.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO sections
                    (document_id, ordinal, title, is_alias,
                     lines_json, files_json, commands_json, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(document_id)
            .bind(ordinal as i64)
            .bind(&section.title)
            .bind(section.is_alias as i64)
            .bind(to_json(&section.lines).map_err(|e| self.err(e))?)
            .bind(to_json(&section.files).map_err(|e| self.err(e))?)
            .bind(to_json(&section.commands).map_err(|e| self.err(e))?)
            .bind(section.embedding.as_deref().map(vec_to_blob))
            .execute(&mut *tx)
            .await
            .map_err(|e| self.err(e))?;
        }

        tx.commit().await.map_err(|e| self.err(e))?;
        Ok(true)
    }

    async fn delete(&self, hash: &str) -> Result<bool> {
        self.ensure_writable()?;
        let _guard = self.write_lock.lock().await;

        let mut tx = self.pool.begin().await.map_err(|e| self.err(e))?;
        let row = sqlx::query("SELECT id FROM documents WHERE hash = ?")
            .bind(hash)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| self.err(e))?;
        let Some(row) = row else {
            return Ok(false);
        };
        let id: i64 = row.try_get("id").map_err(|e| self.err(e))?;

        sqlx::query("DELETE FROM sections WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| self.err(e))?;
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| self.err(e))?;

        tx.commit().await.map_err(|e| self.err(e))?;
        Ok(true)
    }

    async fn list(&self) -> Result<Vec<DocumentSummary>> {
        let rows = sqlx::query(
            "SELECT id, hash, source, section_count, file_count, command_count, added_at
             FROM documents ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.err(e))?;

        rows.iter()
            .map(|row| {
                let get_count = |column: &str| -> Result<usize> {
                    Ok(row.try_get::<i64, _>(column).map_err(|e| self.err(e))? as usize)
                };
                Ok(DocumentSummary {
                    id: row.try_get::<i64, _>("id").map_err(|e| self.err(e))?.to_string(),
                    hash: row.try_get("hash").map_err(|e| self.err(e))?,
                    source: row.try_get("source").map_err(|e| self.err(e))?,
                    sections: get_count("section_count")?,
                    files: get_count("file_count")?,
                    commands: get_count("command_count")?,
                    added_at: timestamp(row.try_get("added_at").map_err(|e| self.err(e))?),
                })
            })
            .collect()
    }

    async fn documents(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT id, hash, source, files_json, commands_json FROM documents ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.err(e))?;

        let mut docs = Vec::with_capacity(rows.len());
        for row in &rows {
            docs.push(self.document_from_row(row).await?);
        }
        Ok(docs)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
