use sqlx::SqlitePool;

/// Create the collection schema. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            hash TEXT NOT NULL UNIQUE,
            source TEXT NOT NULL,
            files_json TEXT NOT NULL DEFAULT '[]',
            commands_json TEXT NOT NULL DEFAULT '[]',
            section_count INTEGER NOT NULL,
            file_count INTEGER NOT NULL,
            command_count INTEGER NOT NULL,
            added_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sections (
            document_id INTEGER NOT NULL,
            ordinal INTEGER NOT NULL,
            title TEXT NOT NULL,
            is_alias INTEGER NOT NULL DEFAULT 0,
            lines_json TEXT NOT NULL DEFAULT '[]',
            files_json TEXT NOT NULL DEFAULT '[]',
            commands_json TEXT NOT NULL DEFAULT '[]',
            embedding BLOB,
            PRIMARY KEY (document_id, ordinal),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Fail unless the file holds a collection schema.
///
/// Run on every open, including read-only ones, so a malformed file is
/// reported when the store is opened rather than at first query.
pub async fn verify_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT COUNT(*) FROM documents")
        .execute(pool)
        .await?;
    sqlx::query("SELECT COUNT(*) FROM sections")
        .execute(pool)
        .await?;
    Ok(())
}
