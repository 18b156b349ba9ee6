use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr, Statement};
use std::path::Path;

pub async fn init_database(db_path: &Path) -> Result<DatabaseConnection, DbErr> {
    let abs_path = std::fs::canonicalize(db_path).unwrap_or_else(|_| db_path.to_path_buf());
    tracing::info!("Database absolute path: {:?}", abs_path);

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let url = format!("sqlite:{}?mode=rwc", db_path.display());
    let db = Database::connect(&url).await?;

    create_tables(&db).await?;
    tracing::info!("Database schema ready");

    Ok(db)
}

async fn execute(db: &DatabaseConnection, sql: &str) -> Result<(), DbErr> {
    db.execute(Statement::from_string(db.get_database_backend(), sql.to_string()))
        .await?;
    Ok(())
}

async fn create_tables(db: &DatabaseConnection) -> Result<(), DbErr> {
    execute(
        db,
        r#"
        CREATE TABLE IF NOT EXISTS upload_sessions (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            target_kind TEXT NOT NULL,
            target_entity_id TEXT,
            upload_type TEXT NOT NULL,
            declared_size INTEGER NOT NULL CHECK (declared_size > 0),
            current_offset INTEGER NOT NULL DEFAULT 0
                CHECK (current_offset >= 0 AND current_offset <= declared_size),
            status TEXT NOT NULL DEFAULT 'pending',
            progress REAL NOT NULL DEFAULT 0,
            metadata TEXT NOT NULL DEFAULT '{}',
            file_path TEXT,
            expires_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .await?;

    execute(
        db,
        "CREATE INDEX IF NOT EXISTS idx_upload_sessions_owner ON upload_sessions(owner_id, target_kind, status)",
    )
    .await?;
    execute(
        db,
        "CREATE INDEX IF NOT EXISTS idx_upload_sessions_expiry ON upload_sessions(status, expires_at)",
    )
    .await?;

    execute(
        db,
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            name TEXT NOT NULL,
            category TEXT NOT NULL,
            semester INTEGER NOT NULL,
            file_path TEXT NOT NULL,
            file_size INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )
        "#,
    )
    .await?;

    execute(
        db,
        r#"
        CREATE TABLE IF NOT EXISTS modules (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            file_path TEXT NOT NULL,
            file_size INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )
        "#,
    )
    .await?;

    execute(db, "CREATE INDEX IF NOT EXISTS idx_projects_owner ON projects(owner_id)").await?;
    execute(db, "CREATE INDEX IF NOT EXISTS idx_modules_owner ON modules(owner_id)").await?;

    Ok(())
}
