use std::path::{Path, PathBuf};

use {anyhow::Context, clap::Subcommand, courier_config::CourierConfig, courier_store::SqliteStore};

#[derive(Subcommand)]
pub enum DbAction {
    /// Run all pending database migrations.
    Migrate,
    /// Delete the database file (events, conversations and cursors).
    Reset,
}

/// Database file: `store.path`, else `<data_dir>/courier.db`.
pub fn db_path(config: &CourierConfig) -> PathBuf {
    config
        .store
        .path
        .clone()
        .unwrap_or_else(|| courier_config::data_dir().join("courier.db"))
}

pub fn db_url(path: &Path) -> String {
    format!("sqlite:{}?mode=rwc", path.display())
}

/// Open the store, creating the file and parent directory if needed.
/// Migrations run on open.
pub async fn open_store(config: &CourierConfig) -> anyhow::Result<SqliteStore> {
    let path = db_path(config);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    SqliteStore::new(&db_url(&path))
        .await
        .with_context(|| format!("opening {}", path.display()))
}

pub async fn handle_db(config: &CourierConfig, action: DbAction) -> anyhow::Result<()> {
    match action {
        DbAction::Migrate => {
            let store = open_store(config).await?;
            store.pool().close().await;
            println!("Migrations complete: {}", db_path(config).display());
            Ok(())
        },
        DbAction::Reset => {
            let deleted = reset_database(&db_path(config))?;
            if deleted.is_empty() {
                println!("No database files found.");
            } else {
                for path in &deleted {
                    println!("Deleted: {}", path.display());
                }
                println!("Run `courier db migrate` to recreate the schema.");
            }
            Ok(())
        },
    }
}

/// Delete the database and the WAL/SHM files SQLite may have created next to it.
fn reset_database(main_db: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut deleted = Vec::new();
    for suffix in ["", "-wal", "-shm"] {
        let mut name = main_db.as_os_str().to_owned();
        name.push(suffix);
        let path = PathBuf::from(name);
        if path.exists() {
            std::fs::remove_file(&path)?;
            deleted.push(path);
        }
    }
    Ok(deleted)
}
