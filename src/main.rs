use anyhow::Result;
use caselink::db::{migrate, Db};
use caselink::error::CaselinkError;
use caselink::Config;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "caselink")]
#[command(about = "Tenant-scoped relationship graph for a case-management backend")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending schema migrations
    Migrate,
    /// Verify database schema, indexes and integrity
    Verify,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let args = Args::parse();

    let config = Config::load()?;
    log::info!("Starting Caselink v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Database path: {}", config.db_path().display());

    let db = Db::new(config.db_path());
    let migrations_dir = config.migrations_dir().to_path_buf();
    db.with_connection(move |conn| migrate::run_migrations(conn, &migrations_dir))
        .await?;
    log::info!("Database initialized successfully");

    match args.command {
        Command::Migrate => {}
        Command::Verify => verify_database_schema(&db).await?,
    }

    Ok(())
}

/// Verify that all expected database objects exist
async fn verify_database_schema(db: &Db) -> Result<()> {
    db.with_connection(|conn| {
        let mut stmt =
            conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?;
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

        let expected_tables = [
            "tenants",
            "partners",
            "users",
            "work_items",
            "endpoints",
            "edges",
            "custom_roles",
            "role_assignments",
            "assignments",
            "schema_migrations",
        ];
        let mut all_tables_exist = true;
        for table in &expected_tables {
            if !tables.iter().any(|t| t == table) {
                log::error!("Missing table: {}", table);
                all_tables_exist = false;
            } else {
                log::debug!("✓ Table exists: {}", table);
            }
        }
        if !all_tables_exist {
            return Err(CaselinkError::Config(
                "Not all required tables exist".to_string(),
            ));
        }

        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%' ORDER BY name",
        )?;
        let indexes: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

        let expected_indexes = [
            "idx_endpoints_partner",
            "idx_endpoints_work_item",
            "idx_edges_tenant_source",
            "idx_edges_tenant_target",
            "idx_edges_tenant_label",
            "idx_role_assignments_system",
            "idx_role_assignments_custom",
        ];
        for index_name in &expected_indexes {
            if indexes.iter().any(|i| i == index_name) {
                log::debug!("✓ Index exists: {}", index_name);
            } else {
                return Err(CaselinkError::Config(format!(
                    "Missing index: {}",
                    index_name
                )));
            }
        }

        let applied = migrate::get_applied_migrations(conn)?;
        if applied.len() < 2 {
            return Err(CaselinkError::Config(format!(
                "Expected at least 2 migrations, found {}",
                applied.len()
            )));
        }
        log::debug!("✓ {} migrations applied", applied.len());

        let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        if journal_mode.to_uppercase() != "WAL" {
            return Err(CaselinkError::Config(format!(
                "Journal mode is not WAL: {}",
                journal_mode
            )));
        }
        log::debug!("✓ Journal mode: WAL");

        let foreign_keys: i32 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
        if foreign_keys != 1 {
            return Err(CaselinkError::Config("Foreign keys not enabled".to_string()));
        }
        log::debug!("✓ Foreign keys enabled");

        let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        if integrity != "ok" {
            return Err(CaselinkError::Config(format!(
                "Database integrity check failed: {}",
                integrity
            )));
        }
        log::info!("✓ Database integrity: OK");

        Ok(())
    })
    .await?;

    log::info!("✓ Database schema verification complete");
    Ok(())
}
