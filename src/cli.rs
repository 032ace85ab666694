//! Command-line entry points sharing the web server's configuration and
//! import routines.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::{
    config::Config,
    database::Database,
    excel::SheetTable,
    models::rbac::{ADMIN_GROUP, ALL_GROUPS},
    sync::{
        material_details::import_material_details, material_inventory::import_material_inventory,
        order_models::import_order_models, process_types::ProcessTypeMap, ImportSummary, SyncError,
        DEFAULT_DETAILS_QTY_COLUMN,
    },
    utils::hash_password,
};

#[derive(Parser)]
#[command(name = "material-requisition", version)]
#[command(about = "Factory material inventory, stocktaking and requisition server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Run the web server (default)
    Serve,

    /// Create the user groups and add every superuser to 管理員
    SetupRoles,

    /// Create or reset an administrator account
    CreateSuperuser {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },

    /// Sync order / machine-model scopes from a spreadsheet
    ImportOrderModels {
        #[arg(long)]
        path: PathBuf,
    },

    /// Sync work-order material details from a spreadsheet
    ImportMaterialDetails {
        #[arg(long)]
        path: PathBuf,
        /// Column holding the required quantity
        #[arg(long, default_value = DEFAULT_DETAILS_QTY_COLUMN)]
        qty_col: String,
    },

    /// Sync material descriptions and system quantities from a spreadsheet
    ImportInventory {
        #[arg(long)]
        path: PathBuf,
    },

    /// Import changed files from the auto-upload folders once
    Monitor,
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("File \"{}\" does not exist.", .0.display())]
    MissingFile(PathBuf),
    #[error("上傳檔案時發生錯誤: {0}")]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Hash(#[from] bcrypt::BcryptError),
}

fn read_table(path: &Path) -> Result<SheetTable, CliError> {
    if !path.exists() {
        return Err(CliError::MissingFile(path.to_path_buf()));
    }
    Ok(SheetTable::from_path(path).map_err(SyncError::from)?)
}

pub async fn import_order_models_file(db: &Database, path: &Path) -> Result<ImportSummary, CliError> {
    let table = read_table(path)?;
    Ok(import_order_models(db, &table).await?)
}

pub async fn import_material_details_file(
    db: &Database,
    config: &Config,
    path: &Path,
    qty_col: &str,
) -> Result<ImportSummary, CliError> {
    let table = read_table(path)?;
    let process_types = ProcessTypeMap::load(&config.process_type_db_path)?;
    Ok(import_material_details(db, &table, qty_col, &process_types).await?)
}

pub async fn import_inventory_file(db: &Database, path: &Path) -> Result<ImportSummary, CliError> {
    let table = read_table(path)?;
    let summary = import_material_inventory(db, &table).await?;
    for warning in &summary.warnings {
        log::warn!("{}: {}", path.display(), warning);
    }
    Ok(summary)
}

/// Idempotent: existing groups and memberships are left alone.
pub async fn setup_roles(db: &Database) -> Result<(), CliError> {
    for name in ALL_GROUPS {
        let created = sqlx::query("INSERT INTO groups (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
            .bind(name)
            .execute(db)
            .await?;
        if created.rows_affected() > 0 {
            println!("Successfully created group: {}", name);
        }
    }

    let superusers = sqlx::query_scalar::<_, String>("SELECT username FROM users WHERE is_superuser ORDER BY username")
        .fetch_all(db)
        .await?;
    if superusers.is_empty() {
        println!("No superuser found. Create one with `create-superuser --username <name> --password <password>`.");
        return Ok(());
    }

    sqlx::query(
        r#"
        INSERT INTO user_groups (user_id, group_id)
        SELECT u.id, g.id FROM users u, groups g
        WHERE u.is_superuser AND g.name = $1
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(ADMIN_GROUP)
    .execute(db)
    .await?;
    for username in superusers {
        println!("Successfully assigned superuser \"{}\" to group \"{}\"", username, ADMIN_GROUP);
    }
    Ok(())
}

pub async fn create_superuser(db: &Database, username: &str, password: &str) -> Result<(), CliError> {
    let password_hash = hash_password(password)?;
    sqlx::query(
        r#"
        INSERT INTO users (username, password_hash, is_superuser, is_active)
        VALUES ($1, $2, TRUE, TRUE)
        ON CONFLICT (username) DO UPDATE SET
            password_hash = EXCLUDED.password_hash,
            is_superuser = TRUE,
            is_active = TRUE,
            is_locked = FALSE,
            updated_at = NOW()
        "#,
    )
    .bind(username)
    .bind(&password_hash)
    .execute(db)
    .await?;
    println!("Superuser \"{}\" is ready.", username);
    setup_roles(db).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["material-requisition"]).unwrap();
        assert_eq!(cli.command, None);
    }

    #[test]
    fn test_material_details_qty_col_default() {
        let cli = Cli::try_parse_from(["material-requisition", "import-material-details", "--path", "d.xlsx"])
            .unwrap();
        assert_eq!(
            cli.command,
            Some(Command::ImportMaterialDetails {
                path: PathBuf::from("d.xlsx"),
                qty_col: DEFAULT_DETAILS_QTY_COLUMN.to_string(),
            })
        );
    }

    #[test]
    fn test_import_requires_path() {
        assert!(Cli::try_parse_from(["material-requisition", "import-inventory"]).is_err());
    }

    #[test]
    fn test_read_table_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("none.xlsx");
        let err = read_table(&missing).unwrap_err();
        assert!(matches!(err, CliError::MissingFile(_)));
        assert!(err.to_string().contains("none.xlsx"));
    }
}
