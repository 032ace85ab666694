//! Spreadsheet reconciliation against the database.
//!
//! Every import is split in two: a pure `plan_*` step that works out what to
//! create, update or delete from the parsed rows and a snapshot of the
//! current rows, and an async `apply_*`/`import_*` step that runs the plan
//! inside a single transaction. A failing plan leaves the database untouched.

pub mod material_details;
pub mod material_inventory;
pub mod material_list;
pub mod material_master;
pub mod order_models;
pub mod process_types;
pub mod specifications;
pub mod stock;

use serde::Serialize;
use sqlx::PgConnection;
use thiserror::Error;
use uuid::Uuid;

use crate::excel::ExcelError;

/// Material number of the row that binds an order to its machine model.
pub const PARENT_SCOPE: &str = "PARENT_SCOPE";
pub const PARENT_SCOPE_ITEM_NAME: &str = "訂單機型範圍";
pub const DEFAULT_PROCESS_TYPE: &str = "其他";
pub const DEFAULT_DETAILS_QTY_COLUMN: &str = "需求數量 (EINHEIT)";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Excel(#[from] ExcelError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Invalid(String),
}

impl SyncError {
    pub fn invalid(message: impl Into<String>) -> Self {
        SyncError::Invalid(message.into())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Per-row problems that were skipped rather than failing the import.
    pub warnings: Vec<String>,
}

impl ImportSummary {
    pub fn describe(&self) -> String {
        if self.deleted > 0 {
            format!(
                "新增 {} 筆，更新 {} 筆，刪除 {} 筆。",
                self.created, self.updated, self.deleted
            )
        } else {
            format!("新增 {} 筆，更新 {} 筆。", self.created, self.updated)
        }
    }
}

pub(crate) async fn get_or_create_machine_model(
    conn: &mut PgConnection,
    name: &str,
) -> Result<Uuid, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO machine_models (name) VALUES ($1)
        ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .bind(name)
    .fetch_one(conn)
    .await
}

pub(crate) async fn get_or_create_process_type(
    conn: &mut PgConnection,
    machine_model_id: Uuid,
    name: &str,
) -> Result<Uuid, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO process_types (name, machine_model_id) VALUES ($1, $2)
        ON CONFLICT (name, machine_model_id) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .bind(name)
    .bind(machine_model_id)
    .fetch_one(conn)
    .await
}

pub(crate) async fn get_or_create_location(
    conn: &mut PgConnection,
    name: &str,
) -> Result<Uuid, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO storage_locations (name) VALUES ($1)
        ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .bind(name)
    .fetch_one(conn)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_description() {
        let summary = ImportSummary {
            created: 2,
            updated: 1,
            ..Default::default()
        };
        assert_eq!(summary.describe(), "新增 2 筆，更新 1 筆。");
        let summary = ImportSummary {
            created: 0,
            updated: 3,
            deleted: 4,
            warnings: vec![],
        };
        assert_eq!(summary.describe(), "新增 0 筆，更新 3 筆，刪除 4 筆。");
    }
}
