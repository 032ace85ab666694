use std::collections::HashSet;

use rust_decimal::prelude::ToPrimitive;
use uuid::Uuid;

use crate::database::Database;
use crate::excel::SheetTable;

use super::{get_or_create_location, specifications::UNASSIGNED_LOCATION, ImportSummary, SyncError};

/// Columns of the unattended inventory feed. Location and bin are not part
/// of it, so existing materials keep theirs.
pub const INVENTORY_FEED_COLUMNS: [&str; 3] = ["物料", "物料說明", "未限制"];

#[derive(Debug, Clone, PartialEq)]
pub struct InventoryFeedRow {
    pub material_code: String,
    pub description: String,
    pub quantity: i32,
}

/// Unparseable quantities import as 0 with a warning instead of failing the
/// whole file.
pub fn parse_inventory_feed(table: &SheetTable) -> Result<(Vec<InventoryFeedRow>, Vec<String>), SyncError> {
    table.require_columns(&INVENTORY_FEED_COLUMNS)?;

    let mut rows = Vec::new();
    let mut warnings = Vec::new();
    for record in table.records() {
        let code = record.get("物料");
        if code.is_empty() {
            continue;
        }
        let raw = record.get("未限制");
        let quantity = match record.decimal("未限制").and_then(|d| d.round().to_i32()) {
            Some(q) => q,
            None => {
                if !raw.is_empty() {
                    warnings.push(format!(
                        "第 {} 行: 物料 {} 的數量 '{}' 無效，以 0 匯入。",
                        record.row_number, code, raw
                    ));
                }
                0
            }
        };
        rows.push(InventoryFeedRow {
            material_code: code.to_string(),
            description: record.get("物料說明").to_string(),
            quantity,
        });
    }
    Ok((rows, warnings))
}

/// Rows split by whether their material already exists. A code repeated in
/// the file is created once and updated afterwards.
#[derive(Debug, Default, PartialEq)]
pub struct InventoryFeedPlan<'a> {
    pub creates: Vec<&'a InventoryFeedRow>,
    pub updates: Vec<&'a InventoryFeedRow>,
}

pub fn plan_inventory_feed<'a>(rows: &'a [InventoryFeedRow], existing: &HashSet<String>) -> InventoryFeedPlan<'a> {
    let mut plan = InventoryFeedPlan::default();
    let mut seen = HashSet::new();
    for row in rows {
        if existing.contains(&row.material_code) || !seen.insert(row.material_code.as_str()) {
            plan.updates.push(row);
        } else {
            plan.creates.push(row);
        }
    }
    plan
}

/// Upserts materials by code from the inventory feed. No transaction rows
/// are written since there is no acting user.
pub async fn import_material_inventory(db: &Database, table: &SheetTable) -> Result<ImportSummary, SyncError> {
    let (rows, warnings) = parse_inventory_feed(table)?;
    let codes: Vec<String> = rows.iter().map(|r| r.material_code.clone()).collect();

    let mut tx = db.begin().await?;
    let existing: HashSet<String> =
        sqlx::query_scalar::<_, String>("SELECT material_code FROM materials WHERE material_code = ANY($1)")
            .bind(&codes)
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .collect();
    let plan = plan_inventory_feed(&rows, &existing);

    if !plan.creates.is_empty() {
        let location_id: Uuid = get_or_create_location(&mut *tx, UNASSIGNED_LOCATION).await?;
        for row in &plan.creates {
            sqlx::query(
                r#"
                INSERT INTO materials (location_id, bin, material_code, material_description, system_quantity)
                VALUES ($1, '', $2, $3, $4)
                "#,
            )
            .bind(location_id)
            .bind(&row.material_code)
            .bind(&row.description)
            .bind(row.quantity)
            .execute(&mut *tx)
            .await?;
        }
    }
    for row in &plan.updates {
        sqlx::query(
            "UPDATE materials SET material_description = $1, system_quantity = $2 WHERE material_code = $3",
        )
        .bind(&row.description)
        .bind(row.quantity)
        .bind(&row.material_code)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    let summary = ImportSummary {
        created: plan.creates.len(),
        updated: plan.updates.len(),
        deleted: 0,
        warnings,
    };
    log::info!(
        "inventory feed import: {} created, {} updated",
        summary.created,
        summary.updated
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::excel::{build_workbook, Cell, SheetData};

    fn table(headers: Vec<&str>, rows: Vec<Vec<Cell>>) -> SheetTable {
        let mut sheet = SheetData::new("庫存", headers);
        for row in rows {
            sheet = sheet.row(row);
        }
        SheetTable::from_bytes(&build_workbook(&[sheet]).unwrap()).unwrap()
    }

    #[test]
    fn test_parse_inventory_feed_columns() {
        let table = table(
            INVENTORY_FEED_COLUMNS.to_vec(),
            vec![
                vec![Cell::from("M-1"), Cell::from("馬達"), Cell::Number(12.0)],
                vec![Cell::Blank, Cell::from("無料號"), Cell::Number(3.0)],
                vec![Cell::from("M-2"), Cell::from("皮帶"), Cell::Blank],
                vec![Cell::from("M-3"), Cell::from("螺絲"), Cell::from("很多")],
            ],
        );

        let (rows, warnings) = parse_inventory_feed(&table).unwrap();
        assert_eq!(
            rows,
            vec![
                InventoryFeedRow {
                    material_code: "M-1".to_string(),
                    description: "馬達".to_string(),
                    quantity: 12,
                },
                InventoryFeedRow {
                    material_code: "M-2".to_string(),
                    description: "皮帶".to_string(),
                    quantity: 0,
                },
                InventoryFeedRow {
                    material_code: "M-3".to_string(),
                    description: "螺絲".to_string(),
                    quantity: 0,
                },
            ]
        );
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("M-3"));
    }

    #[test]
    fn test_stock_sheet_headers_are_rejected() {
        let table = table(
            vec!["物料", "物料說明", "庫存數量"],
            vec![vec![Cell::from("M-1"), Cell::from("馬達"), Cell::Number(1.0)]],
        );
        let err = parse_inventory_feed(&table).unwrap_err();
        assert!(err.to_string().contains("未限制"));
    }

    fn feed_row(code: &str, quantity: i32) -> InventoryFeedRow {
        InventoryFeedRow {
            material_code: code.to_string(),
            description: String::new(),
            quantity,
        }
    }

    #[test]
    fn test_plan_counts_created_and_updated() {
        let rows = vec![feed_row("M-1", 1), feed_row("M-2", 2), feed_row("M-3", 3), feed_row("M-2", 5)];
        let existing: HashSet<String> = ["M-1".to_string()].into_iter().collect();

        let plan = plan_inventory_feed(&rows, &existing);
        let created: Vec<&str> = plan.creates.iter().map(|r| r.material_code.as_str()).collect();
        let updated: Vec<(&str, i32)> = plan
            .updates
            .iter()
            .map(|r| (r.material_code.as_str(), r.quantity))
            .collect();
        assert_eq!(created, vec!["M-2", "M-3"]);
        assert_eq!(updated, vec![("M-1", 1), ("M-2", 5)]);
    }
}
