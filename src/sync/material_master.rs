use rust_decimal::prelude::ToPrimitive;
use uuid::Uuid;

use crate::database::Database;
use crate::excel::SheetTable;
use crate::workflow::TransactionType;

use super::{get_or_create_location, ImportSummary, SyncError};

pub const MASTER_COLUMNS: [&str; 5] = ["儲存地點", "儲格", "物料", "物料說明", "未限制"];

#[derive(Debug, Clone, PartialEq)]
pub struct MasterRow {
    pub location: String,
    pub bin: String,
    pub material_code: String,
    pub description: String,
    pub quantity: i32,
}

pub fn parse_master_rows(table: &SheetTable) -> Result<Vec<MasterRow>, SyncError> {
    table.require_columns(&MASTER_COLUMNS)?;

    let mut rows = Vec::new();
    for record in table.records() {
        let code = record.get("物料");
        if code.is_empty() {
            continue;
        }
        let raw = record.get("未限制");
        let quantity = if raw.is_empty() {
            0
        } else {
            record
                .decimal("未限制")
                .and_then(|d| d.round().to_i32())
                .ok_or_else(|| {
                    SyncError::invalid(format!(
                        "第 {} 行: 物料 {} 的數量 '{}' 無效。",
                        record.row_number, code, raw
                    ))
                })?
        };
        let location = record.get("儲存地點");
        if location.is_empty() {
            return Err(SyncError::invalid(format!(
                "第 {} 行: 物料 {} 缺少儲存地點。",
                record.row_number, code
            )));
        }
        rows.push(MasterRow {
            location: location.to_string(),
            bin: record.get("儲格").to_string(),
            material_code: code.to_string(),
            description: record.get("物料說明").to_string(),
            quantity,
        });
    }
    Ok(rows)
}

/// Quantity change recorded for an imported row: the full amount for a new
/// material, the difference from the previous system quantity otherwise.
pub fn import_delta(previous: Option<i32>, new_quantity: i32) -> (TransactionType, i32) {
    match previous {
        None => (TransactionType::InitialImport, new_quantity),
        Some(old) => (TransactionType::ManualUpdate, new_quantity - old),
    }
}

/// Upserts the material master. System and counted quantities are both set
/// to the imported figure and every row gets an audit transaction.
pub async fn import_material_master(
    db: &Database,
    table: &SheetTable,
    user_id: Option<Uuid>,
    source_name: &str,
) -> Result<ImportSummary, SyncError> {
    let rows = parse_master_rows(table)?;
    let mut summary = ImportSummary::default();
    let notes = format!("透過 Excel 檔案更新: {}", source_name);

    let mut tx = db.begin().await?;
    for row in &rows {
        let location_id = get_or_create_location(&mut *tx, &row.location).await?;
        let previous = sqlx::query_scalar::<_, i32>(
            "SELECT system_quantity FROM materials WHERE material_code = $1 FOR UPDATE",
        )
        .bind(&row.material_code)
        .fetch_optional(&mut *tx)
        .await?;

        let material_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO materials
                (location_id, bin, material_code, material_description, system_quantity,
                 latest_counted_quantity, last_counted_by, last_counted_date)
            VALUES ($1, $2, $3, $4, $5, $5, $6, NOW())
            ON CONFLICT (material_code) DO UPDATE SET
                location_id = EXCLUDED.location_id,
                bin = EXCLUDED.bin,
                material_description = EXCLUDED.material_description,
                system_quantity = EXCLUDED.system_quantity,
                latest_counted_quantity = EXCLUDED.latest_counted_quantity,
                last_counted_by = EXCLUDED.last_counted_by,
                last_counted_date = EXCLUDED.last_counted_date
            RETURNING id
            "#,
        )
        .bind(location_id)
        .bind(&row.bin)
        .bind(&row.material_code)
        .bind(&row.description)
        .bind(row.quantity)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        let (kind, change) = import_delta(previous, row.quantity);
        sqlx::query(
            r#"
            INSERT INTO material_transactions
                (material_id, user_id, transaction_type, quantity_change, new_system_quantity, notes)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(material_id)
        .bind(user_id)
        .bind(kind.as_str())
        .bind(change)
        .bind(row.quantity)
        .bind(&notes)
        .execute(&mut *tx)
        .await?;

        if previous.is_some() {
            summary.updated += 1;
        } else {
            summary.created += 1;
        }
    }
    tx.commit().await?;

    log::info!(
        "material master import from {}: {} created, {} updated",
        source_name,
        summary.created,
        summary.updated
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::excel::{build_workbook, Cell, SheetData};

    fn table(rows: Vec<Vec<Cell>>) -> SheetTable {
        let mut sheet = SheetData::new("S", MASTER_COLUMNS.to_vec());
        for row in rows {
            sheet.push(row);
        }
        SheetTable::from_bytes(&build_workbook(&[sheet]).unwrap()).unwrap()
    }

    #[test]
    fn test_parse_master_rows() {
        let t = table(vec![
            vec![
                Cell::from("A01"),
                Cell::from("R1"),
                Cell::Number(100234.0),
                Cell::from("軸承"),
                Cell::Number(40.0),
            ],
            vec![Cell::from("A01"), Cell::from("R2"), Cell::Blank, Cell::from("無料號"), Cell::Number(1.0)],
        ]);
        let rows = parse_master_rows(&t).unwrap();
        assert_eq!(
            rows,
            vec![MasterRow {
                location: "A01".into(),
                bin: "R1".into(),
                material_code: "100234".into(),
                description: "軸承".into(),
                quantity: 40,
            }]
        );
    }

    #[test]
    fn test_invalid_quantity_fails_whole_import() {
        let t = table(vec![vec![
            Cell::from("A01"),
            Cell::from("R1"),
            Cell::from("X-1"),
            Cell::from("軸承"),
            Cell::from("lots"),
        ]]);
        let err = parse_master_rows(&t).unwrap_err();
        assert_eq!(err.to_string(), "第 2 行: 物料 X-1 的數量 'lots' 無效。");
    }

    #[test]
    fn test_missing_columns_are_listed() {
        let bytes = build_workbook(&[SheetData::new("S", vec!["物料", "未限制"])]).unwrap();
        let t = SheetTable::from_bytes(&bytes).unwrap();
        let err = parse_master_rows(&t).unwrap_err();
        assert!(err.to_string().contains("儲存地點, 儲格, 物料說明"));
    }

    #[test]
    fn test_import_delta() {
        assert_eq!(import_delta(None, 12), (TransactionType::InitialImport, 12));
        assert_eq!(import_delta(Some(20), 12), (TransactionType::ManualUpdate, -8));
    }
}
