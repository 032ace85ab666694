//! Stock-quantity and storage-bin uploads into the `inventory` lookup table.

use rust_decimal::Decimal;

use crate::database::Database;
use crate::excel::SheetTable;

use super::{ImportSummary, SyncError};

#[derive(Debug, Clone, PartialEq)]
pub struct StockRow {
    pub material_number: String,
    pub stock_quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinRow {
    pub material_number: String,
    pub storage_bin: Option<String>,
}

/// Valid rows plus a warning for every skipped one.
pub fn parse_stock_rows(table: &SheetTable) -> Result<(Vec<StockRow>, Vec<String>), SyncError> {
    if !table.has_column("物料") {
        return Err(SyncError::invalid("Excel 檔案中找不到 '物料' 欄位。"));
    }
    if !table.has_column("未限制") {
        return Err(SyncError::invalid("Excel 檔案中找不到 '未限制' (庫存數量) 欄位。"));
    }

    let mut rows = Vec::new();
    let mut warnings = Vec::new();
    for record in table.records() {
        let material = record.get("物料");
        let raw_qty = record.get("未限制");
        if material.is_empty() || raw_qty.is_empty() {
            warnings.push(format!("跳過第 {} 行: 物料或庫存數量為空。", record.row_number));
            continue;
        }
        match record.decimal("未限制") {
            Some(qty) => rows.push(StockRow {
                material_number: material.to_string(),
                stock_quantity: qty.round_dp(2),
            }),
            None => warnings.push(format!(
                "跳過第 {} 行: 無效的庫存數量 '{}'.",
                record.row_number, raw_qty
            )),
        }
    }
    Ok((rows, warnings))
}

pub fn parse_bin_rows(table: &SheetTable) -> Result<(Vec<BinRow>, Vec<String>), SyncError> {
    if !table.has_column("物料") {
        return Err(SyncError::invalid("Excel 檔案中找不到 '物料' 欄位。"));
    }
    if !table.has_column("儲格") {
        return Err(SyncError::invalid("Excel 檔案中找不到 '儲格' 欄位。"));
    }

    let mut rows = Vec::new();
    let mut warnings = Vec::new();
    for record in table.records() {
        let material = record.get("物料");
        if material.is_empty() {
            warnings.push(format!("跳過第 {} 行: 物料為空。", record.row_number));
            continue;
        }
        rows.push(BinRow {
            material_number: material.to_string(),
            storage_bin: record.opt("儲格").map(str::to_string),
        });
    }
    Ok((rows, warnings))
}

/// Upserts stock quantities; an existing storage bin is left alone.
pub async fn import_stock(db: &Database, table: &SheetTable) -> Result<ImportSummary, SyncError> {
    let (rows, warnings) = parse_stock_rows(table)?;
    let mut summary = ImportSummary {
        warnings,
        ..Default::default()
    };

    let mut tx = db.begin().await?;
    for row in &rows {
        let inserted = sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO inventory (material_number, stock_quantity) VALUES ($1, $2)
            ON CONFLICT (material_number) DO UPDATE SET stock_quantity = EXCLUDED.stock_quantity
            RETURNING (xmax = 0)
            "#,
        )
        .bind(&row.material_number)
        .bind(row.stock_quantity)
        .fetch_one(&mut *tx)
        .await?;
        if inserted {
            summary.created += 1;
        } else {
            summary.updated += 1;
        }
    }
    tx.commit().await?;

    log::info!(
        "stock import: {} created, {} updated, {} skipped",
        summary.created,
        summary.updated,
        summary.warnings.len()
    );
    Ok(summary)
}

/// New materials start with zero stock; existing ones only get their bin replaced.
pub async fn import_storage_bins(db: &Database, table: &SheetTable) -> Result<ImportSummary, SyncError> {
    let (rows, warnings) = parse_bin_rows(table)?;
    let mut summary = ImportSummary {
        warnings,
        ..Default::default()
    };

    let mut tx = db.begin().await?;
    for row in &rows {
        let inserted = sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO inventory (material_number, storage_bin, stock_quantity) VALUES ($1, $2, 0)
            ON CONFLICT (material_number) DO UPDATE SET storage_bin = EXCLUDED.storage_bin
            RETURNING (xmax = 0)
            "#,
        )
        .bind(&row.material_number)
        .bind(&row.storage_bin)
        .fetch_one(&mut *tx)
        .await?;
        if inserted {
            summary.created += 1;
        } else {
            summary.updated += 1;
        }
    }
    tx.commit().await?;

    log::info!(
        "storage bin import: {} created, {} updated, {} skipped",
        summary.created,
        summary.updated,
        summary.warnings.len()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::excel::{build_workbook, Cell, SheetData};

    fn table(headers: Vec<&str>, rows: Vec<Vec<Cell>>) -> SheetTable {
        let mut sheet = SheetData::new("S", headers);
        for row in rows {
            sheet.push(row);
        }
        SheetTable::from_bytes(&build_workbook(&[sheet]).unwrap()).unwrap()
    }

    #[test]
    fn test_stock_rows_skip_blank_and_invalid_quantities() {
        let t = table(
            vec!["物料", "未限制"],
            vec![
                vec![Cell::from("A"), Cell::Number(12.0)],
                vec![Cell::from("B"), Cell::Blank],
                vec![Cell::from("C"), Cell::from("many")],
                vec![Cell::from("D"), Cell::from("3.5")],
            ],
        );
        let (rows, warnings) = parse_stock_rows(&t).unwrap();
        assert_eq!(
            rows,
            vec![
                StockRow { material_number: "A".into(), stock_quantity: Decimal::from(12) },
                StockRow { material_number: "D".into(), stock_quantity: Decimal::new(35, 1) },
            ]
        );
        assert_eq!(
            warnings,
            vec![
                "跳過第 3 行: 物料或庫存數量為空。".to_string(),
                "跳過第 4 行: 無效的庫存數量 'many'.".to_string(),
            ]
        );
    }

    #[test]
    fn test_stock_requires_quantity_column() {
        let t = table(vec!["物料"], vec![]);
        let err = parse_stock_rows(&t).unwrap_err();
        assert!(err.to_string().contains("未限制"));
    }

    #[test]
    fn test_bin_rows_allow_empty_bin() {
        let t = table(
            vec!["物料", "儲格"],
            vec![
                vec![Cell::from("A"), Cell::from("R01-02")],
                vec![Cell::from("B"), Cell::Blank],
                vec![Cell::Blank, Cell::from("R09")],
            ],
        );
        let (rows, warnings) = parse_bin_rows(&t).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].storage_bin.as_deref(), Some("R01-02"));
        assert_eq!(rows[1].storage_bin, None);
        assert_eq!(warnings, vec!["跳過第 4 行: 物料為空。".to_string()]);
    }
}
