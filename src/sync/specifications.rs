use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::database::Database;
use crate::excel::SheetTable;

use super::{get_or_create_location, ImportSummary, SyncError};

pub const SPEC_COLUMNS: [&str; 5] = [
    "material_code",
    "material_description",
    "size",
    "weight",
    "detailed_description",
];

/// Location used for materials first seen in a specification sheet without one.
pub const UNASSIGNED_LOCATION: &str = "未指定";

#[derive(Debug, Clone, PartialEq)]
pub struct SpecRow {
    pub material_code: String,
    pub material_description: String,
    pub size: Option<String>,
    pub weight: Option<Decimal>,
    pub detailed_description: Option<String>,
    pub location: Option<String>,
    pub bin: Option<String>,
    pub system_quantity: Option<i32>,
}

pub fn parse_spec_rows(table: &SheetTable) -> Result<Vec<SpecRow>, SyncError> {
    table.require_columns(&SPEC_COLUMNS)?;
    let mut rows = Vec::new();
    for record in table.records() {
        let code = record.get("material_code");
        if code.is_empty() {
            continue;
        }
        let weight = match record.opt("weight") {
            Some(raw) => Some(record.decimal("weight").map(|w| w.round_dp(2)).ok_or_else(|| {
                SyncError::invalid(format!("第 {} 行: 重量 '{}' 無效。", record.row_number, raw))
            })?),
            None => None,
        };
        rows.push(SpecRow {
            material_code: code.to_string(),
            material_description: record.get("material_description").to_string(),
            size: record.opt("size").map(str::to_string),
            weight,
            detailed_description: record.opt("detailed_description").map(str::to_string),
            location: record.opt("location").map(str::to_string),
            bin: record.opt("bin").map(str::to_string),
            system_quantity: record.decimal("system_quantity").and_then(|d| d.round().to_i32()),
        });
    }
    Ok(rows)
}

/// Upserts materials and their specifications. Optional location, bin and
/// quantity columns only overwrite existing values when present.
pub async fn import_specifications(db: &Database, table: &SheetTable) -> Result<ImportSummary, SyncError> {
    let rows = parse_spec_rows(table)?;
    let mut summary = ImportSummary::default();

    let mut tx = db.begin().await?;
    for row in &rows {
        let location_id = match &row.location {
            Some(name) => Some(get_or_create_location(&mut *tx, name).await?),
            None => None,
        };
        let existing = sqlx::query_scalar::<_, uuid::Uuid>("SELECT id FROM materials WHERE material_code = $1")
            .bind(&row.material_code)
            .fetch_optional(&mut *tx)
            .await?;

        let material_id = match existing {
            Some(id) => {
                sqlx::query(
                    r#"
                    UPDATE materials SET
                        material_description = $1,
                        location_id = COALESCE($2, location_id),
                        bin = COALESCE($3, bin),
                        system_quantity = COALESCE($4, system_quantity)
                    WHERE id = $5
                    "#,
                )
                .bind(&row.material_description)
                .bind(location_id)
                .bind(&row.bin)
                .bind(row.system_quantity)
                .bind(id)
                .execute(&mut *tx)
                .await?;
                summary.updated += 1;
                id
            }
            None => {
                let location_id = match location_id {
                    Some(id) => id,
                    None => get_or_create_location(&mut *tx, UNASSIGNED_LOCATION).await?,
                };
                summary.created += 1;
                sqlx::query_scalar::<_, uuid::Uuid>(
                    r#"
                    INSERT INTO materials (location_id, bin, material_code, material_description, system_quantity)
                    VALUES ($1, $2, $3, $4, $5)
                    RETURNING id
                    "#,
                )
                .bind(location_id)
                .bind(row.bin.clone().unwrap_or_default())
                .bind(&row.material_code)
                .bind(&row.material_description)
                .bind(row.system_quantity.unwrap_or(0))
                .fetch_one(&mut *tx)
                .await?
            }
        };

        sqlx::query(
            r#"
            INSERT INTO material_specifications (material_id, size, weight, detailed_description)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (material_id) DO UPDATE SET
                size = EXCLUDED.size,
                weight = EXCLUDED.weight,
                detailed_description = EXCLUDED.detailed_description
            "#,
        )
        .bind(material_id)
        .bind(&row.size)
        .bind(row.weight)
        .bind(&row.detailed_description)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    log::info!(
        "specification import: {} created, {} updated",
        summary.created,
        summary.updated
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::excel::{build_workbook, Cell, SheetData};

    #[test]
    fn test_parse_spec_rows_with_optional_columns() {
        let mut headers = SPEC_COLUMNS.to_vec();
        headers.push("location");
        let sheet = SheetData::new("S", headers)
            .row(vec![
                Cell::from("M-1"),
                Cell::from("馬達"),
                Cell::from("30x20"),
                Cell::Number(1.257),
                Cell::Blank,
                Cell::from("A01"),
            ])
            .row(vec![Cell::from("M-2"), Cell::from("皮帶"), Cell::Blank, Cell::Blank, Cell::from("黑色")]);
        let table = SheetTable::from_bytes(&build_workbook(&[sheet]).unwrap()).unwrap();

        let rows = parse_spec_rows(&table).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].weight, Some(Decimal::new(126, 2)));
        assert_eq!(rows[0].location.as_deref(), Some("A01"));
        assert_eq!(rows[0].detailed_description, None);
        assert_eq!(rows[1].size, None);
        assert_eq!(rows[1].detailed_description.as_deref(), Some("黑色"));
        assert_eq!(rows[1].system_quantity, None);
    }

    #[test]
    fn test_invalid_weight_is_rejected() {
        let sheet = SheetData::new("S", SPEC_COLUMNS.to_vec()).row(vec![
            Cell::from("M-1"),
            Cell::from("馬達"),
            Cell::Blank,
            Cell::from("heavy"),
            Cell::Blank,
        ]);
        let table = SheetTable::from_bytes(&build_workbook(&[sheet]).unwrap()).unwrap();
        assert!(parse_spec_rows(&table).is_err());
    }
}
