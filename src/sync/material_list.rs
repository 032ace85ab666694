//! Material lists attached to a requisition: spreadsheet uploads and the
//! version bookkeeping shared by every path that produces a new list.

use std::collections::HashMap;

use rust_decimal::Decimal;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::database::Database;
use crate::excel::SheetTable;
use crate::workflow::VersionChange;

use super::SyncError;

pub const ORDER_COLUMNS: [&str; 2] = ["訂單", "訂單單號"];
pub const NAME_COLUMNS: [&str; 2] = ["品名", "物料說明"];

/// One uploaded line after aggregation by (order, material, machine model).
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialListRow {
    pub order_number: String,
    pub material_number: String,
    pub machine_model: String,
    pub item_name: String,
    pub required_quantity: Decimal,
    pub stock_quantity: Decimal,
}

impl MaterialListRow {
    fn key(&self) -> (String, String, String) {
        (
            self.order_number.clone(),
            self.material_number.clone(),
            self.machine_model.clone(),
        )
    }

    fn describe(&self) -> String {
        format!(
            "訂單 {}, 物料 {}, 機型 {}",
            self.order_number, self.material_number, self.machine_model
        )
    }
}

/// A requisition item about to be written into a version.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct NewItem {
    pub source_material_id: Option<Uuid>,
    pub order_number: String,
    pub material_number: String,
    pub item_name: String,
    pub required_quantity: Decimal,
    pub stock_quantity: Decimal,
    pub confirmed_quantity: Option<Decimal>,
    pub is_signed_off: bool,
}

impl NewItem {
    /// The copy of this item that goes into a version produced by `change`.
    pub fn carried_into(&self, change: VersionChange) -> NewItem {
        if change.keeps_progress() {
            self.clone()
        } else {
            NewItem {
                confirmed_quantity: None,
                is_signed_off: false,
                ..self.clone()
            }
        }
    }
}

/// Quantities are summed per key and the first row's name and stock win.
/// Rows missing any key column are dropped.
pub fn parse_material_list(table: &SheetTable) -> Result<Vec<MaterialListRow>, SyncError> {
    let order_col = table.first_present(&ORDER_COLUMNS);
    let name_col = table.first_present(&NAME_COLUMNS);
    let mut missing = Vec::new();
    if order_col.is_none() {
        missing.push("訂單/訂單單號");
    }
    if !table.has_column("物料") {
        missing.push("物料");
    }
    if name_col.is_none() {
        missing.push("品名/物料說明");
    }
    if !table.has_column("機型") {
        missing.push("機型");
    }
    if !table.has_column("需求數量") {
        missing.push("需求數量");
    }
    let (order_col, name_col) = match (order_col, name_col) {
        (Some(o), Some(n)) if missing.is_empty() => (o, n),
        _ => {
            return Err(SyncError::invalid(format!(
                "上傳的 Excel 檔案中缺少必要的欄位，請檢查是否包含： {}",
                missing.join(", ")
            )))
        }
    };

    let mut rows: Vec<MaterialListRow> = Vec::new();
    let mut index: HashMap<(String, String, String), usize> = HashMap::new();
    for record in table.records() {
        let order = record.get(order_col);
        let material = record.get("物料");
        let model = record.get("機型");
        if order.is_empty() || material.is_empty() || model.is_empty() {
            continue;
        }
        let quantity = record.decimal("需求數量").unwrap_or(Decimal::ZERO);
        let key = (order.to_string(), material.to_string(), model.to_string());
        match index.get(&key) {
            Some(&i) => rows[i].required_quantity += quantity,
            None => {
                index.insert(key, rows.len());
                rows.push(MaterialListRow {
                    order_number: order.to_string(),
                    material_number: material.to_string(),
                    machine_model: model.to_string(),
                    item_name: record.get(name_col).to_string(),
                    required_quantity: quantity,
                    stock_quantity: record.decimal("庫存數量").unwrap_or(Decimal::ZERO),
                });
            }
        }
    }
    Ok(rows)
}

/// Pairs each row with its work-order material, or lists every row that has
/// none so the whole upload can be refused.
pub fn match_sources(
    rows: &[MaterialListRow],
    sources: &HashMap<(String, String, String), Uuid>,
) -> Result<Vec<(MaterialListRow, Uuid)>, Vec<String>> {
    let mut matched = Vec::with_capacity(rows.len());
    let mut missing = Vec::new();
    for row in rows {
        match sources.get(&row.key()) {
            Some(id) => matched.push((row.clone(), *id)),
            None => missing.push(row.describe()),
        }
    }
    if missing.is_empty() {
        Ok(matched)
    } else {
        Err(missing)
    }
}

/// Creates an empty version, makes it current and puts the requisition back
/// to pending with its confirmation and sign-off stamps cleared.
pub async fn start_version(
    conn: &mut PgConnection,
    requisition_id: Uuid,
    user_id: Uuid,
    change: VersionChange,
) -> Result<Uuid, sqlx::Error> {
    let version_id = sqlx::query_scalar::<_, Uuid>(
        "INSERT INTO material_list_versions (requisition_id, uploaded_by) VALUES ($1, $2) RETURNING id",
    )
    .bind(requisition_id)
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        UPDATE requisitions
        SET current_material_list_version_id = $1, status = $3,
            material_confirmed_by = NULL, material_confirmed_date = NULL,
            sign_off_by = NULL, sign_off_date = NULL, updated_at = NOW()
        WHERE id = $2
        "#,
    )
    .bind(version_id)
    .bind(requisition_id)
    .bind(change.next_status().as_str())
    .execute(&mut *conn)
    .await?;

    Ok(version_id)
}

pub async fn insert_item(
    conn: &mut PgConnection,
    version_id: Uuid,
    item: &NewItem,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO requisition_items
            (material_list_version_id, source_material_id, order_number, material_number,
             item_name, required_quantity, stock_quantity, confirmed_quantity, is_signed_off)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(version_id)
    .bind(item.source_material_id)
    .bind(&item.order_number)
    .bind(&item.material_number)
    .bind(&item.item_name)
    .bind(item.required_quantity)
    .bind(item.stock_quantity)
    .bind(item.confirmed_quantity)
    .bind(item.is_signed_off)
    .execute(conn)
    .await?;
    Ok(())
}

/// Copies every item of `from` into `to`, carrying progress over only when
/// `change` keeps it.
pub async fn copy_items(
    conn: &mut PgConnection,
    from: Uuid,
    to: Uuid,
    change: VersionChange,
) -> Result<usize, sqlx::Error> {
    let items = sqlx::query_as::<_, NewItem>(
        r#"
        SELECT source_material_id, order_number, material_number, item_name,
               required_quantity, stock_quantity, confirmed_quantity, is_signed_off
        FROM requisition_items
        WHERE material_list_version_id = $1
        ORDER BY material_number
        "#,
    )
    .bind(from)
    .fetch_all(&mut *conn)
    .await?;

    for item in &items {
        insert_item(&mut *conn, to, &item.carried_into(change)).await?;
    }
    Ok(items.len())
}

/// Replaces the requisition's material list with an uploaded one. Every row
/// must match a work-order material by (order, material, machine model);
/// otherwise nothing is written.
pub async fn import_material_list(
    db: &Database,
    requisition_id: Uuid,
    user_id: Uuid,
    table: &SheetTable,
) -> Result<usize, SyncError> {
    let rows = parse_material_list(table)?;

    let orders: Vec<String> = rows.iter().map(|r| r.order_number.clone()).collect();
    let sources: HashMap<(String, String, String), Uuid> = sqlx::query_as::<_, (Uuid, String, String, String)>(
        r#"
        SELECT w.id, w.order_number, w.material_number, m.name
        FROM work_order_materials w
        JOIN machine_models m ON m.id = w.machine_model_id
        WHERE w.order_number = ANY($1) AND w.material_number IS NOT NULL
        "#,
    )
    .bind(&orders)
    .fetch_all(db)
    .await?
    .into_iter()
    .map(|(id, order, material, model)| ((order, material, model), id))
    .collect();

    let matched = match_sources(&rows, &sources).map_err(|missing| {
        SyncError::invalid(format!(
            "上傳失敗，因為在主物料清單中找不到以下物料，請檢查資料是否正確: {}",
            missing.join("; ")
        ))
    })?;

    let mut tx = db.begin().await?;
    let version_id = start_version(&mut *tx, requisition_id, user_id, VersionChange::Upload).await?;
    for (row, source_id) in &matched {
        let item = NewItem {
            source_material_id: Some(*source_id),
            order_number: row.order_number.clone(),
            material_number: row.material_number.clone(),
            item_name: row.item_name.clone(),
            required_quantity: row.required_quantity,
            stock_quantity: row.stock_quantity,
            confirmed_quantity: None,
            is_signed_off: false,
        };
        insert_item(&mut *tx, version_id, &item).await?;
    }
    tx.commit().await?;

    log::info!(
        "material list for requisition {}: {} items in version {}",
        requisition_id,
        matched.len(),
        version_id
    );
    Ok(matched.len())
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

    fn text(v: &str) -> Cell {
        Cell::from(v)
    }

    #[test]
    fn test_rows_aggregate_by_order_material_and_model() {
        let t = table(
            vec!["訂單單號", "物料", "物料說明", "機型", "需求數量", "庫存數量"],
            vec![
                vec![text("WO-1"), text("A-1"), text("螺絲"), text("M1"), Cell::Number(2.0), Cell::Number(9.0)],
                vec![text("WO-1"), text("A-1"), text("螺絲 (2)"), text("M1"), Cell::Number(3.5), Cell::Number(1.0)],
                vec![text("WO-1"), text("B-2"), text("墊片"), text("M1"), text("abc"), Cell::Blank],
                vec![text("WO-1"), Cell::Blank, text("?"), text("M1"), Cell::Number(1.0), Cell::Blank],
            ],
        );
        let rows = parse_material_list(&t).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].required_quantity, Decimal::new(55, 1));
        assert_eq!(rows[0].item_name, "螺絲");
        assert_eq!(rows[0].stock_quantity, Decimal::from(9));
        assert_eq!(rows[1].required_quantity, Decimal::ZERO);
        assert_eq!(rows[1].stock_quantity, Decimal::ZERO);
    }

    #[test]
    fn test_missing_columns_are_named() {
        let t = table(vec!["訂單", "物料", "需求數量"], vec![]);
        let err = parse_material_list(&t).unwrap_err().to_string();
        assert!(err.contains("品名/物料說明"));
        assert!(err.contains("機型"));
        assert!(!err.contains("需求數量,"));
    }

    #[test]
    fn test_unmatched_rows_fail_the_whole_list() {
        let t = table(
            vec!["訂單", "物料", "品名", "機型", "需求數量"],
            vec![
                vec![text("WO-1"), text("A-1"), text("螺絲"), text("M1"), Cell::Number(1.0)],
                vec![text("WO-1"), text("Z-9"), text("?"), text("M1"), Cell::Number(1.0)],
            ],
        );
        let rows = parse_material_list(&t).unwrap();
        let id = Uuid::new_v4();
        let mut sources = HashMap::new();
        sources.insert(("WO-1".to_string(), "A-1".to_string(), "M1".to_string()), id);

        let missing = match_sources(&rows, &sources).unwrap_err();
        assert_eq!(missing, vec!["訂單 WO-1, 物料 Z-9, 機型 M1".to_string()]);

        let matched = match_sources(&rows[..1], &sources).unwrap();
        assert_eq!(matched[0].1, id);
    }
    fn signed_item() -> NewItem {
        NewItem {
            source_material_id: Some(Uuid::from_u128(7)),
            order_number: "WO-1".to_string(),
            material_number: "A-1".to_string(),
            item_name: "螺絲".to_string(),
            required_quantity: Decimal::from(5),
            stock_quantity: Decimal::from(2),
            confirmed_quantity: Some(Decimal::from(5)),
            is_signed_off: true,
        }
    }

    #[test]
    fn test_supplement_copies_keep_progress() {
        let item = signed_item();
        assert_eq!(item.carried_into(VersionChange::Supplement), item);
    }

    #[test]
    fn test_activation_copies_start_unconfirmed() {
        let item = signed_item();
        let copy = item.carried_into(VersionChange::Activation);
        assert_eq!(copy.confirmed_quantity, None);
        assert!(!copy.is_signed_off);
        assert_eq!(copy.source_material_id, item.source_material_id);
        assert_eq!(copy.required_quantity, item.required_quantity);
        assert_eq!(copy.stock_quantity, item.stock_quantity);
    }
}
