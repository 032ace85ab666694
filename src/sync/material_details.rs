use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::database::Database;
use crate::excel::SheetTable;

use super::order_models::ORDER_COLUMNS;
use super::process_types::ProcessTypeMap;
use super::{get_or_create_process_type, ImportSummary, SyncError, PARENT_SCOPE};

/// One (order, material) line after duplicate rows have been summed.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailRow {
    pub order_number: String,
    pub material_number: String,
    pub item_name: String,
    pub required_quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExistingDetail {
    pub id: Uuid,
    pub order_number: String,
    pub material_number: String,
    pub machine_model: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedDetail {
    pub row: DetailRow,
    pub machine_model: String,
    pub process_type: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetailPlan {
    pub creates: Vec<PlannedDetail>,
    pub updates: Vec<(Uuid, PlannedDetail)>,
    pub deletes: Vec<Uuid>,
}

type DetailKey = (String, String, String);

/// Reads and aggregates the detail rows. Quantities that are not numbers
/// count as zero, and the first description seen for a material wins.
pub fn parse_detail_rows(table: &SheetTable, qty_col: &str) -> Result<Vec<DetailRow>, SyncError> {
    let order_col = table
        .first_present(&ORDER_COLUMNS)
        .ok_or_else(|| SyncError::invalid("上傳的 Excel 檔案中找不到 '訂單單號' 或 '訂單' 欄位。"))?;
    if !table.has_column("物料") {
        return Err(SyncError::invalid("上傳的 Excel 檔案中找不到 '物料' 欄位。"));
    }
    if !table.has_column(qty_col) {
        return Err(SyncError::invalid(format!(
            "在 Excel 中找不到您指定的 '需求數量' 欄位：'{}'。",
            qty_col
        )));
    }

    let mut rows: Vec<DetailRow> = Vec::new();
    let mut index: HashMap<(String, String), usize> = HashMap::new();
    for record in table.records() {
        let order = record.get(order_col);
        let material = record.get("物料");
        if order.is_empty() || material.is_empty() {
            continue;
        }
        let qty = record.decimal(qty_col).unwrap_or(Decimal::ZERO);
        let key = (order.to_string(), material.to_string());
        match index.get(&key) {
            Some(&pos) => rows[pos].required_quantity += qty,
            None => {
                index.insert(key, rows.len());
                rows.push(DetailRow {
                    order_number: order.to_string(),
                    material_number: material.to_string(),
                    item_name: record.get("物料說明").to_string(),
                    required_quantity: qty,
                });
            }
        }
    }
    Ok(rows)
}

/// Splits the upload into creates, updates and deletes keyed by
/// (order, material, machine model). Rows of an uploaded (order, model)
/// scope that are absent from the upload are deleted; parent scopes are
/// never touched.
pub fn plan_material_details(
    rows: &[DetailRow],
    parent_scopes: &HashMap<String, String>,
    process_types: &ProcessTypeMap,
    existing: &[ExistingDetail],
) -> Result<DetailPlan, SyncError> {
    let lookup: HashMap<DetailKey, Uuid> = existing
        .iter()
        .map(|e| {
            (
                (e.order_number.clone(), e.material_number.clone(), e.machine_model.clone()),
                e.id,
            )
        })
        .collect();

    let mut plan = DetailPlan::default();
    let mut uploaded: HashSet<DetailKey> = HashSet::new();
    let mut scopes: HashSet<(String, String)> = HashSet::new();

    for row in rows {
        let model = parent_scopes.get(&row.order_number).ok_or_else(|| {
            SyncError::invalid(format!(
                "訂單 {} 的父階範圍不存在或缺少機型資訊。請先上傳訂單與機型 Excel。",
                row.order_number
            ))
        })?;
        scopes.insert((row.order_number.clone(), model.clone()));

        let key = (row.order_number.clone(), row.material_number.clone(), model.clone());
        if !uploaded.insert(key.clone()) {
            continue;
        }
        let planned = PlannedDetail {
            row: row.clone(),
            machine_model: model.clone(),
            process_type: process_types.lookup(&row.material_number, model),
        };
        match lookup.get(&key) {
            Some(id) => plan.updates.push((*id, planned)),
            None => plan.creates.push(planned),
        }
    }

    plan.deletes = existing
        .iter()
        .filter(|e| e.material_number != PARENT_SCOPE)
        .filter(|e| scopes.contains(&(e.order_number.clone(), e.machine_model.clone())))
        .filter(|e| {
            !uploaded.contains(&(
                e.order_number.clone(),
                e.material_number.clone(),
                e.machine_model.clone(),
            ))
        })
        .map(|e| e.id)
        .collect();

    Ok(plan)
}

pub async fn import_material_details(
    db: &Database,
    table: &SheetTable,
    qty_col: &str,
    process_types: &ProcessTypeMap,
) -> Result<ImportSummary, SyncError> {
    let rows = parse_detail_rows(table, qty_col)?;
    let orders: Vec<String> = rows
        .iter()
        .map(|r| r.order_number.clone())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();

    let mut tx = db.begin().await?;

    let scope_rows = sqlx::query_as::<_, (String, Uuid, String)>(
        r#"
        SELECT w.order_number, m.id, m.name
        FROM work_order_materials w
        JOIN machine_models m ON m.id = w.machine_model_id
        WHERE w.material_number = $1 AND w.order_number = ANY($2)
        "#,
    )
    .bind(PARENT_SCOPE)
    .bind(&orders)
    .fetch_all(&mut *tx)
    .await?;

    let model_ids: HashMap<String, Uuid> = scope_rows
        .iter()
        .map(|(_, id, name)| (name.clone(), *id))
        .collect();
    let parent_scopes: HashMap<String, String> = scope_rows
        .into_iter()
        .map(|(order, _, name)| (order, name))
        .collect();

    let existing: Vec<ExistingDetail> = sqlx::query_as::<_, (Uuid, String, String, String)>(
        r#"
        SELECT w.id, w.order_number, w.material_number, m.name
        FROM work_order_materials w
        JOIN machine_models m ON m.id = w.machine_model_id
        WHERE w.order_number = ANY($1) AND w.material_number IS NOT NULL AND w.material_number <> $2
        "#,
    )
    .bind(&orders)
    .bind(PARENT_SCOPE)
    .fetch_all(&mut *tx)
    .await?
    .into_iter()
    .map(|(id, order_number, material_number, machine_model)| ExistingDetail {
        id,
        order_number,
        material_number,
        machine_model,
    })
    .collect();

    let plan = plan_material_details(&rows, &parent_scopes, process_types, &existing)?;

    let mut process_type_ids: HashMap<(String, String), Uuid> = HashMap::new();
    for planned in plan.creates.iter().chain(plan.updates.iter().map(|(_, p)| p)) {
        let key = (planned.machine_model.clone(), planned.process_type.clone());
        if process_type_ids.contains_key(&key) {
            continue;
        }
        let model_id = model_ids
            .get(&planned.machine_model)
            .copied()
            .ok_or_else(|| SyncError::invalid(format!("找不到機型 {}", planned.machine_model)))?;
        let id = get_or_create_process_type(&mut *tx, model_id, &planned.process_type).await?;
        process_type_ids.insert(key, id);
    }

    for planned in &plan.creates {
        let process_type_id = process_type_ids[&(planned.machine_model.clone(), planned.process_type.clone())];
        sqlx::query(
            r#"
            INSERT INTO work_order_materials
                (machine_model_id, order_number, material_number, item_name, required_quantity, process_type_id, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, true)
            "#,
        )
        .bind(model_ids[&planned.machine_model])
        .bind(&planned.row.order_number)
        .bind(&planned.row.material_number)
        .bind(&planned.row.item_name)
        .bind(planned.row.required_quantity)
        .bind(process_type_id)
        .execute(&mut *tx)
        .await?;
    }

    for (id, planned) in &plan.updates {
        let process_type_id = process_type_ids[&(planned.machine_model.clone(), planned.process_type.clone())];
        sqlx::query(
            r#"
            UPDATE work_order_materials
            SET item_name = $1, required_quantity = $2, process_type_id = $3,
                is_active = true, updated_at = NOW()
            WHERE id = $4
            "#,
        )
        .bind(&planned.row.item_name)
        .bind(planned.row.required_quantity)
        .bind(process_type_id)
        .bind(id)
        .execute(&mut *tx)
        .await?;
    }

    if !plan.deletes.is_empty() {
        sqlx::query("DELETE FROM work_order_materials WHERE id = ANY($1)")
            .bind(&plan.deletes)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    log::info!(
        "material details import: {} created, {} updated, {} deleted",
        plan.creates.len(),
        plan.updates.len(),
        plan.deletes.len()
    );

    Ok(ImportSummary {
        created: plan.creates.len(),
        updated: plan.updates.len(),
        deleted: plan.deletes.len(),
        warnings: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::excel::{build_workbook, Cell, SheetData};

    const QTY: &str = "需求數量 (EINHEIT)";

    fn table(rows: Vec<Vec<Cell>>) -> SheetTable {
        let mut sheet = SheetData::new("S", vec!["訂單單號", "物料", "物料說明", QTY]);
        for row in rows {
            sheet.push(row);
        }
        SheetTable::from_bytes(&build_workbook(&[sheet]).unwrap()).unwrap()
    }

    fn row(order: &str, material: &str, qty: i64) -> DetailRow {
        DetailRow {
            order_number: order.into(),
            material_number: material.into(),
            item_name: String::new(),
            required_quantity: Decimal::from(qty),
        }
    }

    fn existing(order: &str, material: &str, model: &str) -> ExistingDetail {
        ExistingDetail {
            id: Uuid::new_v4(),
            order_number: order.into(),
            material_number: material.into(),
            machine_model: model.into(),
        }
    }

    fn scopes(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(o, m)| (o.to_string(), m.to_string())).collect()
    }

    #[test]
    fn test_parse_sums_duplicates_and_keeps_first_name() {
        let t = table(vec![
            vec![Cell::from("WO-1"), Cell::from("A"), Cell::from("螺絲"), Cell::Number(2.0)],
            vec![Cell::from("WO-1"), Cell::from("A"), Cell::from("螺絲(舊)"), Cell::Number(3.5)],
            vec![Cell::from("WO-1"), Cell::from("B"), Cell::from("墊片"), Cell::from("n/a")],
        ]);
        let rows = parse_detail_rows(&t, QTY).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].item_name, "螺絲");
        assert_eq!(rows[0].required_quantity, Decimal::new(55, 1));
        assert_eq!(rows[1].required_quantity, Decimal::ZERO);
    }

    #[test]
    fn test_parse_names_missing_quantity_column() {
        let t = table(vec![]);
        let err = parse_detail_rows(&t, "需求數量").unwrap_err();
        assert!(err.to_string().contains("'需求數量'"));
    }

    #[test]
    fn test_plan_requires_parent_scope() {
        let err = plan_material_details(
            &[row("WO-9", "A", 1)],
            &HashMap::new(),
            &ProcessTypeMap::default(),
            &[],
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("訂單 WO-9 的父階範圍不存在"));
    }

    #[test]
    fn test_plan_creates_updates_and_deletes_within_scope() {
        let keep = existing("WO-1", "A", "M1");
        let stale = existing("WO-1", "OLD", "M1");
        let other_order = existing("WO-2", "Z", "M2");
        let parent = existing("WO-1", PARENT_SCOPE, "M1");
        let mut map = ProcessTypeMap::default();
        map.insert("B", "M1", "前段");

        let plan = plan_material_details(
            &[row("WO-1", "A", 4), row("WO-1", "B", 1)],
            &scopes(&[("WO-1", "M1"), ("WO-2", "M2")]),
            &map,
            &[keep.clone(), stale.clone(), other_order, parent],
        )
        .unwrap();

        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].0, keep.id);
        assert_eq!(plan.updates[0].1.process_type, "其他");
        assert_eq!(plan.creates.len(), 1);
        assert_eq!(plan.creates[0].process_type, "前段");
        assert_eq!(plan.creates[0].machine_model, "M1");
        assert_eq!(plan.deletes, vec![stale.id]);
    }

    #[test]
    fn test_plan_ignores_rows_under_previous_model() {
        // Rows left over from a model the order no longer belongs to are out of scope.
        let legacy = existing("WO-1", "A", "M-OLD");
        let plan = plan_material_details(
            &[row("WO-1", "A", 1)],
            &scopes(&[("WO-1", "M1")]),
            &ProcessTypeMap::default(),
            &[legacy],
        )
        .unwrap();
        assert_eq!(plan.creates.len(), 1);
        assert!(plan.updates.is_empty());
        assert!(plan.deletes.is_empty());
    }
}
