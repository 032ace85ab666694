use std::collections::{BTreeSet, HashMap, HashSet};

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::database::Database;
use crate::excel::SheetTable;

use super::{get_or_create_machine_model, ImportSummary, SyncError, PARENT_SCOPE, PARENT_SCOPE_ITEM_NAME};

pub const ORDER_COLUMNS: [&str; 2] = ["訂單單號", "訂單"];
pub const MODEL_COLUMNS: [&str; 2] = ["機型", "物料說明"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OrderModel {
    pub order_number: String,
    pub machine_model: String,
}

impl OrderModel {
    pub fn new(order_number: impl Into<String>, machine_model: impl Into<String>) -> Self {
        Self {
            order_number: order_number.into(),
            machine_model: machine_model.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderModelPlan {
    /// Active (order, model) scopes missing from the upload; all their rows go inactive.
    pub deactivate: Vec<OrderModel>,
    /// Parent-scope rows to upsert, in upload order, with whether each is new.
    pub upserts: Vec<(OrderModel, bool)>,
}

impl OrderModelPlan {
    pub fn created(&self) -> usize {
        self.upserts.iter().filter(|(_, new)| *new).count()
    }

    pub fn updated(&self) -> usize {
        self.upserts.len() - self.created()
    }
}

pub fn parse_order_models(table: &SheetTable) -> Result<Vec<OrderModel>, SyncError> {
    let order_col = table
        .first_present(&ORDER_COLUMNS)
        .ok_or_else(|| SyncError::invalid("上傳的 Excel 檔案中找不到 '訂單單號' 或 '訂單' 欄位。"))?;
    let model_col = table
        .first_present(&MODEL_COLUMNS)
        .ok_or_else(|| SyncError::invalid("上傳的 Excel 檔案中找不到 '機型' 或 '物料說明' 欄位。"))?;

    Ok(table
        .records()
        .filter_map(|r| {
            let order = r.get(order_col);
            let model = r.get(model_col);
            if order.is_empty() || model.is_empty() {
                None
            } else {
                Some(OrderModel::new(order, model))
            }
        })
        .collect())
}

/// Works out the deactivations and parent-scope upserts for an upload.
///
/// `active` holds the (order, model) pairs that currently have active rows,
/// `parent_scopes` maps each order that already has a parent scope to its
/// model. An order may only ever belong to one model, including across rows
/// of the same upload.
pub fn plan_order_models(
    uploaded: &[OrderModel],
    active: &HashSet<OrderModel>,
    parent_scopes: &HashMap<String, String>,
) -> Result<OrderModelPlan, SyncError> {
    let wanted: HashSet<&OrderModel> = uploaded.iter().collect();
    let deactivate = active
        .iter()
        .filter(|pair| !wanted.contains(pair))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut scopes = parent_scopes.clone();
    let mut upserts = Vec::with_capacity(uploaded.len());
    for pair in uploaded {
        let is_new = match scopes.get(&pair.order_number) {
            Some(model) if model != &pair.machine_model => {
                return Err(SyncError::invalid(format!(
                    "訂單 {} 已存在不同的機型 ({})。一個訂單只能有一個機型。",
                    pair.order_number, model
                )));
            }
            Some(_) => false,
            None => true,
        };
        scopes.insert(pair.order_number.clone(), pair.machine_model.clone());
        upserts.push((pair.clone(), is_new));
    }

    Ok(OrderModelPlan { deactivate, upserts })
}

pub async fn import_order_models(db: &Database, table: &SheetTable) -> Result<ImportSummary, SyncError> {
    let uploaded = parse_order_models(table)?;
    let mut tx = db.begin().await?;

    let active: HashSet<OrderModel> = sqlx::query_as::<_, (String, String)>(
        r#"
        SELECT DISTINCT w.order_number, m.name
        FROM work_order_materials w
        JOIN machine_models m ON m.id = w.machine_model_id
        WHERE w.is_active = true
        "#,
    )
    .fetch_all(&mut *tx)
    .await?
    .into_iter()
    .map(|(order, model)| OrderModel::new(order, model))
    .collect();

    let parent_scopes: HashMap<String, String> = sqlx::query_as::<_, (String, String)>(
        r#"
        SELECT w.order_number, m.name
        FROM work_order_materials w
        JOIN machine_models m ON m.id = w.machine_model_id
        WHERE w.material_number = $1
        "#,
    )
    .bind(PARENT_SCOPE)
    .fetch_all(&mut *tx)
    .await?
    .into_iter()
    .collect();

    let plan = plan_order_models(&uploaded, &active, &parent_scopes)?;

    for pair in &plan.deactivate {
        sqlx::query(
            r#"
            UPDATE work_order_materials w SET is_active = false, updated_at = NOW()
            FROM machine_models m
            WHERE m.id = w.machine_model_id AND w.order_number = $1 AND m.name = $2
            "#,
        )
        .bind(&pair.order_number)
        .bind(&pair.machine_model)
        .execute(&mut *tx)
        .await?;
    }

    for (pair, _) in &plan.upserts {
        let model_id = get_or_create_machine_model(&mut *tx, &pair.machine_model).await?;
        let existing = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM work_order_materials WHERE order_number = $1 AND material_number = $2 AND machine_model_id = $3",
        )
        .bind(&pair.order_number)
        .bind(PARENT_SCOPE)
        .bind(model_id)
        .fetch_optional(&mut *tx)
        .await?;

        match existing {
            Some(id) => {
                sqlx::query(
                    r#"
                    UPDATE work_order_materials
                    SET item_name = $1, required_quantity = $2, process_type_id = NULL,
                        is_active = true, updated_at = NOW()
                    WHERE id = $3
                    "#,
                )
                .bind(PARENT_SCOPE_ITEM_NAME)
                .bind(Decimal::ZERO)
                .bind(id)
                .execute(&mut *tx)
                .await?;
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO work_order_materials
                        (machine_model_id, order_number, material_number, item_name, required_quantity, is_active)
                    VALUES ($1, $2, $3, $4, $5, true)
                    "#,
                )
                .bind(model_id)
                .bind(&pair.order_number)
                .bind(PARENT_SCOPE)
                .bind(PARENT_SCOPE_ITEM_NAME)
                .bind(Decimal::ZERO)
                .execute(&mut *tx)
                .await?;
            }
        }
    }

    tx.commit().await?;

    log::info!(
        "order/model import: {} created, {} updated, {} scopes deactivated",
        plan.created(),
        plan.updated(),
        plan.deactivate.len()
    );

    Ok(ImportSummary {
        created: plan.created(),
        updated: plan.updated(),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::excel::{build_workbook, Cell, SheetData};

    fn pair(order: &str, model: &str) -> OrderModel {
        OrderModel::new(order, model)
    }

    #[test]
    fn test_parse_accepts_alias_columns_and_skips_blanks() {
        let bytes = build_workbook(&[SheetData::new("S", vec!["訂單", "物料說明"])
            .row(vec![Cell::from("WO-1"), Cell::from("M1")])
            .row(vec![Cell::from("WO-2"), Cell::Blank])])
        .unwrap();
        let table = SheetTable::from_bytes(&bytes).unwrap();
        assert_eq!(parse_order_models(&table).unwrap(), vec![pair("WO-1", "M1")]);
    }

    #[test]
    fn test_parse_reports_missing_order_column() {
        let bytes = build_workbook(&[SheetData::new("S", vec!["機型"])]).unwrap();
        let table = SheetTable::from_bytes(&bytes).unwrap();
        let err = parse_order_models(&table).unwrap_err();
        assert!(err.to_string().contains("'訂單單號' 或 '訂單'"));
    }

    #[test]
    fn test_plan_deactivates_scopes_missing_from_upload() {
        let active: HashSet<_> = [pair("WO-1", "M1"), pair("WO-2", "M2")].into_iter().collect();
        let scopes: HashMap<_, _> = [("WO-1".to_string(), "M1".to_string()), ("WO-2".to_string(), "M2".to_string())]
            .into_iter()
            .collect();
        let plan = plan_order_models(&[pair("WO-1", "M1"), pair("WO-3", "M3")], &active, &scopes).unwrap();

        assert_eq!(plan.deactivate, vec![pair("WO-2", "M2")]);
        assert_eq!(plan.created(), 1);
        assert_eq!(plan.updated(), 1);
    }

    #[test]
    fn test_plan_rejects_model_change_for_existing_order() {
        let scopes: HashMap<_, _> = [("WO-1".to_string(), "M1".to_string())].into_iter().collect();
        let err = plan_order_models(&[pair("WO-1", "M9")], &HashSet::new(), &scopes).unwrap_err();
        assert_eq!(
            err.to_string(),
            "訂單 WO-1 已存在不同的機型 (M1)。一個訂單只能有一個機型。"
        );
    }

    #[test]
    fn test_plan_rejects_two_models_for_one_order_in_same_upload() {
        let result = plan_order_models(
            &[pair("WO-1", "M1"), pair("WO-1", "M2")],
            &HashSet::new(),
            &HashMap::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_plan_counts_repeated_row_as_update() {
        let plan = plan_order_models(
            &[pair("WO-1", "M1"), pair("WO-1", "M1")],
            &HashSet::new(),
            &HashMap::new(),
        )
        .unwrap();
        assert_eq!((plan.created(), plan.updated()), (1, 1));
        assert!(plan.deactivate.is_empty());
    }
}
