use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::workflow::{requisition_status_label, RequisitionStatus, WorkflowError};

/// Requisition joined with its people, current item count and the machine
/// models found on the order. Append `WHERE`/`ORDER BY` clauses as needed.
pub const REQUISITION_SELECT: &str = r#"
    SELECT r.id, r.order_number, r.applicant_id,
           u.username AS applicant_username,
           TRIM(u.first_name || ' ' || u.last_name) AS applicant_name,
           r.request_date, r.process_type, r.status, r.dispatch_performed,
           mc.username AS material_confirmed_by_name, r.material_confirmed_date,
           so.username AS sign_off_by_name, r.sign_off_date, r.remarks,
           r.current_material_list_version_id, r.created_at, r.updated_at,
           (SELECT COUNT(*) FROM requisition_items i
             WHERE i.material_list_version_id = r.current_material_list_version_id) AS item_count,
           COALESCE((SELECT string_agg(DISTINCT m.name, ', ' ORDER BY m.name)
                       FROM work_order_materials w
                       JOIN machine_models m ON m.id = w.machine_model_id
                      WHERE w.order_number = r.order_number), '') AS machine_models
    FROM requisitions r
    JOIN users u ON u.id = r.applicant_id
    LEFT JOIN users mc ON mc.id = r.material_confirmed_by
    LEFT JOIN users so ON so.id = r.sign_off_by
"#;

pub const VERSION_SELECT: &str = r#"
    SELECT v.id, v.requisition_id, v.uploaded_at, u.username AS uploaded_by_name,
           (SELECT COUNT(*) FROM requisition_items i WHERE i.material_list_version_id = v.id) AS item_count,
           COALESCE(r.current_material_list_version_id = v.id, false) AS is_current
    FROM material_list_versions v
    JOIN requisitions r ON r.id = v.requisition_id
    LEFT JOIN users u ON u.id = v.uploaded_by
"#;

/// Requisition items with the machine model of their source material and
/// the live inventory bin/stock for the material number.
pub const ITEM_SELECT: &str = r#"
    SELECT i.id, i.material_list_version_id, i.source_material_id, i.order_number,
           i.material_number, i.item_name, i.required_quantity, i.stock_quantity,
           i.storage_bin, i.confirmed_quantity, i.is_signed_off,
           m.name AS machine_model,
           inv.storage_bin AS inventory_bin, inv.stock_quantity AS inventory_stock
    FROM requisition_items i
    LEFT JOIN work_order_materials w ON w.id = i.source_material_id
    LEFT JOIN machine_models m ON m.id = w.machine_model_id
    LEFT JOIN inventory inv ON inv.material_number = i.material_number
"#;

pub const WORK_ORDER_MATERIAL_SELECT: &str = r#"
    SELECT w.id, w.machine_model_id, m.name AS machine_model, w.order_number,
           w.material_number, w.item_name, w.required_quantity, w.process_type_id,
           p.name AS process_type, w.confirmed_quantity, w.is_signed_off, w.is_active,
           (SELECT COUNT(*) FROM requisition_items i WHERE i.source_material_id = w.id) AS import_count,
           inv.storage_bin, inv.stock_quantity
    FROM work_order_materials w
    LEFT JOIN machine_models m ON m.id = w.machine_model_id
    LEFT JOIN process_types p ON p.id = w.process_type_id
    LEFT JOIN inventory inv ON inv.material_number = w.material_number
"#;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RequisitionRow {
    pub id: Uuid,
    pub order_number: String,
    pub applicant_id: Uuid,
    pub applicant_username: String,
    pub applicant_name: String,
    pub request_date: NaiveDate,
    pub process_type: Option<String>,
    pub status: String,
    pub dispatch_performed: bool,
    pub material_confirmed_by_name: Option<String>,
    pub material_confirmed_date: Option<DateTime<Utc>>,
    pub sign_off_by_name: Option<String>,
    pub sign_off_date: Option<DateTime<Utc>>,
    pub remarks: Option<String>,
    pub current_material_list_version_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub item_count: i64,
    pub machine_models: String,
}

impl RequisitionRow {
    pub fn status_enum(&self) -> Result<RequisitionStatus, WorkflowError> {
        self.status.parse()
    }

    pub fn status_label(&self) -> &str {
        requisition_status_label(&self.status)
    }

    pub fn is_pending(&self) -> bool {
        self.status == RequisitionStatus::Pending.as_str()
    }

    pub fn has_materials(&self) -> bool {
        self.item_count > 0
    }

    pub fn process_type_name(&self) -> &str {
        self.process_type.as_deref().unwrap_or("")
    }

    pub fn applicant_display(&self) -> &str {
        if self.applicant_name.is_empty() {
            &self.applicant_username
        } else {
            &self.applicant_name
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct VersionRow {
    pub id: Uuid,
    pub requisition_id: Uuid,
    pub uploaded_at: DateTime<Utc>,
    pub uploaded_by_name: Option<String>,
    pub item_count: i64,
    pub is_current: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RequisitionItemRow {
    pub id: Uuid,
    pub material_list_version_id: Uuid,
    pub source_material_id: Option<Uuid>,
    pub order_number: String,
    pub material_number: String,
    pub item_name: String,
    pub required_quantity: Decimal,
    pub stock_quantity: Decimal,
    pub storage_bin: Option<String>,
    pub confirmed_quantity: Option<Decimal>,
    pub is_signed_off: bool,
    pub machine_model: Option<String>,
    pub inventory_bin: Option<String>,
    pub inventory_stock: Option<Decimal>,
}

impl RequisitionItemRow {
    pub fn over_required(&self) -> bool {
        matches!(self.confirmed_quantity, Some(q) if q > self.required_quantity)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkOrderMaterialRow {
    pub id: Uuid,
    pub machine_model_id: Option<Uuid>,
    pub machine_model: Option<String>,
    pub order_number: String,
    pub material_number: Option<String>,
    pub item_name: Option<String>,
    pub required_quantity: Decimal,
    pub process_type_id: Option<Uuid>,
    pub process_type: Option<String>,
    pub confirmed_quantity: Option<Decimal>,
    pub is_signed_off: bool,
    pub is_active: bool,
    pub import_count: i64,
    pub storage_bin: Option<String>,
    pub stock_quantity: Option<Decimal>,
}

impl WorkOrderMaterialRow {
    pub fn dispatched(&self) -> Decimal {
        self.confirmed_quantity.unwrap_or(Decimal::ZERO)
    }

    /// Required minus dispatched; never negative.
    pub fn shortage(&self) -> Decimal {
        shortage(self.required_quantity, self.confirmed_quantity)
    }
}

pub fn shortage(required: Decimal, confirmed: Option<Decimal>) -> Decimal {
    (required - confirmed.unwrap_or(Decimal::ZERO)).max(Decimal::ZERO)
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ImageRow {
    pub id: Uuid,
    pub image_path: String,
    pub uploaded_at: DateTime<Utc>,
    pub uploaded_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MachineModel {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProcessTypeRow {
    pub id: Uuid,
    pub name: String,
    pub machine_model_id: Uuid,
    pub machine_model: String,
}

/// A process type offered when creating a requisition for an order.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProcessTypeOption {
    pub id: Uuid,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(required: i64, confirmed: Option<i64>) -> RequisitionItemRow {
        RequisitionItemRow {
            id: Uuid::new_v4(),
            material_list_version_id: Uuid::new_v4(),
            source_material_id: None,
            order_number: "WO-1".into(),
            material_number: "M-1".into(),
            item_name: "螺絲".into(),
            required_quantity: Decimal::from(required),
            stock_quantity: Decimal::ZERO,
            storage_bin: None,
            confirmed_quantity: confirmed.map(Decimal::from),
            is_signed_off: false,
            machine_model: None,
            inventory_bin: None,
            inventory_stock: None,
        }
    }

    #[test]
    fn test_over_required() {
        assert!(item(3, Some(5)).over_required());
        assert!(!item(3, Some(3)).over_required());
        assert!(!item(3, None).over_required());
    }

    #[test]
    fn test_shortage_never_negative() {
        assert_eq!(shortage(Decimal::from(10), Some(Decimal::from(4))), Decimal::from(6));
        assert_eq!(shortage(Decimal::from(10), None), Decimal::from(10));
        assert_eq!(shortage(Decimal::from(2), Some(Decimal::from(5))), Decimal::ZERO);
    }
}
