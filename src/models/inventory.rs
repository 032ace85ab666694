use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::workflow::{CountStatus, StocktakeStatus};

pub const MATERIAL_SELECT: &str = r#"
    SELECT mt.id, mt.location_id, l.name AS location, mt.bin, mt.material_code,
           mt.material_description, mt.system_quantity, mt.last_counted_date,
           mt.latest_counted_quantity, u.username AS last_counted_by_name
    FROM materials mt
    JOIN storage_locations l ON l.id = mt.location_id
    LEFT JOIN users u ON u.id = mt.last_counted_by
"#;

pub const STOCKTAKE_SELECT: &str = r#"
    SELECT s.id, s.stocktake_id, s.name, u.username AS created_by_name, s.created_at, s.status,
           (SELECT COUNT(*) FROM stocktake_items i WHERE i.stocktake_id = s.id) AS item_count,
           (SELECT COUNT(*) FROM stocktake_items i
             WHERE i.stocktake_id = s.id AND i.counted_quantity IS NOT NULL) AS counted_count
    FROM stocktakes s
    JOIN users u ON u.id = s.created_by
"#;

pub const STOCKTAKE_ITEM_SELECT: &str = r#"
    SELECT i.id, i.material_id, l.name AS location, mt.bin, mt.material_code,
           mt.material_description, i.system_quantity_on_record, i.counted_quantity, i.status
    FROM stocktake_items i
    JOIN materials mt ON mt.id = i.material_id
    JOIN storage_locations l ON l.id = mt.location_id
"#;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MaterialRow {
    pub id: Uuid,
    pub location_id: Uuid,
    pub location: String,
    pub bin: String,
    pub material_code: String,
    pub material_description: String,
    pub system_quantity: i32,
    pub last_counted_date: Option<DateTime<Utc>>,
    pub latest_counted_quantity: Option<i32>,
    pub last_counted_by_name: Option<String>,
}

impl MaterialRow {
    /// Counted minus system quantity, once the material has been counted.
    pub fn difference(&self) -> Option<i32> {
        difference(self.system_quantity, self.latest_counted_quantity)
    }

    pub fn has_difference(&self) -> bool {
        matches!(self.difference(), Some(d) if d != 0)
    }
}

pub fn difference(system: i32, counted: Option<i32>) -> Option<i32> {
    counted.map(|c| c - system)
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LocationStats {
    pub location: String,
    pub total_items: i64,
    pub uncounted_items: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DifferenceStats {
    pub location: String,
    pub difference_items: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StocktakeRow {
    pub id: Uuid,
    pub stocktake_id: String,
    pub name: Option<String>,
    pub created_by_name: String,
    pub created_at: DateTime<Utc>,
    pub status: String,
    pub item_count: i64,
    pub counted_count: i64,
}

impl StocktakeRow {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().filter(|n| !n.is_empty()).unwrap_or(&self.stocktake_id)
    }

    pub fn status_label(&self) -> &str {
        StocktakeStatus::label_for(&self.status)
    }

    pub fn is_in_progress(&self) -> bool {
        self.status == StocktakeStatus::InProgress.as_str()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StocktakeItemRow {
    pub id: Uuid,
    pub material_id: Uuid,
    pub location: String,
    pub bin: String,
    pub material_code: String,
    pub material_description: String,
    pub system_quantity_on_record: i32,
    pub counted_quantity: Option<i32>,
    pub status: String,
}

impl StocktakeItemRow {
    pub fn difference(&self) -> Option<i32> {
        difference(self.system_quantity_on_record, self.counted_quantity)
    }

    pub fn status_label(&self) -> &str {
        CountStatus::label_for(&self.status)
    }
}

/// Stock lookup row keyed by material number.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InventoryRecord {
    pub id: Uuid,
    pub material_number: String,
    pub storage_bin: Option<String>,
    pub stock_quantity: Decimal,
}

/// Stocktake ids run `ST-1`, `ST-2`, ... after the highest existing number.
pub fn next_stocktake_id(highest: Option<i32>) -> String {
    format!("ST-{}", highest.unwrap_or(0) + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_difference_only_when_counted() {
        assert_eq!(difference(10, None), None);
        assert_eq!(difference(10, Some(7)), Some(-3));
        assert_eq!(difference(10, Some(10)), Some(0));
    }

    #[test]
    fn test_next_stocktake_id() {
        assert_eq!(next_stocktake_id(None), "ST-1");
        assert_eq!(next_stocktake_id(Some(41)), "ST-42");
    }

    #[test]
    fn test_stocktake_display_name() {
        let mut row = StocktakeRow {
            id: Uuid::new_v4(),
            stocktake_id: "ST-3".into(),
            name: Some(String::new()),
            created_by_name: "admin".into(),
            created_at: Utc::now(),
            status: "in_progress".into(),
            item_count: 2,
            counted_count: 0,
        };
        assert_eq!(row.display_name(), "ST-3");
        row.name = Some("年中盤點".into());
        assert_eq!(row.display_name(), "年中盤點");
        assert!(row.is_in_progress());
    }
}
