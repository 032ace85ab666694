use std::collections::HashMap;
use std::path::Path;

use crate::excel::{ExcelError, SheetTable};

use super::{SyncError, DEFAULT_PROCESS_TYPE};

const MATERIAL_PREFIX_LEN: usize = 10;

/// Feeding-point lookup built from the process-type workbook: every sheet
/// with columns `物料`, `機型` and `投料點`, keyed on the first ten
/// characters of the material number plus the machine model.
#[derive(Debug, Clone, Default)]
pub struct ProcessTypeMap {
    entries: HashMap<(String, String), String>,
}

pub fn material_prefix(material: &str) -> String {
    material.chars().take(MATERIAL_PREFIX_LEN).collect()
}

impl ProcessTypeMap {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let tables = SheetTable::all_from_path(path.as_ref()).map_err(|e| {
            SyncError::invalid(format!("讀取投料點資料庫 (output.xlsx) 時發生錯誤: {}", e))
        })?;
        Self::from_tables(&tables)
    }

    pub fn from_tables(tables: &[SheetTable]) -> Result<Self, SyncError> {
        let mut map = Self::default();
        for table in tables {
            if table.headers.is_empty() {
                continue;
            }
            table.require_columns(&["物料", "機型", "投料點"]).map_err(|e| match e {
                ExcelError::MissingColumns(_) => SyncError::invalid(
                    "output.xlsx 檔案中必須包含 '物料', '機型', '投料點' 欄位。",
                ),
                other => other.into(),
            })?;
            for record in table.records() {
                let key = (material_prefix(record.get("物料")), record.get("機型").to_string());
                // Later sheets win on duplicate keys.
                map.entries.insert(key, record.get("投料點").to_string());
            }
        }
        Ok(map)
    }

    pub fn insert(&mut self, material: &str, machine_model: &str, process_type: &str) {
        self.entries.insert(
            (material_prefix(material), machine_model.to_string()),
            process_type.to_string(),
        );
    }

    /// Process type for a material, or `其他` when the workbook has no entry.
    pub fn lookup(&self, material: &str, machine_model: &str) -> String {
        self.entries
            .get(&(material_prefix(material), machine_model.to_string()))
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_PROCESS_TYPE)
            .to_string()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::excel::{build_workbook, Cell, SheetData};

    #[test]
    fn test_prefix_is_character_based() {
        assert_eq!(material_prefix("1234567890-ABC"), "1234567890");
        assert_eq!(material_prefix("短碼"), "短碼");
        assert_eq!(material_prefix("物料編號一二三四五六七"), "物料編號一二三四五六");
    }

    #[test]
    fn test_lookup_matches_on_prefix_and_model() {
        let mut map = ProcessTypeMap::default();
        map.insert("1234567890", "M1", "前段");
        assert_eq!(map.lookup("1234567890-01", "M1"), "前段");
        assert_eq!(map.lookup("1234567890-01", "M2"), "其他");
        assert_eq!(map.lookup("99", "M1"), "其他");
    }

    #[test]
    fn test_load_concatenates_all_sheets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.xlsx");
        let bytes = build_workbook(&[
            SheetData::new("M1", vec!["物料", "機型", "投料點"])
                .row(vec![Cell::from("AAAAAAAAAA01"), Cell::from("M1"), Cell::from("組裝")]),
            SheetData::new("M2", vec!["物料", "機型", "投料點"])
                .row(vec![Cell::from("BBBBBBBBBB"), Cell::from("M2"), Cell::from("包裝")]),
        ])
        .unwrap();
        std::fs::write(&path, bytes).unwrap();

        let map = ProcessTypeMap::load(&path).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.lookup("AAAAAAAAAA99", "M1"), "組裝");
        assert_eq!(map.lookup("BBBBBBBBBB", "M2"), "包裝");
    }

    #[test]
    fn test_sheet_without_required_columns_is_rejected() {
        let bytes = build_workbook(&[SheetData::new("bad", vec!["物料", "機型"])]).unwrap();
        let table = SheetTable::from_bytes(&bytes).unwrap();
        let err = ProcessTypeMap::from_tables(&[table]).unwrap_err();
        assert!(err.to_string().contains("投料點"));
    }

    #[test]
    fn test_missing_workbook_is_reported() {
        let err = ProcessTypeMap::load("/nonexistent/output.xlsx").unwrap_err();
        assert!(err.to_string().starts_with("讀取投料點資料庫"));
    }
}
