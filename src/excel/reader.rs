use std::io::Cursor;
use std::path::Path;

use calamine::{open_workbook_auto, open_workbook_auto_from_rs, DataType, Range, Reader};
use rust_decimal::Decimal;
use std::str::FromStr;

use super::ExcelError;

/// A worksheet flattened to a header row plus string cells.
#[derive(Debug, Clone, Default)]
pub struct SheetTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// One data row, addressed by header name.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    table: &'a SheetTable,
    cells: &'a [String],
    /// Spreadsheet row number as the user sees it (header is row 1).
    pub row_number: usize,
}

impl<'a> Record<'a> {
    pub fn get(&self, column: &str) -> &'a str {
        self.table
            .column(column)
            .and_then(|idx| self.cells.get(idx))
            .map(|s| s.as_str())
            .unwrap_or("")
    }

    pub fn opt(&self, column: &str) -> Option<&'a str> {
        let value = self.get(column);
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }

    pub fn decimal(&self, column: &str) -> Option<Decimal> {
        parse_decimal(self.get(column))
    }
}

impl SheetTable {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ExcelError> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
        let first = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or(ExcelError::NoSheets)?;
        let range = workbook
            .worksheet_range(&first)
            .ok_or(ExcelError::NoSheets)??;
        Ok(Self::from_range(&range))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ExcelError> {
        let bytes = std::fs::read(path.as_ref())
            .map_err(|e| ExcelError::Read(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_bytes(&bytes)
    }

    /// Every worksheet of the workbook, in workbook order.
    pub fn all_from_path(path: impl AsRef<Path>) -> Result<Vec<Self>, ExcelError> {
        let mut workbook = open_workbook_auto(path.as_ref())?;
        let mut tables = Vec::new();
        for name in workbook.sheet_names().to_vec() {
            if let Some(range) = workbook.worksheet_range(&name) {
                tables.push(Self::from_range(&range?));
            }
        }
        Ok(tables)
    }

    fn from_range(range: &Range<DataType>) -> Self {
        let mut rows = range.rows();
        let headers = match rows.next() {
            Some(header) => header.iter().map(cell_to_string).collect(),
            None => return Self::default(),
        };
        let rows = rows
            .map(|row| row.iter().map(cell_to_string).collect::<Vec<_>>())
            .filter(|row| row.iter().any(|c| !c.is_empty()))
            .collect();
        Self { headers, rows }
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn require_columns(&self, names: &[&str]) -> Result<(), ExcelError> {
        let missing: Vec<String> = names
            .iter()
            .filter(|n| !self.has_column(n))
            .map(|n| n.to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ExcelError::MissingColumns(missing))
        }
    }

    /// First header out of a list of accepted aliases.
    pub fn first_present<'n>(&self, aliases: &[&'n str]) -> Option<&'n str> {
        aliases.iter().copied().find(|a| self.has_column(a))
    }

    pub fn records(&self) -> impl Iterator<Item = Record<'_>> {
        self.rows.iter().enumerate().map(move |(idx, cells)| Record {
            table: self,
            cells,
            row_number: idx + 2,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Whole-number floats lose their ".0" so codes like 100234 stay text-shaped.
pub fn cell_to_string(cell: &DataType) -> String {
    match cell {
        DataType::Empty => String::new(),
        DataType::String(s) => s.trim().to_string(),
        DataType::Int(i) => i.to_string(),
        DataType::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        DataType::Float(f) => f.to_string(),
        other => other.to_string().trim().to_string(),
    }
}

pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim().replace(',', "");
    if trimmed.is_empty() {
        return None;
    }
    Decimal::from_str(&trimmed)
        .or_else(|_| Decimal::from_scientific(&trimmed))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::excel::{build_workbook, Cell, SheetData};

    fn dec(s: &str) -> Decimal {
        Decimal::from_str_exact(s).unwrap()
    }

    fn sample_workbook() -> Vec<u8> {
        let sheet = SheetData::new(
            "Sheet1",
            vec!["訂單單號", " 物料 ", "需求數量 (EINHEIT)"],
        )
        .row(vec![Cell::from("WO-1"), Cell::Number(100234.0), Cell::Number(2.5)])
        .row(vec![Cell::Blank, Cell::Blank, Cell::Blank])
        .row(vec![Cell::from("WO-2"), Cell::from("A-7"), Cell::from("abc")]);
        build_workbook(&[sheet]).unwrap()
    }

    #[test]
    fn test_reads_headers_trimmed_and_skips_blank_rows() {
        let table = SheetTable::from_bytes(&sample_workbook()).unwrap();
        assert_eq!(table.headers, vec!["訂單單號", "物料", "需求數量 (EINHEIT)"]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_integral_numbers_read_as_plain_text() {
        let table = SheetTable::from_bytes(&sample_workbook()).unwrap();
        let first = table.records().next().unwrap();
        assert_eq!(first.get("物料"), "100234");
        assert_eq!(first.decimal("需求數量 (EINHEIT)"), Some(dec("2.5")));
        assert_eq!(first.row_number, 2);
    }

    #[test]
    fn test_non_numeric_quantity_is_none() {
        let table = SheetTable::from_bytes(&sample_workbook()).unwrap();
        let second = table.records().nth(1).unwrap();
        assert_eq!(second.get("物料"), "A-7");
        assert_eq!(second.decimal("需求數量 (EINHEIT)"), None);
        assert_eq!(second.get("不存在"), "");
        assert_eq!(second.opt("不存在"), None);
    }

    #[test]
    fn test_require_and_alias_columns() {
        let table = SheetTable::from_bytes(&sample_workbook()).unwrap();
        assert!(table.require_columns(&["訂單單號", "物料"]).is_ok());
        match table.require_columns(&["物料", "儲格", "未限制"]) {
            Err(ExcelError::MissingColumns(cols)) => assert_eq!(cols, vec!["儲格", "未限制"]),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(table.first_present(&["訂單", "訂單單號"]), Some("訂單單號"));
        assert_eq!(table.first_present(&["機型", "物料說明"]), None);
    }

    #[test]
    fn test_all_sheets_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.xlsx");
        let bytes = build_workbook(&[
            SheetData::new("A", vec!["物料", "機型", "投料點"])
                .row(vec![Cell::from("1234567890-01"), Cell::from("M1"), Cell::from("前段")]),
            SheetData::new("B", vec!["物料", "機型", "投料點"])
                .row(vec![Cell::from("9999999999"), Cell::from("M2"), Cell::from("後段")]),
        ])
        .unwrap();
        std::fs::write(&path, bytes).unwrap();

        let tables = SheetTable::all_from_path(&path).unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[1].records().next().unwrap().get("投料點"), "後段");
    }

    #[test]
    fn test_parse_decimal_variants() {
        assert_eq!(parse_decimal(" 1,200 "), Some(dec("1200")));
        assert_eq!(parse_decimal("1e2"), Some(dec("100")));
        assert_eq!(parse_decimal(""), None);
        assert_eq!(parse_decimal("n/a"), None);
    }
}
