use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_xlsxwriter::{Format, FormatBorder, Workbook};

use super::ExcelError;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
    Blank,
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<Option<String>> for Cell {
    fn from(value: Option<String>) -> Self {
        value.map(Cell::Text).unwrap_or(Cell::Blank)
    }
}

impl From<i32> for Cell {
    fn from(value: i32) -> Self {
        Cell::Number(value as f64)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Number(value as f64)
    }
}

impl From<Option<i32>> for Cell {
    fn from(value: Option<i32>) -> Self {
        value.map(Cell::from).unwrap_or(Cell::Blank)
    }
}

impl From<Decimal> for Cell {
    fn from(value: Decimal) -> Self {
        value.to_f64().map(Cell::Number).unwrap_or(Cell::Blank)
    }
}

impl From<Option<Decimal>> for Cell {
    fn from(value: Option<Decimal>) -> Self {
        value.map(Cell::from).unwrap_or(Cell::Blank)
    }
}

/// One worksheet to export: a bold header row followed by data rows.
#[derive(Debug, Clone)]
pub struct SheetData {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl SheetData {
    pub fn new<S: Into<String>>(name: &str, headers: Vec<S>) -> Self {
        Self {
            name: name.to_string(),
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn row(mut self, cells: Vec<Cell>) -> Self {
        self.rows.push(cells);
        self
    }

    pub fn push(&mut self, cells: Vec<Cell>) {
        self.rows.push(cells);
    }
}

pub fn build_workbook(sheets: &[SheetData]) -> Result<Vec<u8>, ExcelError> {
    let mut workbook = Workbook::new();
    let header_fmt = Format::new().set_bold().set_border(FormatBorder::Thin);

    for sheet in sheets {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(&sheet.name)?;

        for (col, title) in sheet.headers.iter().enumerate() {
            worksheet.write_string_with_format(0, col as u16, title, &header_fmt)?;
            let width = (title.chars().count() * 2 + 4).clamp(10, 40);
            worksheet.set_column_width(col as u16, width as f64)?;
        }

        for (idx, cells) in sheet.rows.iter().enumerate() {
            let row = (idx + 1) as u32;
            for (col, cell) in cells.iter().enumerate() {
                match cell {
                    Cell::Text(text) => {
                        worksheet.write_string(row, col as u16, text)?;
                    }
                    Cell::Number(n) => {
                        worksheet.write_number(row, col as u16, *n)?;
                    }
                    Cell::Blank => {}
                }
            }
        }
    }

    Ok(workbook.save_to_buffer()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::excel::SheetTable;

    #[test]
    fn test_empty_export_still_has_headers() {
        let bytes = build_workbook(&[SheetData::new("盤點差異", vec!["物料", "差異"])]).unwrap();
        let table = SheetTable::from_bytes(&bytes).unwrap();
        assert_eq!(table.headers, vec!["物料", "差異"]);
        assert!(table.is_empty());
    }

    #[test]
    fn test_decimal_and_optional_cells() {
        assert_eq!(Cell::from(Decimal::new(125, 2)), Cell::Number(1.25));
        assert_eq!(Cell::from(None::<Decimal>), Cell::Blank);
        assert_eq!(Cell::from(Some(7_i32)), Cell::Number(7.0));
        assert_eq!(Cell::from(None::<String>), Cell::Blank);
    }

    #[test]
    fn test_two_sheet_export() {
        let mut items = SheetData::new("撥料物料明細", vec!["物料", "需求數量"]);
        items.push(vec![Cell::from("M-1"), Cell::from(Decimal::new(3, 0))]);
        let bytes = build_workbook(&[
            SheetData::new("撥料申請單", vec!["訂單單號"]).row(vec![Cell::from("WO-9")]),
            items,
        ])
        .unwrap();
        assert!(bytes.starts_with(b"PK"));
        let first = SheetTable::from_bytes(&bytes).unwrap();
        assert_eq!(first.records().next().unwrap().get("訂單單號"), "WO-9");
    }
}
