pub mod reader;
pub mod writer;

use axum::{
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};
use thiserror::Error;

pub use reader::{Record, SheetTable};
pub use writer::{build_workbook, Cell, SheetData};

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

#[derive(Debug, Error)]
pub enum ExcelError {
    #[error("無法讀取 Excel 檔案: {0}")]
    Read(String),
    #[error("Excel 檔案沒有任何工作表")]
    NoSheets,
    #[error("Excel 檔案缺少必要的欄位: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("無法產生 Excel 檔案: {0}")]
    Write(#[from] rust_xlsxwriter::XlsxError),
}

impl From<calamine::Error> for ExcelError {
    fn from(err: calamine::Error) -> Self {
        ExcelError::Read(err.to_string())
    }
}

/// Attachment response for a generated workbook. The filename is sent as
/// RFC 5987 UTF-8 so Chinese names survive.
pub fn xlsx_response(filename: &str, bytes: Vec<u8>) -> Response {
    let disposition = format!(
        "attachment; filename=\"export.xlsx\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    );
    let mut response = bytes.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(XLSX_CONTENT_TYPE));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response
}

/// True when the upload name carries a spreadsheet extension we can parse.
pub fn is_spreadsheet_name(filename: &str) -> bool {
    let lower = filename.to_lowercase();
    lower.ends_with(".xlsx") || lower.ends_with(".xls")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xlsx_response_headers() {
        let response = xlsx_response("盤點差異報告_A01_20240101.xlsx", vec![1, 2, 3]);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], XLSX_CONTENT_TYPE);
        let disposition = headers[header::CONTENT_DISPOSITION].to_str().unwrap();
        assert!(disposition.starts_with("attachment;"));
        assert!(disposition.contains("filename*=UTF-8''%E7%9B%A4"));
    }

    #[test]
    fn test_is_spreadsheet_name() {
        assert!(is_spreadsheet_name("output.XLSX"));
        assert!(is_spreadsheet_name("legacy.xls"));
        assert!(!is_spreadsheet_name("notes.csv"));
    }

    #[test]
    fn test_missing_columns_message() {
        let err = ExcelError::MissingColumns(vec!["物料".into(), "儲格".into()]);
        assert_eq!(err.to_string(), "Excel 檔案缺少必要的欄位: 物料, 儲格");
    }
}
