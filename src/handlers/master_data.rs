//! Admin screens for the reference data behind requisitions: order/machine
//! model scopes, work-order material details, stock and storage bins, and
//! the process-type lookup workbook.

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::Multipart;
use askama::Template;
use serde::Deserialize;
use tower_cookies::Cookies;
use uuid::Uuid;

use super::{admin_gate, fields, render, Choice, Layout, RawForm};
use crate::{
    error::AppResult,
    excel::{is_spreadsheet_name, SheetTable},
    filters,
    flash,
    middleware::require_user,
    models::{
        requisition::WORK_ORDER_MATERIAL_SELECT, InventoryRecord, MachineModel, ProcessTypeRow,
        WorkOrderMaterialRow,
    },
    state::AppState,
    sync::{
        material_details::import_material_details,
        order_models::import_order_models,
        process_types::ProcessTypeMap,
        stock::{import_stock, import_storage_bins},
        DEFAULT_DETAILS_QTY_COLUMN,
    },
    utils::{pagination::Page, uploads::MultipartForm},
};

const DATABASE_PAGE_SIZE: usize = 50;
const DUPLICATE_PROCESS_TYPE: &str = "該機型下已存在同名的投料點，請檢查。";

#[derive(Template)]
#[template(path = "master_data/index.html")]
struct MasterDataTemplate {
    layout: Layout,
    default_qty_col: &'static str,
}

#[derive(Template)]
#[template(path = "master_data/work_orders.html")]
struct WorkOrderDatabaseTemplate {
    layout: Layout,
    page: Page<WorkOrderMaterialRow>,
}

#[derive(Template)]
#[template(path = "master_data/inventory.html")]
struct InventoryDatabaseTemplate {
    layout: Layout,
    page: Page<InventoryRecord>,
}

#[derive(Template)]
#[template(path = "master_data/process_type_workbook.html")]
struct WorkbookTemplate {
    layout: Layout,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

#[derive(Template)]
#[template(path = "master_data/process_types.html")]
struct ProcessTypesTemplate {
    layout: Layout,
    process_types: Vec<ProcessTypeRow>,
    machine_models: Vec<Choice>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PageQuery {
    pub page: Option<String>,
}

/// The uploaded `file` field as a sheet, or the message to show instead.
fn upload_table(form: &MultipartForm) -> Result<SheetTable, String> {
    let file = form.file("file").ok_or_else(|| "請選擇要上傳的檔案。".to_string())?;
    if !is_spreadsheet_name(&file.filename) {
        return Err("上傳的檔案必須是 Excel 檔案 (.xlsx, .xls)。".to_string());
    }
    SheetTable::from_bytes(&file.data).map_err(|e| e.to_string())
}

pub async fn index(State(state): State<AppState>, cookies: Cookies) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect.into_response());
    }
    let template = MasterDataTemplate {
        layout: Layout::new(&cookies, &user),
        default_qty_col: DEFAULT_DETAILS_QTY_COLUMN,
    };
    Ok(render(&template)?.into_response())
}

pub async fn upload_order_models(
    State(state): State<AppState>,
    cookies: Cookies,
    multipart: Multipart,
) -> AppResult<Redirect> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect);
    }
    let form = MultipartForm::read(multipart).await?;
    let result = match upload_table(&form) {
        Ok(table) => import_order_models(&state.db, &table).await.map_err(|e| e.to_string()),
        Err(message) => Err(message),
    };

    match result {
        Ok(summary) => {
            log::info!("order/model sync by {}: {:?}", user.username, summary);
            flash::success(&cookies, format!("訂單與機型資料同步成功！{}", summary.describe()));
        }
        Err(message) => flash::error(&cookies, format!("上傳檔案時發生錯誤: {}", message)),
    }
    Ok(Redirect::to("/master-data"))
}

pub async fn upload_material_details(
    State(state): State<AppState>,
    cookies: Cookies,
    multipart: Multipart,
) -> AppResult<Redirect> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect);
    }
    let form = MultipartForm::read(multipart).await?;
    let qty_col = form.text("required_quantity_col").unwrap_or(DEFAULT_DETAILS_QTY_COLUMN).to_string();

    let process_types = match ProcessTypeMap::load(&state.config.process_type_db_path) {
        Ok(map) => map,
        Err(e) => {
            flash::error(&cookies, e.to_string());
            return Ok(Redirect::to("/master-data"));
        }
    };

    let result = match upload_table(&form) {
        Ok(table) => import_material_details(&state.db, &table, &qty_col, &process_types)
            .await
            .map_err(|e| e.to_string()),
        Err(message) => Err(message),
    };

    match result {
        Ok(summary) => {
            log::info!("material details sync by {}: {:?}", user.username, summary);
            flash::success(&cookies, format!("物料明細同步成功！{}", summary.describe()));
        }
        Err(message) => flash::error(&cookies, format!("上傳檔案時發生錯誤: {}", message)),
    }
    Ok(Redirect::to("/master-data"))
}

pub async fn upload_stock(
    State(state): State<AppState>,
    cookies: Cookies,
    multipart: Multipart,
) -> AppResult<Redirect> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect);
    }
    let form = MultipartForm::read(multipart).await?;
    let result = match upload_table(&form) {
        Ok(table) => import_stock(&state.db, &table).await.map_err(|e| e.to_string()),
        Err(message) => Err(message),
    };

    match result {
        Ok(summary) => {
            flash::row_warnings(&cookies, &summary.warnings);
            flash::success(&cookies, format!("庫存資料上傳成功！{}", summary.describe()));
        }
        Err(message) => flash::error(&cookies, format!("上傳檔案時發生錯誤: {}", message)),
    }
    Ok(Redirect::to("/master-data"))
}

pub async fn upload_storage_bins(
    State(state): State<AppState>,
    cookies: Cookies,
    multipart: Multipart,
) -> AppResult<Redirect> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect);
    }
    let form = MultipartForm::read(multipart).await?;
    let result = match upload_table(&form) {
        Ok(table) => import_storage_bins(&state.db, &table).await.map_err(|e| e.to_string()),
        Err(message) => Err(message),
    };

    match result {
        Ok(summary) => {
            flash::row_warnings(&cookies, &summary.warnings);
            flash::success(&cookies, format!("儲格資料上傳成功！{}", summary.describe()));
        }
        Err(message) => flash::error(&cookies, format!("上傳檔案時發生錯誤: {}", message)),
    }
    Ok(Redirect::to("/master-data"))
}

/// Replaces the process-type workbook on disk. A workbook that does not
/// parse as a lookup is still stored, with a warning.
pub async fn upload_process_type_workbook(
    State(state): State<AppState>,
    cookies: Cookies,
    multipart: Multipart,
) -> AppResult<Redirect> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect);
    }
    let form = MultipartForm::read(multipart).await?;
    let file = match form.file("file") {
        Some(file) if is_spreadsheet_name(&file.filename) => file,
        _ => {
            flash::error(&cookies, "更新資料庫時發生錯誤: 上傳的檔案必須是 Excel 檔案 (.xlsx, .xls)。");
            return Ok(Redirect::to("/master-data"));
        }
    };

    let path = &state.config.process_type_db_path;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, &file.data).await?;
    log::info!("{} replaced process type workbook {}", user.username, path.display());

    match ProcessTypeMap::load(path) {
        Ok(map) => flash::success(
            &cookies,
            format!("投料點資料庫 (output.xlsx) 已成功更新！共 {} 筆對照。", map.len()),
        ),
        Err(e) => flash::warning(&cookies, format!("投料點資料庫已儲存，但內容無法使用: {}", e)),
    }
    Ok(Redirect::to("/master-data"))
}

pub async fn view_work_order_database(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(query): Query<PageQuery>,
) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect.into_response());
    }
    let materials = sqlx::query_as::<_, WorkOrderMaterialRow>(&format!(
        "{} ORDER BY w.order_number, w.material_number",
        WORK_ORDER_MATERIAL_SELECT
    ))
    .fetch_all(&state.db)
    .await?;

    let template = WorkOrderDatabaseTemplate {
        layout: Layout::new(&cookies, &user),
        page: Page::paginate(materials, query.page.as_deref(), DATABASE_PAGE_SIZE),
    };
    Ok(render(&template)?.into_response())
}

pub async fn clear_work_order_database(State(state): State<AppState>, cookies: Cookies) -> AppResult<Redirect> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect);
    }
    let deleted = sqlx::query("DELETE FROM work_order_materials")
        .execute(&state.db)
        .await?
        .rows_affected();
    log::warn!("{} cleared {} work order materials", user.username, deleted);
    flash::success(&cookies, "訂單主物料清單資料庫已成功清空。");
    Ok(Redirect::to("/master-data/work-orders"))
}

pub async fn view_inventory_database(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(query): Query<PageQuery>,
) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect.into_response());
    }
    let records = sqlx::query_as::<_, InventoryRecord>(
        "SELECT id, material_number, storage_bin, stock_quantity FROM inventory ORDER BY material_number",
    )
    .fetch_all(&state.db)
    .await?;

    let template = InventoryDatabaseTemplate {
        layout: Layout::new(&cookies, &user),
        page: Page::paginate(records, query.page.as_deref(), DATABASE_PAGE_SIZE),
    };
    Ok(render(&template)?.into_response())
}

/// Concatenates every sheet of the workbook under the union of their headers.
fn concat_sheets(tables: &[SheetTable]) -> (Vec<String>, Vec<Vec<String>>) {
    let mut headers: Vec<String> = Vec::new();
    for table in tables {
        for header in &table.headers {
            if !header.is_empty() && !headers.contains(header) {
                headers.push(header.clone());
            }
        }
    }
    let rows = tables
        .iter()
        .flat_map(|table| {
            let headers = &headers;
            table.records().map(move |record| {
                headers.iter().map(|h| record.get(h).to_string()).collect::<Vec<_>>()
            })
        })
        .collect();
    (headers, rows)
}

pub async fn view_process_type_workbook(State(state): State<AppState>, cookies: Cookies) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect.into_response());
    }

    let path = &state.config.process_type_db_path;
    let (headers, rows) = if !path.exists() {
        flash::error(&cookies, "投料點資料庫檔案 (output.xlsx) 不存在。");
        (Vec::new(), Vec::new())
    } else {
        match SheetTable::all_from_path(path) {
            Ok(tables) => concat_sheets(&tables),
            Err(e) => {
                flash::error(&cookies, format!("讀取投料點資料庫時發生錯誤: {}", e));
                (Vec::new(), Vec::new())
            }
        }
    };

    let template = WorkbookTemplate {
        layout: Layout::new(&cookies, &user),
        headers,
        rows,
    };
    Ok(render(&template)?.into_response())
}

// Process types

pub async fn process_types_page(State(state): State<AppState>, cookies: Cookies) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect.into_response());
    }

    let process_types = sqlx::query_as::<_, ProcessTypeRow>(
        r#"
        SELECT p.id, p.name, p.machine_model_id, m.name AS machine_model
        FROM process_types p
        JOIN machine_models m ON m.id = p.machine_model_id
        ORDER BY m.name, p.name
        "#,
    )
    .fetch_all(&state.db)
    .await?;

    let machine_models = sqlx::query_as::<_, MachineModel>("SELECT id, name FROM machine_models ORDER BY name")
        .fetch_all(&state.db)
        .await?
        .into_iter()
        .map(|m| Choice::new(m.id.to_string(), m.name, ""))
        .collect();

    let template = ProcessTypesTemplate {
        layout: Layout::new(&cookies, &user),
        process_types,
        machine_models,
    };
    Ok(render(&template)?.into_response())
}

/// Add, rename/move or delete a process type, chosen by the `action` field.
pub async fn manage_process_type(
    State(state): State<AppState>,
    cookies: Cookies,
    form: RawForm,
) -> AppResult<Redirect> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect);
    }
    let back = Redirect::to("/master-data/process-types");
    let form = fields(form);
    let process_type_id = form.get("process_type_id").and_then(|v| Uuid::parse_str(v).ok());
    let name = form.get("name");
    let machine_model_id = form.get("machine_model_id").and_then(|v| Uuid::parse_str(v).ok());

    let result = match (form.get("action"), process_type_id, name, machine_model_id) {
        (Some("add"), _, Some(name), Some(model)) => sqlx::query(
            "INSERT INTO process_types (name, machine_model_id) VALUES ($1, $2)",
        )
        .bind(name)
        .bind(model)
        .execute(&state.db)
        .await
        .map(|_| "投料點新增成功！"),
        (Some("edit"), Some(id), Some(name), Some(model)) => sqlx::query(
            "UPDATE process_types SET name = $1, machine_model_id = $2 WHERE id = $3",
        )
        .bind(name)
        .bind(model)
        .bind(id)
        .execute(&state.db)
        .await
        .map(|_| "投料點更新成功！"),
        (Some("delete"), Some(id), _, _) => sqlx::query("DELETE FROM process_types WHERE id = $1")
            .bind(id)
            .execute(&state.db)
            .await
            .map(|_| "投料點刪除成功！"),
        _ => {
            flash::error(&cookies, "表單驗證失敗，請檢查輸入。");
            return Ok(back);
        }
    };

    match result {
        Ok(message) => flash::success(&cookies, message),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            flash::error(&cookies, DUPLICATE_PROCESS_TYPE)
        }
        Err(e) => return Err(e.into()),
    }
    Ok(back)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(headers: &[&str], rows: &[&[&str]]) -> SheetTable {
        SheetTable {
            headers: headers.iter().map(|s| s.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        }
    }

    #[test]
    fn test_concat_sheets_unions_headers() {
        let a = sheet(&["物料", "機型", "投料點"], &[&["A-1", "M1", "前段"]]);
        let b = sheet(&["物料", "投料點", "備註"], &[&["B-2", "後段", "x"]]);
        let (headers, rows) = concat_sheets(&[a, b]);
        assert_eq!(headers, vec!["物料", "機型", "投料點", "備註"]);
        assert_eq!(rows[0], vec!["A-1", "M1", "前段", ""]);
        assert_eq!(rows[1], vec!["B-2", "", "後段", "x"]);
    }

    #[test]
    fn test_upload_table_requires_spreadsheet() {
        let form = MultipartForm::default();
        assert_eq!(upload_table(&form).unwrap_err(), "請選擇要上傳的檔案。");
    }
}
