//! Admin inventory screens: the material master, counting by storage
//! location, count differences and manual stock adjustments.

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Json, Redirect, Response},
};
use axum_extra::extract::Multipart;
use askama::Template;
use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_cookies::Cookies;
use uuid::Uuid;

use super::{admin_gate, fields, non_empty, render, Layout, RawForm};
use crate::{
    error::{AppError, AppResult},
    excel::{build_workbook, is_spreadsheet_name, xlsx_response, Cell, SheetData, SheetTable},
    filters,
    flash,
    middleware::require_user,
    models::{
        inventory::{next_stocktake_id, MATERIAL_SELECT},
        DifferenceStats, ImageRow, LocationStats, MaterialRow,
    },
    state::AppState,
    sync::material_master::import_material_master,
    utils::{
        forms::parse_optional_int,
        sort::{query_string, SortHeader, SortSpec},
        uploads::{save_image, MultipartForm},
    },
    workflow::TransactionType,
};

const MATERIAL_SORTS: [(&str, &str); 7] = [
    ("location", "l.name"),
    ("bin", "mt.bin"),
    ("material_code", "mt.material_code"),
    ("material_description", "mt.material_description"),
    ("system_quantity", "mt.system_quantity"),
    ("last_counted_date", "mt.last_counted_date"),
    ("latest_counted_quantity", "mt.latest_counted_quantity"),
];

const MATERIAL_COLUMNS: [(&str, &str); 7] = [
    ("location", "庫位"),
    ("bin", "儲格"),
    ("material_code", "物料"),
    ("material_description", "物料說明"),
    ("system_quantity", "系統庫存"),
    ("latest_counted_quantity", "最新盤點數量"),
    ("last_counted_date", "上次盤點日期"),
];

const ADJUSTMENT_NOTE: &str = "手動庫存操作";

/// Counted and system quantity disagree; uncounted materials are left out.
const HAS_DIFFERENCE: &str =
    "mt.latest_counted_quantity IS NOT NULL AND mt.latest_counted_quantity <> mt.system_quantity";

#[derive(Template)]
#[template(path = "inventory/dashboard.html")]
struct DashboardTemplate {
    layout: Layout,
    material_count: i64,
    location_count: i64,
    open_stocktakes: i64,
}

#[derive(Template)]
#[template(path = "inventory/update.html")]
struct UpdateTemplate {
    layout: Layout,
    columns: String,
}

#[derive(Template)]
#[template(path = "inventory/stocktake_locations.html")]
struct StocktakeLocationsTemplate {
    layout: Layout,
    locations: Vec<LocationStats>,
}

#[derive(Template)]
#[template(path = "inventory/location_count.html")]
struct LocationCountTemplate {
    layout: Layout,
    location: String,
    materials: Vec<MaterialRow>,
}

#[derive(Template)]
#[template(path = "inventory/difference_locations.html")]
struct DifferenceLocationsTemplate {
    layout: Layout,
    locations: Vec<DifferenceStats>,
}

#[derive(Template)]
#[template(path = "inventory/difference_detail.html")]
struct DifferenceDetailTemplate {
    layout: Layout,
    location: String,
    materials: Vec<MaterialRow>,
}

#[derive(Template)]
#[template(path = "inventory/materials.html")]
struct MaterialListTemplate {
    layout: Layout,
    materials: Vec<MaterialRow>,
    headers: Vec<SortHeader>,
    location_filter: String,
}

#[derive(Template)]
#[template(path = "inventory/material_images.html")]
struct MaterialImagesTemplate {
    layout: Layout,
    material: MaterialRow,
    images: Vec<ImageRow>,
}

pub async fn dashboard(State(state): State<AppState>, cookies: Cookies) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect.into_response());
    }

    let (material_count, location_count, open_stocktakes) = sqlx::query_as::<_, (i64, i64, i64)>(
        r#"
        SELECT (SELECT COUNT(*) FROM materials),
               (SELECT COUNT(*) FROM storage_locations),
               (SELECT COUNT(*) FROM stocktakes WHERE status = 'in_progress')
        "#,
    )
    .fetch_one(&state.db)
    .await?;

    let template = DashboardTemplate {
        layout: Layout::new(&cookies, &user),
        material_count,
        location_count,
        open_stocktakes,
    };
    Ok(render(&template)?.into_response())
}

pub async fn update_page(State(state): State<AppState>, cookies: Cookies) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect.into_response());
    }
    let template = UpdateTemplate {
        layout: Layout::new(&cookies, &user),
        columns: crate::sync::material_master::MASTER_COLUMNS.join("、"),
    };
    Ok(render(&template)?.into_response())
}

/// Material master upload (`excel_file`).
pub async fn import_master(
    State(state): State<AppState>,
    cookies: Cookies,
    multipart: Multipart,
) -> AppResult<Redirect> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect);
    }

    let form = MultipartForm::read(multipart).await?;
    let Some(file) = form.file("excel_file") else {
        flash::error(&cookies, "請選擇要上傳的檔案。");
        return Ok(Redirect::to("/inventory/update"));
    };
    if !is_spreadsheet_name(&file.filename) {
        flash::error(&cookies, "上傳的檔案必須是 Excel 檔案 (.xlsx, .xls)。");
        return Ok(Redirect::to("/inventory/update"));
    }

    let result = match SheetTable::from_bytes(&file.data) {
        Ok(table) => import_material_master(&state.db, &table, Some(user.id), &file.filename)
            .await
            .map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };

    match result {
        Ok(summary) => {
            flash::success(
                &cookies,
                format!("成功匯入/更新 {} 筆主物料資料。", summary.created + summary.updated),
            );
            Ok(Redirect::to("/inventory"))
        }
        Err(message) => {
            flash::error(&cookies, format!("匯入失敗: {}", message));
            Ok(Redirect::to("/inventory/update"))
        }
    }
}

// Counting by location

pub async fn stocktake_locations(State(state): State<AppState>, cookies: Cookies) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect.into_response());
    }

    let locations = sqlx::query_as::<_, LocationStats>(
        r#"
        SELECT l.name AS location,
               COUNT(mt.id) AS total_items,
               COUNT(mt.id) FILTER (WHERE mt.latest_counted_quantity IS NULL) AS uncounted_items
        FROM materials mt
        JOIN storage_locations l ON l.id = mt.location_id
        WHERE l.name <> ''
        GROUP BY l.name
        ORDER BY l.name
        "#,
    )
    .fetch_all(&state.db)
    .await?;

    let template = StocktakeLocationsTemplate {
        layout: Layout::new(&cookies, &user),
        locations,
    };
    Ok(render(&template)?.into_response())
}

pub async fn location_count_page(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(location): Path<String>,
) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect.into_response());
    }

    let materials = sqlx::query_as::<_, MaterialRow>(&format!(
        "{} WHERE l.name = $1 ORDER BY mt.bin, mt.material_code",
        MATERIAL_SELECT
    ))
    .bind(&location)
    .fetch_all(&state.db)
    .await?;

    let template = LocationCountTemplate {
        layout: Layout::new(&cookies, &user),
        location,
        materials,
    };
    Ok(render(&template)?.into_response())
}

#[derive(Debug, Deserialize)]
pub struct CountUpdate {
    pub material_id: Uuid,
    #[serde(default)]
    pub quantity: Value,
}

#[derive(Serialize)]
pub struct CountUpdated {
    pub success: bool,
    pub message: &'static str,
    pub last_counted_by: String,
    pub last_counted_date: String,
}

/// A blank or null count clears the material's latest count.
fn parse_count(value: &Value) -> Result<Option<i32>, String> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => parse_optional_int(s),
        Value::Number(n) => n
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| format!("無效的數量: '{}'", n)),
        other => Err(format!("無效的數量: '{}'", other)),
    }
}

/// Records one material's count from the per-location counting page.
pub async fn update_counted_quantity(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(body): Json<CountUpdate>,
) -> Response {
    match record_count(&state, &cookies, body).await {
        Ok(updated) => Json(updated).into_response(),
        Err(e) => e.into_json(),
    }
}

async fn record_count(state: &AppState, cookies: &Cookies, body: CountUpdate) -> AppResult<CountUpdated> {
    let user = require_user(cookies, state).await?;
    user.require_admin()?;
    let quantity = parse_count(&body.quantity).map_err(AppError::BadRequest)?;

    let counted_at = sqlx::query_scalar::<_, chrono::DateTime<Utc>>(
        r#"
        UPDATE materials
        SET latest_counted_quantity = $1, last_counted_by = $2, last_counted_date = NOW()
        WHERE id = $3
        RETURNING last_counted_date
        "#,
    )
    .bind(quantity)
    .bind(user.id)
    .bind(body.material_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::NotFound("material"))?;

    Ok(CountUpdated {
        success: true,
        message: "數量已更新",
        last_counted_by: user.username,
        last_counted_date: filters::format_datetime(&counted_at),
    })
}

// Differences

pub async fn difference_locations(State(state): State<AppState>, cookies: Cookies) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect.into_response());
    }

    let locations = sqlx::query_as::<_, DifferenceStats>(&format!(
        r#"
        SELECT l.name AS location, COUNT(mt.id) AS difference_items
        FROM materials mt
        JOIN storage_locations l ON l.id = mt.location_id
        WHERE l.name <> '' AND {}
        GROUP BY l.name
        ORDER BY l.name
        "#,
        HAS_DIFFERENCE
    ))
    .fetch_all(&state.db)
    .await?;

    let template = DifferenceLocationsTemplate {
        layout: Layout::new(&cookies, &user),
        locations,
    };
    Ok(render(&template)?.into_response())
}

async fn location_differences(state: &AppState, location: &str) -> Result<Vec<MaterialRow>, sqlx::Error> {
    sqlx::query_as::<_, MaterialRow>(&format!(
        "{} WHERE l.name = $1 AND {} ORDER BY mt.bin, mt.material_code",
        MATERIAL_SELECT, HAS_DIFFERENCE
    ))
    .bind(location)
    .fetch_all(&state.db)
    .await
}

pub async fn difference_detail(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(location): Path<String>,
) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect.into_response());
    }

    let materials = location_differences(&state, &location).await?;
    let template = DifferenceDetailTemplate {
        layout: Layout::new(&cookies, &user),
        location,
        materials,
    };
    Ok(render(&template)?.into_response())
}

pub async fn export_location_differences(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(location): Path<String>,
) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect.into_response());
    }

    let materials = location_differences(&state, &location).await?;
    let mut sheet = SheetData::new(
        "Differences",
        vec!["儲格", "物料", "物料說明", "庫存數", "盤點數", "差異數", "盤點人員", "盤點時間"],
    );
    for m in &materials {
        sheet.push(vec![
            Cell::from(m.bin.as_str()),
            Cell::from(m.material_code.as_str()),
            Cell::from(m.material_description.as_str()),
            Cell::from(m.system_quantity),
            Cell::from(m.latest_counted_quantity),
            Cell::from(m.difference()),
            Cell::from(m.last_counted_by_name.clone()),
            Cell::from(
                m.last_counted_date
                    .map(|d| d.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()),
            ),
        ]);
    }

    let filename = format!(
        "盤點差異報告_{}_{}.xlsx",
        location,
        Local::now().format("%Y%m%d")
    );
    Ok(xlsx_response(&filename, build_workbook(&[sheet])?))
}

// Material master list

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MaterialListQuery {
    pub location_filter: Option<String>,
    pub sort_by: Option<String>,
    pub order: Option<String>,
}

pub async fn material_list(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(query): Query<MaterialListQuery>,
) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect.into_response());
    }

    let location_filter = non_empty(&query.location_filter).unwrap_or_default().to_string();
    let sort = SortSpec::resolve(
        query.sort_by.as_deref(),
        query.order.as_deref(),
        &MATERIAL_SORTS,
        "material_code",
        false,
    );

    let materials = sqlx::query_as::<_, MaterialRow>(&format!(
        "{} WHERE ($1 = '' OR l.name ILIKE '%' || $1 || '%') ORDER BY {}, mt.material_code",
        MATERIAL_SELECT,
        sort.order_by()
    ))
    .bind(&location_filter)
    .fetch_all(&state.db)
    .await?;

    let extra = query_string(&[("location_filter", &location_filter)]);
    let template = MaterialListTemplate {
        layout: Layout::new(&cookies, &user),
        materials,
        headers: sort.headers(&MATERIAL_COLUMNS, &extra),
        location_filter,
    };
    Ok(render(&template)?.into_response())
}

/// Non-zero `quantity_<id>` deltas; one bad entry rejects the whole form.
fn parse_adjustments(pairs: Vec<(Uuid, &str)>) -> Result<Vec<(Uuid, i32)>, String> {
    let mut changes = Vec::new();
    for (id, raw) in pairs {
        if let Some(delta) = parse_optional_int(raw)? {
            if delta != 0 {
                changes.push((id, delta));
            }
        }
    }
    Ok(changes)
}

/// New system quantity after a manual movement, or `None` when it would not
/// fit the integer column.
fn adjusted_quantity(current: i32, delta: i32) -> Option<i32> {
    current.checked_add(delta)
}

/// Applies manual stock movements. Positive deltas are returns, negative
/// ones allocations; each gets an audit transaction.
pub async fn update_quantities(
    State(state): State<AppState>,
    cookies: Cookies,
    form: RawForm,
) -> AppResult<Redirect> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect);
    }

    let form = fields(form);
    let changes = match parse_adjustments(form.prefixed("quantity_")) {
        Ok(changes) => changes,
        Err(message) => {
            flash::error(&cookies, format!("{}，所有變更均未儲存。", message));
            return Ok(Redirect::to("/inventory/materials"));
        }
    };
    if changes.is_empty() {
        flash::info(&cookies, "沒有偵測到任何庫存變動。");
        return Ok(Redirect::to("/inventory/materials"));
    }

    let mut tx = state.db.begin().await?;
    let mut updated = Vec::new();
    for (material_id, delta) in changes {
        let row = sqlx::query_as::<_, (String, i32)>(
            "SELECT material_code, system_quantity FROM materials WHERE id = $1 FOR UPDATE",
        )
        .bind(material_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some((code, current)) = row else {
            tx.rollback().await?;
            flash::error(
                &cookies,
                format!("處理物料 ID {} 時發生錯誤: 找不到物料，所有變更均未儲存。", material_id),
            );
            return Ok(Redirect::to("/inventory/materials"));
        };
        let Some(new_quantity) = adjusted_quantity(current, delta) else {
            tx.rollback().await?;
            flash::error(
                &cookies,
                format!("物料 {} 的調整數量 {:+} 超出可記錄範圍，所有變更均未儲存。", code, delta),
            );
            return Ok(Redirect::to("/inventory/materials"));
        };

        sqlx::query("UPDATE materials SET system_quantity = $1 WHERE id = $2")
            .bind(new_quantity)
            .bind(material_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO material_transactions
                (material_id, user_id, transaction_type, quantity_change, new_system_quantity, notes)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(material_id)
        .bind(user.id)
        .bind(TransactionType::for_stock_delta(delta).as_str())
        .bind(delta)
        .bind(new_quantity)
        .bind(ADJUSTMENT_NOTE)
        .execute(&mut *tx)
        .await?;
        updated.push(format!("{} ({:+})", code, delta));
    }
    tx.commit().await?;

    log::info!("{} adjusted stock: {}", user.username, updated.join(", "));
    flash::success(&cookies, format!("成功更新庫存: {}", updated.join(", ")));
    Ok(Redirect::to("/inventory/materials"))
}

/// Opens a stocktake over the selected materials, snapshotting their
/// current system quantity.
pub async fn create_stocktake(
    State(state): State<AppState>,
    cookies: Cookies,
    form: RawForm,
) -> AppResult<Redirect> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect);
    }

    let form = fields(form);
    let material_ids = form.all_ids("selected_materials");
    if material_ids.is_empty() {
        flash::warning(&cookies, "請選擇至少一個物料來建立盤點單。");
        return Ok(Redirect::to("/inventory/materials"));
    }
    let name = form.get("stocktake_name").map(str::trim).filter(|n| !n.is_empty());

    let mut tx = state.db.begin().await?;
    let highest = sqlx::query_scalar::<_, Option<i32>>(
        r#"
        SELECT MAX(CAST(SUBSTRING(stocktake_id FROM 4) AS INTEGER))
        FROM stocktakes
        WHERE stocktake_id ~ '^ST-[0-9]+$'
        "#,
    )
    .fetch_one(&mut *tx)
    .await?;
    let stocktake_code = next_stocktake_id(highest);

    let stocktake_id = sqlx::query_scalar::<_, Uuid>(
        "INSERT INTO stocktakes (stocktake_id, name, created_by) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(&stocktake_code)
    .bind(name)
    .bind(user.id)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO stocktake_items (stocktake_id, material_id, system_quantity_on_record)
        SELECT $1, id, system_quantity FROM materials WHERE id = ANY($2)
        "#,
    )
    .bind(stocktake_id)
    .bind(&material_ids)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    flash::success(&cookies, format!("成功建立盤點單 {}。", stocktake_code));
    Ok(Redirect::to(&format!("/inventory/stocktakes/{}", stocktake_id)))
}

/// Every material that is uncounted or whose count disagrees with stock.
pub async fn export_master_differences(State(state): State<AppState>, cookies: Cookies) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect.into_response());
    }

    let materials = sqlx::query_as::<_, MaterialRow>(&format!(
        r#"{}
        WHERE mt.latest_counted_quantity IS NULL OR mt.latest_counted_quantity <> mt.system_quantity
        ORDER BY l.name, mt.bin, mt.material_code"#,
        MATERIAL_SELECT
    ))
    .fetch_all(&state.db)
    .await?;

    let mut sheet = SheetData::new(
        "Materials",
        vec!["庫位", "儲格", "物料", "物料說明", "系統庫存數量", "最新盤點數量", "最新差異", "上次盤點日期"],
    );
    for m in &materials {
        sheet.push(vec![
            Cell::from(m.location.as_str()),
            Cell::from(m.bin.as_str()),
            Cell::from(m.material_code.as_str()),
            Cell::from(m.material_description.as_str()),
            Cell::from(m.system_quantity),
            Cell::from(m.latest_counted_quantity),
            Cell::from(m.difference()),
            Cell::from(m.last_counted_date.map(|d| filters::format_datetime(&d))),
        ]);
    }
    Ok(xlsx_response("master_material_report.xlsx", build_workbook(&[sheet])?))
}

// Material images

async fn fetch_material(state: &AppState, id: Uuid) -> AppResult<MaterialRow> {
    sqlx::query_as::<_, MaterialRow>(&format!("{} WHERE mt.id = $1", MATERIAL_SELECT))
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::NotFound("material"))
}

pub async fn material_images(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect.into_response());
    }

    let material = fetch_material(&state, id).await?;
    let images = sqlx::query_as::<_, ImageRow>(
        r#"
        SELECT im.id, im.image_path, im.uploaded_at, u.username AS uploaded_by
        FROM material_images im
        LEFT JOIN users u ON u.id = im.uploaded_by
        WHERE im.material_id = $1
        ORDER BY im.uploaded_at DESC
        "#,
    )
    .bind(id)
    .fetch_all(&state.db)
    .await?;

    let template = MaterialImagesTemplate {
        layout: Layout::new(&cookies, &user),
        material,
        images,
    };
    Ok(render(&template)?.into_response())
}

pub async fn upload_material_images(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> AppResult<Redirect> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect);
    }
    fetch_material(&state, id).await?;

    let form = MultipartForm::read(multipart).await?;
    let mut uploaded = 0;
    for file in form.files_named("images") {
        if let Some(path) = save_image(&state.config.media_root, "material_images", file).await? {
            sqlx::query("INSERT INTO material_images (material_id, image_path, uploaded_by) VALUES ($1, $2, $3)")
                .bind(id)
                .bind(&path)
                .bind(user.id)
                .execute(&state.db)
                .await?;
            uploaded += 1;
        }
    }

    if uploaded > 0 {
        flash::success(&cookies, format!("成功上傳 {} 張圖片！", uploaded));
    } else {
        flash::info(&cookies, "沒有圖片被上傳。");
    }
    Ok(Redirect::to(&format!("/inventory/materials/{}/images", id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_count_accepts_blank_text_and_numbers() {
        assert_eq!(parse_count(&json!(null)), Ok(None));
        assert_eq!(parse_count(&json!("")), Ok(None));
        assert_eq!(parse_count(&json!(" 12 ")), Ok(Some(12)));
        assert_eq!(parse_count(&json!(7)), Ok(Some(7)));
        assert!(parse_count(&json!("abc")).is_err());
        assert!(parse_count(&json!(1.5)).is_err());
        assert!(parse_count(&json!([1])).is_err());
    }

    #[test]
    fn test_parse_adjustments_skips_blank_and_zero() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let changes = parse_adjustments(vec![(a, "5"), (b, ""), (c, "0")]).unwrap();
        assert_eq!(changes, vec![(a, 5)]);
    }

    #[test]
    fn test_parse_adjustments_rejects_whole_form() {
        let err = parse_adjustments(vec![(Uuid::new_v4(), "-3"), (Uuid::new_v4(), "x")]).unwrap_err();
        assert_eq!(err, "無效的數量: 'x'");
    }

    #[test]
    fn test_adjusted_quantity_guards_integer_range() {
        assert_eq!(adjusted_quantity(10, -4), Some(6));
        assert_eq!(adjusted_quantity(3, -5), Some(-2));
        assert_eq!(adjusted_quantity(i32::MAX - 1, 1), Some(i32::MAX));
        assert_eq!(adjusted_quantity(i32::MAX, 1), None);
        assert_eq!(adjusted_quantity(i32::MIN, -1), None);
    }

    #[test]
    fn test_adjustment_direction() {
        assert_eq!(TransactionType::for_stock_delta(4), TransactionType::Return);
        assert_eq!(TransactionType::for_stock_delta(-4), TransactionType::Allocation);
    }
}
