//! Material lists of a requisition: upload, confirmation by the material
//! handler, final sign-off by the applicant and version management.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use axum_extra::extract::Multipart;
use askama::Template;
use serde::Deserialize;
use serde_json::json;
use tower_cookies::Cookies;
use uuid::Uuid;

use super::{
    fields, render,
    requisitions::{ensure_visible, fetch_items, fetch_requisition, fetch_versions},
    Layout, RawForm,
};
use crate::{
    database::Database,
    error::{AppError, AppResult},
    excel::{build_workbook, is_spreadsheet_name, xlsx_response, Cell, SheetData, SheetTable},
    filters,
    flash,
    middleware::{require_user, CurrentUser},
    models::{
        requisition::{VERSION_SELECT, WORK_ORDER_MATERIAL_SELECT},
        RequisitionItemRow, RequisitionRow, VersionRow, WorkOrderMaterialRow,
    },
    state::AppState,
    sync::{
        material_list::{copy_items, import_material_list, insert_item, start_version, NewItem},
        PARENT_SCOPE,
    },
    utils::{
        forms::parse_optional_decimal,
        sort::{SortHeader, SortSpec},
        uploads::MultipartForm,
    },
    workflow::{
        confirmation_outcome, confirmed_after, ensure_can_confirm, ensure_can_sign_off,
        ensure_can_supplement, sign_off_outcome, signed_after_item, ConfirmationOutcome,
        RequisitionStatus, SignOffOutcome, VersionChange,
    },
};

const ITEM_SORTS: [(&str, &str); 3] = [
    ("material_number", "i.material_number"),
    ("item_name", "i.item_name"),
    ("required_quantity", "i.required_quantity"),
];

const ITEM_COLUMNS: [(&str, &str); 3] = [
    ("material_number", "物料"),
    ("item_name", "品名"),
    ("required_quantity", "需求數量"),
];

#[derive(Template)]
#[template(path = "requisitions/upload_materials.html")]
struct UploadTemplate {
    layout: Layout,
    requisition: RequisitionRow,
    versions: Vec<VersionRow>,
}

#[derive(Template)]
#[template(path = "requisitions/confirmation.html")]
struct ConfirmationTemplate {
    layout: Layout,
    requisition: RequisitionRow,
    items: Vec<RequisitionItemRow>,
    headers: Vec<SortHeader>,
    machine_models: String,
}

#[derive(Template)]
#[template(path = "requisitions/sign_off.html")]
struct SignOffTemplate {
    layout: Layout,
    requisition: RequisitionRow,
    version: VersionRow,
    items: Vec<RequisitionItemRow>,
    action: String,
}

#[derive(Template)]
#[template(path = "requisitions/supplement.html")]
struct SupplementTemplate {
    layout: Layout,
    requisition: RequisitionRow,
    materials: Vec<WorkOrderMaterialRow>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SortQuery {
    pub sort_by: Option<String>,
    pub order: Option<String>,
}

fn confirmation_url(id: Uuid) -> String {
    format!("/requisitions/{}/confirmation", id)
}

fn detail_url(id: Uuid) -> String {
    format!("/requisitions/{}", id)
}

/// Material handlers and admins only; others are sent back to the list.
fn handler_gate(cookies: &Cookies, user: &CurrentUser, message: &str) -> Option<Redirect> {
    if user.can_handle() {
        None
    } else {
        flash::error(cookies, message);
        Some(Redirect::to("/requisitions"))
    }
}

async fn fetch_version(db: &Database, requisition_id: Uuid, version_id: Uuid) -> AppResult<VersionRow> {
    sqlx::query_as::<_, VersionRow>(&format!(
        "{} WHERE v.id = $1 AND v.requisition_id = $2",
        VERSION_SELECT
    ))
    .bind(version_id)
    .bind(requisition_id)
    .fetch_optional(db)
    .await?
    .ok_or(AppError::NotFound("material list version"))
}

async fn latest_version(db: &Database, requisition_id: Uuid) -> Result<Option<VersionRow>, sqlx::Error> {
    sqlx::query_as::<_, VersionRow>(&format!(
        "{} WHERE v.requisition_id = $1 ORDER BY v.uploaded_at DESC LIMIT 1",
        VERSION_SELECT
    ))
    .bind(requisition_id)
    .fetch_optional(db)
    .await
}

// Upload

pub async fn upload_form(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = handler_gate(&cookies, &user, "您沒有權限上傳物料清單。") {
        return Ok(redirect.into_response());
    }
    let requisition = fetch_requisition(&state.db, id).await?;
    let versions = fetch_versions(&state.db, id).await?;

    let template = UploadTemplate {
        layout: Layout::new(&cookies, &user),
        requisition,
        versions,
    };
    Ok(render(&template)?.into_response())
}

pub async fn upload_materials(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> AppResult<Redirect> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = handler_gate(&cookies, &user, "您沒有權限上傳物料清單。") {
        return Ok(redirect);
    }
    fetch_requisition(&state.db, id).await?;
    let back = Redirect::to(&format!("/requisitions/{}/upload-materials", id));

    let form = MultipartForm::read(multipart).await?;
    let file = match form.file("file") {
        Some(file) if is_spreadsheet_name(&file.filename) => file,
        Some(_) => {
            flash::error(&cookies, "請上傳 Excel 檔案 (.xlsx 或 .xls)。");
            return Ok(back);
        }
        None => {
            flash::error(&cookies, "請選擇要上傳的檔案。");
            return Ok(back);
        }
    };

    let table = match SheetTable::from_bytes(&file.data) {
        Ok(table) => table,
        Err(e) => {
            flash::error(&cookies, e.to_string());
            return Ok(back);
        }
    };

    match import_material_list(&state.db, id, user.id, &table).await {
        Ok(count) => {
            log::info!("{} uploaded {} materials for requisition {}", user.username, count, id);
            flash::success(&cookies, "物料清單上傳成功！");
            Ok(Redirect::to("/requisitions"))
        }
        Err(e) => {
            log::warn!("material list upload for {} rejected: {}", id, e);
            flash::error(&cookies, e.to_string());
            Ok(back)
        }
    }
}

// Confirmation

pub async fn confirmation_page(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
    Query(query): Query<SortQuery>,
) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = handler_gate(&cookies, &user, "您沒有權限執行物料確認操作。") {
        return Ok(redirect.into_response());
    }
    let requisition = fetch_requisition(&state.db, id).await?;
    if ensure_can_confirm(requisition.status_enum()?).is_err() {
        flash::warning(
            &cookies,
            format!("此申請單狀態為 '{}'，無法進行物料確認。", requisition.status_label()),
        );
        return Ok(Redirect::to("/requisitions").into_response());
    }

    let sort = SortSpec::resolve(
        query.sort_by.as_deref(),
        query.order.as_deref(),
        &ITEM_SORTS,
        "material_number",
        false,
    );
    let items = match requisition.current_material_list_version_id {
        Some(version_id) => fetch_items(&state.db, version_id, &sort.order_by()).await?,
        None => Vec::new(),
    };

    let mut models: Vec<&str> = items.iter().filter_map(|i| i.machine_model.as_deref()).collect();
    models.sort_unstable();
    models.dedup();
    let machine_models = models.join(", ");

    let template = ConfirmationTemplate {
        layout: Layout::new(&cookies, &user),
        headers: sort.headers(&ITEM_COLUMNS, ""),
        requisition,
        items,
        machine_models,
    };
    Ok(render(&template)?.into_response())
}

/// `confirmed_<id>` entries for items of the version; entries for other ids
/// are dropped. One bad value rejects the whole form.
fn parse_confirmations(
    known: &[Uuid],
    pairs: Vec<(Uuid, &str)>,
) -> Result<Vec<(Uuid, Option<rust_decimal::Decimal>)>, String> {
    let mut updates = Vec::new();
    for (item_id, raw) in pairs {
        if known.contains(&item_id) {
            updates.push((item_id, parse_optional_decimal(raw)?));
        }
    }
    Ok(updates)
}

pub async fn save_confirmation(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
    form: RawForm,
) -> AppResult<Redirect> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = handler_gate(&cookies, &user, "您沒有權限執行物料確認操作。") {
        return Ok(redirect);
    }
    let requisition = fetch_requisition(&state.db, id).await?;
    if let Err(e) = ensure_can_confirm(requisition.status_enum()?) {
        flash::warning(&cookies, e.to_string());
        return Ok(Redirect::to("/requisitions"));
    }
    let version_id = match requisition.current_material_list_version_id {
        Some(version_id) => version_id,
        None => {
            flash::error(&cookies, "此申請單尚未上傳物料清單。");
            return Ok(Redirect::to(&confirmation_url(id)));
        }
    };

    let form = fields(form);
    let items = fetch_items(&state.db, version_id, "i.material_number").await?;

    let known: Vec<Uuid> = items.iter().map(|i| i.id).collect();
    let updates = match parse_confirmations(&known, form.prefixed("confirmed_")) {
        Ok(updates) => updates,
        Err(message) => {
            flash::error(&cookies, format!("物料確認保存失敗，請檢查輸入。{}", message));
            return Ok(Redirect::to(&confirmation_url(id)));
        }
    };

    let mut tx = state.db.begin().await?;
    for (item_id, quantity) in &updates {
        let Some(item) = items.iter().find(|i| i.id == *item_id) else {
            continue;
        };
        sqlx::query("UPDATE requisition_items SET confirmed_quantity = $1 WHERE id = $2")
            .bind(quantity)
            .bind(item.id)
            .execute(&mut *tx)
            .await?;

        if let Some(q) = quantity {
            if *q > item.required_quantity {
                flash::warning(
                    &cookies,
                    format!(
                        "物料 {} 的撥料數量 ({}) 超過需求數量 ({})。",
                        item.material_number,
                        filters::format_decimal(*q),
                        filters::format_decimal(item.required_quantity)
                    ),
                );
            }
            if let Some(source_id) = item.source_material_id {
                sqlx::query(
                    "UPDATE work_order_materials SET confirmed_quantity = $1, updated_at = NOW() WHERE id = $2",
                )
                .bind(q)
                .bind(source_id)
                .execute(&mut *tx)
                .await?;
            }
        }
    }

    let current: Vec<_> = items.iter().map(|i| (i.id, i.confirmed_quantity)).collect();
    let outcome = confirmation_outcome(&confirmed_after(&current, &updates));
    if let Some(status) = outcome.next_status() {
        sqlx::query(
            r#"
            UPDATE requisitions
            SET status = $3, material_confirmed_by = $1,
                material_confirmed_date = NOW(), updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(user.id)
        .bind(id)
        .bind(status.as_str())
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    match outcome {
        ConfirmationOutcome::Confirmed => {
            log::info!("{} confirmed all materials of requisition {}", user.username, id);
            flash::success(&cookies, "物料已全部確認，申請單狀態已更新！");
            Ok(Redirect::to("/requisitions"))
        }
        ConfirmationOutcome::Partial => {
            flash::info(&cookies, "物料確認已保存，但仍有未確認項目。");
            Ok(Redirect::to(&confirmation_url(id)))
        }
    }
}

pub async fn export_confirmation(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    let requisition = fetch_requisition(&state.db, id).await?;
    ensure_visible(&user, &requisition)?;

    let version_id = match requisition.current_material_list_version_id {
        Some(version_id) => version_id,
        None => {
            flash::error(&cookies, "此申請單沒有當前物料清單，無法匯出。");
            return Ok(Redirect::to(&confirmation_url(id)).into_response());
        }
    };
    let items = fetch_items(&state.db, version_id, "i.material_number").await?;

    let mut sheet = SheetData::new(
        "MaterialConfirmation",
        vec!["工單單號", "物料", "物料說明", "需求數量", "撥料數量 (實際撥出)"],
    );
    for item in &items {
        sheet.push(vec![
            Cell::from(item.order_number.as_str()),
            Cell::from(item.material_number.as_str()),
            Cell::from(item.item_name.as_str()),
            Cell::from(item.required_quantity),
            Cell::from(item.confirmed_quantity),
        ]);
    }

    let bytes = build_workbook(&[sheet])?;
    Ok(xlsx_response(
        &format!("material_confirmation_{}.xlsx", requisition.order_number),
        bytes,
    ))
}

// Sign-off

fn sign_off_url(id: Uuid, version_id: Option<Uuid>) -> String {
    match version_id {
        Some(v) => format!("/requisitions/{}/sign-off/{}", id, v),
        None => format!("/requisitions/{}/sign-off", id),
    }
}

/// Resolves the sign-off target and checks that every item is confirmed.
/// `Err(redirect)` carries the page to bounce to with a flash already set.
async fn sign_off_target(
    state: &AppState,
    cookies: &Cookies,
    user: &CurrentUser,
    id: Uuid,
    version_id: Option<Uuid>,
) -> AppResult<Result<(RequisitionRow, VersionRow, Vec<RequisitionItemRow>), Redirect>> {
    if !user.can_request() {
        flash::error(cookies, "您沒有權限執行最終簽收操作。");
        return Ok(Err(Redirect::to("/requisitions")));
    }
    let requisition = fetch_requisition(&state.db, id).await?;
    ensure_visible(user, &requisition)?;

    let version = match version_id {
        Some(v) => Some(fetch_version(&state.db, id, v).await?),
        None => latest_version(&state.db, id).await?,
    };
    let Some(version) = version else {
        flash::error(cookies, crate::workflow::WorkflowError::NoVersion.to_string());
        return Ok(Err(Redirect::to(&detail_url(id))));
    };

    let items = fetch_items(&state.db, version.id, "i.material_number").await?;
    let confirmed: Vec<_> = items.iter().map(|i| i.confirmed_quantity).collect();
    if let Err(e) = ensure_can_sign_off(&confirmed) {
        flash::warning(cookies, e.to_string());
        return Ok(Err(Redirect::to(&detail_url(id))));
    }

    Ok(Ok((requisition, version, items)))
}

async fn render_sign_off(
    state: AppState,
    cookies: Cookies,
    id: Uuid,
    version_id: Option<Uuid>,
) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    let (requisition, version, items) =
        match sign_off_target(&state, &cookies, &user, id, version_id).await? {
            Ok(target) => target,
            Err(redirect) => return Ok(redirect.into_response()),
        };

    let template = SignOffTemplate {
        layout: Layout::new(&cookies, &user),
        action: sign_off_url(id, version_id),
        requisition,
        version,
        items,
    };
    Ok(render(&template)?.into_response())
}

pub async fn sign_off_page(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    render_sign_off(state, cookies, id, None).await
}

pub async fn sign_off_version_page(
    State(state): State<AppState>,
    cookies: Cookies,
    Path((id, version_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Response> {
    render_sign_off(state, cookies, id, Some(version_id)).await
}

/// Marks a signed item's source material signed off and carries its
/// confirmed quantity over.
async fn sign_source(
    conn: &mut sqlx::PgConnection,
    item: &RequisitionItemRow,
) -> Result<(), sqlx::Error> {
    if let Some(source_id) = item.source_material_id {
        sqlx::query(
            r#"
            UPDATE work_order_materials
            SET is_signed_off = true,
                confirmed_quantity = COALESCE($1, confirmed_quantity),
                updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(item.confirmed_quantity)
        .bind(source_id)
        .execute(conn)
        .await?;
    }
    Ok(())
}

async fn complete_requisition(
    conn: &mut sqlx::PgConnection,
    id: Uuid,
    user_id: Uuid,
    status: RequisitionStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE requisitions
        SET status = $3, sign_off_by = $1, sign_off_date = NOW(), updated_at = NOW()
        WHERE id = $2
        "#,
    )
    .bind(user_id)
    .bind(id)
    .bind(status.as_str())
    .execute(conn)
    .await?;
    Ok(())
}

async fn save_sign_off(
    state: AppState,
    cookies: Cookies,
    id: Uuid,
    version_id: Option<Uuid>,
    form: RawForm,
) -> AppResult<Redirect> {
    let user = require_user(&cookies, &state).await?;
    let (requisition, version, items) =
        match sign_off_target(&state, &cookies, &user, id, version_id).await? {
            Ok(target) => target,
            Err(redirect) => return Ok(redirect),
        };
    let form = fields(form);

    let mut signed = Vec::with_capacity(items.len());
    let mut tx = state.db.begin().await?;
    for item in &items {
        let is_signed = form.is_checked(&format!("signed_{}", item.id));
        sqlx::query("UPDATE requisition_items SET is_signed_off = $1 WHERE id = $2")
            .bind(is_signed)
            .bind(item.id)
            .execute(&mut *tx)
            .await?;
        if is_signed {
            sign_source(&mut *tx, item).await?;
        }
        signed.push(is_signed);
    }

    let is_current = requisition.current_material_list_version_id == Some(version.id);
    let outcome = sign_off_outcome(&signed, is_current);
    if let Some(status) = outcome.next_status() {
        complete_requisition(&mut *tx, id, user.id, status).await?;
    }
    tx.commit().await?;

    match outcome {
        SignOffOutcome::Completed => {
            log::info!("{} completed requisition {}", user.username, id);
            flash::success(&cookies, "撥料申請單已全部最終簽收！");
            Ok(Redirect::to(&detail_url(id)))
        }
        SignOffOutcome::VersionSigned => {
            flash::info(
                &cookies,
                format!(
                    "物料清單版本 '{}' 已全部最終簽收。",
                    filters::format_datetime(&version.uploaded_at)
                ),
            );
            Ok(Redirect::to(&detail_url(id)))
        }
        SignOffOutcome::Partial => {
            flash::info(&cookies, "最終簽收已保存，但仍有未簽收項目。");
            Ok(Redirect::to(&sign_off_url(id, version_id)))
        }
    }
}

pub async fn sign_off(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
    form: RawForm,
) -> AppResult<Redirect> {
    save_sign_off(state, cookies, id, None, form).await
}

pub async fn sign_off_version(
    State(state): State<AppState>,
    cookies: Cookies,
    Path((id, version_id)): Path<(Uuid, Uuid)>,
    form: RawForm,
) -> AppResult<Redirect> {
    save_sign_off(state, cookies, id, Some(version_id), form).await
}

/// JSON sign-off of a single item, used from the sign-off page.
pub async fn sign_off_item(
    State(state): State<AppState>,
    cookies: Cookies,
    Path((id, version_id, item_id)): Path<(Uuid, Uuid, Uuid)>,
) -> Response {
    match sign_off_single(&state, &cookies, id, version_id, item_id).await {
        Ok(response) => response,
        Err(e) => e.into_json(),
    }
}

async fn sign_off_single(
    state: &AppState,
    cookies: &Cookies,
    id: Uuid,
    version_id: Uuid,
    item_id: Uuid,
) -> AppResult<Response> {
    let user = require_user(cookies, state).await?;
    if !user.can_request() {
        return Ok((
            StatusCode::FORBIDDEN,
            Json(json!({ "success": false, "message": "您沒有權限簽收物料項目。" })),
        )
            .into_response());
    }
    let requisition = fetch_requisition(&state.db, id).await?;
    ensure_visible(&user, &requisition)?;
    let version = fetch_version(&state.db, id, version_id).await?;
    let items = fetch_items(&state.db, version.id, "i.material_number").await?;
    let item = items
        .iter()
        .find(|i| i.id == item_id)
        .ok_or(AppError::NotFound("requisition item"))?;

    if item.is_signed_off {
        flash::info(cookies, "此物料項目已簽收。");
        return Ok(Json(json!({ "success": false, "message": "此物料項目已簽收。" })).into_response());
    }

    let mut tx = state.db.begin().await?;
    sqlx::query("UPDATE requisition_items SET is_signed_off = true WHERE id = $1")
        .bind(item.id)
        .execute(&mut *tx)
        .await?;
    sign_source(&mut *tx, item).await?;

    let flags: Vec<(Uuid, bool)> = items.iter().map(|i| (i.id, i.is_signed_off)).collect();
    let signed = signed_after_item(&flags, item.id);
    let is_current = requisition.current_material_list_version_id == Some(version.id);
    let outcome = sign_off_outcome(&signed, is_current);
    if let Some(status) = outcome.next_status() {
        complete_requisition(&mut *tx, id, user.id, status).await?;
    }
    tx.commit().await?;

    flash::success(cookies, format!("物料項目 '{}' 已成功簽收。", item.item_name));
    match outcome {
        SignOffOutcome::Completed => flash::success(cookies, "撥料申請單已全部最終簽收！"),
        SignOffOutcome::VersionSigned => flash::info(
            cookies,
            format!(
                "物料清單版本 '{}' 已全部最終簽收。",
                filters::format_datetime(&version.uploaded_at)
            ),
        ),
        SignOffOutcome::Partial => {}
    }

    Ok(Json(json!({ "success": true, "message": "物料項目已成功簽收。" })).into_response())
}

// Versions

pub async fn activate_version(
    State(state): State<AppState>,
    cookies: Cookies,
    Path((id, version_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Redirect> {
    let user = require_user(&cookies, &state).await?;
    if !user.can_handle() {
        flash::error(&cookies, "您沒有權限激活物料清單版本。");
        return Ok(Redirect::to(&detail_url(id)));
    }
    fetch_requisition(&state.db, id).await?;
    let old_version = fetch_version(&state.db, id, version_id).await?;

    let mut tx = state.db.begin().await?;
    let new_version = start_version(&mut *tx, id, user.id, VersionChange::Activation).await?;
    let copied = copy_items(&mut *tx, old_version.id, new_version, VersionChange::Activation).await?;
    tx.commit().await?;

    log::info!(
        "{} re-activated version {} of requisition {} ({} items)",
        user.username,
        old_version.id,
        id,
        copied
    );
    flash::success(&cookies, "物料清單版本已成功激活，並已重置申請單狀態為待撥料。");
    Ok(Redirect::to(&confirmation_url(id)))
}

// Supplement

async fn supplement_candidates(
    db: &Database,
    requisition: &RequisitionRow,
) -> Result<Vec<WorkOrderMaterialRow>, sqlx::Error> {
    sqlx::query_as::<_, WorkOrderMaterialRow>(&format!(
        r#"{}
        WHERE w.order_number = $1
          AND w.material_number IS DISTINCT FROM $2
          AND w.id NOT IN (
                SELECT i.source_material_id FROM requisition_items i
                WHERE i.material_list_version_id = $3 AND i.source_material_id IS NOT NULL)
        ORDER BY w.material_number"#,
        WORK_ORDER_MATERIAL_SELECT
    ))
    .bind(&requisition.order_number)
    .bind(PARENT_SCOPE)
    .bind(requisition.current_material_list_version_id)
    .fetch_all(db)
    .await
}

/// New items for the selected candidates. A blank quantity skips the
/// material; an unparseable one rejects the whole supplement.
fn supplement_items<'a>(
    candidates: &[WorkOrderMaterialRow],
    selected: &[Uuid],
    quantity_of: impl Fn(Uuid) -> &'a str,
) -> Result<Vec<NewItem>, String> {
    let mut additions = Vec::new();
    for material in candidates.iter().filter(|m| selected.contains(&m.id)) {
        if let Some(quantity) = parse_optional_decimal(quantity_of(material.id))? {
            additions.push(NewItem {
                source_material_id: Some(material.id),
                order_number: material.order_number.clone(),
                material_number: material.material_number.clone().unwrap_or_default(),
                item_name: material.item_name.clone().unwrap_or_default(),
                required_quantity: quantity,
                stock_quantity: rust_decimal::Decimal::ZERO,
                confirmed_quantity: None,
                is_signed_off: false,
            });
        }
    }
    Ok(additions)
}

/// `Err(redirect)` when the requisition cannot be supplemented.
async fn supplement_target(
    state: &AppState,
    cookies: &Cookies,
    user: &CurrentUser,
    id: Uuid,
) -> AppResult<Result<RequisitionRow, Redirect>> {
    if !user.can_handle() {
        return Ok(Err(Redirect::to(&detail_url(id))));
    }
    let requisition = fetch_requisition(&state.db, id).await?;
    if ensure_can_supplement(requisition.status_enum()?).is_err() {
        flash::error(cookies, "無法為已完成的申請單補料。");
        return Ok(Err(Redirect::to(&detail_url(id))));
    }
    Ok(Ok(requisition))
}

pub async fn supplement_page(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    let requisition = match supplement_target(&state, &cookies, &user, id).await? {
        Ok(requisition) => requisition,
        Err(redirect) => return Ok(redirect.into_response()),
    };
    let materials = supplement_candidates(&state.db, &requisition).await?;

    let template = SupplementTemplate {
        layout: Layout::new(&cookies, &user),
        requisition,
        materials,
    };
    Ok(render(&template)?.into_response())
}

pub async fn supplement(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
    form: RawForm,
) -> AppResult<Redirect> {
    let user = require_user(&cookies, &state).await?;
    let requisition = match supplement_target(&state, &cookies, &user, id).await? {
        Ok(requisition) => requisition,
        Err(redirect) => return Ok(redirect),
    };
    let back = Redirect::to(&format!("/requisitions/{}/supplement", id));

    let form = fields(form);
    let selected = form.all_ids("material_ids");
    if selected.is_empty() {
        flash::error(&cookies, "您沒有選擇任何物料。");
        return Ok(back);
    }

    let candidates = supplement_candidates(&state.db, &requisition).await?;
    let additions = match supplement_items(&candidates, &selected, |material_id| {
        form.get(&format!("quantity_{}", material_id)).unwrap_or("")
    }) {
        Ok(additions) => additions,
        Err(message) => {
            flash::error(&cookies, format!("補料時發生錯誤: {}", message));
            return Ok(back);
        }
    };

    let mut tx = state.db.begin().await?;
    let new_version = start_version(&mut *tx, id, user.id, VersionChange::Supplement).await?;
    if let Some(old_version) = requisition.current_material_list_version_id {
        copy_items(&mut *tx, old_version, new_version, VersionChange::Supplement).await?;
    }
    for item in &additions {
        insert_item(&mut *tx, new_version, item).await?;
    }
    tx.commit().await?;

    log::info!(
        "{} supplemented requisition {} with {} materials",
        user.username,
        id,
        additions.len()
    );
    flash::success(
        &cookies,
        format!("成功補料 {} 項，申請單狀態已重置為待撥料。", selected.len()),
    );
    Ok(Redirect::to(&detail_url(id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_off_url_with_and_without_version() {
        let id = Uuid::nil();
        assert_eq!(
            sign_off_url(id, None),
            "/requisitions/00000000-0000-0000-0000-000000000000/sign-off"
        );
        let version = Uuid::from_u128(1);
        assert!(sign_off_url(id, Some(version)).ends_with("/sign-off/00000000-0000-0000-0000-000000000001"));
    }

    #[test]
    fn test_parse_confirmations_keeps_version_items_only() {
        let (a, b, stranger) = (Uuid::from_u128(1), Uuid::from_u128(2), Uuid::from_u128(3));
        let updates = parse_confirmations(&[a, b], vec![(a, "2.5"), (b, " "), (stranger, "9")]).unwrap();
        assert_eq!(
            updates,
            vec![(a, Some(rust_decimal::Decimal::new(25, 1))), (b, None)]
        );
    }

    #[test]
    fn test_parse_confirmations_rejects_whole_form() {
        let (a, b) = (Uuid::from_u128(1), Uuid::from_u128(2));
        assert!(parse_confirmations(&[a, b], vec![(a, "1"), (b, "lots")]).is_err());
    }

    fn candidate(id: u128, material_number: &str) -> WorkOrderMaterialRow {
        WorkOrderMaterialRow {
            id: Uuid::from_u128(id),
            machine_model_id: None,
            machine_model: Some("M1".to_string()),
            order_number: "WO-1".to_string(),
            material_number: Some(material_number.to_string()),
            item_name: Some("墊片".to_string()),
            required_quantity: rust_decimal::Decimal::from(4),
            process_type_id: None,
            process_type: None,
            confirmed_quantity: Some(rust_decimal::Decimal::ONE),
            is_signed_off: true,
            is_active: true,
            import_count: 1,
            storage_bin: None,
            stock_quantity: None,
        }
    }

    #[test]
    fn test_supplement_items_start_unconfirmed() {
        let candidates = [candidate(1, "A-1"), candidate(2, "B-2"), candidate(3, "C-3")];
        let selected = [Uuid::from_u128(1), Uuid::from_u128(2)];
        let additions = supplement_items(&candidates, &selected, |id| {
            if id == Uuid::from_u128(1) {
                "3"
            } else {
                ""
            }
        })
        .unwrap();

        assert_eq!(additions.len(), 1);
        let item = &additions[0];
        assert_eq!(item.source_material_id, Some(Uuid::from_u128(1)));
        assert_eq!(item.material_number, "A-1");
        assert_eq!(item.required_quantity, rust_decimal::Decimal::from(3));
        assert_eq!(item.confirmed_quantity, None);
        assert!(!item.is_signed_off);
    }

    #[test]
    fn test_supplement_items_reject_bad_quantity() {
        let candidates = [candidate(1, "A-1")];
        assert!(supplement_items(&candidates, &[Uuid::from_u128(1)], |_| "x").is_err());
    }

    #[test]
    fn test_item_sort_falls_back_to_material_number() {
        let sort = SortSpec::resolve(Some("bogus"), None, &ITEM_SORTS, "material_number", false);
        assert_eq!(sort.order_by(), "i.material_number ASC");
    }
}
