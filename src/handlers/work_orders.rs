//! Work-order materials: the per-order master list, dispatch bookkeeping,
//! dispatch and backorder notes.

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Json, Redirect, Response},
};
use axum_extra::extract::Multipart;
use askama::Template;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_cookies::Cookies;
use uuid::Uuid;

use super::{
    fields, non_empty, render,
    requisitions::{ensure_visible, fetch_requisition},
    Choice, Layout, RawForm,
};
use crate::{
    database::Database,
    error::{AppError, AppResult},
    excel::{build_workbook, xlsx_response, Cell, SheetData},
    filters,
    flash,
    middleware::{require_user, CurrentUser},
    models::{
        requisition::{REQUISITION_SELECT, WORK_ORDER_MATERIAL_SELECT},
        ImageRow, RequisitionRow, WorkOrderMaterialRow,
    },
    state::AppState,
    sync::{
        material_list::{insert_item, start_version, NewItem},
        PARENT_SCOPE,
    },
    utils::{
        forms::parse_optional_decimal,
        sort::{query_string, SortHeader, SortSpec},
        uploads::{save_image, MultipartForm},
    },
    workflow::{plan_dispatch, VersionChange},
};

const MATERIAL_SORTS: [(&str, &str); 6] = [
    ("material_number", "w.material_number"),
    ("item_name", "w.item_name"),
    ("required_quantity", "w.required_quantity"),
    ("process_type", "p.name"),
    ("confirmed_quantity", "w.confirmed_quantity"),
    ("is_signed_off", "w.is_signed_off"),
];

const MATERIAL_COLUMNS: [(&str, &str); 6] = [
    ("material_number", "物料"),
    ("item_name", "物料說明"),
    ("required_quantity", "需求數量"),
    ("process_type", "投料點"),
    ("confirmed_quantity", "已撥料數量"),
    ("is_signed_off", "簽收狀態"),
];

const DISPATCH_NOTE: &str = "手動撥料/退料操作";

#[derive(Template)]
#[template(path = "work_orders/list.html")]
struct WorkOrderListTemplate {
    layout: Layout,
    user: CurrentUser,
    order_choices: Vec<Choice>,
    selected_order: String,
    materials: Vec<WorkOrderMaterialRow>,
    headers: Vec<SortHeader>,
    process_type_choices: Vec<Choice>,
    selected_process_type: String,
    requisitions_for_import: Vec<RequisitionRow>,
    requisition: Option<RequisitionRow>,
    machine_models: String,
    show_inactive: bool,
    export_query: String,
}

#[derive(Template)]
#[template(path = "work_orders/shortage.html")]
struct ShortageTemplate {
    layout: Layout,
    materials: Vec<WorkOrderMaterialRow>,
}

#[derive(Template)]
#[template(path = "requisitions/dispatch_note.html")]
struct DispatchNoteTemplate {
    layout: Layout,
    user: CurrentUser,
    requisition: RequisitionRow,
    materials: Vec<WorkOrderMaterialRow>,
    images: Vec<ImageRow>,
}

#[derive(Template)]
#[template(path = "requisitions/backorder_note.html")]
struct BackorderNoteTemplate {
    layout: Layout,
    requisition: RequisitionRow,
    materials: Vec<WorkOrderMaterialRow>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WorkOrderQuery {
    pub order_number: Option<String>,
    pub sort_by: Option<String>,
    pub order: Option<String>,
    /// Process type id.
    pub process_type: Option<String>,
    /// Process type name, as linked from the requisition list.
    pub process_type_name: Option<String>,
    pub show_inactive: Option<String>,
}

impl WorkOrderQuery {
    fn show_inactive(&self) -> bool {
        matches!(self.show_inactive.as_deref(), Some(v) if v.eq_ignore_ascii_case("true"))
    }
}

fn work_order_url(order_number: &str, process_type: Option<&str>) -> String {
    let query = query_string(&[
        ("order_number", order_number),
        ("process_type", process_type.unwrap_or("")),
    ]);
    if query.is_empty() {
        "/work-orders".to_string()
    } else {
        format!("/work-orders?{}", query)
    }
}

async fn order_numbers(db: &Database) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        "SELECT DISTINCT order_number FROM work_order_materials ORDER BY order_number",
    )
    .fetch_all(db)
    .await
}

/// Resolves a process type name to the id used by this order's materials.
async fn process_type_id_by_name(
    db: &Database,
    order_number: &str,
    name: &str,
) -> Result<Option<Uuid>, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT p.id FROM work_order_materials w
        JOIN process_types p ON p.id = w.process_type_id
        WHERE w.order_number = $1 AND p.name = $2
        LIMIT 1
        "#,
    )
    .bind(order_number)
    .bind(name)
    .fetch_optional(db)
    .await
}

/// One choice per distinct process type name used by the order.
async fn order_process_types(db: &Database, order_number: &str) -> Result<Vec<(Uuid, String)>, sqlx::Error> {
    sqlx::query_as::<_, (Uuid, String)>(
        r#"
        SELECT DISTINCT ON (p.name) p.id, p.name
        FROM work_order_materials w
        JOIN process_types p ON p.id = w.process_type_id
        WHERE w.order_number = $1
        ORDER BY p.name, p.id
        "#,
    )
    .bind(order_number)
    .fetch_all(db)
    .await
}

pub async fn work_order_list(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(query): Query<WorkOrderQuery>,
) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    if !user.can_view_requisitions() {
        flash::error(&cookies, "您沒有權限查看此頁面。");
        return Ok(Redirect::to("/").into_response());
    }

    let selected_order = non_empty(&query.order_number).unwrap_or("").to_string();
    let show_inactive = query.show_inactive();
    let sort = SortSpec::resolve(
        query.sort_by.as_deref(),
        query.order.as_deref(),
        &MATERIAL_SORTS,
        "material_number",
        false,
    );

    let mut materials = Vec::new();
    let mut process_type_choices = Vec::new();
    let mut selected_process_type = String::new();
    let mut requisitions_for_import = Vec::new();
    let mut machine_models = String::new();

    if !selected_order.is_empty() {
        let filter_id = match non_empty(&query.process_type_name) {
            Some(name) => process_type_id_by_name(&state.db, &selected_order, name).await?,
            None => non_empty(&query.process_type).and_then(|v| Uuid::parse_str(v).ok()),
        };
        selected_process_type = filter_id.map(|id| id.to_string()).unwrap_or_default();

        materials = sqlx::query_as::<_, WorkOrderMaterialRow>(&format!(
            r#"{}
            WHERE w.order_number = $1
              AND w.material_number IS DISTINCT FROM $2
              AND ($3 OR w.is_active)
              AND ($4::uuid IS NULL OR w.process_type_id = $4)
            ORDER BY {}, w.id"#,
            WORK_ORDER_MATERIAL_SELECT,
            sort.order_by()
        ))
        .bind(&selected_order)
        .bind(PARENT_SCOPE)
        .bind(show_inactive)
        .bind(filter_id)
        .fetch_all(&state.db)
        .await?;

        process_type_choices = order_process_types(&state.db, &selected_order)
            .await?
            .into_iter()
            .map(|(id, name)| Choice::new(id.to_string(), name, &selected_process_type))
            .collect();

        requisitions_for_import = sqlx::query_as::<_, RequisitionRow>(&format!(
            "{} WHERE r.order_number = $1 ORDER BY r.process_type",
            REQUISITION_SELECT
        ))
        .bind(&selected_order)
        .fetch_all(&state.db)
        .await?;

        let mut models: Vec<&str> = materials
            .iter()
            .filter_map(|m| m.machine_model.as_deref())
            .collect();
        models.sort_unstable();
        models.dedup();
        machine_models = models.join(", ");
    }

    let requisition = requisitions_for_import.first().cloned();
    let order_choices = Choice::plain(order_numbers(&state.db).await?, &selected_order);
    let show_inactive_flag = if show_inactive { "true" } else { "" };
    let extra = query_string(&[
        ("order_number", selected_order.as_str()),
        ("process_type", selected_process_type.as_str()),
        ("show_inactive", show_inactive_flag),
    ]);
    let export_query = query_string(&[("order_number", selected_order.as_str())]);

    let template = WorkOrderListTemplate {
        layout: Layout::new(&cookies, &user),
        user,
        order_choices,
        selected_order,
        materials,
        headers: sort.headers(&MATERIAL_COLUMNS, &extra),
        process_type_choices,
        selected_process_type,
        requisitions_for_import,
        requisition,
        machine_models,
        show_inactive,
        export_query,
    };
    Ok(render(&template)?.into_response())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExportQuery {
    pub order_number: Option<String>,
}

pub async fn export_work_order_materials(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(query): Query<ExportQuery>,
) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    user.require_viewer()?;

    let order_number = non_empty(&query.order_number).unwrap_or("");
    let materials = if order_number.is_empty() {
        Vec::new()
    } else {
        sqlx::query_as::<_, WorkOrderMaterialRow>(&format!(
            "{} WHERE w.order_number = $1 ORDER BY w.material_number",
            WORK_ORDER_MATERIAL_SELECT
        ))
        .bind(order_number)
        .fetch_all(&state.db)
        .await?
    };

    let mut sheet = SheetData::new(
        "WorkOrderMaterials",
        vec!["訂單單號", "物料", "物料說明", "需求數量", "投料點", "已撥料數量", "簽收狀態"],
    );
    for m in &materials {
        sheet.push(vec![
            Cell::from(m.order_number.as_str()),
            Cell::from(m.material_number.clone()),
            Cell::from(m.item_name.clone()),
            Cell::from(m.required_quantity),
            Cell::from(m.process_type.clone()),
            Cell::from(m.confirmed_quantity),
            Cell::from(if m.is_signed_off { "已簽收" } else { "未簽收" }),
        ]);
    }

    let bytes = build_workbook(&[sheet])?;
    Ok(xlsx_response(&format!("order_materials_{}.xlsx", order_number), bytes))
}

/// Human-readable signed delta, e.g. `+3.00`.
fn signed_change(delta: Decimal) -> String {
    let sign = if delta > Decimal::ZERO { "+" } else { "" };
    format!("{}{:.2}", sign, delta)
}

/// Non-zero `change_<id>` deltas; the first bad entry rejects the form.
fn parse_dispatch_changes(pairs: Vec<(Uuid, &str)>) -> Result<Vec<(Uuid, Decimal)>, (Uuid, String)> {
    let mut changes = Vec::new();
    for (material_id, raw) in pairs {
        match parse_optional_decimal(raw) {
            Ok(Some(delta)) if !delta.is_zero() => changes.push((material_id, delta)),
            Ok(_) => {}
            Err(message) => return Err((material_id, message)),
        }
    }
    Ok(changes)
}

/// Applies dispatch (`change_<id>` > 0) and return (< 0) deltas to
/// work-order materials. All changes are written together or not at all.
pub async fn update_quantities(
    State(state): State<AppState>,
    cookies: Cookies,
    form: RawForm,
) -> AppResult<Redirect> {
    let user = require_user(&cookies, &state).await?;
    let form = fields(form);
    let order_number = form.get("order_number").unwrap_or("").to_string();
    let process_type_filter = form.get("process_type_filter").map(str::to_string);
    let back = Redirect::to(&work_order_url(&order_number, process_type_filter.as_deref()));

    if !user.can_handle() {
        flash::error(&cookies, "您沒有權限更新撥料數量。");
        return Ok(back);
    }

    let changes = match parse_dispatch_changes(form.prefixed("change_")) {
        Ok(changes) => changes,
        Err((material_id, message)) => {
            flash::error(
                &cookies,
                format!("處理物料 ID {} 時發生錯誤: {}，變更未儲存。", material_id, message),
            );
            return Ok(back);
        }
    };

    let mut updated = Vec::new();
    let mut tx = state.db.begin().await?;
    for (material_id, delta) in changes {
        let current = sqlx::query_as::<_, (Option<String>, Decimal, Option<Decimal>)>(
            "SELECT material_number, required_quantity, confirmed_quantity FROM work_order_materials WHERE id = $1 FOR UPDATE",
        )
        .bind(material_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some((material_number, required, confirmed)) = current else {
            flash::error(&cookies, format!("物料 ID {} 不存在，變更未儲存。", material_id));
            return Ok(back);
        };
        let material_number = material_number.unwrap_or_default();

        let movement = plan_dispatch(required, confirmed, delta);
        let new_confirmed = movement.new_confirmed;
        if movement.over_required {
            flash::warning(
                &cookies,
                format!(
                    "物料 {} 的撥料數量 ({}) 超過需求數量 ({})。",
                    material_number,
                    filters::format_decimal(new_confirmed),
                    filters::format_decimal(required)
                ),
            );
        }

        sqlx::query(
            "UPDATE work_order_materials SET confirmed_quantity = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(new_confirmed)
        .bind(material_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO work_order_material_transactions
                (work_order_material_id, user_id, transaction_type, quantity_change, new_confirmed_quantity, notes)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(material_id)
        .bind(user.id)
        .bind(movement.transaction_type.as_str())
        .bind(delta)
        .bind(new_confirmed)
        .bind(DISPATCH_NOTE)
        .execute(&mut *tx)
        .await?;

        updated.push(format!("{} ({})", material_number, signed_change(delta)));
    }

    let mut dispatch_marked = true;
    if !updated.is_empty() {
        if let Some(process_type_id) = process_type_filter.as_deref().and_then(|v| Uuid::parse_str(v).ok()) {
            let result = sqlx::query(
                r#"
                UPDATE requisitions SET dispatch_performed = true, updated_at = NOW()
                WHERE order_number = $1
                  AND process_type = (SELECT name FROM process_types WHERE id = $2)
                "#,
            )
            .bind(&order_number)
            .bind(process_type_id)
            .execute(&mut *tx)
            .await?;
            dispatch_marked = result.rows_affected() > 0;
        }
    }
    tx.commit().await?;

    if updated.is_empty() {
        flash::info(&cookies, "沒有偵測到任何數量變動。");
    } else {
        log::info!("{} dispatched on order {}: {}", user.username, order_number, updated.join(", "));
        flash::success(&cookies, format!("成功更新撥料數量: {}", updated.join(",")));
        if !dispatch_marked {
            flash::error(&cookies, "更新撥料狀態時發生錯誤: 找不到對應的撥料申請單。");
        }
    }
    Ok(back)
}

/// Creates a new material-list version on the chosen requisition from the
/// selected work-order materials.
pub async fn import_to_requisition(
    State(state): State<AppState>,
    cookies: Cookies,
    form: RawForm,
) -> AppResult<Redirect> {
    let user = require_user(&cookies, &state).await?;
    if !user.can_handle() {
        flash::error(&cookies, "您沒有權限匯入物料到撥料單。");
        return Ok(Redirect::to("/work-orders"));
    }

    let form = fields(form);
    let material_ids = form.all_ids("material_ids");
    let requisition_id = form.get("requisition_id").and_then(|v| Uuid::parse_str(v).ok());
    let order_number = form.get("order_number").unwrap_or("").to_string();
    let back = Redirect::to(&work_order_url(&order_number, None));

    let requisition_id = match requisition_id {
        Some(id) if !material_ids.is_empty() => id,
        _ => {
            flash::error(&cookies, "請至少選擇一個物料和一個目標撥料單。");
            return Ok(back);
        }
    };

    let requisition = match fetch_requisition(&state.db, requisition_id).await {
        Ok(requisition) => requisition,
        Err(AppError::NotFound(_)) => {
            flash::error(&cookies, "找不到指定的撥料單。");
            return Ok(back);
        }
        Err(e) => return Err(e),
    };

    let materials = sqlx::query_as::<_, WorkOrderMaterialRow>(&format!(
        "{} WHERE w.id = ANY($1) ORDER BY w.material_number",
        WORK_ORDER_MATERIAL_SELECT
    ))
    .bind(&material_ids)
    .fetch_all(&state.db)
    .await?;

    let mut tx = state.db.begin().await?;
    let version_id = start_version(&mut *tx, requisition.id, user.id, VersionChange::Import).await?;
    for material in &materials {
        let item = NewItem {
            source_material_id: Some(material.id),
            order_number: material.order_number.clone(),
            material_number: material.material_number.clone().unwrap_or_default(),
            item_name: material.item_name.clone().unwrap_or_default(),
            required_quantity: material.required_quantity,
            stock_quantity: Decimal::ZERO,
            confirmed_quantity: None,
            is_signed_off: false,
        };
        insert_item(&mut *tx, version_id, &item).await?;
    }
    tx.commit().await?;

    flash::success(
        &cookies,
        format!(
            "成功將 {} 筆物料匯入到撥料單 '{}'。",
            materials.len(),
            requisition.process_type_name()
        ),
    );
    Ok(back)
}

pub async fn shortage_list(State(state): State<AppState>, cookies: Cookies) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    if !user.can_handle() {
        flash::error(&cookies, "您沒有權限查看此頁面。");
        return Ok(Redirect::to("/").into_response());
    }

    let materials = sqlx::query_as::<_, WorkOrderMaterialRow>(&format!(
        r#"{}
        WHERE w.is_active AND w.required_quantity > COALESCE(w.confirmed_quantity, 0)
          AND w.material_number IS DISTINCT FROM $1
        ORDER BY w.order_number, w.material_number"#,
        WORK_ORDER_MATERIAL_SELECT
    ))
    .bind(PARENT_SCOPE)
    .fetch_all(&state.db)
    .await?;

    let template = ShortageTemplate {
        layout: Layout::new(&cookies, &user),
        materials,
    };
    Ok(render(&template)?.into_response())
}

// Dispatch and backorder notes

async fn dispatched_materials(
    db: &Database,
    requisition: &RequisitionRow,
) -> Result<Vec<WorkOrderMaterialRow>, sqlx::Error> {
    sqlx::query_as::<_, WorkOrderMaterialRow>(&format!(
        r#"{}
        WHERE w.order_number = $1 AND p.name = $2 AND w.is_active
          AND w.confirmed_quantity > 0
        ORDER BY w.material_number"#,
        WORK_ORDER_MATERIAL_SELECT
    ))
    .bind(&requisition.order_number)
    .bind(&requisition.process_type)
    .fetch_all(db)
    .await
}

async fn backorder_materials(
    db: &Database,
    requisition: &RequisitionRow,
) -> Result<Vec<WorkOrderMaterialRow>, sqlx::Error> {
    sqlx::query_as::<_, WorkOrderMaterialRow>(&format!(
        r#"{}
        WHERE w.order_number = $1 AND p.name = $2 AND w.is_active
          AND w.required_quantity > COALESCE(w.confirmed_quantity, 0)
        ORDER BY w.order_number, w.material_number"#,
        WORK_ORDER_MATERIAL_SELECT
    ))
    .bind(&requisition.order_number)
    .bind(&requisition.process_type)
    .fetch_all(db)
    .await
}

async fn dispatch_note_images(db: &Database, requisition: &RequisitionRow) -> Result<Vec<ImageRow>, sqlx::Error> {
    sqlx::query_as::<_, ImageRow>(
        r#"
        SELECT i.id, i.image_path, i.uploaded_at, u.username AS uploaded_by
        FROM work_order_material_images i
        LEFT JOIN process_types p ON p.id = i.process_type_id
        LEFT JOIN users u ON u.id = i.uploaded_by
        WHERE i.requisition_id = $1 AND p.name = $2
        ORDER BY i.uploaded_at DESC
        "#,
    )
    .bind(requisition.id)
    .bind(&requisition.process_type)
    .fetch_all(db)
    .await
}

pub async fn dispatch_note(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    let requisition = fetch_requisition(&state.db, id).await?;
    ensure_visible(&user, &requisition)?;

    let materials = dispatched_materials(&state.db, &requisition).await?;
    let images = dispatch_note_images(&state.db, &requisition).await?;

    let template = DispatchNoteTemplate {
        layout: Layout::new(&cookies, &user),
        user,
        requisition,
        materials,
        images,
    };
    Ok(render(&template)?.into_response())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchAction {
    Yes,
    No,
}

impl DispatchAction {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "yes" => Some(Self::Yes),
            "no" => Some(Self::No),
            _ => None,
        }
    }
}

/// `<material id>_<yes|no>` as posted by the dispatch note buttons.
fn parse_confirm_value(raw: &str) -> Option<(Uuid, DispatchAction)> {
    let (id, action) = raw.rsplit_once('_')?;
    Some((Uuid::parse_str(id).ok()?, DispatchAction::parse(action)?))
}

#[derive(Debug, Serialize)]
pub struct DispatchResult {
    pub success: bool,
    pub message: String,
    pub new_confirmed_quantity: String,
    pub new_is_signed_off: bool,
}

/// "Yes" dispatches the full required quantity and signs the material off;
/// "no" zeroes it so it shows up as a backorder.
async fn set_dispatch(
    db: &Database,
    material_id: Uuid,
    action: DispatchAction,
) -> AppResult<DispatchResult> {
    let row = sqlx::query_as::<_, (Option<String>, Decimal, bool)>(
        r#"
        UPDATE work_order_materials
        SET confirmed_quantity = CASE WHEN $2 THEN required_quantity ELSE 0 END,
            is_signed_off = $2,
            updated_at = NOW()
        WHERE id = $1
        RETURNING material_number, COALESCE(confirmed_quantity, 0), is_signed_off
        "#,
    )
    .bind(material_id)
    .bind(action == DispatchAction::Yes)
    .fetch_optional(db)
    .await?
    .ok_or(AppError::NotFound("work order material"))?;

    let (material_number, confirmed, signed) = row;
    let material_number = material_number.unwrap_or_default();
    let message = match action {
        DispatchAction::Yes => format!("物料 {} 已確認撥料。", material_number),
        DispatchAction::No => format!("物料 {} 已取消撥料並移至欠料。", material_number),
    };
    Ok(DispatchResult {
        success: true,
        message,
        new_confirmed_quantity: filters::format_decimal(confirmed),
        new_is_signed_off: signed,
    })
}

pub async fn update_dispatch_note(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
    form: RawForm,
) -> AppResult<Redirect> {
    let user = require_user(&cookies, &state).await?;
    let back = Redirect::to(&format!("/requisitions/{}/dispatch-note", id));
    if !user.can_handle() {
        flash::error(&cookies, "您沒有權限更新撥料狀態。");
        return Ok(back);
    }
    fetch_requisition(&state.db, id).await?;

    let form = fields(form);
    let Some((material_id, action)) = form.get("confirm").and_then(parse_confirm_value) else {
        return Ok(back);
    };

    match set_dispatch(&state.db, material_id, action).await {
        Ok(result) if action == DispatchAction::Yes => flash::success(&cookies, result.message),
        Ok(result) => flash::info(&cookies, result.message),
        Err(AppError::NotFound(_)) => {
            flash::error(&cookies, format!("物料 ID {} 不存在。", material_id))
        }
        Err(e) => return Err(e),
    }
    Ok(back)
}

#[derive(Debug, Deserialize)]
pub struct DispatchStatusRequest {
    pub material_id: Uuid,
    pub action: String,
}

pub async fn update_dispatch_status(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
    Json(body): Json<DispatchStatusRequest>,
) -> Response {
    match dispatch_status(&state, &cookies, id, &body).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => e.into_json(),
    }
}

async fn dispatch_status(
    state: &AppState,
    cookies: &Cookies,
    id: Uuid,
    body: &DispatchStatusRequest,
) -> AppResult<DispatchResult> {
    let user = require_user(cookies, state).await?;
    user.require_handler()?;
    fetch_requisition(&state.db, id).await?;
    let action = DispatchAction::parse(&body.action)
        .ok_or_else(|| AppError::BadRequest("無效的操作。".to_string()))?;
    set_dispatch(&state.db, body.material_id, action).await
}

pub async fn backorder_note(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    let requisition = fetch_requisition(&state.db, id).await?;
    ensure_visible(&user, &requisition)?;
    let materials = backorder_materials(&state.db, &requisition).await?;

    let template = BackorderNoteTemplate {
        layout: Layout::new(&cookies, &user),
        requisition,
        materials,
    };
    Ok(render(&template)?.into_response())
}

pub async fn export_backorder_note(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    let requisition = fetch_requisition(&state.db, id).await?;
    ensure_visible(&user, &requisition)?;
    let materials = backorder_materials(&state.db, &requisition).await?;

    let mut sheet = SheetData::new(
        "Backorder",
        vec!["物料", "品名", "需求數量", "已撥料數量", "欠料數量", "儲格", "庫存"],
    );
    for m in &materials {
        sheet.push(vec![
            Cell::from(m.material_number.clone()),
            Cell::from(m.item_name.clone()),
            Cell::from(m.required_quantity),
            Cell::from(m.confirmed_quantity),
            Cell::from(m.shortage()),
            Cell::from(m.storage_bin.clone()),
            Cell::from(m.stock_quantity),
        ]);
    }

    let bytes = build_workbook(&[sheet])?;
    Ok(xlsx_response(&format!("backorder_{}.xlsx", id), bytes))
}

/// Photos attached to a requisition's dispatch note, tagged with a process type.
pub async fn upload_work_order_images(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> AppResult<Redirect> {
    let user = require_user(&cookies, &state).await?;
    let back = Redirect::to(&format!("/requisitions/{}/dispatch-note", id));
    if !user.can_handle() {
        flash::error(&cookies, "您沒有權限上傳圖片。");
        return Ok(back);
    }
    let requisition = fetch_requisition(&state.db, id).await?;

    let form = MultipartForm::read(multipart).await?;
    let process_type_id = match form.text("process_type").and_then(|v| Uuid::parse_str(v).ok()) {
        Some(id) => Some(id),
        None => match requisition.process_type.as_deref() {
            Some(name) => process_type_id_by_name(&state.db, &requisition.order_number, name).await?,
            None => None,
        },
    };

    let mut saved = 0;
    for file in form.files_named("images") {
        if let Some(path) = save_image(&state.config.media_root, "work_order_material_images", file).await? {
            sqlx::query(
                r#"
                INSERT INTO work_order_material_images (requisition_id, process_type_id, image_path, uploaded_by)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(id)
            .bind(process_type_id)
            .bind(&path)
            .bind(user.id)
            .execute(&state.db)
            .await?;
            saved += 1;
        }
    }

    if saved > 0 {
        flash::success(&cookies, "圖片上傳成功！");
    } else {
        flash::warning(&cookies, "沒有圖片被上傳。");
    }
    Ok(back)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_confirm_value() {
        let id = Uuid::new_v4();
        assert_eq!(
            parse_confirm_value(&format!("{}_yes", id)),
            Some((id, DispatchAction::Yes))
        );
        assert_eq!(
            parse_confirm_value(&format!("{}_no", id)),
            Some((id, DispatchAction::No))
        );
        assert_eq!(parse_confirm_value(&format!("{}_maybe", id)), None);
        assert_eq!(parse_confirm_value("12_yes"), None);
    }

    #[test]
    fn test_parse_dispatch_changes() {
        let (a, b, c) = (Uuid::from_u128(1), Uuid::from_u128(2), Uuid::from_u128(3));
        let changes = parse_dispatch_changes(vec![(a, "2"), (b, "0"), (c, "")]).unwrap();
        assert_eq!(changes, vec![(a, Decimal::from(2))]);

        let returned = parse_dispatch_changes(vec![(a, "-1.5")]).unwrap();
        assert_eq!(returned, vec![(a, Decimal::new(-15, 1))]);

        let (failed, _) = parse_dispatch_changes(vec![(a, "1"), (b, "two")]).unwrap_err();
        assert_eq!(failed, b);
    }

    #[test]
    fn test_signed_change_formats_two_places() {
        assert_eq!(signed_change(Decimal::from(3)), "+3.00");
        assert_eq!(signed_change(Decimal::new(-15, 1)), "-1.50");
    }

    #[test]
    fn test_work_order_url_keeps_filters() {
        assert_eq!(work_order_url("", None), "/work-orders");
        assert_eq!(
            work_order_url("WO 1", Some("abc")),
            "/work-orders?order_number=WO%201&process_type=abc"
        );
    }

    #[test]
    fn test_show_inactive_flag() {
        let query = WorkOrderQuery {
            show_inactive: Some("TRUE".into()),
            ..Default::default()
        };
        assert!(query.show_inactive());
        assert!(!WorkOrderQuery::default().show_inactive());
    }
}
