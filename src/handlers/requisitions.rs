use std::collections::{HashMap, HashSet};

use axum::{
    extract::{Form, Path, Query, State},
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::Multipart;
use askama::Template;
use chrono::{Local, NaiveDate};
use serde::Deserialize;
use tower_cookies::Cookies;
use uuid::Uuid;

use super::{non_empty, render, Choice, Layout};
use crate::{
    database::Database,
    error::{AppError, AppResult},
    excel::{build_workbook, xlsx_response, Cell, SheetData},
    filters,
    flash,
    middleware::{require_user, CurrentUser},
    models::{
        requisition::{ITEM_SELECT, REQUISITION_SELECT, VERSION_SELECT},
        ImageRow, ProcessTypeOption, RequisitionItemRow, RequisitionRow, VersionRow,
    },
    state::AppState,
    utils::{
        pagination::{Page, PER_PAGE},
        sort::{query_string, SortHeader, SortSpec},
        uploads::{save_image, MultipartForm},
    },
    workflow::{requisition_status_label, RequisitionStatus},
};

const REQUISITION_SORTS: [(&str, &str); 6] = [
    ("work_order_number", "r.order_number"),
    ("applicant", "u.username"),
    ("request_date", "r.request_date"),
    ("process_type", "r.process_type"),
    ("status", "r.status"),
    ("created_at", "r.created_at"),
];

const REQUISITION_COLUMNS: [(&str, &str); 6] = [
    ("work_order_number", "訂單單號"),
    ("applicant", "申請人"),
    ("request_date", "需求日期"),
    ("process_type", "需求流程"),
    ("status", "狀態"),
    ("created_at", "建立時間"),
];

const DUPLICATE_REQUISITION: &str =
    "此訂單單號在該需求流程中已存在，請選擇不同的訂單單號或需求流程，或修改現有申請單。";

#[derive(Template)]
#[template(path = "requisitions/list.html")]
struct RequisitionListTemplate {
    layout: Layout,
    user: CurrentUser,
    page: Page<RequisitionRow>,
    headers: Vec<SortHeader>,
    process_type_choices: Vec<Choice>,
    material_status_choices: Vec<Choice>,
    page_query: String,
    export_query: String,
}

#[derive(Template)]
#[template(path = "requisitions/history.html")]
struct HistoryTemplate {
    layout: Layout,
    page: Page<RequisitionRow>,
    query: HistoryQuery,
    process_type_choices: Vec<Choice>,
    page_query: String,
}

#[derive(Template)]
#[template(path = "requisitions/create.html")]
struct CreateTemplate {
    layout: Layout,
    order_number: String,
    request_date: String,
    remarks: String,
    process_types: Vec<ProcessTypeOption>,
    error: String,
}

#[derive(Template)]
#[template(path = "requisitions/detail.html")]
struct DetailTemplate {
    layout: Layout,
    user: CurrentUser,
    requisition: RequisitionRow,
    items: Vec<RequisitionItemRow>,
    versions: Vec<VersionRow>,
    images: Vec<ImageRow>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListQuery {
    pub sort_by: Option<String>,
    pub order: Option<String>,
    pub process_type: Option<String>,
    pub material_status: Option<String>,
    pub page: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HistoryQuery {
    pub work_order_number: Option<String>,
    pub applicant_username: Option<String>,
    pub process_type: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub material_or_item_search: Option<String>,
    pub page: Option<String>,
}

impl HistoryQuery {
    pub fn value(&self, field: &str) -> &str {
        let value = match field {
            "work_order_number" => &self.work_order_number,
            "applicant_username" => &self.applicant_username,
            "process_type" => &self.process_type,
            "start_date" => &self.start_date,
            "end_date" => &self.end_date,
            "material_or_item_search" => &self.material_or_item_search,
            _ => &None,
        };
        non_empty(value).unwrap_or("")
    }

    fn query_string(&self) -> String {
        query_string(&[
            ("work_order_number", self.value("work_order_number")),
            ("applicant_username", self.value("applicant_username")),
            ("process_type", self.value("process_type")),
            ("start_date", self.value("start_date")),
            ("end_date", self.value("end_date")),
            ("material_or_item_search", self.value("material_or_item_search")),
        ])
    }
}

#[derive(Deserialize)]
pub struct CreateForm {
    order_number: String,
    process_type_id: Option<String>,
    request_date: Option<String>,
    remarks: Option<String>,
}

// Shared lookups

pub(crate) async fn fetch_requisition(db: &Database, id: Uuid) -> AppResult<RequisitionRow> {
    sqlx::query_as::<_, RequisitionRow>(&format!("{} WHERE r.id = $1", REQUISITION_SELECT))
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound("requisition"))
}

/// Applicants may only open their own requisitions.
pub(crate) fn ensure_visible(user: &CurrentUser, requisition: &RequisitionRow) -> AppResult<()> {
    user.require_viewer()?;
    if user.sees_only_own_requisitions() && requisition.applicant_id != user.id {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

pub(crate) async fn fetch_items(
    db: &Database,
    version_id: Uuid,
    order_by: &str,
) -> Result<Vec<RequisitionItemRow>, sqlx::Error> {
    sqlx::query_as::<_, RequisitionItemRow>(&format!(
        "{} WHERE i.material_list_version_id = $1 ORDER BY {}",
        ITEM_SELECT, order_by
    ))
    .bind(version_id)
    .fetch_all(db)
    .await
}

pub(crate) async fn fetch_current_items(
    db: &Database,
    requisition: &RequisitionRow,
) -> Result<Vec<RequisitionItemRow>, sqlx::Error> {
    match requisition.current_material_list_version_id {
        Some(version_id) => fetch_items(db, version_id, "i.material_number").await,
        None => Ok(Vec::new()),
    }
}

pub(crate) async fn fetch_versions(
    db: &Database,
    requisition_id: Uuid,
) -> Result<Vec<VersionRow>, sqlx::Error> {
    sqlx::query_as::<_, VersionRow>(&format!(
        "{} WHERE v.requisition_id = $1 ORDER BY v.uploaded_at DESC",
        VERSION_SELECT
    ))
    .bind(requisition_id)
    .fetch_all(db)
    .await
}

pub(crate) async fn fetch_images(
    db: &Database,
    requisition_id: Uuid,
) -> Result<Vec<ImageRow>, sqlx::Error> {
    sqlx::query_as::<_, ImageRow>(
        r#"
        SELECT im.id, im.image_path, im.uploaded_at, u.username AS uploaded_by
        FROM requisition_images im
        LEFT JOIN users u ON u.id = im.uploaded_by
        WHERE im.requisition_id = $1
        ORDER BY im.uploaded_at DESC
        "#,
    )
    .bind(requisition_id)
    .fetch_all(db)
    .await
}

/// Process types linked to the order's work-order materials that no other
/// requisition of the order uses yet, one entry per name.
pub(crate) async fn available_process_types(
    db: &Database,
    order_number: &str,
) -> Result<Vec<ProcessTypeOption>, sqlx::Error> {
    sqlx::query_as::<_, ProcessTypeOption>(
        r#"
        SELECT DISTINCT ON (p.name) p.id, p.name
        FROM process_types p
        WHERE p.id IN (
                SELECT w.process_type_id FROM work_order_materials w
                WHERE w.order_number = $1 AND w.process_type_id IS NOT NULL)
          AND p.name NOT IN (
                SELECT r.process_type FROM requisitions r
                WHERE r.order_number = $1 AND r.process_type IS NOT NULL)
        ORDER BY p.name, p.id
        "#,
    )
    .bind(order_number)
    .fetch_all(db)
    .await
}

async fn requisition_process_types(db: &Database, dispatched: bool) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        r#"
        SELECT DISTINCT process_type FROM requisitions
        WHERE process_type IS NOT NULL AND process_type <> '' AND dispatch_performed = $1
        ORDER BY process_type
        "#,
    )
    .bind(dispatched)
    .fetch_all(db)
    .await
}

/// Undispatched requisitions visible to `user`, one per (order, process type).
async fn filter_requisitions(
    db: &Database,
    user: &CurrentUser,
    sort: &SortSpec,
    process_type: Option<&str>,
    material_status: Option<&str>,
) -> Result<Vec<RequisitionRow>, sqlx::Error> {
    if !user.can_view_requisitions() {
        return Ok(Vec::new());
    }
    let applicant = user.sees_only_own_requisitions().then_some(user.id);

    let rows = sqlx::query_as::<_, RequisitionRow>(&format!(
        r#"{}
        WHERE r.dispatch_performed = false
          AND ($1::uuid IS NULL OR r.applicant_id = $1)
          AND ($2::text IS NULL OR r.process_type = $2)
        ORDER BY {}, r.created_at DESC"#,
        REQUISITION_SELECT,
        sort.order_by()
    ))
    .bind(applicant)
    .bind(process_type)
    .fetch_all(db)
    .await?;

    let mut seen = HashSet::new();
    Ok(rows
        .into_iter()
        .filter(|r| match material_status {
            Some("has_materials") => r.has_materials(),
            Some("no_materials") => !r.has_materials(),
            _ => true,
        })
        .filter(|r| seen.insert((r.order_number.clone(), r.process_type.clone())))
        .collect())
}

fn list_sort(query: &ListQuery) -> SortSpec {
    SortSpec::resolve(
        query.sort_by.as_deref(),
        query.order.as_deref(),
        &REQUISITION_SORTS,
        "process_type",
        false,
    )
}

// Pages

pub async fn requisition_list(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(query): Query<ListQuery>,
) -> AppResult<Html<String>> {
    let user = require_user(&cookies, &state).await?;

    let sort = list_sort(&query);
    let process_type = non_empty(&query.process_type);
    let material_status = non_empty(&query.material_status);

    let rows = filter_requisitions(&state.db, &user, &sort, process_type, material_status).await?;
    let page = Page::paginate(rows, query.page.as_deref(), PER_PAGE);

    let filters = query_string(&[
        ("process_type", process_type.unwrap_or("")),
        ("material_status", material_status.unwrap_or("")),
    ]);
    let sorted_filters = query_string(&[
        ("sort_by", sort.key.as_str()),
        ("order", sort.order()),
        ("process_type", process_type.unwrap_or("")),
        ("material_status", material_status.unwrap_or("")),
    ]);

    let process_type_choices = Choice::plain(
        requisition_process_types(&state.db, false).await?,
        process_type.unwrap_or(""),
    );
    let selected_status = material_status.unwrap_or("");
    let material_status_choices = vec![
        Choice::new("", "所有待撥料", selected_status),
        Choice::new("has_materials", "已上傳物料", selected_status),
        Choice::new("no_materials", "未上傳物料", selected_status),
    ];

    let template = RequisitionListTemplate {
        layout: Layout::new(&cookies, &user),
        headers: sort.headers(&REQUISITION_COLUMNS, &filters),
        user,
        page,
        process_type_choices,
        material_status_choices,
        page_query: sorted_filters.clone(),
        export_query: sorted_filters,
    };
    render(&template)
}

pub async fn requisition_history(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Html<String>> {
    let user = require_user(&cookies, &state).await?;
    user.require_viewer()?;

    let parse_date = |field: &Option<String>| {
        non_empty(field).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
    };

    let rows = sqlx::query_as::<_, RequisitionRow>(&format!(
        r#"{}
        WHERE r.dispatch_performed = true
          AND ($1::text IS NULL OR r.order_number ILIKE '%' || $1 || '%')
          AND ($2::text IS NULL OR u.username ILIKE '%' || $2 || '%')
          AND ($3::text IS NULL OR r.process_type = $3)
          AND ($4::date IS NULL OR r.request_date >= $4)
          AND ($5::date IS NULL OR r.request_date <= $5)
          AND ($6::text IS NULL OR EXISTS (
                SELECT 1 FROM requisition_items i
                WHERE i.material_list_version_id = (
                        SELECT v.id FROM material_list_versions v
                        WHERE v.requisition_id = r.id
                        ORDER BY v.uploaded_at DESC LIMIT 1)
                  AND (i.material_number ILIKE '%' || $6 || '%'
                       OR i.item_name ILIKE '%' || $6 || '%')))
        ORDER BY r.updated_at DESC"#,
        REQUISITION_SELECT
    ))
    .bind(non_empty(&query.work_order_number))
    .bind(non_empty(&query.applicant_username))
    .bind(non_empty(&query.process_type))
    .bind(parse_date(&query.start_date))
    .bind(parse_date(&query.end_date))
    .bind(non_empty(&query.material_or_item_search))
    .fetch_all(&state.db)
    .await?;

    let page = Page::paginate(rows, query.page.as_deref(), PER_PAGE);
    let process_type_choices = Choice::plain(
        requisition_process_types(&state.db, true).await?,
        query.value("process_type"),
    );

    let template = HistoryTemplate {
        layout: Layout::new(&cookies, &user),
        page,
        page_query: query.query_string(),
        process_type_choices,
        query,
    };
    render(&template)
}

pub async fn create_form(
    State(state): State<AppState>,
    cookies: Cookies,
) -> AppResult<Html<String>> {
    let user = require_user(&cookies, &state).await?;
    user.require_requester()?;

    let template = CreateTemplate {
        layout: Layout::new(&cookies, &user),
        order_number: String::new(),
        request_date: Local::now().date_naive().format("%Y-%m-%d").to_string(),
        remarks: String::new(),
        process_types: Vec::new(),
        error: String::new(),
    };
    render(&template)
}

/// Name of the process type picked on the create form. It must be one of
/// the types still available for the order.
fn chosen_process_type<'a>(
    order_number: &str,
    available: &'a [ProcessTypeOption],
    raw_id: Option<&str>,
) -> Result<&'a str, &'static str> {
    if order_number.is_empty() {
        return Err("請輸入訂單單號。");
    }
    raw_id
        .and_then(|id| Uuid::parse_str(id).ok())
        .and_then(|id| available.iter().find(|p| p.id == id))
        .map(|p| p.name.as_str())
        .ok_or("請選擇此訂單可用的需求流程。")
}

pub async fn create_requisition(
    State(state): State<AppState>,
    cookies: Cookies,
    Form(form): Form<CreateForm>,
) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    user.require_requester()?;

    let order_number = form.order_number.trim().to_string();
    let remarks = non_empty(&form.remarks).map(str::to_string);
    let request_date = non_empty(&form.request_date)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .unwrap_or_else(|| Local::now().date_naive());

    let process_types = if order_number.is_empty() {
        Vec::new()
    } else {
        available_process_types(&state.db, &order_number).await?
    };
    let mut error = None;
    match chosen_process_type(&order_number, &process_types, non_empty(&form.process_type_id)) {
        Err(message) => error = Some(message.to_string()),
        Ok(process_type) => {
            let inserted = sqlx::query(
                r#"
                INSERT INTO requisitions (order_number, applicant_id, request_date, process_type, remarks, status)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(&order_number)
            .bind(user.id)
            .bind(request_date)
            .bind(process_type)
            .bind(&remarks)
            .bind(RequisitionStatus::Pending.as_str())
            .execute(&state.db)
            .await;

            match inserted {
                Ok(_) => {
                    log::info!(
                        "{} created requisition {} / {}",
                        user.username,
                        order_number,
                        process_type
                    );
                    flash::success(&cookies, "撥料申請單建立成功！");
                    return Ok(Redirect::to("/requisitions").into_response());
                }
                Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                    error = Some(DUPLICATE_REQUISITION.to_string());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    let template = CreateTemplate {
        layout: Layout::new(&cookies, &user),
        order_number,
        request_date: request_date.format("%Y-%m-%d").to_string(),
        remarks: remarks.unwrap_or_default(),
        process_types,
        error: error.unwrap_or_default(),
    };
    Ok(render(&template)?.into_response())
}

pub async fn requisition_detail(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
) -> AppResult<Html<String>> {
    let user = require_user(&cookies, &state).await?;
    let requisition = fetch_requisition(&state.db, id).await?;
    ensure_visible(&user, &requisition)?;

    let items = fetch_current_items(&state.db, &requisition).await?;
    let versions = fetch_versions(&state.db, id).await?;
    let images = fetch_images(&state.db, id).await?;

    let template = DetailTemplate {
        layout: Layout::new(&cookies, &user),
        user,
        requisition,
        items,
        versions,
        images,
    };
    render(&template)
}

pub async fn delete_requisition(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
) -> AppResult<Redirect> {
    let user = require_user(&cookies, &state).await?;
    if !user.is_admin {
        flash::error(&cookies, "您沒有權限刪除撥料申請單。");
        return Ok(Redirect::to("/requisitions"));
    }

    let deleted = sqlx::query("DELETE FROM requisitions WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;
    if deleted.rows_affected() == 0 {
        return Err(AppError::NotFound("requisition"));
    }

    log::info!("{} deleted requisition {}", user.username, id);
    flash::success(&cookies, "撥料申請單已成功刪除。");
    Ok(Redirect::to("/requisitions"))
}

pub async fn upload_images(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> AppResult<Redirect> {
    let user = require_user(&cookies, &state).await?;
    let requisition = fetch_requisition(&state.db, id).await?;
    ensure_visible(&user, &requisition)?;

    let form = MultipartForm::read(multipart).await?;
    let mut uploaded = 0;
    for file in form.files_named("images") {
        if let Some(path) = save_image(&state.config.media_root, "requisition_images", file).await? {
            sqlx::query(
                "INSERT INTO requisition_images (requisition_id, image_path, uploaded_by) VALUES ($1, $2, $3)",
            )
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
    Ok(Redirect::to(&format!("/requisitions/{}", id)))
}

// Exports

async fn items_by_version(
    db: &Database,
    requisitions: &[RequisitionRow],
) -> Result<HashMap<Uuid, Vec<RequisitionItemRow>>, sqlx::Error> {
    let version_ids: Vec<Uuid> = requisitions
        .iter()
        .filter_map(|r| r.current_material_list_version_id)
        .collect();
    if version_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let items = sqlx::query_as::<_, RequisitionItemRow>(&format!(
        "{} WHERE i.material_list_version_id = ANY($1) ORDER BY i.material_number",
        ITEM_SELECT
    ))
    .bind(&version_ids)
    .fetch_all(db)
    .await?;

    let mut grouped: HashMap<Uuid, Vec<RequisitionItemRow>> = HashMap::new();
    for item in items {
        grouped.entry(item.material_list_version_id).or_default().push(item);
    }
    Ok(grouped)
}

fn current_items<'a>(
    grouped: &'a HashMap<Uuid, Vec<RequisitionItemRow>>,
    requisition: &RequisitionRow,
) -> &'a [RequisitionItemRow] {
    requisition
        .current_material_list_version_id
        .and_then(|v| grouped.get(&v))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn signed_label(signed: bool) -> &'static str {
    if signed {
        "是"
    } else {
        "否"
    }
}

pub async fn export_requisitions(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(query): Query<ListQuery>,
) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    let sort = list_sort(&query);
    let requisitions = filter_requisitions(
        &state.db,
        &user,
        &sort,
        non_empty(&query.process_type),
        non_empty(&query.material_status),
    )
    .await?;
    let grouped = items_by_version(&state.db, &requisitions).await?;

    let mut sheet = SheetData::new(
        "撥料申請單",
        vec!["訂單", "需求流程", "申請人", "需求日期", "狀態", "建立時間"],
    );
    let mut item_sheet = SheetData::new(
        "撥料物料明細",
        vec![
            "訂單單號",
            "需求流程",
            "物料",
            "品名",
            "需求數量",
            "庫存數量",
            "撥料數量 (實際撥出)",
            "最終簽收已確認",
        ],
    );

    for r in &requisitions {
        sheet.push(vec![
            Cell::from(r.order_number.as_str()),
            Cell::from(r.process_type_name()),
            Cell::from(r.applicant_username.as_str()),
            Cell::from(r.request_date.format("%Y-%m-%d").to_string()),
            Cell::from(r.status_label()),
            Cell::from(filters::format_datetime(&r.created_at)),
        ]);
        for item in current_items(&grouped, r) {
            item_sheet.push(vec![
                Cell::from(r.order_number.as_str()),
                Cell::from(r.process_type_name()),
                Cell::from(item.material_number.as_str()),
                Cell::from(item.item_name.as_str()),
                Cell::from(item.required_quantity),
                Cell::from(item.stock_quantity),
                Cell::from(item.confirmed_quantity),
                Cell::from(signed_label(item.is_signed_off)),
            ]);
        }
    }

    let bytes = build_workbook(&[sheet, item_sheet])?;
    Ok(xlsx_response("requisition_list_with_materials.xlsx", bytes))
}

pub async fn export_pending_materials(
    State(state): State<AppState>,
    cookies: Cookies,
) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    user.require_viewer()?;

    let requisitions = sqlx::query_as::<_, RequisitionRow>(&format!(
        "{} WHERE r.status = 'pending' ORDER BY r.order_number, r.process_type",
        REQUISITION_SELECT
    ))
    .fetch_all(&state.db)
    .await?;
    let grouped = items_by_version(&state.db, &requisitions).await?;

    let mut sheet = SheetData::new(
        "所有待撥料物料",
        vec![
            "訂單單號",
            "需求流程",
            "物料",
            "品名",
            "需求數量",
            "庫存數量",
            "撥料數量 (實際撥出)",
            "最終簽收已確認",
            "申請單狀態",
            "申請人",
            "申請日期",
        ],
    );
    for r in &requisitions {
        for item in current_items(&grouped, r) {
            sheet.push(vec![
                Cell::from(r.order_number.as_str()),
                Cell::from(r.process_type_name()),
                Cell::from(item.material_number.as_str()),
                Cell::from(item.item_name.as_str()),
                Cell::from(item.required_quantity),
                Cell::from(item.stock_quantity),
                Cell::from(item.confirmed_quantity),
                Cell::from(signed_label(item.is_signed_off)),
                Cell::from(requisition_status_label(&r.status)),
                Cell::from(r.applicant_username.as_str()),
                Cell::from(r.request_date.format("%Y-%m-%d").to_string()),
            ]);
        }
    }

    let bytes = build_workbook(&[sheet])?;
    Ok(xlsx_response("all_pending_materials.xlsx", bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_defaults_to_process_type_ascending() {
        let sort = list_sort(&ListQuery::default());
        assert_eq!(sort.order_by(), "r.process_type ASC");

        let sort = list_sort(&ListQuery {
            sort_by: Some("applicant".into()),
            order: Some("desc".into()),
            ..Default::default()
        });
        assert_eq!(sort.order_by(), "u.username DESC");
    }

    #[test]
    fn test_chosen_process_type_must_be_available() {
        let available = vec![
            ProcessTypeOption { id: Uuid::from_u128(1), name: "組裝".to_string() },
            ProcessTypeOption { id: Uuid::from_u128(2), name: "焊接".to_string() },
        ];
        let welding = Uuid::from_u128(2).to_string();
        assert_eq!(chosen_process_type("WO-1", &available, Some(&welding)), Ok("焊接"));
        assert_eq!(
            chosen_process_type("", &available, Some(&welding)),
            Err("請輸入訂單單號。")
        );

        let taken = Uuid::from_u128(3).to_string();
        assert_eq!(
            chosen_process_type("WO-1", &available, Some(&taken)),
            Err("請選擇此訂單可用的需求流程。")
        );
        assert!(chosen_process_type("WO-1", &available, None).is_err());
        assert!(chosen_process_type("WO-1", &available, Some("not-a-uuid")).is_err());
    }

    #[test]
    fn test_history_query_string_keeps_filled_filters() {
        let query = HistoryQuery {
            work_order_number: Some("WO-7".into()),
            process_type: Some(" ".into()),
            start_date: Some("2024-01-01".into()),
            ..Default::default()
        };
        assert_eq!(query.query_string(), "work_order_number=WO-7&start_date=2024-01-01");
        assert_eq!(query.value("process_type"), "");
    }
}
