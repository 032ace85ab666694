//! Material specifications: size, weight, free-text description and a
//! reference picture per material.

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Redirect, Response},
    Form,
};
use axum_extra::extract::Multipart;
use askama::Template;
use rust_decimal::Decimal;
use serde::Deserialize;
use tower_cookies::Cookies;
use uuid::Uuid;

use super::{non_empty, render, Layout};
use crate::{
    database::Database,
    error::{AppError, AppResult},
    excel::{is_spreadsheet_name, SheetTable},
    filters,
    flash,
    middleware::require_user,
    models::{specification::SPEC_SELECT, MaterialSpecRow},
    state::AppState,
    sync::specifications::import_specifications,
    utils::{
        forms::parse_optional_decimal,
        uploads::{save_image, MultipartForm},
    },
};

const SEARCH_LIMIT: i64 = 200;

#[derive(Template)]
#[template(path = "specifications/list.html")]
struct SpecListTemplate {
    layout: Layout,
    query: String,
    materials: Vec<MaterialSpecRow>,
}

#[derive(Template)]
#[template(path = "specifications/edit.html")]
struct SpecEditTemplate {
    layout: Layout,
    material: MaterialSpecRow,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SpecQuery {
    pub q: Option<String>,
}

/// Materials whose code contains the search text. Nothing is listed until
/// a search is made.
pub async fn spec_list(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(query): Query<SpecQuery>,
) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    let search = non_empty(&query.q).unwrap_or_default().to_string();

    let materials = if search.is_empty() {
        Vec::new()
    } else {
        sqlx::query_as::<_, MaterialSpecRow>(&format!(
            "{} WHERE mt.material_code ILIKE '%' || $1 || '%' ORDER BY mt.material_code LIMIT $2",
            SPEC_SELECT
        ))
        .bind(&search)
        .bind(SEARCH_LIMIT)
        .fetch_all(&state.db)
        .await?
    };

    let template = SpecListTemplate {
        layout: Layout::new(&cookies, &user),
        query: search,
        materials,
    };
    Ok(render(&template)?.into_response())
}

#[derive(Debug, Deserialize)]
pub struct LookupForm {
    #[serde(default)]
    pub material_code: String,
}

/// Jumps straight to the edit page of an exact material code.
pub async fn lookup(
    State(state): State<AppState>,
    cookies: Cookies,
    Form(form): Form<LookupForm>,
) -> AppResult<Redirect> {
    require_user(&cookies, &state).await?;
    let code = form.material_code.trim();
    if code.is_empty() {
        flash::error(&cookies, "請輸入物料號碼。");
        return Ok(Redirect::to("/specifications"));
    }

    let id = sqlx::query_scalar::<_, Uuid>("SELECT id FROM materials WHERE material_code = $1")
        .bind(code)
        .fetch_optional(&state.db)
        .await?;
    match id {
        Some(id) => Ok(Redirect::to(&format!("/specifications/{}/edit", id))),
        None => {
            flash::error(&cookies, format!("物料號碼 '{}' 不存在。", code));
            Ok(Redirect::to("/specifications"))
        }
    }
}

async fn fetch_spec(db: &Database, material_id: Uuid) -> AppResult<MaterialSpecRow> {
    sqlx::query_as::<_, MaterialSpecRow>(&format!("{} WHERE mt.id = $1", SPEC_SELECT))
        .bind(material_id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound("material"))
}

pub async fn edit_page(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(material_id): Path<Uuid>,
) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    let material = fetch_spec(&state.db, material_id).await?;
    let template = SpecEditTemplate {
        layout: Layout::new(&cookies, &user),
        material,
    };
    Ok(render(&template)?.into_response())
}

fn optional_text(form: &MultipartForm, name: &str) -> Option<String> {
    form.text(name)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_weight(raw: Option<&str>) -> Result<Option<Decimal>, String> {
    Ok(parse_optional_decimal(raw.unwrap_or_default())?.map(|w| w.round_dp(2)))
}

/// Saves the specification form. A new image replaces the old one; no image
/// keeps it.
pub async fn save_spec(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(material_id): Path<Uuid>,
    multipart: Multipart,
) -> AppResult<Redirect> {
    require_user(&cookies, &state).await?;
    let material = fetch_spec(&state.db, material_id).await?;
    let form = MultipartForm::read(multipart).await?;

    let weight = match parse_weight(form.text("weight")) {
        Ok(weight) => weight,
        Err(message) => {
            flash::error(&cookies, format!("重量 {}", message));
            return Ok(Redirect::to(&format!("/specifications/{}/edit", material_id)));
        }
    };

    let image_path = match form.file("image") {
        Some(file) if !file.data.is_empty() => {
            save_image(&state.config.media_root, "specification_images", file).await?
        }
        _ => None,
    };

    sqlx::query(
        r#"
        INSERT INTO material_specifications (material_id, size, weight, detailed_description, image_path)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (material_id) DO UPDATE SET
            size = EXCLUDED.size,
            weight = EXCLUDED.weight,
            detailed_description = EXCLUDED.detailed_description,
            image_path = COALESCE(EXCLUDED.image_path, material_specifications.image_path)
        "#,
    )
    .bind(material_id)
    .bind(optional_text(&form, "size"))
    .bind(weight)
    .bind(optional_text(&form, "detailed_description"))
    .bind(image_path)
    .execute(&state.db)
    .await?;

    flash::success(&cookies, "物料規格已成功儲存。");
    Ok(Redirect::to(&format!(
        "/specifications?q={}",
        urlencoding::encode(&material.material_code)
    )))
}

pub async fn import_specs(
    State(state): State<AppState>,
    cookies: Cookies,
    multipart: Multipart,
) -> AppResult<Redirect> {
    let user = require_user(&cookies, &state).await?;
    let form = MultipartForm::read(multipart).await?;

    let result = match form.file("excel_file") {
        None => Err("請選擇要上傳的檔案。".to_string()),
        Some(file) if !is_spreadsheet_name(&file.filename) => {
            Err("上傳的檔案必須是 Excel 檔案 (.xlsx, .xls)。".to_string())
        }
        Some(file) => match SheetTable::from_bytes(&file.data) {
            Ok(table) => import_specifications(&state.db, &table)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        },
    };

    match result {
        Ok(summary) => {
            log::info!("specification import by {}: {:?}", user.username, summary);
            flash::success(
                &cookies,
                format!("成功匯入/更新 {} 筆物料規格。", summary.created + summary.updated),
            );
        }
        Err(message) => flash::error(&cookies, format!("匯入失敗: {}", message)),
    }
    Ok(Redirect::to("/specifications"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_parse_weight_rounds_to_cents() {
        assert_eq!(parse_weight(None), Ok(None));
        assert_eq!(parse_weight(Some("")), Ok(None));
        assert_eq!(parse_weight(Some("1.236")), Ok(Some(Decimal::from_str("1.24").unwrap())));
        assert!(parse_weight(Some("heavy")).is_err());
    }
}
