use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_cookies::Cookies;
use uuid::Uuid;

use super::{
    non_empty,
    requisitions::{available_process_types, ensure_visible, fetch_current_items, fetch_images, fetch_requisition},
};
use crate::{
    error::{AppError, AppResult},
    filters::format_datetime,
    middleware::require_user,
    models::{ImageRow, ProcessTypeOption, RequisitionItemRow, RequisitionRow},
    state::AppState,
};

#[derive(Serialize)]
pub struct ProcessTypeChoice {
    pub value: Uuid,
    pub label: String,
}

impl From<ProcessTypeOption> for ProcessTypeChoice {
    fn from(option: ProcessTypeOption) -> Self {
        Self {
            value: option.id,
            label: option.name,
        }
    }
}

#[derive(Serialize)]
pub struct AvailableProcessTypes {
    pub available_process_types: Vec<ProcessTypeChoice>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct OrderQuery {
    pub order_number: Option<String>,
}

/// Process types still free for a new requisition of the order.
pub async fn get_available_process_types(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(query): Query<OrderQuery>,
) -> Response {
    let result = async {
        require_user(&cookies, &state).await?;
        let order_number = non_empty(&query.order_number)
            .ok_or_else(|| AppError::BadRequest("No order number provided".to_string()))?;
        let options = available_process_types(&state.db, order_number).await?;
        Ok::<_, AppError>(AvailableProcessTypes {
            available_process_types: options.into_iter().map(ProcessTypeChoice::from).collect(),
        })
    }
    .await;

    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => e.into_json(),
    }
}

#[derive(Serialize)]
pub struct RequisitionDetailsResponse {
    pub id: Uuid,
    pub order_number: String,
    pub applicant_name: String,
    pub applicant_id: Uuid,
    pub request_date: String,
    pub process_type: Option<String>,
    pub status: String,
    pub status_display: String,
    pub created_at: String,
    pub remarks: Option<String>,
    pub is_admin: bool,
    pub is_applicant: bool,
    pub is_material_handler: bool,
}

pub async fn get_requisition_details(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
) -> Response {
    let result = async {
        let user = require_user(&cookies, &state).await?;
        let requisition: RequisitionRow = fetch_requisition(&state.db, id).await?;
        ensure_visible(&user, &requisition)?;

        Ok::<_, AppError>(RequisitionDetailsResponse {
            id: requisition.id,
            applicant_name: requisition.applicant_display().to_string(),
            applicant_id: requisition.applicant_id,
            request_date: requisition.request_date.format("%Y-%m-%d").to_string(),
            status_display: requisition.status_label().to_string(),
            created_at: format_datetime(&requisition.created_at),
            order_number: requisition.order_number,
            process_type: requisition.process_type,
            status: requisition.status,
            remarks: requisition.remarks,
            is_admin: user.is_admin,
            is_applicant: user.is_applicant,
            is_material_handler: user.is_material_handler,
        })
    }
    .await;

    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => e.into_json(),
    }
}

#[derive(Serialize)]
pub struct ItemResponse {
    pub id: Uuid,
    pub material_number: String,
    pub item_name: String,
    pub machine_model: String,
    pub required_quantity: Decimal,
    pub stock_quantity: Decimal,
    pub storage_bin: Option<String>,
    pub confirmed_quantity: Option<Decimal>,
    pub is_signed_off: bool,
}

impl From<RequisitionItemRow> for ItemResponse {
    fn from(item: RequisitionItemRow) -> Self {
        Self {
            id: item.id,
            material_number: item.material_number,
            item_name: item.item_name,
            machine_model: item.machine_model.unwrap_or_else(|| "N/A".to_string()),
            required_quantity: item.required_quantity,
            stock_quantity: item.stock_quantity,
            storage_bin: item.storage_bin,
            confirmed_quantity: item.confirmed_quantity,
            is_signed_off: item.is_signed_off,
        }
    }
}

#[derive(Serialize)]
pub struct ItemsResponse {
    pub items: Vec<ItemResponse>,
}

/// Items of the current material-list version; empty without one.
pub async fn get_requisition_items(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
) -> Response {
    let result = async {
        let user = require_user(&cookies, &state).await?;
        let requisition = fetch_requisition(&state.db, id).await?;
        ensure_visible(&user, &requisition)?;
        let items = fetch_current_items(&state.db, &requisition).await?;
        Ok::<_, AppError>(ItemsResponse {
            items: items.into_iter().map(ItemResponse::from).collect(),
        })
    }
    .await;

    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => e.into_json(),
    }
}

#[derive(Serialize)]
pub struct ImageResponse {
    pub url: String,
    pub uploaded_at: String,
    pub uploaded_by: String,
}

impl From<ImageRow> for ImageResponse {
    fn from(image: ImageRow) -> Self {
        Self {
            uploaded_at: format_datetime(&image.uploaded_at),
            url: image.image_path,
            uploaded_by: image.uploaded_by.unwrap_or_else(|| "N/A".to_string()),
        }
    }
}

#[derive(Serialize)]
pub struct ImagesResponse {
    pub images: Vec<ImageResponse>,
}

pub async fn get_requisition_images(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
) -> Response {
    let result = async {
        let user = require_user(&cookies, &state).await?;
        let requisition = fetch_requisition(&state.db, id).await?;
        ensure_visible(&user, &requisition)?;
        let images = fetch_images(&state.db, id).await?;
        Ok::<_, AppError>(ImagesResponse {
            images: images.into_iter().map(ImageResponse::from).collect(),
        })
    }
    .await;

    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => e.into_json(),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MachineModelQuery {
    pub machine_model_id: Option<String>,
}

/// Process types of a machine model. An unknown or malformed id yields an
/// empty list.
pub async fn get_process_types_for_model(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(query): Query<MachineModelQuery>,
) -> AppResult<Json<Vec<ProcessTypeOption>>> {
    require_user(&cookies, &state).await?;
    let Some(model_id) = non_empty(&query.machine_model_id).and_then(|v| Uuid::parse_str(v).ok()) else {
        return Ok(Json(Vec::new()));
    };

    let process_types = sqlx::query_as::<_, ProcessTypeOption>(
        "SELECT id, name FROM process_types WHERE machine_model_id = $1 ORDER BY name",
    )
    .bind(model_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(process_types))
}

#[derive(Debug, Deserialize)]
pub struct ProcessTypeUpdate {
    pub process_type: Option<Uuid>,
}

#[derive(Serialize)]
pub struct UpdateResponse {
    pub success: bool,
    pub message: &'static str,
}

/// Reassigns a work-order material to another process type (admin only).
pub async fn update_material_process_type(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(material_id): Path<Uuid>,
    Json(body): Json<ProcessTypeUpdate>,
) -> Response {
    let result = async {
        let user = require_user(&cookies, &state).await?;
        user.require_admin()?;
        let process_type_id = body
            .process_type
            .ok_or_else(|| AppError::BadRequest("未提供投料點 ID".to_string()))?;

        let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM process_types WHERE id = $1")
            .bind(process_type_id)
            .fetch_one(&state.db)
            .await?;
        if exists == 0 {
            return Err(AppError::NotFound("process type"));
        }

        let updated = sqlx::query(
            "UPDATE work_order_materials SET process_type_id = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(process_type_id)
        .bind(material_id)
        .execute(&state.db)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(AppError::NotFound("work order material"));
        }

        log::info!("{} moved material {} to process type {}", user.username, material_id, process_type_id);
        Ok::<_, AppError>(UpdateResponse {
            success: true,
            message: "投料點更新成功",
        })
    }
    .await;

    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => e.into_json(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_image_response_defaults_uploader() {
        let image = ImageRow {
            id: Uuid::new_v4(),
            image_path: "/media/requisition_images/a.png".into(),
            uploaded_at: Utc::now(),
            uploaded_by: None,
        };
        let response = ImageResponse::from(image);
        assert_eq!(response.uploaded_by, "N/A");
        assert_eq!(response.url, "/media/requisition_images/a.png");
    }

    #[test]
    fn test_process_type_choice_serializes_value_and_label() {
        let id = Uuid::nil();
        let choice = ProcessTypeChoice::from(ProcessTypeOption {
            id,
            name: "前段".into(),
        });
        let json = serde_json::to_value(&choice).unwrap();
        assert_eq!(json["label"], "前段");
        assert_eq!(json["value"], id.to_string());
    }
}
