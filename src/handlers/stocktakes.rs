//! Stocktake documents created from the material list: counting, completion
//! and difference export.

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Redirect, Response},
};
use askama::Template;
use serde::Deserialize;
use tower_cookies::Cookies;
use uuid::Uuid;

use super::{admin_gate, fields, non_empty, render, Layout, RawForm};
use crate::{
    database::Database,
    error::{AppError, AppResult},
    excel::{build_workbook, xlsx_response, Cell, SheetData},
    filters,
    flash,
    middleware::require_user,
    models::{
        inventory::{STOCKTAKE_ITEM_SELECT, STOCKTAKE_SELECT},
        StocktakeItemRow, StocktakeRow,
    },
    state::AppState,
    utils::{
        forms::parse_optional_int,
        sort::{query_string, SortHeader, SortSpec},
    },
    workflow::{CountStatus, StocktakeStatus},
};

const ITEM_SORTS: [(&str, &str); 7] = [
    ("location", "l.name"),
    ("bin", "mt.bin"),
    ("material_code", "mt.material_code"),
    ("material_description", "mt.material_description"),
    ("system_quantity_on_record", "i.system_quantity_on_record"),
    ("counted_quantity", "i.counted_quantity"),
    ("status", "i.status"),
];

const ITEM_COLUMNS: [(&str, &str); 7] = [
    ("location", "庫位"),
    ("bin", "儲格"),
    ("material_code", "物料"),
    ("material_description", "物料說明"),
    ("system_quantity_on_record", "系統數量"),
    ("counted_quantity", "盤點數量"),
    ("status", "狀態"),
];

#[derive(Template)]
#[template(path = "stocktakes/list.html")]
struct StocktakeListTemplate {
    layout: Layout,
    stocktakes: Vec<StocktakeRow>,
}

#[derive(Template)]
#[template(path = "stocktakes/detail.html")]
struct StocktakeDetailTemplate {
    layout: Layout,
    stocktake: StocktakeRow,
    items: Vec<StocktakeItemRow>,
    headers: Vec<SortHeader>,
    location_filter: String,
}

async fn fetch_stocktake(db: &Database, id: Uuid) -> AppResult<StocktakeRow> {
    sqlx::query_as::<_, StocktakeRow>(&format!("{} WHERE s.id = $1", STOCKTAKE_SELECT))
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound("stocktake"))
}

pub async fn stocktake_list(State(state): State<AppState>, cookies: Cookies) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect.into_response());
    }

    let stocktakes = sqlx::query_as::<_, StocktakeRow>(&format!("{} ORDER BY s.created_at DESC", STOCKTAKE_SELECT))
        .fetch_all(&state.db)
        .await?;

    let template = StocktakeListTemplate {
        layout: Layout::new(&cookies, &user),
        stocktakes,
    };
    Ok(render(&template)?.into_response())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StocktakeQuery {
    pub location_filter: Option<String>,
    pub sort_by: Option<String>,
    pub order: Option<String>,
}

pub async fn stocktake_detail(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
    Query(query): Query<StocktakeQuery>,
) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect.into_response());
    }

    let stocktake = fetch_stocktake(&state.db, id).await?;
    let location_filter = non_empty(&query.location_filter).unwrap_or_default().to_string();
    let sort = SortSpec::resolve(
        query.sort_by.as_deref(),
        query.order.as_deref(),
        &ITEM_SORTS,
        "material_code",
        false,
    );

    let items = sqlx::query_as::<_, StocktakeItemRow>(&format!(
        r#"{}
        WHERE i.stocktake_id = $1 AND ($2 = '' OR l.name ILIKE '%' || $2 || '%')
        ORDER BY {}, mt.material_code"#,
        STOCKTAKE_ITEM_SELECT,
        sort.order_by()
    ))
    .bind(id)
    .bind(&location_filter)
    .fetch_all(&state.db)
    .await?;

    let extra = query_string(&[("location_filter", &location_filter)]);
    let template = StocktakeDetailTemplate {
        layout: Layout::new(&cookies, &user),
        headers: sort.headers(&ITEM_COLUMNS, &extra),
        stocktake,
        items,
        location_filter,
    };
    Ok(render(&template)?.into_response())
}

/// `counted_quantity_<item id>` entries that were filled in. Blank inputs
/// leave the item untouched.
fn parse_counts(pairs: Vec<(Uuid, &str)>) -> Result<Vec<(Uuid, i32)>, (Uuid, String)> {
    let mut counts = Vec::new();
    for (id, raw) in pairs {
        match parse_optional_int(raw) {
            Ok(Some(count)) => counts.push((id, count)),
            Ok(None) => {}
            Err(message) => return Err((id, message)),
        }
    }
    Ok(counts)
}

/// Saves the entered counts and, for `action=complete_stocktake`, closes the
/// stocktake and copies each counted quantity onto its material.
pub async fn stocktake_actions(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
    form: RawForm,
) -> AppResult<Redirect> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect);
    }
    let back = Redirect::to(&format!("/inventory/stocktakes/{}", id));

    let stocktake = fetch_stocktake(&state.db, id).await?;
    if !stocktake.is_in_progress() {
        flash::warning(&cookies, "此盤點單已完成，無法再修改。");
        return Ok(back);
    }

    let form = fields(form);
    let counts = match parse_counts(form.prefixed("counted_quantity_")) {
        Ok(counts) => counts,
        Err((item_id, _)) => {
            let code = sqlx::query_scalar::<_, String>(
                "SELECT mt.material_code FROM stocktake_items i JOIN materials mt ON mt.id = i.material_id WHERE i.id = $1",
            )
            .bind(item_id)
            .fetch_optional(&state.db)
            .await?
            .unwrap_or_else(|| item_id.to_string());
            flash::error(&cookies, format!("物料 {} 的盤點數量無效，請輸入數字。", code));
            return Ok(back);
        }
    };
    let completing = form.get("action") == Some("complete_stocktake");

    let mut tx = state.db.begin().await?;
    for (item_id, count) in &counts {
        sqlx::query(
            "UPDATE stocktake_items SET counted_quantity = $1, status = $2 WHERE id = $3 AND stocktake_id = $4",
        )
        .bind(count)
        .bind(CountStatus::Counted.as_str())
        .bind(item_id)
        .bind(id)
        .execute(&mut *tx)
        .await?;
    }

    if completing {
        sqlx::query("UPDATE stocktakes SET status = $1 WHERE id = $2")
            .bind(StocktakeStatus::Completed.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            UPDATE materials mt
            SET latest_counted_quantity = i.counted_quantity,
                last_counted_date = NOW(),
                last_counted_by = $3
            FROM stocktake_items i
            WHERE i.material_id = mt.id AND i.stocktake_id = $1 AND i.status = $2
            "#,
        )
        .bind(id)
        .bind(CountStatus::Counted.as_str())
        .bind(user.id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    if completing {
        log::info!("stocktake {} completed by {}", stocktake.stocktake_id, user.username);
        flash::success(
            &cookies,
            format!("盤點單 {} 已標記為完成，並已儲存盤點數量。", stocktake.stocktake_id),
        );
    } else {
        flash::success(&cookies, "盤點資料已更新。");
    }
    Ok(back)
}

/// Items whose count differs from the snapshot taken when the stocktake opened.
pub async fn export_stocktake_differences(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect.into_response());
    }

    let stocktake = fetch_stocktake(&state.db, id).await?;
    let items = sqlx::query_as::<_, StocktakeItemRow>(&format!(
        r#"{}
        WHERE i.stocktake_id = $1
          AND i.counted_quantity IS NOT NULL
          AND i.counted_quantity <> i.system_quantity_on_record
        ORDER BY l.name, mt.bin, mt.material_code"#,
        STOCKTAKE_ITEM_SELECT
    ))
    .bind(id)
    .fetch_all(&state.db)
    .await?;

    let mut sheet = SheetData::new(
        "Differences",
        vec!["盤點單號", "盤點單名稱", "庫位", "儲格", "物料", "物料說明", "系統數量", "盤點數量", "差異", "狀態"],
    );
    for item in &items {
        sheet.push(vec![
            Cell::from(stocktake.stocktake_id.as_str()),
            Cell::from(stocktake.display_name()),
            Cell::from(item.location.as_str()),
            Cell::from(item.bin.as_str()),
            Cell::from(item.material_code.as_str()),
            Cell::from(item.material_description.as_str()),
            Cell::from(item.system_quantity_on_record),
            Cell::from(item.counted_quantity),
            Cell::from(item.difference()),
            Cell::from(item.status_label()),
        ]);
    }

    let filename = format!("{}_differences.xlsx", stocktake.stocktake_id);
    Ok(xlsx_response(&filename, build_workbook(&[sheet])?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_counts_keeps_filled_entries() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let counts = parse_counts(vec![(a, "0"), (b, " ")]).unwrap();
        assert_eq!(counts, vec![(a, 0)]);
    }

    #[test]
    fn test_parse_counts_reports_offending_item() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let (id, message) = parse_counts(vec![(a, "3"), (b, "three")]).unwrap_err();
        assert_eq!(id, b);
        assert!(message.contains("three"));
    }

    #[test]
    fn test_item_sort_falls_back_to_material_code() {
        let sort = SortSpec::resolve(Some("mt.bin; DROP"), None, &ITEM_SORTS, "material_code", false);
        assert_eq!(sort.order_by(), "mt.material_code ASC");
    }
}
