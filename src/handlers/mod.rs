pub mod api;
pub mod auth;
pub mod inventory;
pub mod master_data;
pub mod material_lists;
pub mod requisitions;
pub mod specifications;
pub mod stocktakes;
pub mod users;
pub mod work_orders;

use axum::{
    extract::State,
    response::{Html, IntoResponse, Redirect, Response},
};
use askama::Template;
use std::borrow::Borrow;
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    error::AppResult,
    flash::{self, FlashMessage},
    middleware::{get_current_user, CurrentUser},
    state::AppState,
    utils::forms::FormFields,
};

/// Data every page needs for `base.html`: the navigation user and the
/// flash messages queued by the previous request.
pub struct Layout {
    pub user: Option<CurrentUser>,
    pub messages: Vec<FlashMessage>,
}

impl Layout {
    pub fn new(cookies: &Cookies, user: &CurrentUser) -> Self {
        Self {
            user: Some(user.clone()),
            messages: flash::take(cookies),
        }
    }

    pub fn anonymous(cookies: &Cookies) -> Self {
        Self {
            user: None,
            messages: flash::take(cookies),
        }
    }
}

pub fn render<T: Template>(template: &T) -> AppResult<Html<String>> {
    Ok(Html(template.render()?))
}

/// Url-encoded bodies whose field names carry row ids (`confirmed_<id>`, ...).
pub type RawForm = axum::extract::Form<Vec<(String, String)>>;

pub fn fields(form: RawForm) -> FormFields {
    FormFields(form.0)
}

/// A `<select>` option with its selected state worked out up front.
#[derive(Debug, Clone)]
pub struct Choice {
    pub value: String,
    pub label: String,
    pub selected: bool,
}

impl Choice {
    pub fn new(value: impl Into<String>, label: impl Into<String>, selected: &str) -> Self {
        let value = value.into();
        let selected = value == selected;
        Self {
            value,
            label: label.into(),
            selected,
        }
    }

    /// Whether this option stands for the given id, for rows that carry their
    /// own current value.
    pub fn is_id<T: Borrow<Uuid>>(&self, id: T) -> bool {
        self.value == id.borrow().to_string()
    }

    /// Options whose value doubles as the label.
    pub fn plain(values: Vec<String>, selected: &str) -> Vec<Self> {
        values
            .into_iter()
            .map(|v| Self::new(v.clone(), v, selected))
            .collect()
    }
}

/// Page gate for admin-only screens: non-admins are sent home with a flash
/// message instead of a bare 403.
pub fn admin_gate(cookies: &Cookies, user: &CurrentUser) -> Option<Redirect> {
    if user.is_admin {
        None
    } else {
        flash::error(cookies, "您沒有權限執行此操作。");
        Some(Redirect::to("/"))
    }
}

/// Query parameters arrive as `Some("")` when a filter is left blank.
pub fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Template)]
#[template(path = "landing.html")]
struct LandingTemplate {
    layout: Layout,
}

#[derive(Template)]
#[template(path = "home.html")]
struct HomeTemplate {
    layout: Layout,
    user: CurrentUser,
    pending_requisitions: i64,
    confirmed_requisitions: i64,
    open_stocktakes: i64,
}

pub async fn home(State(state): State<AppState>, cookies: Cookies) -> AppResult<Response> {
    let user = match get_current_user(&cookies, &state).await {
        Some(user) => user,
        None => {
            let template = LandingTemplate {
                layout: Layout::anonymous(&cookies),
            };
            return Ok(render(&template)?.into_response());
        }
    };

    let pending_requisitions = count_open_requisitions(&state, &user, "pending").await?;
    let confirmed_requisitions =
        count_open_requisitions(&state, &user, "materials_confirmed").await?;

    let open_stocktakes = if user.is_admin {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM stocktakes WHERE status = 'in_progress'")
            .fetch_one(&state.db)
            .await?
    } else {
        0
    };

    let template = HomeTemplate {
        layout: Layout::new(&cookies, &user),
        user,
        pending_requisitions,
        confirmed_requisitions,
        open_stocktakes,
    };
    Ok(render(&template)?.into_response())
}

async fn count_open_requisitions(
    state: &AppState,
    user: &CurrentUser,
    status: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM requisitions
        WHERE status = $1 AND dispatch_performed = false
          AND ($2 = false OR applicant_id = $3)
        "#,
    )
    .bind(status)
    .bind(user.sees_only_own_requisitions())
    .bind(user.id)
    .fetch_one(&state.db)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choice_marks_selected_value() {
        let choices = Choice::plain(vec!["前段".into(), "後段".into()], "後段");
        assert!(!choices[0].selected);
        assert!(choices[1].selected);
        assert_eq!(choices[1].label, "後段");
    }

    #[test]
    fn test_choice_matches_row_id() {
        let id = Uuid::new_v4();
        let choice = Choice::new(id.to_string(), "機型 A", "");
        assert!(choice.is_id(id));
        assert!(choice.is_id(&id));
        assert!(!choice.is_id(Uuid::new_v4()));
    }

    #[test]
    fn test_non_empty_treats_blank_as_missing() {
        assert_eq!(non_empty(&Some("  ".into())), None);
        assert_eq!(non_empty(&None), None);
        assert_eq!(non_empty(&Some(" WO-1 ".into())), Some("WO-1"));
    }
}
