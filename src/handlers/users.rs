use axum::{
    extract::{Path, State},
    response::{IntoResponse, Redirect, Response},
};
use askama::Template;
use tower_cookies::Cookies;
use uuid::Uuid;

use super::{admin_gate, fields, render, Layout, RawForm};
use crate::{
    database::Database,
    error::{AppError, AppResult},
    filters,
    flash,
    middleware::{require_user, CurrentUser},
    models::{AuditLogDisplay, Group, User, UserWithGroups},
    state::AppState,
    utils::{forms::FormFields, hash_password},
};

const MIN_PASSWORD_LEN: usize = 6;
const RECENT_ACTIVITY: i64 = 20;

#[derive(Template)]
#[template(path = "users/list.html")]
struct UsersTemplate {
    layout: Layout,
    current_user_id: Uuid,
    users: Vec<UserWithGroups>,
    locked_user_count: usize,
    recent_activities: Vec<AuditLogDisplay>,
}

#[derive(Template)]
#[template(path = "users/form.html")]
struct UserFormTemplate {
    layout: Layout,
    action: String,
    is_new: bool,
    draft: UserDraft,
    groups: Vec<GroupChoice>,
    error: String,
}

pub struct GroupChoice {
    pub id: Uuid,
    pub name: String,
    pub checked: bool,
}

/// Submitted account fields, kept so a rejected form can be shown again.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserDraft {
    pub username: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    pub is_superuser: bool,
    pub group_ids: Vec<Uuid>,
}

impl UserDraft {
    fn from_form(form: &FormFields) -> Self {
        let text = |name: &str| form.get(name).unwrap_or_default().trim().to_string();
        Self {
            username: text("username"),
            password: form.get("password").unwrap_or_default().to_string(),
            first_name: text("first_name"),
            last_name: text("last_name"),
            is_active: form.is_checked("is_active"),
            is_superuser: form.is_checked("is_superuser"),
            group_ids: form.all_ids("group_ids"),
        }
    }

    fn from_user(user: &UserWithGroups, groups: &[Group]) -> Self {
        Self {
            username: user.username.clone(),
            password: String::new(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            is_active: user.is_active,
            is_superuser: user.is_superuser,
            group_ids: groups
                .iter()
                .filter(|g| user.in_group(&g.name))
                .map(|g| g.id)
                .collect(),
        }
    }

    /// New accounts need a password; on edit a blank one keeps the old hash.
    fn validate(&self, is_new: bool) -> Result<(), &'static str> {
        if self.username.is_empty() {
            return Err("請輸入使用者名稱。");
        }
        if self.password.is_empty() {
            if is_new {
                return Err("新使用者必須設定密碼。");
            }
        } else if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err("密碼長度至少需要 6 個字元。");
        }
        Ok(())
    }
}

async fn all_groups(db: &Database) -> Result<Vec<Group>, sqlx::Error> {
    sqlx::query_as::<_, Group>("SELECT id, name FROM groups ORDER BY name")
        .fetch_all(db)
        .await
}

fn group_choices(groups: Vec<Group>, selected: &[Uuid]) -> Vec<GroupChoice> {
    groups
        .into_iter()
        .map(|g| GroupChoice {
            checked: selected.contains(&g.id),
            id: g.id,
            name: g.name,
        })
        .collect()
}

async fn users_with_groups(db: &Database) -> Result<Vec<UserWithGroups>, sqlx::Error> {
    let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY username")
        .fetch_all(db)
        .await?;
    let memberships = sqlx::query_as::<_, (Uuid, String)>(
        "SELECT ug.user_id, g.name FROM user_groups ug JOIN groups g ON g.id = ug.group_id ORDER BY g.name",
    )
    .fetch_all(db)
    .await?;

    Ok(users
        .into_iter()
        .map(|user| {
            let groups = memberships
                .iter()
                .filter(|(user_id, _)| *user_id == user.id)
                .map(|(_, name)| name.clone())
                .collect();
            with_groups(user, groups)
        })
        .collect())
}

async fn user_with_groups(db: &Database, user_id: Uuid) -> AppResult<UserWithGroups> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound("user"))?;
    let groups = sqlx::query_scalar::<_, String>(
        "SELECT g.name FROM groups g JOIN user_groups ug ON ug.group_id = g.id WHERE ug.user_id = $1 ORDER BY g.name",
    )
    .bind(user_id)
    .fetch_all(db)
    .await?;
    Ok(with_groups(user, groups))
}

fn with_groups(user: User, groups: Vec<String>) -> UserWithGroups {
    UserWithGroups {
        id: user.id,
        username: user.username,
        first_name: user.first_name,
        last_name: user.last_name,
        is_superuser: user.is_superuser,
        is_active: user.is_active,
        is_locked: user.is_locked,
        last_login: user.last_login,
        created_at: user.created_at,
        groups,
    }
}

async fn create_audit_log(
    db: &Database,
    user_id: Uuid,
    action: &str,
    resource_id: Option<Uuid>,
    old_values: Option<serde_json::Value>,
    new_values: Option<serde_json::Value>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO audit_logs (user_id, action, resource_type, resource_id, old_values, new_values)
        VALUES ($1, $2, 'user', $3, $4, $5)
        "#,
    )
    .bind(user_id)
    .bind(action)
    .bind(resource_id)
    .bind(old_values)
    .bind(new_values)
    .execute(db)
    .await?;
    Ok(())
}

/// Writes an audit entry; a failure is logged but never blocks the change
/// it describes.
async fn audit(
    db: &Database,
    actor: &CurrentUser,
    action: &str,
    target: Uuid,
    old_values: Option<serde_json::Value>,
    new_values: Option<serde_json::Value>,
) {
    if let Err(e) = create_audit_log(db, actor.id, action, Some(target), old_values, new_values).await {
        log::warn!("failed to write audit log for {} on {}: {}", action, target, e);
    }
}

fn draft_json(draft: &UserDraft) -> serde_json::Value {
    serde_json::json!({
        "username": draft.username,
        "first_name": draft.first_name,
        "last_name": draft.last_name,
        "is_active": draft.is_active,
        "is_superuser": draft.is_superuser,
        "group_ids": draft.group_ids,
    })
}

pub async fn users_list(State(state): State<AppState>, cookies: Cookies) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect.into_response());
    }

    let users = users_with_groups(&state.db).await?;
    let recent_activities = sqlx::query_as::<_, AuditLogDisplay>(
        r#"
        SELECT a.id, u.username AS user_name, a.action, a.resource_type, a.created_at
        FROM audit_logs a
        LEFT JOIN users u ON u.id = a.user_id
        ORDER BY a.created_at DESC
        LIMIT $1
        "#,
    )
    .bind(RECENT_ACTIVITY)
    .fetch_all(&state.db)
    .await?;

    let template = UsersTemplate {
        layout: Layout::new(&cookies, &user),
        current_user_id: user.id,
        locked_user_count: users.iter().filter(|u| u.is_locked).count(),
        users,
        recent_activities,
    };
    Ok(render(&template)?.into_response())
}

pub async fn new_user_form(State(state): State<AppState>, cookies: Cookies) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect.into_response());
    }

    let template = UserFormTemplate {
        layout: Layout::new(&cookies, &user),
        action: "/users".to_string(),
        is_new: true,
        draft: UserDraft {
            is_active: true,
            ..UserDraft::default()
        },
        groups: group_choices(all_groups(&state.db).await?, &[]),
        error: String::new(),
    };
    Ok(render(&template)?.into_response())
}

pub async fn edit_user_form(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(user_id): Path<Uuid>,
) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect.into_response());
    }

    let target = user_with_groups(&state.db, user_id).await?;
    let groups = all_groups(&state.db).await?;
    let draft = UserDraft::from_user(&target, &groups);
    let template = UserFormTemplate {
        layout: Layout::new(&cookies, &user),
        action: format!("/users/{}", user_id),
        is_new: false,
        groups: group_choices(groups, &draft.group_ids),
        draft,
        error: String::new(),
    };
    Ok(render(&template)?.into_response())
}

async fn rerender(
    state: &AppState,
    cookies: &Cookies,
    user: &CurrentUser,
    action: String,
    is_new: bool,
    draft: UserDraft,
    error: &str,
) -> AppResult<Response> {
    let groups = group_choices(all_groups(&state.db).await?, &draft.group_ids);
    let template = UserFormTemplate {
        layout: Layout::new(cookies, user),
        action,
        is_new,
        draft: UserDraft {
            password: String::new(),
            ..draft
        },
        groups,
        error: error.to_string(),
    };
    Ok(render(&template)?.into_response())
}

async fn replace_groups(
    conn: &mut sqlx::PgConnection,
    user_id: Uuid,
    group_ids: &[Uuid],
    assigned_by: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM user_groups WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query(
        r#"
        INSERT INTO user_groups (user_id, group_id, assigned_by)
        SELECT $1, id, $3 FROM groups WHERE id = ANY($2)
        "#,
    )
    .bind(user_id)
    .bind(group_ids)
    .bind(assigned_by)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn create_user(
    State(state): State<AppState>,
    cookies: Cookies,
    form: RawForm,
) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect.into_response());
    }

    let draft = UserDraft::from_form(&fields(form));
    if let Err(message) = draft.validate(true) {
        return rerender(&state, &cookies, &user, "/users".into(), true, draft, message).await;
    }
    let password_hash = hash_password(&draft.password)?;

    let mut tx = state.db.begin().await?;
    let inserted = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO users (username, password_hash, first_name, last_name, is_active, is_superuser)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id
        "#,
    )
    .bind(&draft.username)
    .bind(&password_hash)
    .bind(&draft.first_name)
    .bind(&draft.last_name)
    .bind(draft.is_active)
    .bind(draft.is_superuser)
    .fetch_one(&mut *tx)
    .await;
    let new_id = match inserted {
        Ok(id) => id,
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            return rerender(&state, &cookies, &user, "/users".into(), true, draft, "使用者名稱已存在。").await;
        }
        Err(e) => return Err(e.into()),
    };
    replace_groups(&mut *tx, new_id, &draft.group_ids, user.id).await?;
    tx.commit().await?;

    audit(&state.db, &user, "create", new_id, None, Some(draft_json(&draft))).await;
    flash::success(&cookies, format!("使用者 {} 已建立。", draft.username));
    Ok(Redirect::to("/users").into_response())
}

pub async fn update_user(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(user_id): Path<Uuid>,
    form: RawForm,
) -> AppResult<Response> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect.into_response());
    }

    let action = format!("/users/{}", user_id);
    let before = user_with_groups(&state.db, user_id).await?;
    let draft = UserDraft::from_form(&fields(form));
    if let Err(message) = draft.validate(false) {
        return rerender(&state, &cookies, &user, action, false, draft, message).await;
    }
    let password_hash = if draft.password.is_empty() {
        None
    } else {
        Some(hash_password(&draft.password)?)
    };

    let mut tx = state.db.begin().await?;
    let updated = sqlx::query(
        r#"
        UPDATE users SET
            username = $1, first_name = $2, last_name = $3, is_active = $4, is_superuser = $5,
            password_hash = COALESCE($6, password_hash), updated_at = NOW()
        WHERE id = $7
        "#,
    )
    .bind(&draft.username)
    .bind(&draft.first_name)
    .bind(&draft.last_name)
    .bind(draft.is_active)
    .bind(draft.is_superuser)
    .bind(password_hash)
    .bind(user_id)
    .execute(&mut *tx)
    .await;
    match updated {
        Ok(_) => {}
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            return rerender(&state, &cookies, &user, action, false, draft, "使用者名稱已存在。").await;
        }
        Err(e) => return Err(e.into()),
    }
    replace_groups(&mut *tx, user_id, &draft.group_ids, user.id).await?;
    tx.commit().await?;

    let old_values = serde_json::json!({
        "username": before.username,
        "is_active": before.is_active,
        "is_superuser": before.is_superuser,
        "groups": before.groups,
    });
    audit(&state.db, &user, "update", user_id, Some(old_values), Some(draft_json(&draft))).await;
    flash::success(&cookies, format!("使用者 {} 已更新。", draft.username));
    Ok(Redirect::to("/users").into_response())
}

pub async fn lock_user(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(user_id): Path<Uuid>,
) -> AppResult<Redirect> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect);
    }
    if user.id == user_id {
        flash::error(&cookies, "無法鎖定自己的帳號。");
        return Ok(Redirect::to("/users"));
    }

    let mut tx = state.db.begin().await?;
    let locked = sqlx::query("UPDATE users SET is_locked = TRUE, locked_at = NOW(), locked_by = $1 WHERE id = $2")
        .bind(user.id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    if locked.rows_affected() == 0 {
        return Err(AppError::NotFound("user"));
    }
    // Locked accounts lose their open sessions immediately.
    sqlx::query("DELETE FROM sessions WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    audit(&state.db, &user, "lock", user_id, None, Some(serde_json::json!({"locked": true}))).await;
    flash::success(&cookies, "帳號已鎖定。");
    Ok(Redirect::to("/users"))
}

pub async fn unlock_user(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(user_id): Path<Uuid>,
) -> AppResult<Redirect> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect);
    }

    let unlocked = sqlx::query("UPDATE users SET is_locked = FALSE, locked_at = NULL, locked_by = NULL WHERE id = $1")
        .bind(user_id)
        .execute(&state.db)
        .await?;
    if unlocked.rows_affected() == 0 {
        return Err(AppError::NotFound("user"));
    }

    audit(&state.db, &user, "unlock", user_id, None, Some(serde_json::json!({"locked": false}))).await;
    flash::success(&cookies, "帳號已解除鎖定。");
    Ok(Redirect::to("/users"))
}

pub async fn delete_user(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(user_id): Path<Uuid>,
) -> AppResult<Redirect> {
    let user = require_user(&cookies, &state).await?;
    if let Some(redirect) = admin_gate(&cookies, &user) {
        return Ok(redirect);
    }
    if user.id == user_id {
        flash::error(&cookies, "無法刪除自己的帳號。");
        return Ok(Redirect::to("/users"));
    }

    let target = user_with_groups(&state.db, user_id).await?;
    let deleted = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user_id)
        .execute(&state.db)
        .await;
    match deleted {
        Ok(_) => {}
        // Stocktakes keep a hard reference to their creator.
        Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
            flash::error(
                &cookies,
                format!("使用者 {} 仍有建立的盤點單，請改為停用或鎖定帳號。", target.username),
            );
            return Ok(Redirect::to("/users"));
        }
        Err(e) => return Err(e.into()),
    }

    let old_values = serde_json::json!({
        "username": target.username,
        "first_name": target.first_name,
        "last_name": target.last_name,
        "groups": target.groups,
    });
    audit(&state.db, &user, "delete", user_id, Some(old_values), None).await;
    flash::success(&cookies, format!("使用者 {} 已刪除。", target.username));
    Ok(Redirect::to("/users"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(pairs: &[(&str, &str)]) -> FormFields {
        FormFields(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }

    #[test]
    fn test_draft_reads_checkboxes_and_groups() {
        let group = Uuid::new_v4();
        let draft = UserDraft::from_form(&form(&[
            ("username", " handler01 "),
            ("password", "secret1"),
            ("is_active", "on"),
            ("group_ids", &group.to_string()),
            ("group_ids", "not-a-uuid"),
        ]));
        assert_eq!(draft.username, "handler01");
        assert!(draft.is_active);
        assert!(!draft.is_superuser);
        assert_eq!(draft.group_ids, vec![group]);
    }

    #[test]
    fn test_password_rules() {
        let mut draft = UserDraft {
            username: "amy".into(),
            ..UserDraft::default()
        };
        assert_eq!(draft.validate(true), Err("新使用者必須設定密碼。"));
        assert_eq!(draft.validate(false), Ok(()));
        draft.password = "12345".into();
        assert!(draft.validate(false).is_err());
        draft.password = "密碼六個字元".into();
        assert_eq!(draft.validate(true), Ok(()));
        draft.username.clear();
        assert_eq!(draft.validate(true), Err("請輸入使用者名稱。"));
    }

    #[test]
    fn test_group_choices_mark_selected() {
        let a = Group { id: Uuid::new_v4(), name: "申請人員".into() };
        let b = Group { id: Uuid::new_v4(), name: "撥料人員".into() };
        let selected = [b.id];
        let choices = group_choices(vec![a, b], &selected);
        assert!(!choices[0].checked);
        assert!(choices[1].checked);
    }
}
