use serde::{Deserialize, Serialize};
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    database::Database,
    error::{AppError, AppResult},
    models::{
        rbac::{APPLICANT_GROUP, MATERIAL_HANDLER_GROUP},
        User,
    },
    state::AppState,
    utils::verify_token,
};

pub const AUTH_COOKIE: &str = "auth_token";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: Uuid,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub groups: Vec<String>,
    // Helper properties for templates
    pub is_admin: bool,
    pub is_applicant: bool,
    pub is_material_handler: bool,
}

impl CurrentUser {
    pub fn from_user_and_groups(user: User, groups: Vec<String>) -> Self {
        let is_applicant = groups.iter().any(|g| g == APPLICANT_GROUP);
        let is_material_handler = groups.iter().any(|g| g == MATERIAL_HANDLER_GROUP);

        Self {
            id: user.id,
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            groups,
            is_admin: user.is_superuser,
            is_applicant,
            is_material_handler,
        }
    }

    pub fn display_name(&self) -> String {
        crate::models::user::full_name(&self.first_name, &self.last_name, &self.username)
    }

    /// Applicants and admins create requisitions and sign them off.
    pub fn can_request(&self) -> bool {
        self.is_applicant || self.is_admin
    }

    /// Material handlers and admins upload, confirm and dispatch.
    pub fn can_handle(&self) -> bool {
        self.is_material_handler || self.is_admin
    }

    pub fn can_view_requisitions(&self) -> bool {
        self.is_admin || self.is_applicant || self.is_material_handler
    }

    /// Applicants who are not also handlers or admins only see their own requisitions.
    pub fn sees_only_own_requisitions(&self) -> bool {
        !self.is_admin && !self.is_material_handler && self.is_applicant
    }

    pub fn require_admin(&self) -> AppResult<()> {
        allow(self.is_admin)
    }

    pub fn require_requester(&self) -> AppResult<()> {
        allow(self.can_request())
    }

    pub fn require_handler(&self) -> AppResult<()> {
        allow(self.can_handle())
    }

    pub fn require_viewer(&self) -> AppResult<()> {
        allow(self.can_view_requisitions())
    }
}

fn allow(granted: bool) -> AppResult<()> {
    if granted {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

/// Resolves the logged-in user from the auth cookie. The token must verify
/// and reference a live session row for an active, unlocked account.
pub async fn get_current_user(cookies: &Cookies, state: &AppState) -> Option<CurrentUser> {
    let token = cookies.get(AUTH_COOKIE)?.value().to_string();

    let claims = match verify_token(&state.config.jwt_secret, &token) {
        Ok(claims) => claims,
        Err(e) => {
            log::debug!("rejecting auth token: {}", e);
            return None;
        }
    };

    let user_id = claims.user_id()?;
    let session_id = claims.session_id()?;

    let session_alive = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM sessions WHERE id = $1 AND user_id = $2 AND expires_at > NOW()",
    )
    .bind(session_id)
    .bind(user_id)
    .fetch_one(&state.db)
    .await
    .map(|n| n > 0)
    .unwrap_or(false);

    if !session_alive {
        return None;
    }

    get_user_by_id(&state.db, user_id).await
}

/// Like [`get_current_user`] but turns a missing login into a redirect to `/login`.
pub async fn require_user(cookies: &Cookies, state: &AppState) -> AppResult<CurrentUser> {
    get_current_user(cookies, state)
        .await
        .ok_or(AppError::Unauthenticated)
}

async fn get_user_by_id(db: &Database, user_id: Uuid) -> Option<CurrentUser> {
    let user = sqlx::query_as::<_, User>(
        "SELECT * FROM users WHERE id = $1 AND is_active = true AND is_locked = false",
    )
    .bind(user_id)
    .fetch_optional(db)
    .await
    .ok()??;

    let groups = get_user_groups(db, user.id).await;

    Some(CurrentUser::from_user_and_groups(user, groups))
}

pub async fn get_user_groups(db: &Database, user_id: Uuid) -> Vec<String> {
    sqlx::query_scalar::<_, String>(
        r#"
        SELECT g.name
        FROM groups g
        JOIN user_groups ug ON g.id = ug.group_id
        WHERE ug.user_id = $1
        ORDER BY g.name
        "#,
    )
    .bind(user_id)
    .fetch_all(db)
    .await
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::rbac::ADMIN_GROUP;
    use chrono::Utc;

    fn user(is_superuser: bool) -> User {
        User {
            id: Uuid::new_v4(),
            username: "u1".into(),
            password_hash: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            is_superuser,
            is_active: true,
            is_locked: false,
            last_login: None,
            locked_at: None,
            locked_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_applicant_gates() {
        let current = CurrentUser::from_user_and_groups(user(false), vec![APPLICANT_GROUP.into()]);
        assert!(current.can_request());
        assert!(!current.can_handle());
        assert!(current.sees_only_own_requisitions());
        assert!(matches!(current.require_admin(), Err(AppError::Forbidden)));
        assert!(current.require_viewer().is_ok());
    }

    #[test]
    fn test_material_handler_gates() {
        let current =
            CurrentUser::from_user_and_groups(user(false), vec![MATERIAL_HANDLER_GROUP.into()]);
        assert!(current.can_handle());
        assert!(!current.can_request());
        assert!(!current.sees_only_own_requisitions());
    }

    #[test]
    fn test_superuser_passes_every_gate() {
        let current = CurrentUser::from_user_and_groups(user(true), vec![ADMIN_GROUP.into()]);
        assert!(current.require_admin().is_ok());
        assert!(current.require_requester().is_ok());
        assert!(current.require_handler().is_ok());
        assert!(!current.sees_only_own_requisitions());
    }

    #[test]
    fn test_user_without_groups_sees_nothing() {
        let current = CurrentUser::from_user_and_groups(user(false), vec![]);
        assert!(!current.can_view_requisitions());
        assert!(current.require_viewer().is_err());
        assert_eq!(current.display_name(), "u1");
    }
}
