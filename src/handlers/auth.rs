use axum::{
    extract::{Form, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use askama::Template;
use chrono::{Duration, Utc};
use serde::Deserialize;
use tower_cookies::{Cookie, Cookies};
use uuid::Uuid;

use super::Layout;
use crate::{
    database::Database,
    error::AppResult,
    middleware::{get_current_user, AUTH_COOKIE},
    models::User,
    state::AppState,
    utils::{create_token, verify_password, Claims},
};

#[derive(Template)]
#[template(path = "login.html")]
struct LoginTemplate {
    layout: Layout,
    username: String,
    error: String,
}

#[derive(Deserialize)]
pub struct LoginForm {
    username: String,
    password: String,
}

pub async fn login_page(State(state): State<AppState>, cookies: Cookies) -> AppResult<Response> {
    if get_current_user(&cookies, &state).await.is_some() {
        return Ok(Redirect::to("/").into_response());
    }
    let template = LoginTemplate {
        layout: Layout::anonymous(&cookies),
        username: String::new(),
        error: String::new(),
    };
    Ok(super::render(&template)?.into_response())
}

pub async fn login(
    State(state): State<AppState>,
    cookies: Cookies,
    Form(form): Form<LoginForm>,
) -> AppResult<Response> {
    let username = form.username.trim().to_string();

    let user = match authenticate_user(&state.db, &username, &form.password).await? {
        Ok(user) => user,
        Err(message) => {
            log::info!("failed login for {}", username);
            let template = LoginTemplate {
                layout: Layout::anonymous(&cookies),
                username,
                error: message.to_string(),
            };
            return Ok((StatusCode::UNAUTHORIZED, Html(template.render()?)).into_response());
        }
    };

    // Server-side session row; the token is only valid while it exists
    let session_id = Uuid::new_v4();
    let expires_at = Utc::now() + Duration::hours(state.config.session_hours);

    sqlx::query("INSERT INTO sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
        .bind(session_id)
        .bind(user.id)
        .bind(expires_at)
        .execute(&state.db)
        .await?;

    sqlx::query("UPDATE users SET last_login = NOW() WHERE id = $1")
        .bind(user.id)
        .execute(&state.db)
        .await?;

    let claims = Claims::new(
        user.id,
        user.username.clone(),
        session_id,
        state.config.session_hours,
    );
    let token = create_token(&state.config.jwt_secret, &claims)?;

    let cookie = Cookie::build((AUTH_COOKIE, token))
        .path("/")
        .http_only(true)
        .max_age(time::Duration::hours(state.config.session_hours))
        .build();
    cookies.add(cookie);

    log::info!("user {} logged in", user.username);
    Ok(Redirect::to("/").into_response())
}

pub async fn logout(State(state): State<AppState>, cookies: Cookies) -> AppResult<Redirect> {
    if let Some(token) = cookies.get(AUTH_COOKIE).map(|c| c.value().to_string()) {
        if let Ok(claims) = crate::utils::verify_token(&state.config.jwt_secret, &token) {
            if let Some(session_id) = claims.session_id() {
                sqlx::query("DELETE FROM sessions WHERE id = $1")
                    .bind(session_id)
                    .execute(&state.db)
                    .await?;
            }
        }
    }
    cookies.remove(Cookie::build((AUTH_COOKIE, "")).path("/").build());
    Ok(Redirect::to("/login"))
}

/// The outer result carries database failures, the inner one the message
/// shown on the login form.
async fn authenticate_user(
    db: &Database,
    username: &str,
    password: &str,
) -> Result<Result<User, &'static str>, sqlx::Error> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = $1")
        .bind(username)
        .fetch_optional(db)
        .await?;

    let user = match user {
        Some(user) if user.is_active => user,
        _ => return Ok(Err("帳號或密碼錯誤。")),
    };

    if !verify_password(password, &user.password_hash).unwrap_or(false) {
        return Ok(Err("帳號或密碼錯誤。"));
    }

    if user.is_locked {
        return Ok(Err("此帳號已被鎖定，請聯絡管理員。"));
    }

    Ok(Ok(user))
}
