use axum::{
    extract::Request,
    http::{Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use constant_time_eq::constant_time_eq;
use serde_json::json;

use crate::auth::password::random_token;

pub const CSRF_COOKIE: &str = "XSRF-TOKEN";
pub const CSRF_HEADER: &str = "X-XSRF-TOKEN";

const CSRF_TOKEN_LEN: usize = 40;

/// Add a fresh anti-forgery token to the jar. Readable by frontend JS
/// (not HttpOnly), which echoes it back in the `X-XSRF-TOKEN` header.
pub fn issue(jar: CookieJar) -> CookieJar {
    let cookie = Cookie::build((CSRF_COOKIE, random_token(CSRF_TOKEN_LEN)))
        .path("/")
        .http_only(false)
        .same_site(SameSite::Lax)
        .build();
    jar.add(cookie)
}

/// `GET /csrf-cookie`: the client fetches this once before any
/// state-changing call.
pub async fn csrf_cookie(jar: CookieJar) -> (CookieJar, StatusCode) {
    (issue(jar), StatusCode::NO_CONTENT)
}

fn tokens_match(cookie: &str, header: &str) -> bool {
    !cookie.is_empty() && constant_time_eq(cookie.as_bytes(), header.as_bytes())
}

/// Double-submit check on every unsafe method. Safe methods pass
/// through, which also exempts the redirect-based OAuth callback.
pub async fn require_csrf(req: Request, next: Next) -> Response {
    let method = req.method();
    if method == Method::GET || method == Method::HEAD || method == Method::OPTIONS {
        return next.run(req).await;
    }

    let jar = CookieJar::from_headers(req.headers());
    let cookie = jar.get(CSRF_COOKIE).map(|c| c.value().to_string());
    let header = req
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match (cookie, header) {
        (Some(cookie), Some(header)) if tokens_match(&cookie, &header) => next.run(req).await,
        _ => {
            tracing::warn!(path = %req.uri().path(), "csrf token mismatch");
            (
                StatusCode::FORBIDDEN,
                Json(json!({ "message": "CSRF token mismatch." })),
            )
                .into_response()
        }
    }
}
