use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use constant_time_eq::constant_time_eq;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        password::{random_token, unusable_password_hash},
        repo::{Role, User},
        session,
    },
    oauth::google::GoogleUser,
    state::AppState,
};

const PROVIDER: &str = "google";
const STATE_COOKIE: &str = "oauth_state";
const STATE_TOKEN_LEN: usize = 40;

pub fn oauth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/google", get(redirect_to_google))
        .route("/auth/google/callback", get(google_callback))
}

fn state_cookie(value: String) -> Cookie<'static> {
    Cookie::build((STATE_COOKIE, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::minutes(10))
        .build()
}

#[instrument(skip_all)]
async fn redirect_to_google(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    let token = random_token(STATE_TOKEN_LEN);
    let url = state.google.authorize_url(&token);
    (jar.add(state_cookie(token)), Redirect::temporary(&url))
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
}

/// Landing path after a successful OAuth login, by role.
fn landing_path(role: Role) -> &'static str {
    match role {
        Role::Admin | Role::Vendor => "/dashboard",
        Role::Customer => "/",
    }
}

/// Resolve an external identity to a local account: previously linked
/// account first, then an email match (implicit link, trusting Google's
/// email verification), otherwise a brand-new verified customer.
async fn resolve_user(state: &AppState, external: &GoogleUser) -> anyhow::Result<User> {
    if let Some(user) = User::find_by_provider(&state.db, PROVIDER, &external.id).await? {
        return Ok(user);
    }

    if let Some(existing) = User::find_by_email(&state.db, &external.email).await? {
        info!(user_id = %existing.id, "linking google identity to existing account");
        return User::link_provider(&state.db, existing.id, PROVIDER, &external.id).await;
    }

    info!(email = %external.email, "creating account from google identity");
    User::create_from_provider(
        &state.db,
        &external.name,
        &external.email,
        &unusable_password_hash()?,
        PROVIDER,
        &external.id,
    )
    .await
}

async fn callback_inner(
    state: &AppState,
    jar: CookieJar,
    params: CallbackParams,
) -> anyhow::Result<(CookieJar, Redirect)> {
    let expected = jar
        .get(STATE_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or_else(|| anyhow::anyhow!("missing oauth state cookie"))?;
    let returned = params
        .state
        .ok_or_else(|| anyhow::anyhow!("missing oauth state parameter"))?;
    if !constant_time_eq(expected.as_bytes(), returned.as_bytes()) {
        anyhow::bail!("oauth state mismatch");
    }

    let code = params
        .code
        .ok_or_else(|| anyhow::anyhow!("missing authorization code"))?;
    let external = state.google.exchange_code(&code).await?;
    let user = resolve_user(state, &external).await?;

    let jar = jar.remove(Cookie::build((STATE_COOKIE, "")).path("/").build());
    let jar = session::establish(state, jar, user.id).await?;

    info!(user_id = %user.id, role = %user.role, "google login");
    let destination = format!("{}{}", state.config.frontend_url, landing_path(user.role));
    Ok((jar, Redirect::to(&destination)))
}

/// Redirect-based flow: any failure sends the browser back to the login
/// page with an error flag instead of a JSON error body.
#[instrument(skip_all)]
async fn google_callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Response {
    match callback_inner(&state, jar, params).await {
        Ok(response) => response.into_response(),
        Err(e) => {
            warn!(error = %e, "google callback failed");
            let destination = format!("{}/login?error=oauth_failed", state.config.frontend_url);
            Redirect::to(&destination).into_response()
        }
    }
}
