use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use sqlx::{FromRow, PgPool};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::auth::password::random_token;
use crate::auth::repo::User;
use crate::error::ApiError;
use crate::state::AppState;

pub const SESSION_COOKIE: &str = "nexus_session";

const SESSION_ID_LEN: usize = 64;

/// Server-side session row. The browser only ever holds the opaque id.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: Uuid,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl Session {
    pub async fn create(db: &PgPool, user_id: Uuid, ttl: Duration) -> anyhow::Result<Session> {
        // expired rows are dead weight; sweep them whenever a session is born
        Self::purge_expired(db).await?;
        let session = sqlx::query_as::<_, Session>(
            "INSERT INTO sessions (id, user_id, expires_at)
             VALUES ($1, $2, $3)
             RETURNING id, user_id, created_at, expires_at",
        )
        .bind(random_token(SESSION_ID_LEN))
        .bind(user_id)
        .bind(OffsetDateTime::now_utc() + ttl)
        .fetch_one(db)
        .await?;
        Ok(session)
    }

    pub async fn find_valid(db: &PgPool, id: &str) -> anyhow::Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(
            "SELECT id, user_id, created_at, expires_at
             FROM sessions
             WHERE id = $1 AND expires_at > now()",
        )
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(session)
    }

    pub async fn delete(db: &PgPool, id: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn purge_expired(db: &PgPool) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= now()")
            .execute(db)
            .await?;
        Ok(result.rows_affected())
    }

    /// Revoke every active session for a user (password reset).
    pub async fn delete_for_user(db: &PgPool, user_id: Uuid) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(db)
            .await?;
        Ok(result.rows_affected())
    }
}

fn session_ttl(state: &AppState) -> Duration {
    Duration::minutes(state.config.session_ttl_minutes)
}

pub fn session_cookie(id: String, ttl: Duration) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(ttl)
        .build()
}

fn removal_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(Duration::ZERO)
        .build()
}

/// Log a user in: any pre-authentication session id on the request is
/// discarded and a fresh id is issued in the same request, so a fixated
/// id never survives the privilege change.
pub async fn establish(
    state: &AppState,
    jar: CookieJar,
    user_id: Uuid,
) -> anyhow::Result<CookieJar> {
    if let Some(old) = jar.get(SESSION_COOKIE) {
        Session::delete(&state.db, old.value()).await?;
    }
    let ttl = session_ttl(state);
    let session = Session::create(&state.db, user_id, ttl).await?;
    Ok(jar.add(session_cookie(session.id, ttl)))
}

/// Tear down the current session. Harmless when no session exists.
pub async fn destroy(state: &AppState, jar: CookieJar) -> anyhow::Result<CookieJar> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        Session::delete(&state.db, cookie.value()).await?;
    }
    Ok(jar.add(removal_cookie()))
}

async fn resolve_user(state: &AppState, jar: &CookieJar) -> anyhow::Result<Option<User>> {
    let Some(cookie) = jar.get(SESSION_COOKIE) else {
        return Ok(None);
    };
    let Some(session) = Session::find_valid(&state.db, cookie.value()).await? else {
        return Ok(None);
    };
    User::find_by_id(&state.db, session.user_id).await
}

/// Extractor requiring an authenticated session.
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        match resolve_user(state, &jar).await? {
            Some(user) => Ok(CurrentUser(user)),
            None => Err(ApiError::Unauthenticated),
        }
    }
}

/// Extractor that tolerates anonymous requests.
pub struct MaybeUser(pub Option<User>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        Ok(MaybeUser(resolve_user(state, &jar).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_cookie_is_http_only_and_scoped() {
        let cookie = session_cookie("abc123".into(), Duration::minutes(120));
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.value(), "abc123");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(Duration::minutes(120)));
    }

    #[test]
    fn removal_cookie_expires_immediately() {
        let cookie = removal_cookie();
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.max_age(), Some(Duration::ZERO));
    }

    fn anonymous_parts() -> Parts {
        let (parts, _body) = axum::http::Request::builder()
            .uri("/user")
            .body(())
            .expect("request")
            .into_parts();
        parts
    }

    #[tokio::test]
    async fn maybe_user_resolves_anonymous_request_to_none() {
        let state = AppState::fake();
        let mut parts = anonymous_parts();
        let MaybeUser(user) = MaybeUser::from_request_parts(&mut parts, &state)
            .await
            .expect("extractor");
        assert!(user.is_none());
    }

    #[tokio::test]
    async fn current_user_rejects_anonymous_request() {
        let state = AppState::fake();
        let mut parts = anonymous_parts();
        let err = CurrentUser::from_request_parts(&mut parts, &state)
            .await
            .err()
            .expect("rejection");
        assert!(matches!(err, ApiError::Unauthenticated));
    }
}
