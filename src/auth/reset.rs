use base64ct::{Base64UrlUnpadded, Encoding};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

use crate::auth::password::random_token;
use crate::mail::{send_in_background, Mailer};

const RESET_TOKEN_LEN: usize = 64;

/// Only the digest is stored; a database leak never exposes live tokens.
fn token_digest(token: &str) -> String {
    Base64UrlUnpadded::encode_string(&Sha256::digest(token.as_bytes()))
}

/// Oldest `created_at` still considered live for the given TTL.
fn expiry_cutoff(ttl: Duration) -> OffsetDateTime {
    OffsetDateTime::now_utc() - ttl
}

/// Issue a reset token for an email, replacing any outstanding one.
pub async fn create_token(db: &PgPool, email: &str) -> anyhow::Result<String> {
    let token = random_token(RESET_TOKEN_LEN);
    sqlx::query(
        "INSERT INTO password_reset_tokens (email, token_hash)
         VALUES ($1, $2)
         ON CONFLICT (email) DO UPDATE SET token_hash = $2, created_at = now()",
    )
    .bind(email)
    .bind(token_digest(&token))
    .execute(db)
    .await?;
    Ok(token)
}

/// Validate and destroy a token in a single statement, so two requests
/// racing on the same token can never both consume it: the row is gone
/// the moment the first delete commits. Returns false on any mismatch,
/// unknown email or expiry; the caller must not distinguish.
pub async fn consume_token(
    db: &PgPool,
    email: &str,
    token: &str,
    ttl: Duration,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        "DELETE FROM password_reset_tokens
         WHERE email = $1 AND token_hash = $2 AND created_at > $3",
    )
    .bind(email)
    .bind(token_digest(token))
    .bind(expiry_cutoff(ttl))
    .execute(db)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub fn reset_url(frontend_url: &str, token: &str, email: &str) -> String {
    let query = serde_urlencoded::to_string([("token", token), ("email", email)])
        .unwrap_or_default();
    format!("{frontend_url}/reset-password?{query}")
}

pub fn send_reset_email(mailer: Arc<dyn Mailer>, frontend_url: &str, token: &str, email: &str) {
    let url = reset_url(frontend_url, token, email);
    let body = format!(
        "You are receiving this email because we received a password reset \
         request for your account.\n\n\
         Reset your password here:\n\n\
         {url}\n\n\
         This link expires shortly and can be used once. If you did not \
         request a reset, no further action is required.\n"
    );
    send_in_background(
        mailer,
        email.to_string(),
        "Reset your password".to_string(),
        body,
    );
}
