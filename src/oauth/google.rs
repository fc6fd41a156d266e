use anyhow::Context;
use serde::Deserialize;

use crate::config::GoogleConfig;

const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const USERINFO_ENDPOINT: &str = "https://openidconnect.googleapis.com/v1/userinfo";

/// External identity as reported by Google.
#[derive(Debug, Clone)]
pub struct GoogleUser {
    pub id: String,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: String,
    email: String,
    name: Option<String>,
}

#[derive(Clone)]
pub struct GoogleClient {
    config: GoogleConfig,
    http: reqwest::Client,
}

impl GoogleClient {
    pub fn new(config: GoogleConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Authorization URL the browser is redirected to. No local state is
    /// created here; the anti-forgery `state` lives in a cookie.
    pub fn authorize_url(&self, state: &str) -> String {
        let query = serde_urlencoded::to_string([
            ("client_id", self.config.client_id.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", "openid email profile"),
            ("state", state),
        ])
        .unwrap_or_default();
        format!("{AUTH_ENDPOINT}?{query}")
    }

    /// Exchange an authorization code for the external identity.
    pub async fn exchange_code(&self, code: &str) -> anyhow::Result<GoogleUser> {
        let params = [
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];

        let token: TokenResponse = self
            .http
            .post(TOKEN_ENDPOINT)
            .form(&params)
            .send()
            .await
            .context("token exchange request")?
            .error_for_status()
            .context("token exchange rejected")?
            .json()
            .await
            .context("parse token response")?;

        let info: UserInfo = self
            .http
            .get(USERINFO_ENDPOINT)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .context("userinfo request")?
            .error_for_status()
            .context("userinfo rejected")?
            .json()
            .await
            .context("parse userinfo response")?;

        let name = info
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| info.email.clone());

        Ok(GoogleUser {
            id: info.sub,
            email: info.email,
            name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GoogleClient {
        GoogleClient::new(GoogleConfig {
            client_id: "client-123".into(),
            client_secret: "secret".into(),
            redirect_uri: "http://localhost:8080/auth/google/callback".into(),
        })
    }

    #[test]
    fn authorize_url_carries_all_oauth_params() {
        let url = client().authorize_url("state-token");
        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(url.contains("client_id=client-123"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("scope=openid+email+profile"));
        assert!(url.contains("state=state-token"));
        assert!(url.contains(
            "redirect_uri=http%3A%2F%2Flocalhost%3A8080%2Fauth%2Fgoogle%2Fcallback"
        ));
    }

    #[test]
    fn authorize_url_never_leaks_the_client_secret() {
        let url = client().authorize_url("state-token");
        assert!(!url.contains("secret"));
    }
}
