use async_trait::async_trait;

use viralforge_common::{SocialToken, TokenPayload};
use viralforge_store::TokenRefresher;

/// Where and how a platform's refresh grant is exchanged.
#[derive(Debug, Clone)]
pub struct RefreshEndpoint {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// Form field name for the client id ("client_key" on TikTok,
    /// "client_id" on Google).
    pub client_id_field: &'static str,
}

/// Standard OAuth refresh-token grant over a form POST. Works for both
/// the TikTok and Google token endpoints.
pub struct OAuthRefresher {
    endpoint: RefreshEndpoint,
    http: reqwest::Client,
}

impl OAuthRefresher {
    pub fn new(endpoint: RefreshEndpoint) -> Self {
        Self {
            endpoint,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TokenRefresher for OAuthRefresher {
    async fn refresh(&self, token: &SocialToken) -> anyhow::Result<TokenPayload> {
        let refresh_token = token
            .refresh_token
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("no refresh token on record"))?;

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            (self.endpoint.client_id_field, self.endpoint.client_id.as_str()),
            ("client_secret", self.endpoint.client_secret.as_str()),
        ];

        let response = self
            .http
            .post(&self.endpoint.token_url)
            .form(&form)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("refresh grant rejected ({status})");
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use viralforge_common::Platform;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn token(refresh: Option<&str>) -> SocialToken {
        SocialToken {
            platform: Platform::TikTok,
            account_handle: "creator".into(),
            access_token: "stale".into(),
            refresh_token: refresh.map(str::to_string),
            token_type: None,
            scope: None,
            expires_at: Some(Utc::now()),
            owner_id: 0,
        }
    }

    #[tokio::test]
    async fn exchanges_refresh_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("client_key=ck"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh",
                "refresh_token": "next-refresh",
                "expires_in": 86400,
                "open_id": "creator"
            })))
            .mount(&server)
            .await;

        let refresher = OAuthRefresher::new(RefreshEndpoint {
            token_url: format!("{}/oauth/token", server.uri()),
            client_id: "ck".into(),
            client_secret: "cs".into(),
            client_id_field: "client_key",
        });
        let payload = refresher.refresh(&token(Some("r1"))).await.unwrap();
        assert_eq!(payload.access_token, "fresh");
        assert_eq!(payload.expires_in, Some(86400));
    }

    #[tokio::test]
    async fn missing_refresh_token_fails() {
        let refresher = OAuthRefresher::new(RefreshEndpoint {
            token_url: "http://unused".into(),
            client_id: "ck".into(),
            client_secret: "cs".into(),
            client_id_field: "client_key",
        });
        assert!(refresher.refresh(&token(None)).await.is_err());
    }

    #[tokio::test]
    async fn rejected_grant_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;
        let refresher = OAuthRefresher::new(RefreshEndpoint {
            token_url: server.uri(),
            client_id: "ck".into(),
            client_secret: "cs".into(),
            client_id_field: "client_id",
        });
        assert!(refresher.refresh(&token(Some("r1"))).await.is_err());
    }
}
