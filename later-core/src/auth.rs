use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://getpocket.com";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid base url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

/// Client for the one-time token-exchange flow: obtain a request token,
/// send the user to the authorization page, then trade the authorized
/// token for an access token and username.
#[derive(Clone)]
pub struct AuthClient {
    http: Client,
    base_url: Url,
    consumer_key: String,
    redirect_uri: String,
}

impl AuthClient {
    pub fn new(
        consumer_key: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Result<Self, AuthError> {
        Self::with_base_url(DEFAULT_BASE_URL, consumer_key, redirect_uri)
    }

    pub fn with_base_url(
        base_url: &str,
        consumer_key: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Result<Self, AuthError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            consumer_key: consumer_key.into(),
            redirect_uri: redirect_uri.into(),
        })
    }

    /// Step 1: obtain a request token to open the authorization page with.
    pub async fn request_token(&self) -> Result<String, AuthError> {
        let url = self.base_url.join("/v3/oauth/request")?;
        let response = self
            .http
            .post(url)
            .header("X-Accept", "application/json")
            .json(&RequestTokenBody {
                consumer_key: &self.consumer_key,
                redirect_uri: &self.redirect_uri,
            })
            .send()
            .await?;
        let parsed: RequestTokenResponse = Self::handle_response(response).await?;
        Ok(parsed.code)
    }

    /// Builds the browser URL the user authorizes the request token at.
    pub fn authorize_url(&self, request_token: &str) -> Result<Url, AuthError> {
        let mut url = self.base_url.join("/auth/authorize")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("request_token", request_token);
            query.append_pair("redirect_uri", &self.redirect_uri);
        }
        Ok(url)
    }

    /// Step 2: exchange the authorized request token for an access token
    /// and the account username.
    pub async fn access_token(&self, request_token: &str) -> Result<AccessGrant, AuthError> {
        let url = self.base_url.join("/v3/oauth/authorize")?;
        let response = self
            .http
            .post(url)
            .header("X-Accept", "application/json")
            .json(&AccessTokenBody {
                consumer_key: &self.consumer_key,
                code: request_token,
            })
            .send()
            .await?;
        Self::handle_response(response).await
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, AuthError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(AuthError::Api { status, body })
        }
    }
}

#[derive(Serialize)]
struct RequestTokenBody<'a> {
    consumer_key: &'a str,
    redirect_uri: &'a str,
}

#[derive(Deserialize)]
struct RequestTokenResponse {
    code: String,
}

#[derive(Serialize)]
struct AccessTokenBody<'a> {
    consumer_key: &'a str,
    code: &'a str,
}

/// Access token and username granted after the user authorizes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccessGrant {
    pub access_token: String,
    pub username: String,
}
