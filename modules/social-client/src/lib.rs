pub mod error;
pub mod types;

pub use error::{Result, SocialError};
pub use types::{ApiUser, ConnectionList, ConnectionsPage, END_CURSOR};

use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;

/// Maximum users the API returns per connection page.
pub const PAGE_SIZE: u32 = 200;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SocialClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl SocialClient {
    /// Build a client. An empty bearer token is a configuration error, raised here
    /// rather than on the first request.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(SocialError::MissingCredentials(
                "social API bearer token is empty".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Fetch one page of an account's followers or followings.
    /// `cursor = None` requests the first page.
    pub async fn connections_page(
        &self,
        account_id: &str,
        list: ConnectionList,
        cursor: Option<&str>,
    ) -> Result<ConnectionsPage> {
        let url = format!(
            "{}/users/{}/{}",
            self.base_url,
            account_id,
            list.path_segment()
        );
        let mut query: Vec<(&str, String)> = vec![("count", PAGE_SIZE.to_string())];
        if let Some(c) = cursor {
            query.push(("cursor", c.to_string()));
        }

        tracing::debug!(
            account_id,
            list = list.path_segment(),
            cursor,
            "Fetching connections page"
        );
        self.get_json(&url, &query, account_id).await
    }

    /// Look up a profile by handle (with or without a leading `@`).
    pub async fn user_by_handle(&self, handle: &str) -> Result<ApiUser> {
        let handle = handle.trim().trim_start_matches('@');
        let url = format!("{}/users/by/handle/{}", self.base_url, handle);
        self.get_json(&url, &[], handle).await
    }

    /// Look up a profile by stable id.
    pub async fn user_by_id(&self, account_id: &str) -> Result<ApiUser> {
        let url = format!("{}/users/{}", self.base_url, account_id);
        self.get_json(&url, &[], account_id).await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        subject: &str,
    ) -> Result<T> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after_secs = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, body, subject, retry_after_secs));
        }

        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// Map a non-success HTTP status to the error taxonomy callers branch on.
fn status_error(
    status: StatusCode,
    body: String,
    subject: &str,
    retry_after_secs: Option<u64>,
) -> SocialError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => SocialError::RateLimited { retry_after_secs },
        StatusCode::NOT_FOUND => SocialError::NotFound(subject.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SocialError::MissingCredentials(format!("API rejected credentials: {body}"))
        }
        _ => SocialError::Api {
            status: status.as_u16(),
            message: body,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_token_is_rejected() {
        let err = SocialClient::new("https://api.example", "  ").err().unwrap();
        assert!(matches!(err, SocialError::MissingCredentials(_)));
    }

    #[test]
    fn status_mapping() {
        let e = status_error(StatusCode::TOO_MANY_REQUESTS, String::new(), "x", Some(15));
        assert!(matches!(e, SocialError::RateLimited { retry_after_secs: Some(15) }));

        let e = status_error(StatusCode::NOT_FOUND, String::new(), "ghost", None);
        assert!(e.is_not_found());

        let e = status_error(StatusCode::BAD_GATEWAY, "upstream".into(), "x", None);
        assert!(matches!(e, SocialError::Api { status: 502, .. }));
    }
}
