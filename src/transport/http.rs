//! HTTP implementation of the authority API.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::core::{CorrelationId, KsefConfig, KsefError};
use crate::transport::api::{
    AuthenticateRequest, AuthenticateResponse, AuthorityApi, BatchStatusResponse, CallError,
    ChallengeRequest, ChallengeResponse, SubmitBatchRequest, SubmitBatchResponse, UpoResponse,
};

/// Error body the authority attaches to business rejections.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiErrorBody {
    error_code: Option<String>,
    message: Option<String>,
}

/// [`AuthorityApi`] over HTTPS against a KSeF environment.
///
/// Performs exactly one attempt per call; pair it with
/// [`crate::transport::execute`] for retries.
#[derive(Debug, Clone)]
pub struct HttpAuthority {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAuthority {
    /// Build a client for `config`'s environment.
    pub fn new(config: &KsefConfig) -> Result<Self, KsefError> {
        let client = reqwest::Client::builder()
            .timeout(config.retry.attempt_timeout)
            .build()
            .map_err(|e| KsefError::Configuration(format!("http client setup failed: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url().to_owned(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

fn classify_transport_error(err: reqwest::Error) -> CallError {
    if err.is_builder() {
        CallError::Terminal(KsefError::Protocol(format!("request build failed: {err}")))
    } else {
        // Timeouts, connection failures and mid-body disconnects are
        // all worth another attempt.
        CallError::Transient(err.to_string())
    }
}

fn classify_status(status: StatusCode, body: &str) -> CallError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return CallError::Transient(format!("HTTP {status}"));
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return CallError::Terminal(KsefError::SessionInvalid(format!(
            "HTTP {status}: {}",
            snippet(body)
        )));
    }
    if status.is_client_error() {
        if let Ok(parsed) = serde_json::from_str::<ApiErrorBody>(body) {
            if parsed.error_code.is_some() || parsed.message.is_some() {
                return CallError::Terminal(KsefError::ValidationRejected {
                    reason_code: parsed.error_code.unwrap_or_else(|| status.as_str().to_owned()),
                    message: parsed.message.unwrap_or_default(),
                });
            }
        }
    }
    CallError::Terminal(KsefError::Protocol(format!(
        "HTTP {status}: {}",
        snippet(body)
    )))
}

fn snippet(body: &str) -> String {
    body.chars().take(200).collect()
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, CallError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(classify_transport_error)?;
    if !status.is_success() {
        return Err(classify_status(status, &body));
    }
    serde_json::from_str(&body).map_err(|e| {
        CallError::Terminal(KsefError::Protocol(format!("malformed response: {e}")))
    })
}

async fn read_ack(response: reqwest::Response) -> Result<(), CallError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response
        .text()
        .await
        .map_err(classify_transport_error)?;
    Err(classify_status(status, &body))
}

#[async_trait]
impl AuthorityApi for HttpAuthority {
    async fn request_challenge(
        &self,
        request: &ChallengeRequest,
    ) -> Result<ChallengeResponse, CallError> {
        let response = self
            .client
            .post(self.url("/v1/auth/challenge"))
            .json(request)
            .send()
            .await
            .map_err(classify_transport_error)?;
        read_json(response).await
    }

    async fn authenticate(
        &self,
        request: &AuthenticateRequest,
    ) -> Result<AuthenticateResponse, CallError> {
        let response = self
            .client
            .post(self.url("/v1/auth/token"))
            .json(request)
            .send()
            .await
            .map_err(classify_transport_error)?;
        read_json(response).await
    }

    async fn submit_batch(
        &self,
        token: &str,
        request: &SubmitBatchRequest,
    ) -> Result<SubmitBatchResponse, CallError> {
        let response = self
            .client
            .post(self.url("/v1/batches"))
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .map_err(classify_transport_error)?;
        read_json(response).await
    }

    async fn poll_status(
        &self,
        token: &str,
        batch_reference: &str,
    ) -> Result<BatchStatusResponse, CallError> {
        let response = self
            .client
            .get(self.url(&format!("/v1/batches/{batch_reference}/status")))
            .bearer_auth(token)
            .send()
            .await
            .map_err(classify_transport_error)?;
        read_json(response).await
    }

    async fn fetch_upo(
        &self,
        token: &str,
        correlation_id: CorrelationId,
    ) -> Result<UpoResponse, CallError> {
        let response = self
            .client
            .get(self.url(&format!("/v1/invoices/{correlation_id}/upo")))
            .bearer_auth(token)
            .send()
            .await
            .map_err(classify_transport_error)?;
        read_json(response).await
    }

    async fn revoke(&self, token: &str) -> Result<(), CallError> {
        let response = self
            .client
            .post(self.url("/v1/auth/revoke"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(classify_transport_error)?;
        read_ack(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        let err = classify_status(StatusCode::INTERNAL_SERVER_ERROR, "boom");
        assert!(matches!(err, CallError::Transient(_)));
    }

    #[test]
    fn rate_limiting_is_transient() {
        let err = classify_status(StatusCode::TOO_MANY_REQUESTS, "");
        assert!(matches!(err, CallError::Transient(_)));
    }

    #[test]
    fn unauthorized_maps_to_session_invalid() {
        let err = classify_status(StatusCode::UNAUTHORIZED, "token expired");
        match err {
            CallError::Terminal(KsefError::SessionInvalid(msg)) => {
                assert!(msg.contains("token expired"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn business_rejection_keeps_reason_code() {
        let body = r#"{ "errorCode": "B-201", "message": "duplicate invoice number" }"#;
        let err = classify_status(StatusCode::BAD_REQUEST, body);
        match err {
            CallError::Terminal(KsefError::ValidationRejected {
                reason_code,
                message,
            }) => {
                assert_eq!(reason_code, "B-201");
                assert_eq!(message, "duplicate invoice number");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn opaque_client_error_is_protocol() {
        let err = classify_status(StatusCode::BAD_REQUEST, "<html>nope</html>");
        assert!(matches!(
            err,
            CallError::Terminal(KsefError::Protocol(_))
        ));
    }

    #[test]
    fn snippet_truncates_long_bodies() {
        let body = "x".repeat(1000);
        assert_eq!(snippet(&body).len(), 200);
    }
}
