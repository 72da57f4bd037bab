use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;

use x402::microsub::MicrosubListResponse;
use x402::{PaymentMetadata, RequestAuthorization, X402Error, MICROSUB_HEADER, PAYMENT_HEADER};

use crate::registry::MicrosubSource;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches a wallet's credits from `GET {base}/microsubs`.
pub struct HttpMicrosubSource {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpMicrosubSource {
    pub fn new(base_url: &str) -> Result<Self, X402Error> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| X402Error::ConfigError(format!("failed to build HTTP client: {e}")))?;
        Self::with_http_client(base_url, http)
    }

    /// Use a caller-configured reqwest client.
    pub fn with_http_client(base_url: &str, http: reqwest::Client) -> Result<Self, X402Error> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| X402Error::ConfigError(format!("invalid microsub API url: {e}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { http, base_url })
    }

    fn list_url(&self, wallet: &str, scope: Option<&str>) -> Result<Url, X402Error> {
        let mut url = self
            .base_url
            .join("microsubs")
            .map_err(|e| X402Error::ConfigError(format!("invalid microsub API url: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("wallet_address", wallet);
            if let Some(scope) = scope {
                query.append_pair("scope", scope);
            }
        }
        Ok(url)
    }

    async fn get_list(&self, url: Url) -> Result<Vec<Value>, X402Error> {
        let resp = self.http.get(url).send().await.map_err(map_reqwest_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(X402Error::NetworkFailure(format!(
                "microsub list returned {status}: {body}"
            )));
        }

        let list: MicrosubListResponse = resp
            .json()
            .await
            .map_err(|e| X402Error::DecodeError(format!("malformed microsub list: {e}")))?;
        Ok(list.microsubs)
    }
}

impl MicrosubSource for HttpMicrosubSource {
    async fn fetch_microsubs(
        &self,
        wallet: &str,
        scope: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<Vec<Value>, X402Error> {
        let url = self.list_url(wallet, scope)?;
        tracing::debug!(url = %url, "fetching microsubs");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(X402Error::NetworkFailure("request cancelled".into())),
            r = self.get_list(url) => r,
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> X402Error {
    if e.is_timeout() {
        X402Error::Timeout
    } else {
        X402Error::NetworkFailure(format!("request failed: {e}"))
    }
}

/// Put the authorization on an outgoing request: a signed header goes in
/// `X-PAYMENT`, a credit reference in `X-MICROSUB-TX`.
pub fn attach_authorization(
    req: reqwest::RequestBuilder,
    auth: &RequestAuthorization,
) -> reqwest::RequestBuilder {
    match auth {
        RequestAuthorization::Microsub { tx_hash } => req.header(MICROSUB_HEADER, tx_hash),
        RequestAuthorization::Payment(header) => req.header(PAYMENT_HEADER, &header.encoded),
    }
}

/// Merge the authorization into a JSON request body, for proxies that read
/// `payment_header` / `tx_hash` from the body instead of headers.
pub fn payment_request_body(mut body: Value, auth: &RequestAuthorization) -> Value {
    if let (Some(obj), Value::Object(fields)) = (body.as_object_mut(), auth.to_body_fields()) {
        obj.extend(fields);
    }
    body
}

/// Payment metadata attached to a backend response body, if any.
pub fn extract_payment_metadata(body: &Value) -> Option<PaymentMetadata> {
    PaymentMetadata::from_response_body(body)
}
