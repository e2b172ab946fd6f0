//! HTTP(S) client for the issuer confirmation protocol.
//!
//! Every operation is a JSON `POST` to `{scheme}://{domain}{path}` whose
//! body names the operation in its `fn` field. The issuer signals failure
//! through the transport, a non-"ok" `status`, a non-empty `error` list, or
//! asks the caller to come back later through `deferInfo`.

use crate::config::IssuerHttpConfig;
use crate::domain::issuer::{IssuerIntent, IssuerSession, VerifyOutcome, VerifyRequest};
use crate::domain::money::Amount;
use crate::domain::ports::IssuerClient;
use crate::domain::token::EncodedToken;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use url::Url;

#[derive(Serialize)]
#[serde(tag = "fn", rename_all = "lowercase")]
enum IssuerCall<'a> {
    Begin {
        intent: IssuerIntent,
    },
    Verify {
        tid: &'a str,
        expiry: DateTime<Utc>,
        coin: &'a [EncodedToken],
        #[serde(rename = "targetValue")]
        target_value: Amount,
        #[serde(rename = "issuePolicy")]
        issue_policy: &'static str,
    },
    End {
        tid: &'a str,
    },
}

#[derive(Deserialize)]
struct BeginBody {
    tid: String,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    fee: Option<Value>,
}

#[derive(Deserialize)]
struct VerifyBody {
    #[serde(default)]
    coin: Vec<EncodedToken>,
    #[serde(rename = "verifyInfo")]
    verify_info: VerifyInfo,
}

#[derive(Deserialize)]
struct VerifyInfo {
    #[serde(rename = "actualValue")]
    actual_value: Value,
}

/// Maps an issuer response body to an error when it reports deferral,
/// a non-ok status, or errors.
pub fn classify_response(body: &Value) -> Result<()> {
    if let Some(defer) = body.get("deferInfo").filter(|v| !v.is_null()) {
        return Err(GatewayError::IssuerDeferred(defer.to_string()));
    }
    let errors: Vec<String> = match body.get("error") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    };
    if !errors.is_empty() {
        return Err(GatewayError::IssuerRejected(errors.join("; ")));
    }
    match body.get("status").and_then(Value::as_str) {
        None | Some("ok") => Ok(()),
        Some(status) => Err(GatewayError::IssuerRejected(format!(
            "issuer reported status {status:?}"
        ))),
    }
}

fn parse_actual_value(raw: &Value) -> Result<Amount> {
    let text = match raw {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => {
            return Err(GatewayError::IssuerRejected(format!(
                "actualValue is not numeric: {other}"
            )));
        }
    };
    let value = Decimal::from_str(text.trim()).map_err(|_| {
        GatewayError::IssuerRejected(format!("actualValue is not a number: {text:?}"))
    })?;
    Amount::new(value).map_err(|e| GatewayError::IssuerRejected(e.to_string()))
}

/// Parses a `begin` response body.
pub fn parse_begin(domain: &str, body: Value) -> Result<IssuerSession> {
    classify_response(&body)?;
    let begin: BeginBody = serde_json::from_value(body)
        .map_err(|e| GatewayError::IssuerRejected(format!("malformed begin response: {e}")))?;
    if begin.tid.is_empty() {
        return Err(GatewayError::IssuerRejected(
            "begin response carries an empty tid".to_string(),
        ));
    }
    Ok(IssuerSession {
        tid: begin.tid,
        domain: begin.domain.unwrap_or_else(|| domain.to_string()),
        fee: begin.fee,
    })
}

/// Parses a `verify` response body.
pub fn parse_verify(body: Value) -> Result<VerifyOutcome> {
    classify_response(&body)?;
    let verify: VerifyBody = serde_json::from_value(body)
        .map_err(|e| GatewayError::IssuerRejected(format!("malformed verify response: {e}")))?;
    Ok(VerifyOutcome {
        verified_tokens: verify.coin,
        actual_value: parse_actual_value(&verify.verify_info.actual_value)?,
    })
}

pub struct HttpIssuerClient {
    client: reqwest::Client,
    config: IssuerHttpConfig,
}

impl HttpIssuerClient {
    pub fn new(config: IssuerHttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .https_only(config.scheme == "https")
            .build()
            .map_err(|e| GatewayError::IssuerUnavailable(format!("client setup failed: {e}")))?;
        Ok(Self { client, config })
    }

    /// Builds the issuer endpoint for `domain`, refusing anything that is
    /// not a bare host with an optional port.
    pub fn endpoint(&self, domain: &str) -> Result<Url> {
        let valid = !domain.is_empty()
            && domain
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':'));
        if !valid {
            return Err(GatewayError::ValidationError(format!(
                "Invalid issuing domain: {domain:?}"
            )));
        }
        let raw = format!("{}://{}{}", self.config.scheme, domain, self.config.path);
        Url::parse(&raw)
            .map_err(|e| GatewayError::ValidationError(format!("Invalid issuer URL {raw}: {e}")))
    }

    async fn call(&self, domain: &str, body: &IssuerCall<'_>) -> Result<Value> {
        let url = self.endpoint(domain)?;
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::IssuerUnavailable(format!("{domain}: {e}")))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(GatewayError::IssuerUnavailable(format!(
                "{domain} answered {status}"
            )));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::IssuerRejected(format!(
                "{domain} answered {status}: {text}"
            )));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| GatewayError::IssuerUnavailable(format!("{domain}: unreadable body: {e}")))
    }
}

#[async_trait]
impl IssuerClient for HttpIssuerClient {
    async fn begin(&self, domain: &str, intent: IssuerIntent) -> Result<IssuerSession> {
        let body = self.call(domain, &IssuerCall::Begin { intent }).await?;
        let session = parse_begin(domain, body)?;
        tracing::debug!(domain, tid = %session.tid, "issuer session opened");
        Ok(session)
    }

    async fn verify(
        &self,
        session: &IssuerSession,
        request: VerifyRequest,
    ) -> Result<VerifyOutcome> {
        let call = IssuerCall::Verify {
            tid: &session.tid,
            expiry: request.expiry,
            coin: &request.tokens,
            target_value: request.target_value,
            issue_policy: "single",
        };
        let body = self.call(&session.domain, &call).await?;
        parse_verify(body)
    }

    async fn end(&self, session: &IssuerSession) -> Result<()> {
        let body = self
            .call(&session.domain, &IssuerCall::End { tid: &session.tid })
            .await?;
        classify_response(&body)
    }
}
