use super::{AccessEvaluator, EvaluationError};
use crate::config::EvaluatorConfig;
use crate::context::RequestContext;
use crate::errors::SetupError;
use crate::models::{Permission, SignedInUser};
use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value::{Bool, Object};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// Asks an OPA policy whether a subject holds a permission
#[derive(Clone)]
pub struct OpaEvaluator {
    client: Client,
    policy_url: Url,
    debug: Option<bool>,
}

impl OpaEvaluator {
    pub fn new(config: &EvaluatorConfig, debug: Option<bool>) -> Result<Self, SetupError> {
        let policy_url = config
            .policy_url()
            .map_err(|e| SetupError::invalid("evaluator.opa_url", e))?;

        let mut headers = HeaderMap::new();
        if let Some(token) = &config.api_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| SetupError::invalid("evaluator.api_token", e))?;
            headers.insert(AUTHORIZATION, value);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(Duration::from_secs(config.query_timeout))
            .connect_timeout(Duration::from_secs(2))
            .default_headers(headers)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()?;

        Ok(Self {
            client,
            policy_url,
            debug,
        })
    }

    pub fn policy_url(&self) -> &Url {
        &self.policy_url
    }

    async fn send_request<R: DeserializeOwned, B: Serialize>(
        &self,
        body: &B,
    ) -> Result<Option<R>, EvaluationError> {
        let request = create_opa_request(body, self.debug)?;
        debug!("Sending evaluation request to OPA at: {}", self.policy_url);

        let response = self
            .client
            .post(self.policy_url.clone())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EvaluationError::InvalidStatus(response.status()));
        }

        let body = response.bytes().await?;
        let response: OpaResponse<R> = serde_json::from_slice(&body)?;
        Ok(response.result)
    }
}

#[async_trait]
impl AccessEvaluator for OpaEvaluator {
    async fn evaluate(
        &self,
        ctx: &RequestContext,
        subject: &SignedInUser,
        required: &Permission,
    ) -> Result<bool, EvaluationError> {
        let query = EvaluationQuery {
            user_id: subject.user_id,
            org_id: subject.org_id,
            permissions: subject
                .permissions
                .get(&subject.org_id)
                .cloned()
                .unwrap_or_default(),
            action: required.action.clone(),
            scope: required.scope.clone(),
        };

        let result = tokio::select! {
            _ = ctx.cancellation().cancelled() => return Err(EvaluationError::Cancelled),
            result = self.send_request::<EvaluationResult, _>(&query) => result?,
        };

        match result {
            Some(result) => Ok(result.allow),
            None => {
                debug!(
                    "OPA decision at {} is undefined, denying {}:{}",
                    self.policy_url, required.action, required.scope
                );
                Ok(false)
            }
        }
    }
}

/// Wraps the value inside the 'input' field of an OPA request.
///
/// If the value is an object, it injects a `use_debugger` field if the debug flag is set.
fn create_opa_request<T: Serialize>(
    value: T,
    debug: Option<bool>,
) -> Result<OpaRequest<serde_json::Value>, EvaluationError> {
    let mut value = serde_json::to_value(&value)?;
    if let Some(debug) = debug {
        if let Object(ref mut obj) = value {
            if !obj.contains_key("use_debugger") {
                obj.insert("use_debugger".to_string(), Bool(debug));
            }
        }
    }
    Ok(OpaRequest { input: value })
}

/// https://www.openpolicyagent.org/docs/latest/integration/#named-policy-decisions
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OpaRequest<T> {
    pub input: T,
}

/// An undefined decision comes back without `result`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OpaResponse<T> {
    pub result: Option<T>,
}

/// Input of the impersonation decision
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EvaluationQuery {
    pub user_id: i64,
    pub org_id: i64,
    /// action -> scopes held by the subject in `org_id`
    pub permissions: HashMap<String, Vec<String>>,
    pub action: String,
    pub scope: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EvaluationResult {
    pub allow: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<HashMap<String, serde_json::Value>>,
}
