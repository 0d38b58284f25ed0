use confique::Config;
use serde::Deserialize;
use std::str::FromStr;

/// Where impersonation rights are evaluated
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(try_from = "String")]
pub enum EvaluatorBackend {
    /// In process, against the permissions carried by the client
    #[default]
    Local,
    /// Remotely, by an OPA policy
    Opa,
}

impl FromStr for EvaluatorBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "local" => Ok(Self::Local),
            "opa" => Ok(Self::Opa),
            other => Err(format!("unknown evaluator backend '{other}'")),
        }
    }
}

impl TryFrom<String> for EvaluatorBackend {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Configuration for the permission evaluator
#[derive(Debug, Config, Clone)]
pub struct EvaluatorConfig {
    /// Evaluator backend: "local" (default) or "opa"
    #[config(env = "SCOPES_EVALUATOR_BACKEND", default = "local")]
    pub backend: EvaluatorBackend,

    /// The URL of the OPA service (default: http://localhost:8181)
    #[config(env = "SCOPES_EVALUATOR_OPA_URL", default = "http://localhost:8181")]
    pub opa_url: String,

    /// Path of the OPA decision answering impersonation checks
    #[config(
        env = "SCOPES_EVALUATOR_OPA_POLICY_PATH",
        default = "/v1/data/oauthserver/impersonate"
    )]
    pub opa_policy_path: String,

    /// The timeout for OPA queries in seconds (default: 1)
    #[config(env = "SCOPES_EVALUATOR_QUERY_TIMEOUT", default = 1)]
    pub query_timeout: u64,

    /// Bearer token sent to OPA, if it requires one
    #[config(env = "SCOPES_EVALUATOR_API_TOKEN")]
    pub api_token: Option<String>,
}

impl EvaluatorConfig {
    /// Returns the full URL of the configured OPA decision
    pub fn policy_url(&self) -> Result<url::Url, url::ParseError> {
        let base = self.opa_url.trim_end_matches('/');
        let path = self.opa_policy_path.trim_start_matches('/');
        url::Url::parse(&format!("{}/{}", base, path))
    }
}
