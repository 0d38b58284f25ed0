use crate::config::Settings;
use crate::evaluator::OpaEvaluator;
use log::LevelFilter;
use serde::Serialize;
use wiremock::matchers;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;

/// Test fixture with a mocked OPA server and settings pointing at it.
///
/// # Examples
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_evaluation() {
///     let fixture = TestFixture::new().await;
///     fixture
///         .add_opa_mock("/v1/data/oauthserver/impersonate", json!({"result": {"allow": true}}), 200, 1)
///         .await;
///
///     let resolver = ScopeResolver::from_settings(&fixture.settings).unwrap();
///     // ...
///     fixture.opa_mock.verify().await;
/// }
/// ```
pub struct TestFixture {
    /// Configuration settings
    pub settings: Settings,
    /// Mock server for OPA
    pub opa_mock: MockServer,
}

impl TestFixture {
    pub async fn new() -> Self {
        Self::setup_logger(LevelFilter::Debug);

        let opa_mock = MockServer::start().await;
        let settings = Settings::for_test_with_mock(&opa_mock);

        Self { settings, opa_mock }
    }

    /// Initializes the test logger; only the first call in a test binary takes effect.
    pub fn setup_logger(level: LevelFilter) {
        let _ = env_logger::builder()
            .filter_level(level)
            .is_test(true)
            .try_init();
    }

    /// An OPA evaluator configured against the mock server
    pub fn opa_evaluator(&self) -> OpaEvaluator {
        OpaEvaluator::new(&self.settings.evaluator, self.settings.debug)
            .expect("Failed to create OPA evaluator")
    }

    /// Mounts a POST mock on the OPA server, expected to be called `expected_calls` times
    pub async fn add_opa_mock(
        &self,
        path: impl Into<String>,
        response_body: impl Serialize,
        status_code: u16,
        expected_calls: u64,
    ) {
        Mock::given(matchers::method("POST"))
            .and(matchers::path(path.into()))
            .respond_with(ResponseTemplate::new(status_code).set_body_json(response_body))
            .expect(expected_calls)
            .mount(&self.opa_mock)
            .await;
    }
}

/// Asserts both lists hold the same scopes, ignoring order
pub fn assert_same_scopes(actual: &[String], expected: &[&str]) {
    let mut actual: Vec<&str> = actual.iter().map(String::as_str).collect();
    let mut expected = expected.to_vec();
    actual.sort_unstable();
    expected.sort_unstable();
    assert_eq!(actual, expected, "scopes differ (order ignored)");
}
