//! Resolution of the OAuth scopes a client may request, by itself or on behalf of a user.

use crate::cache::{create_cache, CacheError};
use crate::config::{EvaluatorBackend, Settings};
use crate::context::RequestContext;
use crate::errors::{ResolveError, SetupError};
use crate::evaluator::{AccessEvaluator, CachedEvaluator, LocalEvaluator, OpaEvaluator};
use crate::memo::{Resolved, Source};
use crate::models::{Client, Permission, ACTION_USERS_IMPERSONATE, SCOPE_USERS_ALL};
use crate::rules::{extend_unique, ScopeRules};
use crate::store::ScopeStore;
use log::{debug, info};
use std::sync::Arc;

/// Scopes every client gets, whatever its permissions
pub const DEFAULT_SCOPES: [&str; 4] = ["profile", "email", "entitlements", "groups"];

/// Computes the scopes of OAuth clients.
///
/// Results are memoized on the client (resolution takes `&mut Client`, so a client
/// is never resolved concurrently) and, for impersonation, optionally shared through
/// a [`ScopeStore`] keyed by client ID.
#[derive(Clone)]
pub struct ScopeResolver {
    evaluator: Arc<dyn AccessEvaluator>,
    rules: ScopeRules,
    store: Option<ScopeStore>,
}

impl ScopeResolver {
    pub fn new(evaluator: Arc<dyn AccessEvaluator>) -> Self {
        Self {
            evaluator,
            rules: ScopeRules::default(),
            store: None,
        }
    }

    pub fn with_rules(mut self, rules: ScopeRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_store(mut self, store: ScopeStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Builds the evaluator, the decision cache and the scope store described by the settings
    pub fn from_settings(settings: &Settings) -> Result<Self, SetupError> {
        let cache = create_cache(settings)?;

        let evaluator: Arc<dyn AccessEvaluator> = match settings.evaluator.backend {
            EvaluatorBackend::Local => Arc::new(LocalEvaluator::new()),
            EvaluatorBackend::Opa => {
                let opa = OpaEvaluator::new(&settings.evaluator, settings.debug)?;
                info!("Evaluating impersonation rights with OPA at {}", opa.policy_url());
                Arc::new(opa)
            }
        };

        if !cache.is_enabled() {
            info!("Scope cache disabled");
            return Ok(Self::new(evaluator));
        }
        info!(
            "Caching decisions and impersonation scopes for {}s",
            settings.cache.ttl
        );
        let evaluator = Arc::new(CachedEvaluator::new(evaluator, cache.clone()));
        Ok(Self::new(evaluator).with_store(ScopeStore::new(cache)))
    }

    /// Same as [`ScopeResolver::from_settings`], with settings read from the environment
    pub fn from_env() -> Result<Self, SetupError> {
        Self::from_settings(&Settings::new()?)
    }

    pub fn rules(&self) -> &ScopeRules {
        &self.rules
    }

    /// Scopes the client may request on its own behalf.
    ///
    /// These are the [`DEFAULT_SCOPES`] plus every action the client's signed-in
    /// identity holds in its organization.
    pub fn default_scopes(&self, client: &mut Client) -> Resolved<Vec<String>> {
        let signed_in_user = client.signed_in_user.as_ref();
        let resolved = client.scopes.get_or_compute(|| {
            let mut scopes: Vec<String> = DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect();
            if let Some(permissions) = signed_in_user.and_then(|user| user.org_permissions()) {
                let mut actions: Vec<&String> = permissions.keys().collect();
                actions.sort();
                extend_unique(&mut scopes, actions.into_iter().cloned());
            }
            scopes
        });
        debug!(
            "Default scopes of client '{}' ({:?}): {:?}",
            client.client_id, resolved.source, resolved.value
        );
        resolved
    }

    /// Scopes the client may request while impersonating `target_user_id`.
    ///
    /// Returns an empty list when the client is not allowed to impersonate users, and
    /// an error only when the evaluator failed. Neither outcome is memoized.
    pub async fn impersonation_scopes(
        &self,
        ctx: &RequestContext,
        client: &mut Client,
        target_user_id: i64,
    ) -> Result<Resolved<Vec<String>>, ResolveError> {
        if let Some(scopes) = client.impersonate_scopes.get() {
            debug!("Impersonation scopes of client '{}' memoized", client.client_id);
            return Ok(Resolved::new(scopes.clone(), Source::Memo));
        }

        if let Some(store) = &self.store {
            if let Some(scopes) = store.get(&client.client_id).await {
                client.impersonate_scopes.set(scopes.clone());
                return Ok(Resolved::new(scopes, Source::Store));
            }
        }

        let Some(signed_in_user) = &client.signed_in_user else {
            debug!(
                "Client '{}' has no signed-in identity, it cannot impersonate user {}",
                client.client_id, target_user_id
            );
            return Ok(Resolved::new(Vec::new(), Source::Computed));
        };

        let subject = signed_in_user.with_org_permissions(&client.self_permissions);
        let required = Permission::new(ACTION_USERS_IMPERSONATE, SCOPE_USERS_ALL);
        let allowed = self.evaluator.evaluate(ctx, &subject, &required).await?;
        if !allowed {
            debug!(
                "Client '{}' is not allowed to impersonate user {}",
                client.client_id, target_user_id
            );
            return Ok(Resolved::new(Vec::new(), Source::Computed));
        }

        let scopes = self.rules.compute(&client.impersonate_permissions);
        debug!(
            "Client '{}' may request {:?} while impersonating user {}",
            client.client_id, scopes, target_user_id
        );
        client.impersonate_scopes.set(scopes.clone());
        if let Some(store) = &self.store {
            store.put(&client.client_id, &scopes).await;
        }
        Ok(Resolved::new(scopes, Source::Computed))
    }

    /// Drops the shared impersonation scopes of a client.
    ///
    /// Scopes already memoized on a [`Client`] are cleared with [`Client::reset_scopes`].
    pub async fn invalidate(&self, client_id: &str) -> Result<(), CacheError> {
        match &self.store {
            Some(store) => store.invalidate(client_id).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::InMemoryCache;
    use crate::cache::Cache;
    use crate::config::{CacheConfig, CacheStore, EvaluatorConfig, InMemoryConfig};
    use crate::evaluator::EvaluationError;
    use crate::models::{
        SignedInUser, ACTION_DASHBOARDS_READ, ACTION_TEAMS_READ, ACTION_USERS_PERMISSIONS_READ,
        ACTION_USERS_READ, SCOPE_DASHBOARDS_ALL, SCOPE_GLOBAL_USERS_SELF, SCOPE_TEAMS_SELF,
        SCOPE_USERS_SELF,
    };
    use crate::rules::ScopeRule;
    use crate::test_utils::{assert_same_scopes, TestFixture};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TARGET_USER_ID: i64 = 3;

    fn setup_client() -> Client {
        Client {
            name: "my-ext-service".to_string(),
            client_id: "RANDOMID".to_string(),
            secret: "RANDOMSECRET".to_string(),
            grant_types: "client_credentials,urn:ietf:params:oauth:grant-type:jwt-bearer"
                .to_string(),
            service_account_id: 2,
            self_permissions: vec![Permission::new(ACTION_USERS_IMPERSONATE, SCOPE_USERS_ALL)],
            signed_in_user: Some(SignedInUser::new(2, 1)),
            ..Default::default()
        }
    }

    fn local_resolver() -> ScopeResolver {
        ScopeResolver::new(Arc::new(LocalEvaluator::new()))
    }

    /// Fails every evaluation and counts the attempts
    #[derive(Default)]
    struct FailingEvaluator {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl AccessEvaluator for FailingEvaluator {
        async fn evaluate(
            &self,
            _ctx: &RequestContext,
            _subject: &SignedInUser,
            _required: &Permission,
        ) -> Result<bool, EvaluationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(EvaluationError::Unavailable("permission store down".to_string()))
        }
    }

    async fn resolve(client: &mut Client) -> Vec<String> {
        local_resolver()
            .impersonation_scopes(&RequestContext::background(), client, TARGET_USER_ID)
            .await
            .expect("Failed to resolve impersonation scopes")
            .into_inner()
    }

    #[tokio::test]
    async fn test_no_self_permissions_yields_no_scopes() {
        let mut client = setup_client();
        client.self_permissions = Vec::new();
        client.impersonate_permissions =
            vec![Permission::new(ACTION_USERS_READ, SCOPE_GLOBAL_USERS_SELF)];

        let scopes = resolve(&mut client).await;

        assert!(scopes.is_empty());
        assert!(!client.impersonate_scopes.is_set());
    }

    #[tokio::test]
    async fn test_users_read_yields_profile_and_email() {
        let mut client = setup_client();
        client.impersonate_permissions =
            vec![Permission::new(ACTION_USERS_READ, SCOPE_GLOBAL_USERS_SELF)];

        assert_same_scopes(
            &resolve(&mut client).await,
            &["profile", "email", ACTION_USERS_READ],
        );
    }

    #[tokio::test]
    async fn test_users_permissions_read_yields_entitlements() {
        let mut client = setup_client();
        client.impersonate_permissions = vec![Permission::new(
            ACTION_USERS_PERMISSIONS_READ,
            SCOPE_USERS_SELF,
        )];

        assert_same_scopes(
            &resolve(&mut client).await,
            &["entitlements", ACTION_USERS_PERMISSIONS_READ],
        );
    }

    #[tokio::test]
    async fn test_teams_read_yields_groups() {
        let mut client = setup_client();
        client.impersonate_permissions = vec![Permission::new(ACTION_TEAMS_READ, SCOPE_TEAMS_SELF)];

        assert_same_scopes(
            &resolve(&mut client).await,
            &["groups", ACTION_TEAMS_READ],
        );
    }

    #[tokio::test]
    async fn test_all_scopes() {
        let mut client = setup_client();
        client.impersonate_permissions = vec![
            Permission::new(ACTION_USERS_READ, SCOPE_GLOBAL_USERS_SELF),
            Permission::new(ACTION_USERS_PERMISSIONS_READ, SCOPE_USERS_SELF),
            Permission::new(ACTION_TEAMS_READ, SCOPE_TEAMS_SELF),
            Permission::new(ACTION_DASHBOARDS_READ, SCOPE_DASHBOARDS_ALL),
        ];

        let scopes = resolve(&mut client).await;

        assert_same_scopes(
            &scopes,
            &[
                "profile",
                "email",
                ACTION_USERS_READ,
                "entitlements",
                ACTION_USERS_PERMISSIONS_READ,
                "groups",
                ACTION_TEAMS_READ,
                "dashboards:read",
            ],
        );
        assert_eq!(client.impersonate_scopes.get(), Some(&scopes));
    }

    #[tokio::test]
    async fn test_memoized_impersonation_scopes_are_returned() {
        let mut client = setup_client();
        client.signed_in_user = Some(SignedInUser::new(2, 1));
        client.impersonate_scopes = vec![
            "dashboard:create".to_string(),
            "profile".to_string(),
            "email".to_string(),
            "entitlements".to_string(),
            "groups".to_string(),
        ]
        .into();

        let evaluator = Arc::new(FailingEvaluator::default());
        let resolved = ScopeResolver::new(evaluator.clone())
            .impersonation_scopes(&RequestContext::background(), &mut client, TARGET_USER_ID)
            .await
            .expect("memoized scopes must not reach the evaluator");

        assert_eq!(resolved.source, Source::Memo);
        assert_eq!(
            resolved.value,
            vec!["dashboard:create", "profile", "email", "entitlements", "groups"]
        );
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_second_resolution_is_memoized() {
        let mut client = setup_client();
        client.impersonate_permissions = vec![Permission::new(ACTION_TEAMS_READ, SCOPE_TEAMS_SELF)];
        let resolver = local_resolver();
        let ctx = RequestContext::background();

        let first = resolver
            .impersonation_scopes(&ctx, &mut client, TARGET_USER_ID)
            .await
            .unwrap();
        assert_eq!(first.source, Source::Computed);

        // Losing the right afterwards does not affect the memoized result
        client.self_permissions.clear();
        let second = resolver
            .impersonation_scopes(&ctx, &mut client, TARGET_USER_ID)
            .await
            .unwrap();
        assert!(second.was_cached());
        assert_eq!(first.value, second.value);

        client.reset_scopes();
        let third = resolver
            .impersonation_scopes(&ctx, &mut client, TARGET_USER_ID)
            .await
            .unwrap();
        assert!(third.value.is_empty());
    }

    #[tokio::test]
    async fn test_evaluation_error_is_propagated() {
        let mut client = setup_client();
        client.impersonate_permissions = vec![Permission::new(ACTION_TEAMS_READ, SCOPE_TEAMS_SELF)];

        let result = ScopeResolver::new(Arc::new(FailingEvaluator::default()))
            .impersonation_scopes(&RequestContext::background(), &mut client, TARGET_USER_ID)
            .await;

        assert!(matches!(
            result,
            Err(ResolveError::Evaluation(EvaluationError::Unavailable(_)))
        ));
        assert!(!client.impersonate_scopes.is_set());
    }

    #[tokio::test]
    async fn test_without_signed_in_user_no_scopes() {
        let mut client = setup_client();
        client.signed_in_user = None;
        client.impersonate_permissions = vec![Permission::new(ACTION_TEAMS_READ, SCOPE_TEAMS_SELF)];

        let evaluator = Arc::new(FailingEvaluator::default());
        let resolved = ScopeResolver::new(evaluator.clone())
            .impersonation_scopes(&RequestContext::background(), &mut client, TARGET_USER_ID)
            .await
            .unwrap();

        assert!(resolved.value.is_empty());
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_allowed_without_impersonate_permissions_is_not_memoized() {
        let mut client = setup_client();
        let scopes = resolve(&mut client).await;
        assert!(scopes.is_empty());
        assert!(!client.impersonate_scopes.is_set());
    }

    #[tokio::test]
    async fn test_custom_rules() {
        let mut client = setup_client();
        client.impersonate_permissions =
            vec![Permission::new(ACTION_DASHBOARDS_READ, SCOPE_DASHBOARDS_ALL)];
        let resolver = local_resolver().with_rules(ScopeRules::default().with_rule(
            ScopeRule::new(ACTION_DASHBOARDS_READ, SCOPE_DASHBOARDS_ALL, ["dashboards"]),
        ));

        let resolved = resolver
            .impersonation_scopes(&RequestContext::background(), &mut client, TARGET_USER_ID)
            .await
            .unwrap();

        assert_same_scopes(&resolved.value, &["dashboards", "dashboards:read"]);
    }

    #[tokio::test]
    async fn test_store_is_shared_between_clients() {
        let store = ScopeStore::new(Cache::InMemory(InMemoryCache::new(60, 1).unwrap()));
        let resolver = local_resolver().with_store(store);
        let ctx = RequestContext::background();

        let mut client = setup_client();
        client.impersonate_permissions = vec![Permission::new(ACTION_TEAMS_READ, SCOPE_TEAMS_SELF)];
        let first = resolver
            .impersonation_scopes(&ctx, &mut client, TARGET_USER_ID)
            .await
            .unwrap();
        assert_eq!(first.source, Source::Computed);

        // A fresh instance of the same client, which would not pass evaluation
        let mut reloaded = setup_client();
        reloaded.self_permissions.clear();
        let second = resolver
            .impersonation_scopes(&ctx, &mut reloaded, TARGET_USER_ID)
            .await
            .unwrap();
        assert_eq!(second.source, Source::Store);
        assert_eq!(second.value, first.value);
        assert_eq!(reloaded.impersonate_scopes.get(), Some(&first.value));

        resolver.invalidate(&client.client_id).await.unwrap();
        let mut reloaded = setup_client();
        reloaded.self_permissions.clear();
        let third = resolver
            .impersonation_scopes(&ctx, &mut reloaded, TARGET_USER_ID)
            .await
            .unwrap();
        assert_eq!(third.source, Source::Computed);
        assert!(third.value.is_empty());
    }

    #[tokio::test]
    async fn test_resolution_through_opa() {
        let fixture = TestFixture::new().await;
        fixture
            .add_opa_mock(
                "/v1/data/oauthserver/impersonate",
                json!({"result": {"allow": true}}),
                200,
                1,
            )
            .await;
        let resolver = ScopeResolver::from_settings(&fixture.settings).unwrap();

        let mut client = setup_client();
        client.impersonate_permissions =
            vec![Permission::new(ACTION_USERS_READ, SCOPE_GLOBAL_USERS_SELF)];
        let resolved = resolver
            .impersonation_scopes(&RequestContext::background(), &mut client, TARGET_USER_ID)
            .await
            .unwrap();

        assert_same_scopes(&resolved.value, &["profile", "email", ACTION_USERS_READ]);
        fixture.opa_mock.verify().await;
    }

    #[tokio::test]
    async fn test_opa_failure_is_propagated() {
        let fixture = TestFixture::new().await;
        fixture
            .add_opa_mock(
                "/v1/data/oauthserver/impersonate",
                json!({"error": "unavailable"}),
                503,
                1,
            )
            .await;
        let resolver = ScopeResolver::from_settings(&fixture.settings).unwrap();

        let mut client = setup_client();
        client.impersonate_permissions = vec![Permission::new(ACTION_TEAMS_READ, SCOPE_TEAMS_SELF)];
        let result = resolver
            .impersonation_scopes(&RequestContext::background(), &mut client, TARGET_USER_ID)
            .await;

        assert!(matches!(
            result,
            Err(ResolveError::Evaluation(EvaluationError::InvalidStatus(_)))
        ));
        assert!(!client.impersonate_scopes.is_set());
    }

    #[tokio::test]
    async fn test_from_settings_with_in_memory_cache() {
        let fixture = TestFixture::new().await;
        fixture
            .add_opa_mock(
                "/v1/data/oauthserver/impersonate",
                json!({"result": {"allow": true}}),
                200,
                1,
            )
            .await;
        let mut settings = fixture.settings.clone();
        settings.cache.store = CacheStore::InMemory;
        let resolver = ScopeResolver::from_settings(&settings).unwrap();
        let ctx = RequestContext::background();

        for _ in 0..2 {
            let mut client = setup_client();
            client.impersonate_permissions =
                vec![Permission::new(ACTION_TEAMS_READ, SCOPE_TEAMS_SELF)];
            let resolved = resolver
                .impersonation_scopes(&ctx, &mut client, TARGET_USER_ID)
                .await
                .unwrap();
            assert_same_scopes(&resolved.value, &["groups", ACTION_TEAMS_READ]);
        }

        // The second client was served from the store, OPA was asked once
        fixture.opa_mock.verify().await;
    }

    #[tokio::test]
    async fn test_from_settings_with_local_backend() {
        let settings = Settings {
            debug: None,
            evaluator: EvaluatorConfig {
                backend: EvaluatorBackend::Local,
                opa_url: "http://localhost:8181".to_string(),
                opa_policy_path: "/v1/data/oauthserver/impersonate".to_string(),
                query_timeout: 1,
                api_token: None,
            },
            cache: CacheConfig {
                ttl: 60,
                store: CacheStore::None,
                memory: InMemoryConfig { capacity: 1 },
            },
        };
        let resolver = ScopeResolver::from_settings(&settings).unwrap();

        let mut client = setup_client();
        client.impersonate_permissions = vec![Permission::new(ACTION_TEAMS_READ, SCOPE_TEAMS_SELF)];
        let resolved = resolver
            .impersonation_scopes(&RequestContext::background(), &mut client, TARGET_USER_ID)
            .await
            .unwrap();

        assert_same_scopes(&resolved.value, &["groups", ACTION_TEAMS_READ]);
    }

    #[test]
    fn test_default_scopes_without_signed_in_user() {
        let mut client = setup_client();
        client.signed_in_user = None;

        let resolved = local_resolver().default_scopes(&mut client);

        assert_same_scopes(&resolved.value, &["profile", "email", "entitlements", "groups"]);
    }

    #[test]
    fn test_default_scopes_include_signed_in_user_actions() {
        let mut client = setup_client();
        client.signed_in_user.as_mut().unwrap().permissions = HashMap::from([(
            1,
            HashMap::from([(
                ACTION_DASHBOARDS_READ.to_string(),
                vec![SCOPE_DASHBOARDS_ALL.to_string()],
            )]),
        )]);

        let resolved = local_resolver().default_scopes(&mut client);

        assert_same_scopes(
            &resolved.value,
            &["profile", "email", "entitlements", "groups", "dashboards:read"],
        );
    }

    #[test]
    fn test_default_scopes_without_permissions() {
        let mut client = setup_client();
        client.signed_in_user.as_mut().unwrap().permissions = HashMap::new();

        let resolved = local_resolver().default_scopes(&mut client);

        assert_same_scopes(&resolved.value, &["profile", "email", "entitlements", "groups"]);
    }

    #[test]
    fn test_default_scopes_ignore_permissions_of_other_orgs() {
        let mut client = setup_client();
        client.signed_in_user.as_mut().unwrap().permissions = HashMap::from([(
            7,
            HashMap::from([(
                ACTION_DASHBOARDS_READ.to_string(),
                vec![SCOPE_DASHBOARDS_ALL.to_string()],
            )]),
        )]);

        let resolved = local_resolver().default_scopes(&mut client);

        assert_same_scopes(&resolved.value, &["profile", "email", "entitlements", "groups"]);
    }

    #[test]
    fn test_default_scopes_have_no_duplicates() {
        let mut client = setup_client();
        client.signed_in_user.as_mut().unwrap().permissions = HashMap::from([(
            1,
            HashMap::from([
                ("profile".to_string(), vec!["*".to_string()]),
                (
                    ACTION_DASHBOARDS_READ.to_string(),
                    vec![SCOPE_DASHBOARDS_ALL.to_string()],
                ),
            ]),
        )]);

        let resolved = local_resolver().default_scopes(&mut client);

        assert_eq!(
            resolved.value,
            vec!["profile", "email", "entitlements", "groups", "dashboards:read"]
        );
    }

    #[test]
    fn test_memoized_default_scopes_are_returned() {
        let mut client = setup_client();
        client.scopes = vec![
            "profile".to_string(),
            "email".to_string(),
            "entitlements".to_string(),
            "groups".to_string(),
        ]
        .into();
        client.signed_in_user.as_mut().unwrap().permissions = HashMap::from([(
            1,
            HashMap::from([(
                ACTION_DASHBOARDS_READ.to_string(),
                vec![SCOPE_DASHBOARDS_ALL.to_string()],
            )]),
        )]);

        let resolved = local_resolver().default_scopes(&mut client);

        assert_eq!(resolved.source, Source::Memo);
        assert_eq!(
            resolved.value,
            vec!["profile", "email", "entitlements", "groups"]
        );
    }

    #[test]
    fn test_default_scopes_are_memoized() {
        let mut client = setup_client();
        let resolver = local_resolver();

        let first = resolver.default_scopes(&mut client);
        assert_eq!(first.source, Source::Computed);
        assert_eq!(client.scopes.get(), Some(&first.value));

        let second = resolver.default_scopes(&mut client);
        assert!(second.was_cached());
    }
}
