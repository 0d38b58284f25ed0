use crate::models::{
    Permission, ACTION_TEAMS_READ, ACTION_USERS_PERMISSIONS_READ, ACTION_USERS_READ,
    SCOPE_GLOBAL_USERS_SELF, SCOPE_TEAMS_SELF, SCOPE_USERS_SELF,
};

/// Maps a permission to the OAuth scopes it unlocks.
///
/// A matching permission yields `grants` followed by its own action. A permission
/// matching no rule passes its action through unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeRule {
    pub action: String,
    pub scope: String,
    pub grants: Vec<String>,
}

impl ScopeRule {
    pub fn new<I, S>(action: impl Into<String>, scope: impl Into<String>, grants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            action: action.into(),
            scope: scope.into(),
            grants: grants.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, permission: &Permission) -> bool {
        self.action == permission.action && self.scope == permission.scope
    }
}

/// Ordered rule table; the first matching rule wins
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeRules {
    rules: Vec<ScopeRule>,
}

impl Default for ScopeRules {
    fn default() -> Self {
        Self::new(vec![
            ScopeRule::new(
                ACTION_USERS_READ,
                SCOPE_GLOBAL_USERS_SELF,
                ["profile", "email"],
            ),
            ScopeRule::new(
                ACTION_USERS_PERMISSIONS_READ,
                SCOPE_USERS_SELF,
                ["entitlements"],
            ),
            ScopeRule::new(ACTION_TEAMS_READ, SCOPE_TEAMS_SELF, ["groups"]),
        ])
    }
}

impl ScopeRules {
    pub fn new(rules: Vec<ScopeRule>) -> Self {
        Self { rules }
    }

    /// Table without any rule; every permission passes through as its action
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn with_rule(mut self, rule: ScopeRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[ScopeRule] {
        &self.rules
    }

    pub fn find(&self, permission: &Permission) -> Option<&ScopeRule> {
        self.rules.iter().find(|rule| rule.matches(permission))
    }

    /// Scopes unlocked by a single permission
    pub fn scopes_for(&self, permission: &Permission) -> Vec<String> {
        let mut scopes = match self.find(permission) {
            Some(rule) => rule.grants.clone(),
            None => Vec::new(),
        };
        scopes.push(permission.action.clone());
        scopes
    }

    /// Scopes unlocked by all permissions, without duplicates, in first-seen order
    pub fn compute(&self, permissions: &[Permission]) -> Vec<String> {
        let mut scopes = Vec::new();
        for permission in permissions {
            extend_unique(&mut scopes, self.scopes_for(permission));
        }
        scopes
    }
}

/// Appends the items missing from `target`
pub(crate) fn extend_unique<I>(target: &mut Vec<String>, items: I)
where
    I: IntoIterator<Item = String>,
{
    for item in items {
        if !target.contains(&item) {
            target.push(item);
        }
    }
}
