use crate::memo::Memo;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const ACTION_USERS_IMPERSONATE: &str = "users:impersonate";
pub const ACTION_USERS_READ: &str = "users:read";
pub const ACTION_USERS_PERMISSIONS_READ: &str = "users:permissions:read";
pub const ACTION_TEAMS_READ: &str = "teams:read";
pub const ACTION_DASHBOARDS_READ: &str = "dashboards:read";

pub const SCOPE_USERS_ALL: &str = "users:*";
pub const SCOPE_GLOBAL_USERS_SELF: &str = "global.users:self";
pub const SCOPE_USERS_SELF: &str = "users:self";
pub const SCOPE_TEAMS_SELF: &str = "teams:self";
pub const SCOPE_DASHBOARDS_ALL: &str = "dashboards:*";

/// An (action, scope) authorization unit, e.g. `users:read` on `users:*`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct Permission {
    pub action: String,
    pub scope: String,
}

impl Permission {
    pub fn new(action: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            scope: scope.into(),
        }
    }
}

/// Groups permissions into the `action -> [scope]` shape used by [`SignedInUser`]
pub fn group_scopes_by_action(permissions: &[Permission]) -> HashMap<String, Vec<String>> {
    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for permission in permissions {
        grouped
            .entry(permission.action.clone())
            .or_default()
            .push(permission.scope.clone());
    }
    grouped
}

/// The identity a client acts as, with its permissions per organization
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct SignedInUser {
    pub user_id: i64,
    pub org_id: i64,
    /// org id -> action -> scopes
    #[serde(default)]
    pub permissions: HashMap<i64, HashMap<String, Vec<String>>>,
}

impl SignedInUser {
    pub fn new(user_id: i64, org_id: i64) -> Self {
        Self {
            user_id,
            org_id,
            permissions: HashMap::new(),
        }
    }

    /// Permissions held in the user's current organization, if any
    pub fn org_permissions(&self) -> Option<&HashMap<String, Vec<String>>> {
        self.permissions
            .get(&self.org_id)
            .filter(|permissions| !permissions.is_empty())
    }

    /// Builds the subject used to check what a client may do by itself: same
    /// user and organization, but holding only the given permissions.
    pub fn with_org_permissions(&self, permissions: &[Permission]) -> Self {
        Self {
            user_id: self.user_id,
            org_id: self.org_id,
            permissions: HashMap::from([(self.org_id, group_scopes_by_action(permissions))]),
        }
    }
}

/// An OAuth-registered external service and the service account it runs as
#[derive(Debug, Clone, Default)]
pub struct Client {
    pub id: i64,
    pub name: String,
    pub client_id: String,
    pub secret: String,
    pub redirect_uri: String,
    /// Comma-separated list of grant types
    pub grant_types: String,
    /// Comma-separated list of audiences
    pub audiences: String,
    pub public_pem: Vec<u8>,
    pub service_account_id: i64,
    /// Permissions the client holds about itself (e.g. the right to impersonate)
    pub self_permissions: Vec<Permission>,
    /// Permissions the client may exercise on behalf of an impersonated user
    pub impersonate_permissions: Vec<Permission>,
    pub scopes: Memo<Vec<String>>,
    pub impersonate_scopes: Memo<Vec<String>>,
    pub signed_in_user: Option<SignedInUser>,
}

impl Client {
    /// Grant types as a vector
    pub fn grant_types(&self) -> Vec<String> {
        split_list(&self.grant_types)
    }

    /// Audiences as a vector
    pub fn audiences(&self) -> Vec<String> {
        split_list(&self.audiences)
    }

    /// Forgets both resolved scope lists so the next resolution recomputes them
    pub fn reset_scopes(&mut self) {
        self.scopes.clear();
        self.impersonate_scopes.clear();
    }

    pub fn to_dto(&self) -> ClientDto {
        ClientDto {
            id: self.client_id.clone(),
            name: self.name.clone(),
            redirect_uri: self.redirect_uri.clone(),
            grant_types: self.grant_types.clone(),
            audiences: self.audiences.clone(),
            secret: self.secret.clone(),
            key_result: Some(KeyResult {
                url: String::new(),
                private_pem: String::new(),
                public_pem: String::from_utf8_lossy(&self.public_pem).into_owned(),
                generated: false,
            }),
        }
    }
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Registration view of a client returned to the service that owns it
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientDto {
    #[serde(rename = "clientId")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub redirect_uri: String,
    pub grant_types: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub audiences: String,
    #[serde(rename = "clientSecret")]
    pub secret: String,
    #[serde(rename = "key", default, skip_serializing_if = "Option::is_none")]
    pub key_result: Option<KeyResult>,
}

/// Key material attached to a client registration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct KeyResult {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(rename = "private", default, skip_serializing_if = "String::is_empty")]
    pub private_pem: String,
    #[serde(rename = "public", default, skip_serializing_if = "String::is_empty")]
    pub public_pem: String,
    #[serde(default)]
    pub generated: bool,
}
