use std::fmt;

use uuid::Uuid;

/// Opaque bearer credential presented by the caller.
///
/// Cairn never inspects the token after authentication; it is forwarded to
/// workers verbatim.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for an `Authorization` header.
    pub fn authorization_value(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(***)")
    }
}

/// Identity of the caller on whose behalf an operation runs.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub user_id: Option<Uuid>,
    pub admin: bool,
    pub credential: Option<BearerToken>,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(user_id: Uuid, credential: BearerToken) -> Self {
        Self {
            user_id: Some(user_id),
            admin: false,
            credential: Some(credential),
        }
    }

    pub fn with_admin(mut self, admin: bool) -> Self {
        self.admin = admin;
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    pub fn credential(&self) -> Option<&BearerToken> {
        self.credential.as_ref()
    }

    /// Read access: admins, the owner, and anyone for files uploaded anonymously.
    pub fn can_view(&self, owner_id: Option<Uuid>) -> bool {
        self.admin || owner_id.is_none() || owner_id == self.user_id
    }

    /// Destructive access: admins and the owner only.
    pub fn can_manage(&self, owner_id: Option<Uuid>) -> bool {
        self.admin || (owner_id.is_some() && owner_id == self.user_id)
    }
}
