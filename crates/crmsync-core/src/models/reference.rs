use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Foreign key into another tenant collection.
///
/// Upstream rows reference each other by external business key (org code, role id,
/// user id). The internal id is only known once the referent has been persisted, so a
/// reference starts `Pending` and is upgraded by a resolution pass. The external key
/// is kept in both states: it is the business identity used for dedup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum Reference {
    Resolved { id: Uuid, key: String },
    Pending { key: String },
}

impl Reference {
    pub fn pending(key: impl Into<String>) -> Self {
        Reference::Pending { key: key.into() }
    }

    pub fn resolved(id: Uuid, key: impl Into<String>) -> Self {
        Reference::Resolved {
            id,
            key: key.into(),
        }
    }

    /// Rebuild a reference from its two storage columns.
    pub fn from_columns(key: String, id: Option<Uuid>) -> Self {
        match id {
            Some(id) => Reference::Resolved { id, key },
            None => Reference::Pending { key },
        }
    }

    /// Build a reference for `key`, resolved when `lookup` knows it.
    pub fn lookup(key: &str, lookup: &HashMap<String, Uuid>) -> Self {
        match lookup.get(key) {
            Some(id) => Reference::resolved(*id, key),
            None => Reference::pending(key),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Reference::Resolved { key, .. } | Reference::Pending { key } => key,
        }
    }

    pub fn id(&self) -> Option<Uuid> {
        match self {
            Reference::Resolved { id, .. } => Some(*id),
            Reference::Pending { .. } => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Reference::Resolved { .. })
    }

    /// Upgrade a pending reference when its key is now known. Resolved references
    /// are left untouched.
    pub fn resolve(self, lookup: &HashMap<String, Uuid>) -> Self {
        match self {
            Reference::Pending { key } => match lookup.get(&key) {
                Some(id) => Reference::Resolved { id: *id, key },
                None => Reference::Pending { key },
            },
            resolved => resolved,
        }
    }
}

/// In-memory lookup tables from external business keys to internal ids, built from
/// the independent collections persisted by the essential phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceMaps {
    /// org code -> organization id
    pub organizations: HashMap<String, Uuid>,
    /// role id -> role id (internal)
    pub roles: HashMap<String, Uuid>,
    /// user id -> user profile id
    pub users: HashMap<String, Uuid>,
}

impl ReferenceMaps {
    pub fn organization(&self, key: &str) -> Reference {
        Reference::lookup(key, &self.organizations)
    }

    pub fn role(&self, key: &str) -> Reference {
        Reference::lookup(key, &self.roles)
    }

    pub fn user(&self, key: &str) -> Reference {
        Reference::lookup(key, &self.users)
    }

    pub fn is_empty(&self) -> bool {
        self.organizations.is_empty() && self.roles.is_empty() && self.users.is_empty()
    }
}
