//! Organization-assignment lifecycle events read from the assignment stream.
//!
//! Stream messages are loosely typed: a flat set of string fields with a JSON
//! payload in `data`. They are parsed into [`AssignmentEvent`] at the boundary and
//! anything that does not validate is rejected before a handler sees it.

use std::collections::HashMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::assignment::{clamp_priority, AssignmentPatch, DEFAULT_ASSIGNMENT_TYPE};
use crate::constants::ASSIGNMENT_EVENT_PREFIX;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentEventKind {
    Created,
    Updated,
    Deleted,
    Deactivated,
    Activated,
}

impl AssignmentEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentEventKind::Created => "created",
            AssignmentEventKind::Updated => "updated",
            AssignmentEventKind::Deleted => "deleted",
            AssignmentEventKind::Deactivated => "deactivated",
            AssignmentEventKind::Activated => "activated",
        }
    }
}

impl Display for AssignmentEventKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}{}", ASSIGNMENT_EVENT_PREFIX, self.as_str())
    }
}

impl FromStr for AssignmentEventKind {
    type Err = AppError;

    /// Accepts `organization.assignment.<kind>` and bare `<kind>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let bare = trimmed
            .strip_prefix(ASSIGNMENT_EVENT_PREFIX)
            .unwrap_or(trimmed);
        match bare {
            "created" => Ok(AssignmentEventKind::Created),
            "updated" => Ok(AssignmentEventKind::Updated),
            "deleted" => Ok(AssignmentEventKind::Deleted),
            "deactivated" => Ok(AssignmentEventKind::Deactivated),
            "activated" => Ok(AssignmentEventKind::Activated),
            _ => Err(AppError::Validation(format!(
                "Unknown assignment event type: {}",
                s
            ))),
        }
    }
}

/// JSON payload carried in the `data` field.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentEventPayload {
    pub tenant_id: Option<String>,
    pub assignment_id: Option<String>,
    pub user_id: Option<String>,
    /// Org code of the target organization.
    pub organization_id: Option<String>,
    pub assignment_type: Option<String>,
    pub is_active: Option<bool>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub assigned_by: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub priority: Option<i32>,
    pub metadata: Option<JsonValue>,
    pub changes: Option<AssignmentPatch>,
    pub deactivated_by: Option<String>,
    pub activated_by: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Identity of the assignment an event is about. All fields are non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssignmentKey {
    pub tenant_id: String,
    pub assignment_id: String,
    pub user_id: String,
    pub organization_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAssignment {
    pub assignment_type: String,
    pub is_active: bool,
    pub assigned_at: Option<DateTime<Utc>>,
    pub assigned_by: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub priority: i32,
    pub metadata: JsonValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssignmentEvent {
    Created {
        key: AssignmentKey,
        assignment: NewAssignment,
    },
    Updated {
        key: AssignmentKey,
        changes: AssignmentPatch,
    },
    Deleted {
        key: AssignmentKey,
    },
    Deactivated {
        key: AssignmentKey,
        by: Option<String>,
        at: Option<DateTime<Utc>>,
    },
    Activated {
        key: AssignmentKey,
        by: Option<String>,
        at: Option<DateTime<Utc>>,
    },
}

fn required(value: Option<String>, field: &str) -> Result<String, AppError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Validation(format!("Assignment event is missing {}", field)))
}

impl AssignmentEvent {
    /// Build an event from decoded stream fields (`type` or `eventType`, optional
    /// `tenantId`, JSON `data`).
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, AppError> {
        let kind = fields
            .get("type")
            .or_else(|| fields.get("eventType"))
            .ok_or_else(|| AppError::Validation("Assignment event has no type".to_string()))?
            .parse::<AssignmentEventKind>()?;
        let data = fields
            .get("data")
            .ok_or_else(|| AppError::Validation("Assignment event has no data".to_string()))?;
        let payload: AssignmentEventPayload = serde_json::from_str(data)?;
        Self::parse(kind, fields.get("tenantId").map(String::as_str), payload)
    }

    /// Validate a payload. The message-level tenant id wins over the payload's.
    pub fn parse(
        kind: AssignmentEventKind,
        tenant_id: Option<&str>,
        payload: AssignmentEventPayload,
    ) -> Result<Self, AppError> {
        let key = AssignmentKey {
            tenant_id: required(
                tenant_id.map(str::to_string).or(payload.tenant_id.clone()),
                "tenantId",
            )?,
            assignment_id: required(payload.assignment_id.clone(), "assignmentId")?,
            user_id: required(payload.user_id.clone(), "userId")?,
            organization_id: required(payload.organization_id.clone(), "organizationId")?,
        };

        let event = match kind {
            AssignmentEventKind::Created => AssignmentEvent::Created {
                key,
                assignment: NewAssignment {
                    assignment_type: payload
                        .assignment_type
                        .unwrap_or_else(|| DEFAULT_ASSIGNMENT_TYPE.to_string()),
                    is_active: payload.is_active.unwrap_or(true),
                    assigned_at: payload.assigned_at.or(payload.timestamp),
                    assigned_by: payload.assigned_by,
                    expires_at: payload.expires_at,
                    priority: clamp_priority(payload.priority),
                    metadata: payload
                        .metadata
                        .unwrap_or_else(|| JsonValue::Object(Default::default())),
                },
            },
            AssignmentEventKind::Updated => {
                let changes = payload.changes.unwrap_or(AssignmentPatch {
                    assignment_type: payload.assignment_type,
                    is_active: payload.is_active,
                    priority: payload.priority,
                    expires_at: payload.expires_at,
                    metadata: payload.metadata,
                });
                AssignmentEvent::Updated { key, changes }
            }
            AssignmentEventKind::Deleted => AssignmentEvent::Deleted { key },
            AssignmentEventKind::Deactivated => AssignmentEvent::Deactivated {
                key,
                by: payload.deactivated_by,
                at: payload.timestamp,
            },
            AssignmentEventKind::Activated => AssignmentEvent::Activated {
                key,
                by: payload.activated_by,
                at: payload.timestamp,
            },
        };
        Ok(event)
    }

    pub fn kind(&self) -> AssignmentEventKind {
        match self {
            AssignmentEvent::Created { .. } => AssignmentEventKind::Created,
            AssignmentEvent::Updated { .. } => AssignmentEventKind::Updated,
            AssignmentEvent::Deleted { .. } => AssignmentEventKind::Deleted,
            AssignmentEvent::Deactivated { .. } => AssignmentEventKind::Deactivated,
            AssignmentEvent::Activated { .. } => AssignmentEventKind::Activated,
        }
    }

    pub fn key(&self) -> &AssignmentKey {
        match self {
            AssignmentEvent::Created { key, .. }
            | AssignmentEvent::Updated { key, .. }
            | AssignmentEvent::Deleted { key }
            | AssignmentEvent::Deactivated { key, .. }
            | AssignmentEvent::Activated { key, .. } => key,
        }
    }
}
