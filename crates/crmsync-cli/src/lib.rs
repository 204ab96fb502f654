//! Helpers shared by the `crmsync` commands.

use anyhow::Context;
use crmsync_core::models::{SyncCollection, SyncPhase, SyncState, TenantSyncStatus};
use serde::Serialize;

/// Environment variable read when `--token` is not given.
pub const TOKEN_ENV: &str = "WRAPPER_API_TOKEN";

/// Compact view of a status record.
#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub tenant_id: String,
    pub status: SyncState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<SyncPhase>,
    pub attempts: i32,
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_collections: Vec<SyncCollection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}

impl From<&TenantSyncStatus> for StatusSummary {
    fn from(status: &TenantSyncStatus) -> Self {
        Self {
            tenant_id: status.tenant_id.clone(),
            status: status.status,
            phase: status.phase,
            attempts: status.attempts,
            locked: status.lock.locked,
            last_error: status.last_error.clone(),
            error_code: status.error_code.clone(),
            failed_collections: status.failed_collections(),
            notice: status.notice().map(|n| n.message),
        }
    }
}

/// First non-blank token of the flag and the environment.
pub fn pick_token(flag: Option<String>, env: Option<String>) -> Option<String> {
    flag.into_iter()
        .chain(env)
        .map(|t| t.trim().to_string())
        .find(|t| !t.is_empty())
}

pub fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}
