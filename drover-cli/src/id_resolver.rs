//! ID resolver module
//!
//! Handles resolution of UUID prefixes to full UUIDs by querying the API.
//! This allows users to specify short, unambiguous prefixes instead of full UUIDs.

use anyhow::{Context, Result, anyhow};
use drover_client::OrchestratorClient;
use drover_core::dto::result::ResultQuery;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Results scanned when resolving a prefix
const RESOLVE_LIMIT: usize = 500;

/// Resolve a job result ID or prefix to a full UUID
///
/// Only the most recent results are searched for prefixes.
pub async fn resolve_result_id(
    client: &OrchestratorClient,
    id_or_prefix: &IdOrPrefix,
) -> Result<Uuid> {
    if let Some(uuid) = id_or_prefix.as_uuid() {
        return Ok(uuid);
    }

    let results = client
        .list_results(&ResultQuery {
            limit: Some(RESOLVE_LIMIT),
            ..Default::default()
        })
        .await
        .context("Failed to fetch job results for ID resolution")?;

    pick("job result", id_or_prefix, results.iter().map(|r| r.id))
}

/// Resolve a scheduled job ID or prefix to a full UUID
pub async fn resolve_scheduled_id(
    client: &OrchestratorClient,
    id_or_prefix: &IdOrPrefix,
) -> Result<Uuid> {
    if let Some(uuid) = id_or_prefix.as_uuid() {
        return Ok(uuid);
    }

    let scheduled = client
        .list_scheduled()
        .await
        .context("Failed to fetch scheduled jobs for ID resolution")?;

    pick("scheduled job", id_or_prefix, scheduled.iter().map(|s| s.id))
}

fn pick(kind: &str, id_or_prefix: &IdOrPrefix, ids: impl Iterator<Item = Uuid>) -> Result<Uuid> {
    let matches: Vec<Uuid> = ids.filter(|id| id_or_prefix.matches(id)).collect();

    match matches.as_slice() {
        [] => Err(anyhow!(
            "No {} found with ID starting with '{}'",
            kind,
            id_or_prefix
        )),
        [id] => Ok(*id),
        _ => {
            let ids: Vec<String> = matches.iter().map(Uuid::to_string).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple {}s: {}",
                id_or_prefix,
                kind,
                ids.join(", ")
            ))
        }
    }
}
