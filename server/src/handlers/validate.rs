//! Validate handler - tells clients which local ids to drop.

use crate::db::DocumentRepository;
use crate::error::{AppError, Result};
use hearth_engine::{ValidateRequest, ValidateResponse};
use std::collections::HashSet;

/// Longest id the server accepts.
const MAX_ID_LEN: usize = 256;

/// Maximum number of ids per request.
const MAX_IDS: usize = 100_000;

/// Ids no client should keep.
pub fn is_malformed(id: &str) -> bool {
    id.trim().is_empty() || id.len() > MAX_ID_LEN || id.chars().any(char::is_control)
}

/// Process a validate request from a client.
///
/// Malformed ids and ids stored as tombstones come back invalid, in request
/// order.
pub async fn handle_validate(
    repo: &dyn DocumentRepository,
    request: ValidateRequest,
) -> Result<ValidateResponse> {
    if request.docs.len() > MAX_IDS {
        return Err(AppError::BadRequest(format!(
            "at most {MAX_IDS} ids per validate request, got {}",
            request.docs.len()
        )));
    }

    let candidates: Vec<String> = request
        .docs
        .iter()
        .filter(|id| !is_malformed(id))
        .cloned()
        .collect();
    let purged: HashSet<String> = repo.purged_among(&candidates).await?.into_iter().collect();

    let invalid: Vec<String> = request
        .docs
        .into_iter()
        .filter(|id| is_malformed(id) || purged.contains(id))
        .collect();

    tracing::info!(checked = candidates.len(), invalid = invalid.len(), "validate handled");

    Ok(ValidateResponse { invalid })
}
