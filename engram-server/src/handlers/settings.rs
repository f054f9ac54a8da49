//! Settings CRUD (spec.md §6's settings store, out of core scope but
//! wired here): read-modify-write over the single settings row, with the
//! original's empty-string-preserves-credential semantics for any
//! sensitive field.

use axum::extract::State;
use axum::Json;
use engram_core::models::ConflictResolution;

use crate::dto::{SettingsDto, SettingsUpdateRequest};
use crate::errors::{AppError, AppResult};
use crate::state::AppState;

pub async fn get_settings(State(state): State<AppState>) -> AppResult<Json<SettingsDto>> {
    let settings = state.store.get_settings().await?;
    Ok(Json(settings.into()))
}

pub async fn update_settings(
    State(state): State<AppState>,
    Json(request): Json<SettingsUpdateRequest>,
) -> AppResult<Json<SettingsDto>> {
    let mut settings = state.store.get_settings().await?;

    apply_path(&mut settings.movies_library_path, request.movies_library_path);
    apply_path(&mut settings.tv_library_path, request.tv_library_path);
    apply_path(&mut settings.staging_path, request.staging_path);

    if let Some(value) = request.conflict_resolution_default {
        settings.conflict_resolution_default = ConflictResolution::parse(&value)
            .ok_or_else(|| AppError::bad_request(format!("unrecognized conflict resolution {value:?}")))?;
    }
    if let Some(value) = request.matcher_min_confidence {
        settings.matcher_min_confidence = value;
    }
    if let Some(value) = request.max_concurrent_matches {
        settings.max_concurrent_matches = value;
    }

    let saved = state.store.update_settings(&settings).await?;
    state.job_manager.update_settings(saved.snapshot());
    Ok(Json(saved.into()))
}

/// An empty-string update means "leave unchanged", matching the
/// original's handling of sensitive fields so a settings form that
/// round-trips a redacted value never clobbers what's stored.
fn apply_path(current: &mut Option<std::path::PathBuf>, incoming: Option<String>) {
    if let Some(value) = incoming {
        if value.is_empty() {
            return;
        }
        *current = Some(std::path::PathBuf::from(value));
    }
}
