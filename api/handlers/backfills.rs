use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use corelib::types::backfill::{Backfill, BackfillInput, EditableBackfillInput};
use corelib::types::workflow::WorkflowId;
use corelib::BackfillId;
use engine::EngineError;

use crate::errors::ApiError;
use crate::extractors::ValidatedJson;
use crate::model::{
    BackfillInputDto, BackfillListResponse, BackfillPayload, CreateQuery, EditableBackfillInputDto, ListQuery,
};
use crate::AppState;

/// `GET /api/v3/backfills` (spec.md §6).
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<BackfillListResponse>, ApiError> {
    let mut backfills = state.backfill_engine.list().await?;
    if let Some(component) = &query.component {
        backfills.retain(|b| &b.workflow_id.component == component);
    }
    if let Some(workflow) = &query.workflow {
        backfills.retain(|b| &b.workflow_id.name == workflow);
    }
    if !query.show_all {
        backfills.retain(Backfill::is_runnable);
    }

    let mut payloads = Vec::with_capacity(backfills.len());
    for backfill in backfills {
        let (in_flight, partitions) = if query.status {
            let status = state.backfill_engine.status(&backfill.id).await?;
            (Some(status.in_flight), Some(status.partitions))
        } else {
            (None, None)
        };
        payloads.push(BackfillPayload { backfill, in_flight, partitions });
    }
    Ok(Json(BackfillListResponse { backfills: payloads }))
}

/// `POST /api/v3/backfills` (spec.md §6, §4.8.1). The schedule isn't part of
/// the request body — it's read off the target workflow's own registration.
pub async fn create(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CreateQuery>,
    ValidatedJson(dto): ValidatedJson<BackfillInputDto>,
) -> Result<(StatusCode, Json<Backfill>), ApiError> {
    let workflow_id = WorkflowId::new(dto.component.clone(), dto.workflow.clone());
    let workflow = state
        .workflow_store
        .get(&workflow_id)
        .await
        .map_err(EngineError::StorageUnavailable)?
        .ok_or_else(|| ApiError::NotFound(format!("workflow {workflow_id} not registered")))?;

    let input = BackfillInput {
        component: dto.component,
        workflow_id: dto.workflow,
        start: dto.start,
        end: dto.end,
        schedule: workflow.schedule,
        concurrency: dto.concurrency,
        description: dto.description,
        reverse: dto.reverse,
        allow_future: query.allow_future,
        trigger_parameters: dto.trigger_parameters,
    };

    let backfill = state.backfill_engine.create(input).await?;
    Ok((StatusCode::CREATED, Json(backfill)))
}

/// `GET /api/v3/backfills/{id}`.
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<BackfillPayload>, ApiError> {
    let id = BackfillId::from_string(id);
    if query.status {
        let status = state.backfill_engine.status(&id).await?;
        return Ok(Json(BackfillPayload {
            backfill: status.backfill,
            in_flight: Some(status.in_flight),
            partitions: Some(status.partitions),
        }));
    }
    let backfill = state.backfill_engine.get(&id).await?;
    Ok(Json(BackfillPayload { backfill, in_flight: None, partitions: None }))
}

/// `PUT /api/v3/backfills/{id}`.
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ValidatedJson(dto): ValidatedJson<EditableBackfillInputDto>,
) -> Result<Json<Backfill>, ApiError> {
    let id = BackfillId::from_string(id);
    let input = EditableBackfillInput { concurrency: dto.concurrency, description: dto.description };
    let backfill = state.backfill_engine.update(&id, input).await?;
    Ok(Json(backfill))
}

/// `DELETE /api/v3/backfills/{id}`: halts the backfill and best-effort halts
/// every instance currently in flight under it. A partial failure to halt
/// some instances surfaces as 500 rather than undoing the halt.
pub async fn delete(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    let id = BackfillId::from_string(id);
    state.backfill_engine.halt_and_cancel(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
