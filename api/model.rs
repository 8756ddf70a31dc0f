//! HTTP-facing request/response shapes (spec.md §6).
//!
//! The wire `BackfillInput` has no `schedule` field — the schedule is
//! derived from the target workflow's own registration rather than
//! accepted from the caller, since a backfill that disagreed with its
//! workflow's schedule would produce instance parameters nothing else in
//! the system could have produced naturally.

use chrono::{DateTime, Utc};
use corelib::types::backfill::Backfill;
use engine::backfill::PartitionStatus;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct BackfillInputDto {
    pub component: String,
    pub workflow: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[validate(range(min = 1))]
    pub concurrency: usize,
    pub description: Option<String>,
    #[serde(default)]
    pub reverse: bool,
    pub trigger_parameters: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct EditableBackfillInputDto {
    #[validate(range(min = 1))]
    pub concurrency: Option<usize>,
    pub description: Option<String>,
}

/// Query params accepted by `POST /backfills`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateQuery {
    #[serde(default, rename = "allowFuture")]
    pub allow_future: bool,
}

/// Query params accepted by `GET /backfills` and `GET /backfills/{id}`
/// (spec.md §6): `component` and `workflow` filter the listed workflow id's
/// two halves independently.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub component: Option<String>,
    pub workflow: Option<String>,
    #[serde(default)]
    pub status: bool,
    #[serde(default, rename = "showAll")]
    pub show_all: bool,
}

/// The `GET` response shape: a [`Backfill`] plus, when `?status=true`, how
/// many of its partitions currently have an instance in flight and each
/// partition's resolved status (spec.md §4.8.3).
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct BackfillPayload {
    #[serde(flatten)]
    pub backfill: Backfill,
    pub in_flight: Option<usize>,
    pub partitions: Option<Vec<PartitionStatus>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackfillListResponse {
    pub backfills: Vec<BackfillPayload>,
}
