use crate::model::define_model_id;

define_model_id! {
    #[prefix = "backfill"]
    /// Identifies a [`crate::types::backfill::Backfill`].
    pub struct BackfillId;
}

define_model_id! {
    #[prefix = "exec"]
    /// Identifies a container execution started by the submission pipeline.
    pub struct ExecutionId;
}

/// A trigger id is either `natural-<ulid>` (emitted by the Trigger Manager)
/// or a [`BackfillId`]'s string form (backfills use their own id as the
/// trigger id for every instance they advance, per spec.md §4.8.2).
pub type TriggerId = String;

pub fn generate_natural_trigger_id() -> TriggerId {
    format!("natural-{}", ulid::Ulid::new())
}
