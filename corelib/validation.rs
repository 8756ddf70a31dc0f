//! Field-level [`validator`] helpers for types that can't express their
//! constraints with a derive attribute alone.
//!
//! Grounded on the teacher's `lib/validation.rs::validate_timezone` pattern:
//! a small wrapper that turns a domain parse error into a
//! [`ValidationError`] with a stable machine-readable code.

use validator::ValidationError;

use crate::schedule::Schedule;

pub fn validation_error(code: &'static str, message: String) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

/// Validates the `Cron(..)` variant's expression; the calendar variants
/// carry no user-supplied data and are always valid.
pub fn validate_schedule(schedule: &Schedule) -> Result<(), ValidationError> {
    schedule.validate().map_err(|e| {
        validation_error("invalid_schedule", format!("invalid schedule: {e}"))
    })
}

/// A container image reference must carry a repository component; this is
/// intentionally permissive (no registry/tag grammar enforcement) since the
/// runner adapter is the one that ultimately resolves it.
pub fn validate_image_reference(image: &str) -> Result<(), ValidationError> {
    if image.trim().is_empty() {
        return Err(validation_error(
            "empty_image_reference",
            "container image reference must not be empty".to_string(),
        ));
    }
    if image.chars().any(char::is_whitespace) {
        return Err(validation_error(
            "malformed_image_reference",
            format!("container image reference '{image}' contains whitespace"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_cron_schedule() {
        let schedule = Schedule::Cron("not a cron expression".to_string());
        assert!(validate_schedule(&schedule).is_err());
    }

    #[test]
    fn accepts_calendar_schedules() {
        assert!(validate_schedule(&Schedule::Days).is_ok());
    }

    #[test]
    fn rejects_empty_and_whitespace_images() {
        assert!(validate_image_reference("").is_err());
        assert!(validate_image_reference("repo/name tag").is_err());
        assert!(validate_image_reference("repo/name:latest").is_ok());
    }
}
