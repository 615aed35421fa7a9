//! Validation helpers for DTOs.

use validator::ValidationError;

/// Validates that an answer or guess is one of the option letters `A` to `D`.
///
/// # Examples
///
/// ```ignore
/// validate_choice("B") // Ok
/// validate_choice("b") // Err - lowercase
/// validate_choice("AB") // Err - more than one letter
/// ```
pub fn validate_choice(value: &str) -> Result<(), ValidationError> {
    if matches!(value, "A" | "B" | "C" | "D") {
        return Ok(());
    }

    let mut err = ValidationError::new("choice_format");
    err.message = Some(format!("Answer must be A, B, C, or D. Received: {value}").into());
    Err(err)
}
