//! Validation helpers for DTOs.

use validator::ValidationError;

const POSTAL_CODE_LENGTH: usize = 5;

/// Validates that a postal code is exactly five ASCII digits.
///
/// # Examples
///
/// ```ignore
/// validate_postal_code("94107") // Ok
/// validate_postal_code("1234")  // Err - too short
/// validate_postal_code("9410a") // Err - not numeric
/// ```
pub fn validate_postal_code(code: &str) -> Result<(), ValidationError> {
    if code.len() != POSTAL_CODE_LENGTH || !code.chars().all(|c| c.is_ascii_digit()) {
        let mut err = ValidationError::new("postal_code_format");
        err.message = Some("Please enter a valid 5-digit ZIP code".into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a card number contains only digits and spaces with a plausible length.
pub fn validate_card_number(number: &str) -> Result<(), ValidationError> {
    let digits = number.chars().filter(|c| !c.is_whitespace()).collect::<String>();
    if !digits.chars().all(|c| c.is_ascii_digit()) || !(12..=19).contains(&digits.len()) {
        let mut err = ValidationError::new("card_number_incomplete");
        err.message = Some("Please complete your card details".into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a card verification code is three or four digits.
pub fn validate_cvc(cvc: &str) -> Result<(), ValidationError> {
    if !(3..=4).contains(&cvc.len()) || !cvc.chars().all(|c| c.is_ascii_digit()) {
        let mut err = ValidationError::new("cvc_incomplete");
        err.message = Some("Please complete your card details".into());
        return Err(err);
    }

    Ok(())
}
