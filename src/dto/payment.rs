use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{
    dao::models::PaymentMethodEntity,
    dto::validation::{validate_card_number, validate_cvc, validate_postal_code},
};

/// Raw card fields collected by the client, forwarded to the payment provider.
#[derive(Clone, Deserialize, Serialize, ToSchema)]
pub struct CardDetails {
    pub number: String,
    pub exp_month: u8,
    pub exp_year: u16,
    pub cvc: String,
    /// Billing ZIP code; checked only when present.
    #[serde(default)]
    pub postal_code: Option<String>,
}

impl fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.number.chars().filter(char::is_ascii_digit).collect::<String>();
        let last4 = &digits[digits.len().saturating_sub(4)..];
        f.debug_struct("CardDetails")
            .field("last4", &last4)
            .field("exp_month", &self.exp_month)
            .field("exp_year", &self.exp_year)
            .field("postal_code", &self.postal_code)
            .finish_non_exhaustive()
    }
}

impl CardDetails {
    /// Billing ZIP code; a blank field counts as not entered.
    pub fn postal_code(&self) -> Option<&str> {
        self.postal_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
    }
}

impl Validate for CardDetails {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Err(e) = validate_card_number(&self.number) {
            errors.add("number", e);
        }

        if !(1..=12).contains(&self.exp_month) {
            let mut err = ValidationError::new("exp_month_range");
            err.message = Some("Please complete your card details".into());
            errors.add("exp_month", err);
        }

        if self.exp_year == 0 {
            let mut err = ValidationError::new("exp_year_missing");
            err.message = Some("Please complete your card details".into());
            errors.add("exp_year", err);
        }

        if let Err(e) = validate_cvc(&self.cvc) {
            errors.add("cvc", e);
        }

        if let Some(code) = self.postal_code() {
            if let Err(e) = validate_postal_code(code) {
                errors.add("postal_code", e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Payment choice submitted with "add card" and "reserve" requests.
///
/// Mirrors the client form: either a saved method is selected, or new card fields are supplied
/// together with the "save this card" toggle.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PaymentSelectionInput {
    pub use_saved_method: bool,
    #[serde(default)]
    pub selected_method_id: Option<String>,
    #[serde(default)]
    pub card: Option<CardDetails>,
    #[serde(default)]
    pub save: bool,
}

/// Validated payment choice handed to the hold coordinator.
#[derive(Debug, Clone)]
pub enum PaymentSelection {
    /// Reuse a saved payment method as-is.
    Saved { method_id: String },
    /// Use a freshly entered card, optionally saving it for later.
    NewCard { card: CardDetails, save: bool },
}

impl PaymentSelection {
    /// Whether the resolved method should be kept on the user's account.
    pub fn saves_method(&self) -> bool {
        matches!(self, PaymentSelection::NewCard { save: true, .. })
    }
}

impl From<PaymentSelectionInput> for PaymentSelection {
    fn from(input: PaymentSelectionInput) -> Self {
        if input.use_saved_method {
            PaymentSelection::Saved {
                method_id: input.selected_method_id.unwrap_or_default(),
            }
        } else {
            PaymentSelection::NewCard {
                card: input.card.unwrap_or_else(CardDetails::empty),
                save: input.save,
            }
        }
    }
}

impl CardDetails {
    /// Blank card used when the client omitted the card block; fails validation.
    fn empty() -> Self {
        Self {
            number: String::new(),
            exp_month: 0,
            exp_year: 0,
            cvc: String::new(),
            postal_code: None,
        }
    }
}

/// Payment method reference resolved by the coordinator.
#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentMethodRefResponse {
    pub payment_method_id: String,
}

/// Saved payment method as shown to the client.
#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentMethodView {
    pub id: String,
    pub brand: String,
    pub last4: String,
    pub is_default: bool,
}

impl From<PaymentMethodEntity> for PaymentMethodView {
    fn from(entity: PaymentMethodEntity) -> Self {
        Self {
            id: entity.id,
            brand: entity.brand,
            last4: entity.last4,
            is_default: entity.is_default,
        }
    }
}
