//! Pure input validation for the receiving screens.
//!
//! Invalid input is a normal return value ([`ValidationResult`] with
//! `is_valid == false`), never an error. Callers that need a `Result` use
//! [`ValidationResult::into_result`].

use chrono::{Datelike, Local, NaiveDate};

use crate::error::RecebError;

pub const MAX_QUANTITY: f64 = 999_999.0;
pub const MAX_IDENTIFICADOR_LEN: usize = 50;
pub const MIN_OCCURRENCE_DESCRIPTION: usize = 10;
pub const MAX_EXPIRATION_YEARS_AHEAD: i32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub message: String,
    pub normalized_value: Option<String>,
}

impl ValidationResult {
    pub fn valid(normalized: impl Into<String>) -> Self {
        Self {
            is_valid: true,
            message: String::new(),
            normalized_value: Some(normalized.into()),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            message: message.into(),
            normalized_value: None,
        }
    }

    /// Converts into a field-scoped [`RecebError::Validation`] on failure.
    pub fn into_result(self, field: &'static str) -> Result<String, RecebError> {
        if self.is_valid {
            Ok(self.normalized_value.unwrap_or_default())
        } else {
            Err(RecebError::validation(field, self.message))
        }
    }
}

/// Any non-blank code is accepted; length and check-digit rules were dropped
/// on purpose so internal codes and DUN-14 both pass.
pub fn validate_barcode(input: &str) -> ValidationResult {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return ValidationResult::invalid("Informe o código de barras ou material");
    }
    ValidationResult::valid(trimmed)
}

/// Valid iff `0 < q <= 999999`. Accepts `,` as decimal separator.
pub fn validate_quantity(input: &str) -> ValidationResult {
    let normalized = input.trim().replace(',', ".");
    let quantity = match normalized.parse::<f64>() {
        Ok(q) if !q.is_nan() => q,
        _ => return ValidationResult::invalid("Quantidade inválida"),
    };
    if quantity <= 0.0 {
        return ValidationResult::invalid("Quantidade deve ser maior que zero");
    }
    if quantity > MAX_QUANTITY {
        return ValidationResult::invalid(format!(
            "Quantidade não pode exceder {MAX_QUANTITY}"
        ));
    }
    ValidationResult::valid(quantity.to_string())
}

/// Expiration check against today's local date.
pub fn validate_expiration(month: u32, year: i32) -> ValidationResult {
    validate_expiration_at(month, year, Local::now().date_naive())
}

/// Expiration check against an explicit `today`.
///
/// Normalized value is `YYYY-MM`.
pub fn validate_expiration_at(month: u32, year: i32, today: NaiveDate) -> ValidationResult {
    if !(1..=12).contains(&month) {
        return ValidationResult::invalid("Mês deve estar entre 1 e 12");
    }
    if year < today.year() {
        return ValidationResult::invalid("Ano de validade já passou");
    }
    if year == today.year() && month < today.month() {
        return ValidationResult::invalid("Mês de validade já passou");
    }
    if year > today.year() + MAX_EXPIRATION_YEARS_AHEAD {
        return ValidationResult::invalid(format!(
            "Ano de validade não pode passar de {}",
            today.year() + MAX_EXPIRATION_YEARS_AHEAD
        ));
    }
    ValidationResult::valid(format!("{year:04}-{month:02}"))
}

/// Parses `MM/AAAA` (or `MM/AA`) and validates it.
pub fn validate_expiration_input(input: &str) -> ValidationResult {
    match parse_month_year(input) {
        Some((month, year)) => validate_expiration(month, year),
        None => ValidationResult::invalid("Validade deve estar no formato MM/AAAA"),
    }
}

pub fn parse_month_year(input: &str) -> Option<(u32, i32)> {
    let (month, year) = input.trim().split_once('/')?;
    let month: u32 = month.trim().parse().ok()?;
    let year = year.trim();
    let year: i32 = match year.len() {
        2 => 2000 + year.parse::<i32>().ok()?,
        4 => year.parse().ok()?,
        _ => return None,
    };
    Some((month, year))
}

/// Last calendar day of the given month.
pub fn expiration_date(month: u32, year: i32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
}

pub fn validate_identificador(input: &str) -> ValidationResult {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return ValidationResult::invalid("Informe o identificador");
    }
    if trimmed.chars().count() > MAX_IDENTIFICADOR_LEN {
        return ValidationResult::invalid(format!(
            "Identificador deve ter no máximo {MAX_IDENTIFICADOR_LEN} caracteres"
        ));
    }
    ValidationResult::valid(trimmed)
}

/// Every `(label, value)` pair must be non-blank. The message lists the missing labels.
pub fn validate_required(fields: &[(&str, &str)]) -> ValidationResult {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(label, _)| *label)
        .collect();
    if missing.is_empty() {
        ValidationResult::valid("")
    } else {
        ValidationResult::invalid(format!("Campos obrigatórios: {}", missing.join(", ")))
    }
}

pub fn validate_occurrence_description(input: &str) -> ValidationResult {
    let trimmed = input.trim();
    if trimmed.chars().count() < MIN_OCCURRENCE_DESCRIPTION {
        return ValidationResult::invalid(format!(
            "Descrição deve ter pelo menos {MIN_OCCURRENCE_DESCRIPTION} caracteres"
        ));
    }
    ValidationResult::valid(trimmed)
}
