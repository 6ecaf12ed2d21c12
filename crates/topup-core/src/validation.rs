//! # Field Validation
//!
//! Synchronous checks that run before anything touches the network.
//! A failure here is always `ShopError::Validation`.

use crate::error::{ShopError, ShopResult};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
static PHONE_RE: OnceLock<Regex> = OnceLock::new();
static EXPIRY_RE: OnceLock<Regex> = OnceLock::new();
static ORDER_ID_RE: OnceLock<Regex> = OnceLock::new();

fn email_re() -> &'static Regex {
    EMAIL_RE.get_or_init(|| {
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid")
    })
}

fn phone_re() -> &'static Regex {
    PHONE_RE.get_or_init(|| Regex::new(r"^\+?[0-9]{8,15}$").expect("phone pattern is valid"))
}

fn expiry_re() -> &'static Regex {
    EXPIRY_RE.get_or_init(|| Regex::new(r"^([0-9]{2})/([0-9]{2})$").expect("expiry pattern is valid"))
}

fn order_id_re() -> &'static Regex {
    ORDER_ID_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("order id pattern is valid"))
}

fn invalid(msg: &str) -> ShopError {
    ShopError::Validation(msg.to_string())
}

fn strip_formatting(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect()
}

fn all_digits(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_digit())
}

/// `local@domain.tld`
pub fn validate_email(email: &str) -> ShopResult<()> {
    if email_re().is_match(email.trim()) {
        Ok(())
    } else {
        Err(invalid("Please enter a valid email address"))
    }
}

/// Optional contact phone: digits with an optional leading `+`
pub fn validate_phone(phone: &str) -> ShopResult<()> {
    let compact = strip_formatting(phone);
    if phone_re().is_match(&compact) {
        Ok(())
    } else {
        Err(invalid("Please enter a valid phone number"))
    }
}

/// Order ids arriving on return URLs end up in request paths and file names
pub fn validate_order_id(order_id: &str) -> ShopResult<()> {
    if order_id.is_empty() {
        Err(invalid("Missing order id"))
    } else if order_id_re().is_match(order_id) {
        Ok(())
    } else {
        Err(invalid("Invalid order id"))
    }
}

/// Card details for the direct card gateway
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardDetails {
    pub card_number: String,
    pub expiry: String,
    pub cvv: String,
    pub cardholder_name: String,
}

impl CardDetails {
    pub fn new(
        card_number: impl Into<String>,
        expiry: impl Into<String>,
        cvv: impl Into<String>,
        cardholder_name: impl Into<String>,
    ) -> Self {
        Self {
            card_number: card_number.into(),
            expiry: expiry.into(),
            cvv: cvv.into(),
            cardholder_name: cardholder_name.into(),
        }
    }

    /// Validate and return a copy with formatting removed from the number
    pub fn validated(&self) -> ShopResult<CardDetails> {
        let number = strip_formatting(&self.card_number);
        if number.len() != 16 || !all_digits(&number) {
            return Err(invalid("Card number must be 16 digits"));
        }

        let expiry = self.expiry.trim();
        let caps = expiry_re()
            .captures(expiry)
            .ok_or_else(|| invalid("Expiry must be in MM/YY format"))?;
        let month: u32 = caps[1].parse().map_err(|_| invalid("Expiry must be in MM/YY format"))?;
        if !(1..=12).contains(&month) {
            return Err(invalid("Expiry month must be between 01 and 12"));
        }

        let cvv = self.cvv.trim();
        if !(3..=4).contains(&cvv.len()) || !all_digits(cvv) {
            return Err(invalid("CVV must be 3 or 4 digits"));
        }

        if self.cardholder_name.trim().is_empty() {
            return Err(invalid("Cardholder name is required"));
        }

        Ok(CardDetails {
            card_number: number,
            expiry: expiry.to_string(),
            cvv: cvv.to_string(),
            cardholder_name: self.cardholder_name.trim().to_string(),
        })
    }

    /// Last four digits, for logs and receipts
    pub fn last4(&self) -> String {
        let number = strip_formatting(&self.card_number);
        number.chars().skip(number.len().saturating_sub(4)).collect()
    }
}

impl std::fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardDetails")
            .field("last4", &self.last4())
            .finish_non_exhaustive()
    }
}

/// Bank account details for the bank transfer gateway
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BankDetails {
    pub account_number: String,
    pub bank_code: String,
    pub account_holder: String,
}

impl BankDetails {
    pub fn new(
        account_number: impl Into<String>,
        bank_code: impl Into<String>,
        account_holder: impl Into<String>,
    ) -> Self {
        Self {
            account_number: account_number.into(),
            bank_code: bank_code.into(),
            account_holder: account_holder.into(),
        }
    }

    pub fn validated(&self) -> ShopResult<BankDetails> {
        let account = strip_formatting(&self.account_number);
        if account.len() > 16 || !all_digits(&account) {
            return Err(invalid("Account number must be up to 16 digits"));
        }

        let code = self.bank_code.trim();
        if code.len() != 3 || !all_digits(code) {
            return Err(invalid("Bank code must be exactly 3 digits"));
        }

        if self.account_holder.trim().is_empty() {
            return Err(invalid("Account holder name is required"));
        }

        Ok(BankDetails {
            account_number: account,
            bank_code: code.to_string(),
            account_holder: self.account_holder.trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(number: &str, expiry: &str, cvv: &str) -> CardDetails {
        CardDetails::new(number, expiry, cvv, "Jane Doe")
    }

    #[test]
    fn test_email() {
        assert!(validate_email("buyer@example.com").is_ok());
        assert!(validate_email(" buyer@mail.example.co.id ").is_ok());
        assert!(validate_email("buyer@example").is_err());
        assert!(validate_email("buyer example@x.com").is_err());
        assert!(validate_email("").is_err());
    }

    #[test]
    fn test_phone() {
        assert!(validate_phone("+62 812-3456-7890").is_ok());
        assert!(validate_phone("08123456789").is_ok());
        assert!(validate_phone("12345").is_err());
        assert!(validate_phone("call me").is_err());
    }

    #[test]
    fn test_order_id() {
        assert!(validate_order_id("ord_1").is_ok());
        assert!(validate_order_id("8f14e45f-ceea-467a-9af0-2c1f5b0a7e1d").is_ok());
        assert!(validate_order_id("").is_err());
        assert!(validate_order_id("..").is_err());
        assert!(validate_order_id("../rest/v1/profiles").is_err());
        assert!(validate_order_id("ord_1?select=*").is_err());
        assert!(validate_order_id(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_card_number_length() {
        assert!(card("4111 1111 1111 1111", "12/29", "123").validated().is_ok());
        assert!(card("411111111111111", "12/29", "123").validated().is_err());
        assert!(card("41111111111111111", "12/29", "123").validated().is_err());
        assert!(card("4111 1111 1111 111a", "12/29", "123").validated().is_err());
    }

    #[test]
    fn test_card_cvv_and_expiry() {
        assert!(card("4111111111111111", "12/29", "12").validated().is_err());
        assert!(card("4111111111111111", "12/29", "12345").validated().is_err());
        assert!(card("4111111111111111", "12/29", "1234").validated().is_ok());

        assert!(card("4111111111111111", "1229", "123").validated().is_err());
        assert!(card("4111111111111111", "1/29", "123").validated().is_err());
        assert!(card("4111111111111111", "12/2029", "123").validated().is_err());
        assert!(card("4111111111111111", "13/29", "123").validated().is_err());
    }

    #[test]
    fn test_card_normalised_and_redacted() {
        let ok = card("4111 1111 1111 1234", "01/30", "999").validated().unwrap();
        assert_eq!(ok.card_number, "4111111111111234");
        assert_eq!(ok.last4(), "1234");
        assert!(!format!("{:?}", ok).contains("4111111111111234"));
    }

    #[test]
    fn test_bank_details() {
        assert!(BankDetails::new("1234567890", "014", "Jane").validated().is_ok());
        assert!(BankDetails::new("12345678901234567", "014", "Jane").validated().is_err());
        assert!(BankDetails::new("", "014", "Jane").validated().is_err());
        assert!(BankDetails::new("1234", "14", "Jane").validated().is_err());
        assert!(BankDetails::new("1234", "0144", "Jane").validated().is_err());
        assert!(BankDetails::new("1234", "014", " ").validated().is_err());
    }
}
