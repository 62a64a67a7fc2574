//! Wire types for the payments API.
//!
//! Identifiers and statuses are resolved into tagged variants once, when a
//! response is deserialized, so the view layer never inspects string shapes.

use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern compiles"));

/// Returns true for strings that look like an email address.
pub fn is_email_shaped(s: &str) -> bool {
    EMAIL_RE.is_match(s)
}

/// Email + password pair sent to `/login` and `/register`
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
}

/// Account snapshot returned by `/me`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Account {
    pub id: i64,
    pub email: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance: Decimal,
}

/// The other side of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterpartyId {
    Email(String),
    NumericId(i64),
    /// Neither numeric nor email-shaped; displayed verbatim
    Other(String),
}

impl CounterpartyId {
    pub fn resolve(raw: &str) -> Self {
        let raw = raw.trim();
        if let Ok(id) = raw.parse::<i64>() {
            CounterpartyId::NumericId(id)
        } else if is_email_shaped(raw) {
            CounterpartyId::Email(raw.to_string())
        } else {
            CounterpartyId::Other(raw.to_string())
        }
    }

    pub fn is_account(&self, account_id: i64) -> bool {
        matches!(self, CounterpartyId::NumericId(id) if *id == account_id)
    }
}

impl fmt::Display for CounterpartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterpartyId::Email(email) => write!(f, "{}", email),
            CounterpartyId::NumericId(id) => write!(f, "{}", id),
            CounterpartyId::Other(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Int(i64),
    Text(String),
}

impl<'de> Deserialize<'de> for CounterpartyId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawId::deserialize(deserializer)? {
            RawId::Int(id) => CounterpartyId::NumericId(id),
            RawId::Text(s) => CounterpartyId::resolve(&s),
        })
    }
}

/// Settlement state of a transaction as reported by the server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum TransactionStatus {
    Success,
    Pending,
    Failed,
    Other(String),
}

impl From<String> for TransactionStatus {
    fn from(s: String) -> Self {
        match s.to_uppercase().as_str() {
            "SUCCESS" => Self::Success,
            "PENDING" => Self::Pending,
            "FAILED" => Self::Failed,
            _ => Self::Other(s),
        }
    }
}

impl TransactionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Success => "SUCCESS",
            Self::Pending => "PENDING",
            Self::Failed => "FAILED",
            Self::Other(s) => s,
        }
    }
}

/// One audit-log entry from `/history`. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TransactionRecord {
    pub id: i64,
    pub sender_id: CounterpartyId,
    #[serde(default)]
    pub receiver_id: Option<CounterpartyId>,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    #[serde(default = "default_status")]
    pub status: TransactionStatus,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub entry_hash: Option<String>,
    #[serde(default)]
    pub previous_hash: Option<String>,
}

fn default_status() -> TransactionStatus {
    TransactionStatus::Success
}

impl TransactionRecord {
    /// Outgoing iff the account sent it
    pub fn is_outgoing(&self, account_id: i64) -> bool {
        self.sender_id.is_account(account_id)
    }

    pub fn counterparty(&self, account_id: i64) -> Option<&CounterpartyId> {
        if self.is_outgoing(account_id) {
            self.receiver_id.as_ref()
        } else {
            Some(&self.sender_id)
        }
    }
}

/// Accepts RFC 3339 as well as offset-less ISO timestamps (taken as UTC).
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<DateTime<Utc>, D::Error> {
    let s = String::deserialize(deserializer)?;
    parse_timestamp(&s)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", s)))
}

/// Body of `POST /transfer`. Built fresh for every submission.
#[derive(Debug, Clone, Serialize)]
pub struct TransferRequest {
    pub sender_id: i64,
    pub receiver_identifier: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
}

pub const TRANSFER_SUCCESS_MESSAGE: &str = "Transfer successful!";

/// Body of a successful `/transfer`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransferConfirmation {
    #[serde(default)]
    pub message: Option<String>,
}

impl TransferConfirmation {
    pub fn receipt_message(&self) -> String {
        match self.message.as_deref().map(str::trim) {
            Some(message) if !message.is_empty() => message.to_string(),
            _ => TRANSFER_SUCCESS_MESSAGE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_counterparty_resolution() {
        assert_eq!(CounterpartyId::resolve("42"), CounterpartyId::NumericId(42));
        assert_eq!(
            CounterpartyId::resolve("bob@example.com"),
            CounterpartyId::Email("bob@example.com".to_string())
        );
        assert_eq!(
            CounterpartyId::resolve("bob"),
            CounterpartyId::Other("bob".to_string())
        );
    }

    #[test]
    fn test_record_deserialize() {
        let record: TransactionRecord = serde_json::from_value(json!({
            "id": 7,
            "sender_id": 1,
            "receiver_id": 2,
            "amount": 12.5,
            "timestamp": "2025-03-05T10:00:00",
            "status": "SUCCESS",
            "entry_hash": "abc"
        }))
        .unwrap();
        assert_eq!(record.sender_id, CounterpartyId::NumericId(1));
        assert_eq!(record.amount, "12.5".parse::<Decimal>().unwrap());
        assert_eq!(record.status, TransactionStatus::Success);
        assert!(record.is_outgoing(1));
        assert!(!record.is_outgoing(2));
        assert_eq!(record.counterparty(1), Some(&CounterpartyId::NumericId(2)));
        assert_eq!(record.counterparty(2), Some(&CounterpartyId::NumericId(1)));
    }

    #[test]
    fn test_missing_receiver() {
        let record: TransactionRecord = serde_json::from_value(json!({
            "id": 1,
            "sender_id": 5,
            "receiver_id": null,
            "amount": 1,
            "timestamp": "2025-03-05T10:00:00+00:00",
            "status": "PENDING"
        }))
        .unwrap();
        assert_eq!(record.receiver_id, None);
        assert_eq!(record.counterparty(5), None);
        assert_eq!(record.status, TransactionStatus::Pending);
    }

    #[test]
    fn test_parse_timestamp_variants() {
        assert!(parse_timestamp("2025-03-05T10:00:00Z").is_some());
        assert!(parse_timestamp("2025-03-05T10:00:00.123456").is_some());
        assert!(parse_timestamp("2025-03-05 10:00:00").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_unknown_status_kept() {
        let status = TransactionStatus::from("REVERSED".to_string());
        assert_eq!(status, TransactionStatus::Other("REVERSED".to_string()));
        assert_eq!(status.as_str(), "REVERSED");
    }

    #[test]
    fn test_transfer_request_amount_is_number() {
        let req = TransferRequest {
            sender_id: 1,
            receiver_identifier: "bob@example.com".to_string(),
            amount: "25.00".parse().unwrap(),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["amount"].as_f64(), Some(25.0));
        assert_eq!(value["receiver_identifier"], "bob@example.com");
    }
}
