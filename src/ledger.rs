//! Client-side view over the fetched transaction history.

use crate::models::{TransactionRecord, TransactionStatus};
use chrono::{DateTime, Local, Utc};
use rust_decimal::Decimal;
use std::cmp::Ordering;

pub const UNKNOWN_COUNTERPARTY: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Timestamp,
    Amount,
}

impl SortKey {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "timestamp" | "time" | "date" => Some(Self::Timestamp),
            "amount" => Some(Self::Amount),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timestamp => "date",
            Self::Amount => "amount",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn flipped(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }

    pub fn arrow(&self) -> &'static str {
        match self {
            Self::Asc => "↑",
            Self::Desc => "↓",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortState {
    pub key: SortKey,
    pub direction: SortDirection,
}

impl Default for SortState {
    /// Newest first, the order the server sends
    fn default() -> Self {
        Self {
            key: SortKey::Timestamp,
            direction: SortDirection::Desc,
        }
    }
}

impl SortState {
    /// Same key flips direction; a new key starts ascending.
    pub fn toggled(self, key: SortKey) -> Self {
        if self.key == key {
            Self {
                key,
                direction: self.direction.flipped(),
            }
        } else {
            Self {
                key,
                direction: SortDirection::Asc,
            }
        }
    }

    fn compare(&self, a: &TransactionRecord, b: &TransactionRecord) -> Ordering {
        let ord = match self.key {
            SortKey::Timestamp => a.timestamp.cmp(&b.timestamp),
            SortKey::Amount => a.amount.cmp(&b.amount),
        };
        match self.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

pub fn direction_of(record: &TransactionRecord, account_id: i64) -> Direction {
    if record.is_outgoing(account_id) {
        Direction::Outgoing
    } else {
        Direction::Incoming
    }
}

pub fn format_counterparty(record: &TransactionRecord, account_id: i64) -> String {
    match record.counterparty(account_id) {
        Some(id) => id.to_string(),
        None => UNKNOWN_COUNTERPARTY.to_string(),
    }
}

/// `Sent`/`Received` for settled transfers, the raw status otherwise
pub fn status_label(record: &TransactionRecord, account_id: i64) -> String {
    match (&record.status, direction_of(record, account_id)) {
        (TransactionStatus::Success, Direction::Outgoing) => "Sent".to_string(),
        (TransactionStatus::Success, Direction::Incoming) => "Received".to_string(),
        (status, _) => status.as_str().to_string(),
    }
}

pub fn format_money(amount: Decimal) -> String {
    let rounded = amount.round_dp(2);
    if rounded.is_sign_negative() && !rounded.is_zero() {
        format!("-${:.2}", rounded.abs())
    } else {
        format!("${:.2}", rounded.abs())
    }
}

pub fn signed_amount(record: &TransactionRecord, account_id: i64) -> String {
    let sign = match direction_of(record, account_id) {
        Direction::Outgoing => '-',
        Direction::Incoming => '+',
    };
    format!("{}{}", sign, format_money(record.amount))
}

/// Calendar date in the local timezone, e.g. "Mar 5, 2025"
pub fn format_date(ts: &DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%b %-d, %Y").to_string()
}

/// Avatar letter for a counterparty label
pub fn initial(label: &str) -> char {
    label
        .chars()
        .next()
        .map(|c| c.to_ascii_uppercase())
        .unwrap_or('U')
}

/// A display-ready row, shared by the table and the exports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRow {
    pub id: i64,
    pub counterparty: String,
    pub date: String,
    pub status: String,
    pub amount: String,
}

#[derive(Debug, Clone, Default)]
pub struct LedgerView {
    sort: SortState,
}

impl LedgerView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort_state(&self) -> SortState {
        self.sort
    }

    pub fn sort_by(&mut self, key: SortKey) -> SortState {
        self.sort = self.sort.toggled(key);
        self.sort
    }

    /// Stable: ties keep the order they were fetched in.
    pub fn sorted<'a>(&self, records: &'a [TransactionRecord]) -> Vec<&'a TransactionRecord> {
        let mut out: Vec<&TransactionRecord> = records.iter().collect();
        out.sort_by(|a, b| self.sort.compare(a, b));
        out
    }

    pub fn rows(&self, records: &[TransactionRecord], account_id: i64) -> Vec<LedgerRow> {
        self.sorted(records)
            .into_iter()
            .map(|r| LedgerRow {
                id: r.id,
                counterparty: format_counterparty(r, account_id),
                date: format_date(&r.timestamp),
                status: status_label(r, account_id),
                amount: signed_amount(r, account_id),
            })
            .collect()
    }
}
