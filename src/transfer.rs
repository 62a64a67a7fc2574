//! Transfer submission with an optimistic local debit.
//!
//! On success the balance is debited locally right away and only the
//! history is refetched. The balance is reconciled against the server on
//! the next periodic sync, not before.

use crate::activity::ActivityLog;
use crate::api::{ApiClient, ApiError};
use crate::models::TransferRequest;
use crate::navigator::Navigator;
use crate::session::SessionStore;
use crate::sync::LedgerStore;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

const GENERIC_FAILURE: &str = "Server error";

/// Input fields of the transfer form; cleared after a successful submit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferForm {
    pub receiver: String,
    pub amount: String,
}

impl TransferForm {
    pub fn new(receiver: &str, amount: &str) -> Self {
        Self {
            receiver: receiver.to_string(),
            amount: amount.to_string(),
        }
    }

    pub fn clear(&mut self) {
        self.receiver.clear();
        self.amount.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("Receiver ID or email is required")]
    MissingReceiver,
    #[error("Amount is required")]
    MissingAmount,
    #[error("Amount is not a number: {0}")]
    InvalidAmount(String),
    #[error("Amount must be greater than zero")]
    NonPositiveAmount,
    #[error("Account not loaded yet, try /refresh")]
    AccountUnavailable,
    #[error("A transfer is already being sent")]
    InFlight,
    #[error("Session expired, please log in again")]
    SessionExpired,
    #[error("Transfer failed: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub receiver: String,
    pub amount: Decimal,
    /// Balance after the optimistic debit
    pub balance: Option<Decimal>,
    pub history_refreshed: bool,
    pub message: String,
}

/// Local checks; nothing here touches the network.
pub fn validate(form: &TransferForm) -> Result<(String, Decimal), TransferError> {
    let receiver = form.receiver.trim();
    if receiver.is_empty() {
        return Err(TransferError::MissingReceiver);
    }
    let amount_text = form.amount.trim();
    if amount_text.is_empty() {
        return Err(TransferError::MissingAmount);
    }
    let amount = Decimal::from_str(amount_text.trim_start_matches('$'))
        .map_err(|_| TransferError::InvalidAmount(amount_text.to_string()))?;
    if amount <= Decimal::ZERO {
        return Err(TransferError::NonPositiveAmount);
    }
    Ok((receiver.to_string(), amount))
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct TransferController {
    api: Arc<ApiClient>,
    store: Arc<LedgerStore>,
    session: Arc<SessionStore>,
    navigator: Arc<Navigator>,
    activity: Arc<ActivityLog>,
    in_flight: AtomicBool,
}

impl TransferController {
    pub fn new(
        api: Arc<ApiClient>,
        store: Arc<LedgerStore>,
        session: Arc<SessionStore>,
        navigator: Arc<Navigator>,
        activity: Arc<ActivityLog>,
    ) -> Self {
        Self {
            api,
            store,
            session,
            navigator,
            activity,
            in_flight: AtomicBool::new(false),
        }
    }

    #[cfg(test)]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn submit(&self, form: &mut TransferForm) -> Result<TransferReceipt, TransferError> {
        let (receiver, amount) = validate(form)?;

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(TransferError::InFlight);
        }
        let _guard = InFlightGuard(&self.in_flight);

        if !self.session.is_authenticated() {
            self.session.terminate();
            self.navigator.redirect_to_login();
            return Err(TransferError::SessionExpired);
        }

        let account = self
            .store
            .account()
            .ok_or(TransferError::AccountUnavailable)?;
        let epoch = self.store.epoch();

        let request = TransferRequest {
            sender_id: account.id,
            receiver_identifier: receiver.clone(),
            amount,
        };
        let amount_text = amount.to_string();

        let confirmation = match self.api.submit_transfer(&request) {
            Ok(confirmation) => confirmation,
            Err(e) => {
                let err = match &e {
                    ApiError::Unauthorized => TransferError::SessionExpired,
                    other => TransferError::Rejected(
                        other.detail().unwrap_or(GENERIC_FAILURE).to_string(),
                    ),
                };
                let _ = self
                    .activity
                    .transfer(&receiver, &amount_text, false, Some(&err.to_string()));
                return Err(err);
            }
        };

        let balance = self.store.apply_debit(epoch, amount);
        form.clear();

        let history_refreshed = match self.api.fetch_history() {
            Ok(records) => self.store.replace_history(epoch, records),
            Err(e) => {
                eprintln!("Warning: could not refresh history: {}", e);
                false
            }
        };

        let _ = self.activity.transfer(&receiver, &amount_text, true, None);

        Ok(TransferReceipt {
            receiver,
            amount,
            balance,
            history_refreshed,
            message: confirmation.receipt_message(),
        })
    }
}
