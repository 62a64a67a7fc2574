//! Login and registration flows.

use crate::activity::ActivityLog;
use crate::api::{ApiClient, ApiError};
use crate::models::Credentials;
use crate::navigator::{Navigator, Surface};
use crate::session::{Claims, SessionStore};
use std::sync::Arc;
use thiserror::Error;

pub const MIN_PASSWORD_LEN: usize = 6;
const LOGIN_FALLBACK: &str = "Try again";
const REGISTER_FALLBACK: &str = "Please try again";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Email is required")]
    MissingEmail,
    #[error("Password is required")]
    MissingPassword,
    #[error("Passwords do not match")]
    PasswordMismatch,
    #[error("Password must be at least 6 characters")]
    PasswordTooShort,
    #[error("Login failed: {0}")]
    LoginRejected(String),
    #[error("Registration failed: {0}")]
    RegisterRejected(String),
    #[error("Login failed: server issued an unusable token")]
    InvalidToken,
}

fn failure_detail(err: &ApiError, fallback: &str) -> String {
    err.detail().unwrap_or(fallback).to_string()
}

pub struct Authenticator {
    api: Arc<ApiClient>,
    session: Arc<SessionStore>,
    navigator: Arc<Navigator>,
    activity: Arc<ActivityLog>,
}

impl Authenticator {
    pub fn new(
        api: Arc<ApiClient>,
        session: Arc<SessionStore>,
        navigator: Arc<Navigator>,
        activity: Arc<ActivityLog>,
    ) -> Self {
        Self {
            api,
            session,
            navigator,
            activity,
        }
    }

    pub fn login(&self, email: &str, password: &str) -> Result<Claims, AuthError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(AuthError::MissingEmail);
        }
        if password.is_empty() {
            return Err(AuthError::MissingPassword);
        }

        let credentials = Credentials {
            email: email.to_string(),
            password: password.to_string(),
        };
        let token = match self.api.authenticate(&credentials) {
            Ok(token) => token,
            Err(e) => {
                let detail = failure_detail(&e, LOGIN_FALLBACK);
                let _ = self.activity.login(email, false, Some(&detail));
                return Err(AuthError::LoginRejected(detail));
            }
        };

        let claims = self.adopt(&token).inspect_err(|_| {
            let _ = self.activity.login(email, false, Some("invalid token"));
        })?;
        let _ = self.activity.login(email, true, None);
        Ok(claims)
    }

    pub fn register(
        &self,
        email: &str,
        password: &str,
        confirm: &str,
    ) -> Result<Claims, AuthError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(AuthError::MissingEmail);
        }
        if password.is_empty() {
            return Err(AuthError::MissingPassword);
        }
        if password != confirm {
            return Err(AuthError::PasswordMismatch);
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::PasswordTooShort);
        }

        let credentials = Credentials {
            email: email.to_string(),
            password: password.to_string(),
        };
        let token = match self.api.register(&credentials) {
            Ok(token) => token,
            Err(e) => {
                let detail = failure_detail(&e, REGISTER_FALLBACK);
                let _ = self.activity.register(email, false, Some(&detail));
                return Err(AuthError::RegisterRejected(detail));
            }
        };

        let claims = self.adopt(&token).inspect_err(|_| {
            let _ = self.activity.register(email, false, Some("invalid token"));
        })?;
        let _ = self.activity.register(email, true, None);
        Ok(claims)
    }

    /// Explicit logout from the account surface.
    pub fn logout(&self) {
        self.session.terminate();
        self.navigator.navigate(Surface::Login);
        let _ = self.activity.logout("user");
    }

    fn adopt(&self, token: &str) -> Result<Claims, AuthError> {
        match self.session.establish(token) {
            Ok(claims) => {
                self.navigator.navigate(Surface::Account);
                Ok(claims)
            }
            Err(e) => {
                eprintln!("Warning: rejected issued token: {}", e);
                Err(AuthError::InvalidToken)
            }
        }
    }
}
