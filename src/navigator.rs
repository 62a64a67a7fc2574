//! Surface routing: which screen of the client is active.

use crate::session::SessionStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    /// Neutral state shown until the saved session has been restored
    Loading,
    Login,
    Register,
    /// The protected dashboard
    Account,
}

impl Surface {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Login => "login",
            Self::Register => "register",
            Self::Account => "account",
        }
    }

    pub fn is_protected(&self) -> bool {
        matches!(self, Self::Account)
    }
}

pub struct Navigator {
    current: Mutex<Surface>,
    forced_redirects: AtomicUsize,
}

impl Default for Navigator {
    fn default() -> Self {
        Self::new()
    }
}

impl Navigator {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(Surface::Loading),
            forced_redirects: AtomicUsize::new(0),
        }
    }

    pub fn current(&self) -> Surface {
        self.current.lock().map(|s| *s).unwrap_or(Surface::Login)
    }

    pub fn navigate(&self, to: Surface) {
        if let Ok(mut current) = self.current.lock() {
            *current = to;
        }
    }

    /// What the protected surface should render right now.
    pub fn protected_view(session: &SessionStore) -> Surface {
        if !session.is_restored() {
            Surface::Loading
        } else if session.is_authenticated() {
            Surface::Account
        } else {
            Surface::Login
        }
    }

    /// Leave the startup loading state once restore has finished.
    pub fn settle(&self, session: &SessionStore) -> Surface {
        let to = Self::protected_view(session);
        self.navigate(to);
        to
    }

    /// Login and Register bounce an authenticated user to the dashboard.
    pub fn open_public(&self, to: Surface, session: &SessionStore) -> Surface {
        let to = if session.is_authenticated() {
            Surface::Account
        } else {
            to
        };
        self.navigate(to);
        to
    }

    /// Forced transition to the login surface after the server rejected the
    /// session. Returns false when already there, so a burst of concurrent
    /// rejections produces a single transition.
    pub fn redirect_to_login(&self) -> bool {
        let Ok(mut current) = self.current.lock() else {
            return false;
        };
        if *current == Surface::Login {
            return false;
        }
        *current = Surface::Login;
        self.forced_redirects.fetch_add(1, Ordering::SeqCst);
        true
    }

    pub fn forced_redirects(&self) -> usize {
        self.forced_redirects.load(Ordering::SeqCst)
    }
}
