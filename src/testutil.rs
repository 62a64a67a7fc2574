//! Shared fakes for unit tests.

use crate::activity::ActivityLog;
use crate::api::{ApiClient, ApiError, HttpRequest, HttpResponse, Transport};
use crate::navigator::Navigator;
use crate::session::{MemoryTokenStore, SessionStore};
use crate::sync::LedgerStore;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn token_from_payload(payload: Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{}.{}.signature", header, payload)
}

pub fn make_token(sub: &str, exp: i64) -> String {
    token_from_payload(json!({ "sub": sub, "exp": exp }))
}

/// Token valid for the next hour
pub fn live_token(sub: &str) -> String {
    make_token(sub, chrono::Utc::now().timestamp() + 3600)
}

pub fn account_json(id: i64, email: &str, balance: f64) -> Value {
    json!({ "id": id, "email": email, "balance": balance, "uuid": null })
}

pub fn record_json(id: i64, sender: i64, receiver: i64, amount: f64, ts: &str) -> Value {
    json!({
        "id": id,
        "sender_id": sender,
        "receiver_id": receiver,
        "amount": amount,
        "timestamp": ts,
        "status": "SUCCESS",
        "previous_hash": null,
        "entry_hash": format!("hash-{}", id),
    })
}

#[derive(Default)]
struct FakeState {
    responses: HashMap<String, VecDeque<Result<HttpResponse, ApiError>>>,
    delays: HashMap<String, Duration>,
    calls: Vec<HttpRequest>,
}

/// Scripted transport. Each path replays its queued responses in order and
/// keeps repeating the last one.
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, path: &str, status: u16, body: Value) {
        self.push(
            path,
            Ok(HttpResponse {
                status,
                body: body.to_string(),
            }),
        );
    }

    pub fn fail(&self, path: &str, message: &str) {
        self.push(path, Err(ApiError::Transport(message.to_string())));
    }

    /// Replace everything queued for a path
    pub fn reset(&self, path: &str) {
        self.state.lock().unwrap().responses.remove(path);
    }

    pub fn delay(&self, path: &str, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .delays
            .insert(path.to_string(), delay);
    }

    pub fn calls(&self) -> Vec<HttpRequest> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls().iter().filter(|c| c.path == path).count()
    }

    fn push(&self, path: &str, response: Result<HttpResponse, ApiError>) {
        self.state
            .lock()
            .unwrap()
            .responses
            .entry(path.to_string())
            .or_default()
            .push_back(response);
    }
}

impl Transport for FakeTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError> {
        let (response, delay) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(request.clone());
            let delay = state.delays.get(&request.path).copied();
            let queue = state.responses.entry(request.path.clone()).or_default();
            let response = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };
            (response, delay)
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        response.unwrap_or_else(|| {
            Ok(HttpResponse {
                status: 404,
                body: json!({ "detail": "Not Found" }).to_string(),
            })
        })
    }
}

/// Fully wired client over a fake transport
pub struct Harness {
    pub transport: FakeTransport,
    pub session: Arc<SessionStore>,
    pub navigator: Arc<Navigator>,
    pub activity: Arc<ActivityLog>,
    pub api: Arc<ApiClient>,
    pub store: Arc<LedgerStore>,
}

impl Harness {
    fn build(slot: MemoryTokenStore) -> Self {
        let transport = FakeTransport::new();
        let session = Arc::new(SessionStore::new(Box::new(slot)));
        session.restore();
        let navigator = Arc::new(Navigator::new());
        navigator.settle(&session);
        let activity = Arc::new(ActivityLog::disabled());
        let api = Arc::new(ApiClient::new(
            Box::new(transport.clone()),
            session.clone(),
            navigator.clone(),
            activity.clone(),
        ));
        Self {
            transport,
            session,
            navigator,
            activity,
            api,
            store: Arc::new(LedgerStore::new()),
        }
    }

    /// Session restored from a live token for account 1
    pub fn logged_in() -> Self {
        Self::build(MemoryTokenStore::with_token(&live_token("1")))
    }

    pub fn logged_out() -> Self {
        Self::build(MemoryTokenStore::default())
    }
}
