//! Append-only JSONL activity log, one file per client run.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub struct ActivityLog {
    pub path: Option<PathBuf>,
    run_id: String,
    file: Option<Mutex<File>>,
}

#[derive(Serialize)]
struct Event<'a> {
    ts: DateTime<Utc>,
    run_id: &'a str,
    #[serde(rename = "type")]
    event_type: &'a str,
    #[serde(flatten)]
    data: serde_json::Value,
}

impl ActivityLog {
    pub fn new(path: &Path, run_id: &str) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: Some(path.to_path_buf()),
            run_id: run_id.to_string(),
            file: Some(Mutex::new(file)),
        })
    }

    /// A log that records nothing
    pub fn disabled() -> Self {
        Self {
            path: None,
            run_id: String::new(),
            file: None,
        }
    }

    pub fn log(&self, event_type: &str, data: serde_json::Value) -> Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let event = Event {
            ts: Utc::now(),
            run_id: &self.run_id,
            event_type,
            data,
        };
        let line = serde_json::to_string(&event)?;
        let mut file = file
            .lock()
            .map_err(|_| anyhow::anyhow!("activity log lock poisoned"))?;
        writeln!(file, "{}", line)?;
        file.flush()?;
        Ok(())
    }

    pub fn session_restore(&self, outcome: &str) -> Result<()> {
        self.log("session_restore", serde_json::json!({ "outcome": outcome }))
    }

    pub fn login(&self, email: &str, ok: bool, detail: Option<&str>) -> Result<()> {
        self.log(
            "login",
            serde_json::json!({ "email": email, "ok": ok, "detail": detail }),
        )
    }

    pub fn register(&self, email: &str, ok: bool, detail: Option<&str>) -> Result<()> {
        self.log(
            "register",
            serde_json::json!({ "email": email, "ok": ok, "detail": detail }),
        )
    }

    pub fn logout(&self, reason: &str) -> Result<()> {
        self.log("logout", serde_json::json!({ "reason": reason }))
    }

    /// Server answered 401; the session was dropped
    pub fn unauthorized(&self, path: &str, redirected: bool) -> Result<()> {
        self.log(
            "unauthorized",
            serde_json::json!({ "path": path, "redirected": redirected }),
        )
    }

    pub fn sync_cycle(
        &self,
        ok: bool,
        records: usize,
        duration_ms: u64,
        error: Option<&str>,
    ) -> Result<()> {
        self.log(
            "sync_cycle",
            serde_json::json!({
                "ok": ok,
                "records": records,
                "duration_ms": duration_ms,
                "error": error,
            }),
        )
    }

    pub fn transfer(
        &self,
        receiver: &str,
        amount: &str,
        ok: bool,
        detail: Option<&str>,
    ) -> Result<()> {
        self.log(
            "transfer",
            serde_json::json!({
                "receiver": receiver,
                "amount": amount,
                "ok": ok,
                "detail": detail,
            }),
        )
    }

    pub fn export(&self, kind: &str, rows: usize, path: &Path) -> Result<()> {
        self.log(
            "export",
            serde_json::json!({ "kind": kind, "rows": rows, "path": path }),
        )
    }
}
