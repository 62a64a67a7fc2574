use crate::{
    activity::ActivityLog,
    api::{ApiClient, Transport},
    auth::Authenticator,
    config::Config,
    export::{self, ExportError, ExportKind},
    ledger::{self, LedgerRow, LedgerView, SortKey},
    models::Account,
    navigator::{Navigator, Surface},
    session::SessionStore,
    sync::{DataSync, LedgerStore, PollerHandle},
    transfer::{TransferController, TransferForm},
    Args,
};
use anyhow::Result;
use chrono::Utc;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::cell::RefCell;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

pub struct Context {
    pub args: Args,
    pub config: Config,
    pub run_id: String,
    pub session: Arc<SessionStore>,
    pub navigator: Arc<Navigator>,
    pub store: Arc<LedgerStore>,
    pub activity: Arc<ActivityLog>,
    pub auth: Authenticator,
    pub sync: DataSync,
    pub transfers: TransferController,
    pub ledger: RefCell<LedgerView>,
    pub form: RefCell<TransferForm>,
    pub poller: RefCell<Option<PollerHandle>>,
}

impl Context {
    pub fn new(
        args: Args,
        config: Config,
        run_id: String,
        transport: Box<dyn Transport>,
        session: Arc<SessionStore>,
        navigator: Arc<Navigator>,
        activity: Arc<ActivityLog>,
    ) -> Self {
        let store = Arc::new(LedgerStore::new());
        let api = Arc::new(ApiClient::new(
            transport,
            session.clone(),
            navigator.clone(),
            activity.clone(),
        ));
        let auth = Authenticator::new(
            api.clone(),
            session.clone(),
            navigator.clone(),
            activity.clone(),
        );
        let sync = DataSync::new(
            api.clone(),
            store.clone(),
            session.clone(),
            navigator.clone(),
            activity.clone(),
            config.sync_interval(),
        );
        let transfers = TransferController::new(
            api,
            store.clone(),
            session.clone(),
            navigator.clone(),
            activity.clone(),
        );

        Self {
            args,
            config,
            run_id,
            session,
            navigator,
            store,
            activity,
            auth,
            sync,
            transfers,
            ledger: RefCell::new(LedgerView::new()),
            form: RefCell::new(TransferForm::default()),
            poller: RefCell::new(None),
        }
    }

    fn verbose(&self, msg: &str) {
        if self.args.verbose || self.args.debug {
            eprintln!("[VERBOSE] {}", msg);
        }
    }

    /// Start or stop background sync to match the current surface.
    pub fn sync_surface(&self) {
        let on_account = self.navigator.current().is_protected();
        let running = self.poller.borrow().is_some();

        if on_account && !running {
            match self.sync.start() {
                Some(handle) => {
                    self.verbose(&format!(
                        "sync started (every {}s)",
                        self.config.sync_interval().as_secs()
                    ));
                    *self.poller.borrow_mut() = Some(handle);
                }
                None => self.verbose("sync not started: no valid session"),
            }
        } else if !on_account && running {
            self.stop_sync();
        }
    }

    /// Stop polling and forget everything fetched for the old session.
    pub fn stop_sync(&self) {
        if let Some(handle) = self.poller.borrow_mut().take() {
            handle.stop();
            self.verbose("sync stopped");
        }
        self.store.reset();
    }

    fn prompt(&self) -> &'static str {
        match self.navigator.current() {
            Surface::Account => "p2p> ",
            Surface::Register => "register> ",
            Surface::Login | Surface::Loading => "login> ",
        }
    }
}

/// Follow-up input for a command. None means EOF or cancel.
pub trait Prompter {
    fn line(&mut self, prompt: &str) -> Option<String>;
    /// Read without echo
    fn secret(&mut self, prompt: &str) -> Option<String>;
}

fn read_secret(prompt: &str) -> Option<String> {
    dialoguer::Password::new()
        .with_prompt(prompt)
        .allow_empty_password(true)
        .interact()
        .ok()
}

struct EditorPrompt<'a>(&'a mut DefaultEditor);

impl Prompter for EditorPrompt<'_> {
    fn line(&mut self, prompt: &str) -> Option<String> {
        self.0.readline(&format!("{}: ", prompt)).ok()
    }

    fn secret(&mut self, prompt: &str) -> Option<String> {
        read_secret(prompt)
    }
}

struct StdinPrompt;

impl Prompter for StdinPrompt {
    fn line(&mut self, prompt: &str) -> Option<String> {
        print!("{}: ", prompt);
        std::io::stdout().flush().ok()?;
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }

    fn secret(&mut self, prompt: &str) -> Option<String> {
        read_secret(prompt)
    }
}

/// What a command line is remembered as: credentials commands keep only
/// the command and the email.
pub fn history_entry(line: &str) -> String {
    let is_credentials = |name: &str| matches!(name, "/login" | "/register" | "/signup");
    match shell_words::split(line) {
        Ok(words) if words.first().is_some_and(|w| is_credentials(w)) => {
            shell_words::join(words.iter().take(2))
        }
        Ok(_) => line.to_string(),
        Err(_) => {
            let name = line.split_whitespace().next().unwrap_or_default();
            if is_credentials(name) {
                name.to_string()
            } else {
                line.to_string()
            }
        }
    }
}

pub fn run_once(ctx: &Context, line: &str) -> Result<()> {
    ctx.sync_surface();
    let line = line.trim();
    let line = if line.starts_with('/') {
        line.to_string()
    } else {
        format!("/{}", line)
    };
    handle_command(ctx, &line, &mut StdinPrompt);
    ctx.stop_sync();
    Ok(())
}

pub fn run_repl(ctx: Context) -> Result<()> {
    let mut rl = DefaultEditor::new()?;

    println!("p2p - type /help for commands, /exit to quit");
    ctx.sync_surface();

    loop {
        let prompt = ctx.prompt();
        match rl.readline(prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    ctx.sync_surface();
                    continue;
                }
                if !line.starts_with('/') {
                    println!("Commands start with '/'. Type /help for a list.");
                    continue;
                }
                rl.add_history_entry(history_entry(line))?;

                if handle_command(&ctx, line, &mut EditorPrompt(&mut rl)) {
                    break;
                }
                ctx.sync_surface();
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        }
    }

    ctx.stop_sync();
    Ok(())
}

pub fn handle_command(ctx: &Context, cmd: &str, prompter: &mut dyn Prompter) -> bool {
    let words = match shell_words::split(cmd) {
        Ok(words) => words,
        Err(e) => {
            println!("Could not parse command: {}", e);
            return false;
        }
    };
    let Some((name, rest)) = words.split_first() else {
        return false;
    };

    match name.as_str() {
        "/exit" | "/quit" => return true,
        "/help" => print_help(),
        "/status" => print_status(ctx),
        "/login" => handle_login(ctx, rest, prompter),
        "/register" | "/signup" => handle_register(ctx, rest, prompter),
        "/logout" => {
            if ctx.navigator.current().is_protected() {
                ctx.auth.logout();
                ctx.stop_sync();
                println!("Logged out");
            } else {
                println!("Not logged in");
            }
        }
        "/balance" => {
            if let Some(account) = require_account(ctx) {
                println!("{} (id {})", account.email, account.id);
                println!("Balance: {}", ledger::format_money(account.balance));
            }
        }
        "/history" => {
            if let Some(account) = require_account(ctx) {
                print_history(ctx, &account);
            }
        }
        "/sort" => handle_sort(ctx, rest),
        "/send" | "/transfer" => handle_send(ctx, rest),
        "/refresh" => {
            if !ctx.navigator.current().is_protected() {
                println!("Not logged in. Use /login");
            } else {
                match ctx.sync.refresh() {
                    Ok(true) => println!("Refreshed"),
                    Ok(false) => println!("Refresh discarded (session changed)"),
                    Err(e) => println!("Refresh failed: {}", e),
                }
            }
        }
        "/export" => handle_export(ctx, rest),
        other => println!("Unknown command: {}", other),
    }
    false
}

fn print_help() {
    println!("Commands:");
    println!("  /exit                      - quit");
    println!("  /help                      - show commands");
    println!("  /status                    - show session and sync state");
    println!("Account access:");
    println!("  /login [email] [password]  - log in (prompts for what is missing)");
    println!("  /register [email]          - create an account");
    println!("  /logout                    - end the session");
    println!("Account (requires login):");
    println!("  /balance                   - show balance");
    println!("  /history                   - show transactions");
    println!("  /sort date|amount          - sort history (repeat to flip direction)");
    println!("  /send <receiver> <amount>  - send money to an id or email");
    println!("  /send                      - retry the last failed transfer");
    println!("  /refresh                   - fetch balance and history now");
    println!("  /export csv|report [path]  - write transactions to a file");
}

fn print_status(ctx: &Context) {
    println!("Run: {}", ctx.run_id);
    println!("Server: {}", ctx.config.base_url());
    println!("Surface: {}", ctx.navigator.current().as_str());
    println!("Authenticated: {}", ctx.session.is_authenticated());
    if let Some(claims) = ctx.session.claims() {
        let expires = chrono::DateTime::from_timestamp(claims.exp, 0)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| claims.exp.to_string());
        println!(
            "Subject: {}  expires {}",
            claims.subject().as_deref().unwrap_or("-"),
            expires
        );
    }
    let snapshot = ctx.store.snapshot();
    println!(
        "Sync: {} (updates: {}, records: {})",
        if ctx.poller.borrow().is_some() {
            "running"
        } else {
            "stopped"
        },
        snapshot.version,
        snapshot.records.len()
    );
    if let Some(path) = &ctx.activity.path {
        println!("Activity log: {}", path.display());
    }
}

fn handle_login(ctx: &Context, args: &[String], prompter: &mut dyn Prompter) {
    if ctx.navigator.open_public(Surface::Login, &ctx.session) == Surface::Account {
        println!("Already logged in");
        return;
    }
    let email = match args.first() {
        Some(email) => Some(email.clone()),
        None => prompter.line("Email"),
    };
    let Some(email) = email else {
        return;
    };
    // Inline passwords are kept out of history by history_entry
    let password = match args.get(1) {
        Some(password) => Some(password.clone()),
        None => prompter.secret("Password"),
    };
    let Some(password) = password else {
        return;
    };
    match ctx.auth.login(&email, &password) {
        Ok(_) => println!("Logged in as {}", email.trim()),
        Err(e) => println!("{}", e),
    }
}

fn handle_register(ctx: &Context, args: &[String], prompter: &mut dyn Prompter) {
    if ctx.navigator.open_public(Surface::Register, &ctx.session) == Surface::Account {
        println!("Already logged in");
        return;
    }
    let result = (|| {
        let email = match args.first() {
            Some(email) => email.clone(),
            None => prompter.line("Email")?,
        };
        let password = prompter.secret("Password")?;
        let confirm = prompter.secret("Confirm password")?;
        Some(ctx.auth.register(&email, &password, &confirm).map(|_| email))
    })();
    match result {
        Some(Ok(email)) => println!("Account created for {}", email.trim()),
        Some(Err(e)) => println!("{}", e),
        None => {}
    }
    if ctx.navigator.current() == Surface::Register {
        ctx.navigator.navigate(Surface::Login);
    }
}

fn require_account(ctx: &Context) -> Option<Account> {
    if !ctx.navigator.current().is_protected() {
        println!("Not logged in. Use /login");
        return None;
    }
    let account = ctx.store.account();
    if account.is_none() {
        println!("Account not loaded yet, try /refresh");
    }
    account
}

fn current_rows(ctx: &Context, account: &Account) -> Vec<LedgerRow> {
    let snapshot = ctx.store.snapshot();
    ctx.ledger.borrow().rows(&snapshot.records, account.id)
}

fn print_history(ctx: &Context, account: &Account) {
    let rows = current_rows(ctx, account);
    if rows.is_empty() {
        println!("No transactions yet");
        return;
    }
    let sort = ctx.ledger.borrow().sort_state();
    let marker = |key: SortKey| {
        if sort.key == key {
            sort.direction.arrow()
        } else {
            ""
        }
    };
    println!(
        "{:>6}  {:<34} {:<14} {:<10} {:>12}",
        "ID",
        "Counterparty",
        format!("Date{}", marker(SortKey::Timestamp)),
        "Status",
        format!("Amount{}", marker(SortKey::Amount)),
    );
    for row in rows {
        println!(
            "{:>6}  [{}] {:<30} {:<14} {:<10} {:>12}",
            row.id,
            ledger::initial(&row.counterparty),
            row.counterparty,
            row.date,
            row.status,
            row.amount,
        );
    }
}

fn handle_sort(ctx: &Context, args: &[String]) {
    let Some(key) = args.first().and_then(|k| SortKey::parse(k)) else {
        println!("Usage: /sort date|amount");
        return;
    };
    let state = ctx.ledger.borrow_mut().sort_by(key);
    println!("Sorted by {} {}", state.key.as_str(), state.direction.arrow());
    if let Some(account) = require_account(ctx) {
        print_history(ctx, &account);
    }
}

fn handle_send(ctx: &Context, args: &[String]) {
    if !ctx.navigator.current().is_protected() {
        println!("Not logged in. Use /login");
        return;
    }
    match args {
        [] => {}
        [receiver, amount] => *ctx.form.borrow_mut() = TransferForm::new(receiver, amount),
        _ => {
            println!("Usage: /send <receiver id or email> <amount>");
            return;
        }
    }

    let mut form = ctx.form.borrow().clone();
    let result = ctx.transfers.submit(&mut form);
    *ctx.form.borrow_mut() = form;
    match result {
        Ok(receipt) => {
            println!(
                "{} Sent {} to {}",
                receipt.message,
                ledger::format_money(receipt.amount),
                receipt.receiver
            );
            if let Some(balance) = receipt.balance {
                println!("Balance: {}", ledger::format_money(balance));
            }
            if !receipt.history_refreshed {
                println!("History will update on the next sync");
            }
        }
        Err(e) => println!("{}", e),
    }
}

fn handle_export(ctx: &Context, args: &[String]) {
    let Some(kind) = args.first().and_then(|k| ExportKind::parse(k)) else {
        println!("Usage: /export csv|report [path]");
        return;
    };
    let Some(account) = require_account(ctx) else {
        return;
    };
    let rows = current_rows(ctx, &account);
    let document = match kind {
        ExportKind::Delimited => export::to_delimited_text(&rows, ctx.config.delimiter()),
        ExportKind::Report => export::to_printable_report(
            &rows,
            &account.email,
            Utc::now(),
            ctx.config.page_lines(),
        ),
    };
    let document = match document {
        Ok(document) => document,
        Err(ExportError::Empty) => {
            println!("{}", ExportError::Empty);
            return;
        }
    };

    let path = args
        .get(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(kind.default_file()));
    match export::write_document(&path, &document) {
        Ok(()) => {
            let _ = ctx.activity.export(kind.as_str(), rows.len(), &path);
            println!("Exported {} transactions to {}", rows.len(), path.display());
        }
        Err(e) => println!("Export failed: {:#}", e),
    }
}
