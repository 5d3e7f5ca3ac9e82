//! Purpose: `bookledger` CLI entry point: parse args, run commands, emit JSON or tables.
//! Role: Binary crate root; the library does the ledger work, this file owns presentation.
//! Invariants: Machine output goes to stdout; diagnostics and logs go to stderr.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::io::{self, IsTerminal};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::{
    Args, CommandFactory, Parser, Subcommand, ValueEnum, ValueHint,
    error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;

mod command_dispatch;
mod page;
mod serve;

use bookledger::api::{
    Address, Book, CatalogSettings, DEFAULT_LEDGER_ADDRESS, DEFAULT_RPC_URL, Error, ErrorKind,
    Ledger, LedgerAbi, LedgerConfig, Partition, RefreshMode, Session, TxHash, connect, parse_uid,
    reconcile, to_exit_code,
};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse_from(std::env::args_os()) {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                let message = clap_error_summary(&err);
                let hint = clap_error_hint(&err);
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(message)
                        .with_hint(hint),
                    ColorMode::Auto,
                ));
            }
        },
    };

    let color_mode = cli.color;
    command_dispatch::dispatch_command(cli.command, cli.ledger, color_mode)
        .map_err(add_transport_hint)
        .map_err(add_internal_hint)
        .map_err(|err| (err, color_mode))
}

#[derive(Parser)]
#[command(
    name = "bookledger",
    version,
    about = "Library ledger client: add, borrow, and return books on a deployed contract",
    help_template = r#"{about-with-newline}
{before-help}USAGE
  {usage}

COMMANDS
{subcommands}

OPTIONS
{options}

{after-help}
"#,
    long_about = None,
    before_help = r#"Books live on the ledger contract; this tool only reads and requests changes.

Mental model:
  - `list` reads every book and splits available from borrowed
  - `add`, `borrow`, `return` submit a transaction and print its hash
  - `serve` runs the local web form
"#,
    after_help = r#"EXAMPLES
  $ bookledger list
  $ bookledger add 5 "New Book" --wait
  $ bookledger borrow 5
  $ bookledger return 5
  $ bookledger serve --in-memory       # try the form without a node

LEARN MORE
  $ bookledger <command> --help"#,
    arg_required_else_help = true,
    disable_help_subcommand = false
)]
struct Cli {
    #[command(flatten)]
    ledger: LedgerArgs,
    #[arg(
        long,
        global = true,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Clone, Debug)]
struct LedgerArgs {
    #[arg(
        long,
        global = true,
        default_value = DEFAULT_RPC_URL,
        help = "JSON-RPC endpoint of the provider bridge",
        value_hint = ValueHint::Url
    )]
    rpc_url: String,
    #[arg(
        long,
        global = true,
        default_value = DEFAULT_LEDGER_ADDRESS,
        help = "Address of the deployed ledger contract"
    )]
    ledger: String,
    #[arg(
        long,
        global = true,
        help = "Acting account (default: the provider's first account)"
    )]
    from: Option<String>,
    #[arg(
        long,
        global = true,
        help = "JSON ABI document for the ledger (array or artifact with an `abi` key)",
        value_hint = ValueHint::FilePath
    )]
    abi: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        default_value_t = 30_000,
        help = "Per-request timeout for provider calls, in milliseconds"
    )]
    timeout_ms: u64,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum RefreshModeCli {
    Delay,
    Events,
}

impl From<RefreshModeCli> for RefreshMode {
    fn from(value: RefreshModeCli) -> Self {
        match value {
            RefreshModeCli::Delay => RefreshMode::Delay,
            RefreshModeCli::Events => RefreshMode::Events,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "List available and borrowed books",
        after_help = r#"EXAMPLES
  $ bookledger list
  $ bookledger list --json

NOTES
  - Slots with an empty title or a zero/missing uid are skipped (logged at warn)"#
    )]
    List {
        #[arg(long, help = "Emit JSON instead of tables")]
        json: bool,
    },
    #[command(
        about = "Add a book to the ledger",
        after_help = r#"EXAMPLES
  $ bookledger add 5 "New Book"
  $ bookledger add 5 "New Book" --wait

NOTES
  - UID is read as a leading integer: "12abc" submits 12
  - The ledger enforces uniqueness and non-empty titles"#
    )]
    Add {
        #[arg(help = "Book uid")]
        uid: String,
        #[arg(help = "Book title")]
        title: String,
        #[command(flatten)]
        wait: WaitArgs,
    },
    #[command(
        about = "Borrow a book as the acting account",
        after_help = r#"EXAMPLES
  $ bookledger borrow 5
  $ bookledger --from 0x00000000000000000000000000000000000000aa borrow 5 --wait"#
    )]
    Borrow {
        #[arg(help = "Book uid")]
        uid: String,
        #[command(flatten)]
        wait: WaitArgs,
    },
    #[command(
        about = "Return a borrowed book",
        after_help = r#"EXAMPLES
  $ bookledger return 5"#
    )]
    Return {
        #[arg(help = "Book uid")]
        uid: String,
        #[command(flatten)]
        wait: WaitArgs,
    },
    #[command(about = "Show the provider's chain and accounts")]
    Accounts {
        #[arg(long, help = "Emit JSON instead of text")]
        json: bool,
    },
    #[command(
        about = "Serve the catalog web form",
        long_about = r#"Serve the single-page catalog form.

The page shows an Add Book form plus Borrowed and Available tables. After a
write the catalog is re-read once the settle delay elapses (or, with
`--refresh events`, when the ledger reports a borrow/return)."#,
        after_help = r#"EXAMPLES
  $ bookledger serve
  $ bookledger serve --bind 127.0.0.1:8080 --refresh events
  $ bookledger serve --in-memory

NOTES
  - Loopback only unless --allow-non-loopback is given"#
    )]
    Serve(ServeArgs),
    #[command(about = "Generate shell completions")]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
    #[command(about = "Print version info")]
    Version,
}

#[derive(Args, Clone, Copy, Debug)]
struct WaitArgs {
    #[arg(long, help = "Sleep the settle delay, then print the catalog")]
    wait: bool,
    #[arg(
        long,
        default_value_t = 1000,
        help = "Settle delay before re-reading, in milliseconds"
    )]
    settle_ms: u64,
}

#[derive(Args, Clone, Debug)]
struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1:3000", help = "Bind address")]
    bind: String,
    #[arg(
        long,
        default_value_t = 1000,
        help = "Delay before re-reading after a write, in milliseconds"
    )]
    settle_ms: u64,
    #[arg(long, value_enum, default_value = "delay", help = "How to learn that a write landed")]
    refresh: RefreshModeCli,
    #[arg(
        long,
        default_value_t = 2000,
        help = "Notification poll interval for --refresh events, in milliseconds"
    )]
    poll_ms: u64,
    #[arg(long, help = "Allow binding to a non-loopback address")]
    allow_non_loopback: bool,
    #[arg(long, help = "Use an in-process ledger instead of the provider bridge")]
    in_memory: bool,
}

fn ledger_config(args: &LedgerArgs) -> Result<LedgerConfig, Error> {
    let address = parse_address(&args.ledger, "--ledger")?;
    let from = args
        .from
        .as_deref()
        .map(|value| parse_address(value, "--from"))
        .transpose()?;
    if args.timeout_ms == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--timeout-ms must be greater than zero")
            .with_hint("Use a positive value like 30000."));
    }
    let abi = match &args.abi {
        Some(path) => LedgerAbi::from_path(path)?,
        None => LedgerAbi::default(),
    };
    Ok(LedgerConfig::new(args.rpc_url.clone(), address)
        .with_abi(abi)
        .with_from(from)
        .with_timeout(Duration::from_millis(args.timeout_ms)))
}

fn parse_address(value: &str, flag: &str) -> Result<Address, Error> {
    value.parse::<Address>().map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("invalid {flag} address: {value}"))
            .with_hint("Use a 0x-prefixed 20-byte hex address.")
            .with_source(err)
    })
}

fn parse_uid_arg(value: &str) -> Result<u64, Error> {
    parse_uid(value).ok_or_else(|| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("uid `{value}` is not a number"))
            .with_hint("Pass the book uid as a non-negative integer.")
    })
}

fn serve_config_from_args(
    args: ServeArgs,
    ledger: &LedgerArgs,
) -> Result<serve::ServeConfig, Error> {
    let bind: SocketAddr = args.bind.parse().map_err(|_| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid bind address")
            .with_hint("Use a host:port value like 127.0.0.1:3000.")
    })?;
    let source = if args.in_memory {
        serve::LedgerSource::InMemory
    } else {
        serve::LedgerSource::Rpc(ledger_config(ledger)?)
    };
    Ok(serve::ServeConfig {
        bind,
        allow_non_loopback: args.allow_non_loopback,
        settings: CatalogSettings {
            settle_delay: Duration::from_millis(args.settle_ms),
            refresh: args.refresh.into(),
            poll_interval: Duration::from_millis(args.poll_ms),
        },
        source,
    })
}

fn submission_receipt(
    action: &str,
    uid: u64,
    session: &Session,
    from: Address,
    tx: &TxHash,
) -> Value {
    let mut receipt = Map::new();
    receipt.insert("action".to_string(), json!(action));
    receipt.insert("uid".to_string(), json!(uid));
    receipt.insert("from".to_string(), json!(from));
    receipt.insert("tx".to_string(), json!(tx));
    if let Some(chain_id) = session.chain_id() {
        receipt.insert("chain_id".to_string(), json!(chain_id));
    }
    if let Some(submitted_at) = time_now_rfc3339() {
        receipt.insert("submitted_at".to_string(), json!(submitted_at));
    }
    Value::Object(receipt)
}

fn catalog_json(account: Option<Address>, partition: &Partition) -> Value {
    json!({
        "account": account,
        "available": partition.available,
        "borrowed": partition.borrowed,
    })
}

fn emit_catalog_tables(partition: &Partition) {
    println!("Borrowed Books");
    emit_table(&["TITLE", "UID", "BORROWER"], &book_rows(&partition.borrowed, true));
    println!();
    println!("Books Available for Borrowing");
    emit_table(&["TITLE", "UID"], &book_rows(&partition.available, false));
}

fn book_rows(books: &[Book], with_borrower: bool) -> Vec<Vec<String>> {
    books
        .iter()
        .map(|book| {
            let mut row = vec![book.title.clone(), book.uid.to_string()];
            if with_borrower {
                row.push(book.borrower.to_string());
            }
            row
        })
        .collect()
}

fn emit_accounts_human(session: &Session, config: &LedgerConfig, accounts: &[Address]) {
    let acting = session
        .account()
        .map(|account| account.to_string())
        .unwrap_or_else(|| "-".to_string());
    let chain = session
        .chain_id()
        .map(|chain_id| chain_id.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!("rpc:      {}", config.rpc_url);
    println!("ledger:   {}", config.address);
    println!("chain id: {chain}");
    println!("acting:   {acting}");
    if accounts.is_empty() {
        println!("accounts: (none)");
    } else {
        println!("accounts:");
        for account in accounts {
            println!("  {account}");
        }
    }
}

fn open_session(config: &LedgerConfig) -> Result<Session, Error> {
    connect(config)
}

fn read_catalog(session: &Session) -> Result<Partition, Error> {
    reconcile(session.ledger().as_ref())
}

fn time_now_rfc3339() -> Option<String> {
    use time::format_description::well_known::Rfc3339;
    let duration = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
    let ts = time::OffsetDateTime::from_unix_timestamp_nanos(duration.as_nanos() as i128).ok()?;
    ts.format(&Rfc3339).ok()
}

fn add_transport_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::Io => {
            err.with_hint("Check that the provider at --rpc-url is running and reachable.")
        }
        ErrorKind::Rejected => {
            err.with_hint("The ledger refused the call; check the uid and the book's state.")
        }
        ErrorKind::Decode => {
            err.with_hint("Check that --ledger and --abi match the deployed contract.")
        }
        _ => err,
    }
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() == ErrorKind::Internal && err.hint().is_none() {
        return err.with_hint("Re-run with RUST_LOG=debug for more detail.");
    }
    err
}

fn emit_version_output() {
    if io::stdout().is_terminal() {
        println!("bookledger {}", env!("CARGO_PKG_VERSION"));
    } else {
        emit_json(json!({
            "name": "bookledger",
            "version": env!("CARGO_PKG_VERSION"),
        }));
    }
}

fn emit_table(headers: &[&str], rows: &[Vec<String>]) {
    println!("{}", render_table(headers, rows));
}

fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    if headers.is_empty() {
        return String::new();
    }
    let mut widths = headers
        .iter()
        .map(|header| header.chars().count())
        .collect::<Vec<_>>();
    let cleaned_rows = rows
        .iter()
        .map(|row| {
            widths
                .iter_mut()
                .enumerate()
                .map(|(idx, width)| {
                    let cell = sanitize_table_cell(row.get(idx).map(String::as_str).unwrap_or(""));
                    *width = (*width).max(cell.chars().count());
                    cell
                })
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    let header_cells = headers
        .iter()
        .map(|header| header.to_string())
        .collect::<Vec<_>>();
    std::iter::once(format_table_line(&header_cells, &widths))
        .chain(cleaned_rows.iter().map(|row| format_table_line(row, &widths)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn sanitize_table_cell(value: &str) -> String {
    value.replace('\n', "\\n").replace('\r', "\\r")
}

fn format_table_line(cells: &[String], widths: &[usize]) -> String {
    let mut line = String::new();
    for (idx, width) in widths.iter().enumerate() {
        if idx > 0 {
            line.push_str("  ");
        }
        let cell = cells.get(idx).map(String::as_str).unwrap_or("");
        line.push_str(cell);
        let cell_len = cell.chars().count();
        if idx + 1 < widths.len() && *width > cell_len {
            line.push_str(&" ".repeat(*width - cell_len));
        }
    }
    line
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::Unavailable => "provider bridge unavailable".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
        ErrorKind::Rejected => "rejected by the ledger".to_string(),
        ErrorKind::Decode => "malformed response".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(method) = err.method() {
        inner.insert("method".to_string(), json!(method));
    }
    if let Some(code) = err.rpc_code() {
        inner.insert("code".to_string(), json!(code));
    }
    if let Some(index) = err.index() {
        inner.insert("index".to_string(), json!(index));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    ));

    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(method) = err.method() {
        lines.push(format!(
            "{} {method}",
            colorize_label("method:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(index) = err.index() {
        lines.push(format!(
            "{} {index}",
            colorize_label("index:", use_color, AnsiColor::Yellow)
        ));
    }

    let causes = error_causes(err);
    if let Some(cause) = causes.first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }

    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let usage = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .map(str::trim);
    let Some(usage) = usage else {
        return "Try `bookledger --help`.".to_string();
    };

    let tokens: Vec<&str> = usage.split_whitespace().collect();
    let Some(pos) = tokens.iter().position(|t| *t == "bookledger") else {
        return "Try `bookledger --help`.".to_string();
    };
    let command = tokens
        .iter()
        .skip(pos + 1)
        .find(|token| !token.starts_with('-') && !token.starts_with('<') && !token.starts_with('['));
    match command {
        Some(command) => format!("Try `bookledger {command} --help`."),
        None => "Try `bookledger --help`.".to_string(),
    }
}
