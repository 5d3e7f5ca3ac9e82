//! Purpose: Hold top-level CLI command dispatch for `bookledger`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and presentation helpers.
//! Invariants: One-shot commands log at `warn` by default; `serve` logs at `info`.
//! Invariants: Writes print a receipt only after the provider accepted the transaction.

use super::*;

pub(super) fn dispatch_command(
    command: Command,
    ledger_args: LedgerArgs,
    color_mode: ColorMode,
) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "bookledger", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Version => {
            emit_version_output();
            Ok(RunOutcome::ok())
        }
        Command::Serve(args) => {
            serve::init_tracing("info");
            let config = serve_config_from_args(args, &ledger_args)?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to start runtime")
                        .with_source(err)
                })?;
            runtime.block_on(serve::serve(config))?;
            Ok(RunOutcome::ok())
        }
        Command::List { json } => {
            serve::init_tracing("warn");
            let config = ledger_config(&ledger_args)?;
            let session = open_session(&config)?;
            let partition = read_catalog(&session)?;
            if json {
                emit_json(catalog_json(session.account(), &partition));
            } else {
                emit_catalog_tables(&partition);
            }
            Ok(RunOutcome::ok())
        }
        Command::Accounts { json } => {
            serve::init_tracing("warn");
            let config = ledger_config(&ledger_args)?;
            let session = open_session(&config)?;
            let accounts = session.ledger().accounts()?;
            if json {
                emit_json(json!({
                    "rpc_url": config.rpc_url,
                    "ledger": config.address,
                    "chain_id": session.chain_id(),
                    "account": session.account(),
                    "accounts": accounts,
                }));
            } else {
                emit_accounts_human(&session, &config, &accounts);
            }
            Ok(RunOutcome::ok())
        }
        Command::Add { uid, title, wait } => {
            let uid = parse_uid_arg(&uid)?;
            submit(&ledger_args, "add", uid, wait, color_mode, |session, from| {
                session.ledger().add_book(from, uid, &title)
            })
        }
        Command::Borrow { uid, wait } => {
            let uid = parse_uid_arg(&uid)?;
            submit(&ledger_args, "borrow", uid, wait, color_mode, |session, from| {
                session.ledger().borrow_book(from, uid, from)
            })
        }
        Command::Return { uid, wait } => {
            let uid = parse_uid_arg(&uid)?;
            submit(&ledger_args, "return", uid, wait, color_mode, |session, from| {
                session.ledger().return_book(from, uid)
            })
        }
    }
}

fn submit<F>(
    ledger_args: &LedgerArgs,
    action: &str,
    uid: u64,
    wait: WaitArgs,
    color_mode: ColorMode,
    send: F,
) -> Result<RunOutcome, Error>
where
    F: FnOnce(&Session, Address) -> Result<TxHash, Error>,
{
    serve::init_tracing("warn");
    let config = ledger_config(ledger_args)?;
    let session = open_session(&config)?;
    let from = session.require_account()?;
    let tx = send(&session, from)?;
    tracing::info!(action, uid, %tx, "transaction submitted");

    let receipt = submission_receipt(action, uid, &session, from, &tx);
    if !wait.wait {
        emit_json(receipt);
        return Ok(RunOutcome::ok());
    }

    std::thread::sleep(Duration::from_millis(wait.settle_ms));
    match read_catalog(&session) {
        Ok(partition) => {
            emit_json(json!({
                "receipt": receipt,
                "catalog": catalog_json(session.account(), &partition),
            }));
        }
        Err(err) => {
            // The write went through; report the failed re-read without failing the command.
            emit_json(json!({ "receipt": receipt }));
            emit_error(&add_transport_hint(err), color_mode);
        }
    }
    Ok(RunOutcome::ok())
}
