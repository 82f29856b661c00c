//! Purpose: Hold top-level CLI command dispatch for `luadex`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Command behavior, output envelopes, and exit code semantics stay unchanged.

use super::*;

use clap::CommandFactory;
use luadex::api::{Catalog, ErrorKind as Kind, encode_entry_inline};

pub(super) fn dispatch_command(
    command: Command,
    store: FileStore,
    decode: DecodeOptions,
) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "luadex", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Serve(args) => {
            let config = serve_config_from_args(args, &store, decode)?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| {
                    Error::new(Kind::Internal)
                        .with_message("failed to start runtime")
                        .with_source(err)
                })?;
            runtime.block_on(serve::serve(config))?;
            Ok(RunOutcome::ok())
        }
        Command::Get { name, format } => {
            let entry = Catalog::new(store).require(&name)?;
            match format {
                OutputFormat::Json => emit_json(json!(entry)),
                OutputFormat::Lua => println!("return {}", encode_entry_inline(&entry)),
            }
            Ok(RunOutcome::ok())
        }
        Command::Put { name, data } => {
            let data = parse_data_json(&data)?;
            let outcome = Catalog::new(store).upsert_json(&name, &data)?;
            emit_json(json!({ "name": name, "status": outcome.as_str() }));
            Ok(RunOutcome::ok())
        }
        Command::Check { json } => {
            let path = store.path().to_path_buf();
            let report = Catalog::new(store).check()?;
            if json {
                emit_json(check_report_json(&path, &report));
            } else {
                emit_check_human(&path, &report);
            }
            let exit_code = if report.is_clean() {
                0
            } else {
                to_exit_code(Kind::Parse)
            };
            Ok(RunOutcome::with_code(exit_code))
        }
        Command::Init { global, force } => {
            store.create(&global, force)?;
            emit_json(json!({
                "path": store.path().display().to_string(),
                "global": global,
            }));
            Ok(RunOutcome::ok())
        }
    }
}
