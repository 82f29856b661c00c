//! Purpose: `luadex` CLI entry point.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Commands emit stable stdout formats (JSON, or table text for `--format lua`).
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: All file mutations go through `api::TableStore` (locks + whole-file rewrite).
#![allow(clippy::result_large_err)]
use std::io::{self, IsTerminal};
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;

mod command_dispatch;
mod serve;

use luadex::api::{
    ArrayPolicy, CheckReport, DEFAULT_GLOBAL, DecodeOptions, Error, ErrorKind, FileStore,
    WriteMode, to_exit_code,
};

const DEFAULT_TABLE_FILE: &str = "./Pokemon.lua";
const DEFAULT_BIND: &str = "127.0.0.1:3000";
const DEFAULT_MAX_BODY_BYTES: u64 = 1024 * 1024;

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
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to write help")
                        .with_source(io_err)
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
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Try `luadex --help`."));
            }
        },
    };

    let decode = DecodeOptions {
        arrays: cli.arrays.into(),
        zero_as_sentinel: cli.zero_as_sentinel,
    };
    let store = FileStore::new(&cli.file).with_decode_options(decode);

    command_dispatch::dispatch_command(cli.command, store, decode).map_err(add_read_hint)
}

#[derive(Parser)]
#[command(
    name = "luadex",
    version,
    about = "Serve and edit a Lua-table record file over HTTP",
    long_about = None,
    after_help = r#"EXAMPLES
  $ luadex init
  $ luadex put Pikachu '{"hp": 35, "type": "Electric"}'
  $ luadex get Pikachu
  $ luadex serve --bind 127.0.0.1:3000
  $ curl localhost:3000/pokemon/Pikachu"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        default_value = DEFAULT_TABLE_FILE,
        help = "Table file to read and write",
        value_hint = ValueHint::FilePath
    )]
    file: PathBuf,
    #[arg(
        long,
        global = true,
        value_enum,
        default_value = "sequence",
        help = "How unkeyed table items decode: sequence|indexed"
    )]
    arrays: ArrayPolicyCli,
    #[arg(
        long,
        global = true,
        help = "Decode the numeric literal 0 as the N/A sentinel"
    )]
    zero_as_sentinel: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Serve the table file over HTTP",
        long_about = r#"Serve the table file over HTTP.

Routes:
  GET  /                  liveness text
  GET  /pokemon/:name     one entry as JSON (?format=lua for table text)
  POST /pokemon           {"name": ..., "data": {...}} inserts or replaces an entry"#,
        after_help = r#"EXAMPLES
  $ luadex serve
  $ luadex --file ./data/Pokemon.lua serve --bind 127.0.0.1:8080
  $ luadex serve --bind 0.0.0.0:3000 --allow-non-loopback
  $ RUST_LOG=debug luadex serve"#
    )]
    Serve(ServeArgs),
    #[command(
        arg_required_else_help = true,
        about = "Print one entry",
        after_help = r#"EXAMPLES
  $ luadex get Pikachu
  $ luadex get "Mr. Mime" --format lua"#
    )]
    Get {
        #[arg(help = "Entry name (exact match)")]
        name: String,
        #[arg(long, value_enum, default_value = "json", help = "Output format")]
        format: OutputFormat,
    },
    #[command(
        arg_required_else_help = true,
        about = "Insert or replace one entry",
        long_about = r#"Insert or replace one entry.

Numbers in DATA are stored as numbers; every other value is stored as a string.
An existing entry is replaced as a whole, not merged."#,
        after_help = r#"EXAMPLES
  $ luadex put Pikachu '{"hp": 35, "type": "Electric"}'"#
    )]
    Put {
        #[arg(help = "Entry name")]
        name: String,
        #[arg(help = "JSON object of field values")]
        data: String,
    },
    #[command(about = "Decode the table file and report degraded fields")]
    Check {
        #[arg(long, help = "Emit the report as JSON")]
        json: bool,
    },
    #[command(about = "Write an empty table file")]
    Init {
        #[arg(long, default_value = DEFAULT_GLOBAL, help = "Variable the table is assigned to")]
        global: String,
        #[arg(long, help = "Overwrite an existing file")]
        force: bool,
    },
    #[command(about = "Generate shell completions")]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(clap::Args)]
struct ServeArgs {
    #[arg(long, default_value = DEFAULT_BIND, help = "Bind address")]
    bind: String,
    #[arg(long, help = "Allow non-loopback binds")]
    allow_non_loopback: bool,
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_BODY_BYTES,
        help = "Max request body size in bytes"
    )]
    max_body_bytes: u64,
    #[arg(
        long,
        value_enum,
        default_value = "serialized",
        help = "Write discipline: serialized|unsynchronized"
    )]
    write_mode: WriteModeCli,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ArrayPolicyCli {
    Sequence,
    Indexed,
}

impl From<ArrayPolicyCli> for ArrayPolicy {
    fn from(value: ArrayPolicyCli) -> Self {
        match value {
            ArrayPolicyCli::Sequence => ArrayPolicy::Sequence,
            ArrayPolicyCli::Indexed => ArrayPolicy::Indexed,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum WriteModeCli {
    Serialized,
    Unsynchronized,
}

impl From<WriteModeCli> for WriteMode {
    fn from(value: WriteModeCli) -> Self {
        match value {
            WriteModeCli::Serialized => WriteMode::Serialized,
            WriteModeCli::Unsynchronized => WriteMode::Unsynchronized,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Json,
    Lua,
}

fn serve_config_from_args(
    args: ServeArgs,
    store: &FileStore,
    decode: DecodeOptions,
) -> Result<serve::ServeConfig, Error> {
    let bind: SocketAddr = args.bind.parse().map_err(|_| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid bind address")
            .with_hint("Use a host:port value like 127.0.0.1:3000.")
    })?;
    Ok(serve::ServeConfig {
        bind,
        file: store.path().to_path_buf(),
        decode,
        write_mode: args.write_mode.into(),
        allow_non_loopback: args.allow_non_loopback,
        max_body_bytes: args.max_body_bytes,
    })
}

fn parse_data_json(data: &str) -> Result<Map<String, Value>, Error> {
    let value: Value = serde_json::from_str(data).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid json")
            .with_hint("Provide a JSON object (e.g. '{\"hp\":35}').")
            .with_source(err)
    })?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(Error::new(ErrorKind::Usage)
            .with_message("data must be a JSON object")
            .with_hint("Provide a JSON object (e.g. '{\"hp\":35}').")),
    }
}

fn check_report_json(path: &std::path::Path, report: &CheckReport) -> Value {
    let issues: Vec<Value> = report
        .issues
        .iter()
        .map(|issue| {
            json!({
                "code": issue.code.as_str(),
                "field": issue.path,
                "line": issue.line,
            })
        })
        .collect();
    json!({
        "path": path.display().to_string(),
        "global": report.global,
        "entries": report.entries,
        "status": if report.is_clean() { "ok" } else { "degraded" },
        "issues": issues,
    })
}

fn emit_check_human(path: &std::path::Path, report: &CheckReport) {
    println!(
        "{}: {} entries under {}",
        path.display(),
        report.entries,
        report.global
    );
    if report.is_clean() {
        println!("no issues");
        return;
    }
    for issue in &report.issues {
        println!("  line {}: {} ({})", issue.line, issue.path, issue.code.as_str());
    }
}

fn add_read_hint(err: Error) -> Error {
    if err.kind() == ErrorKind::Parse && err.hint().is_none() {
        return err.with_hint("Run `luadex check` to see where decoding stopped.");
    }
    err
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

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }

    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
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
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::AlreadyExists => "already exists".to_string(),
        ErrorKind::Busy => "resource is busy".to_string(),
        ErrorKind::Read => "read error".to_string(),
        ErrorKind::Parse => "parse error".to_string(),
        ErrorKind::Write => "write error".to_string(),
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
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(line) = err.line() {
        inner.insert("line".to_string(), json!(line));
    }
    if let Some(offset) = err.offset() {
        inner.insert("offset".to_string(), json!(offset));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some(path) = err.path() {
        match err.line() {
            Some(line) => lines.push(format!("at: {}:{line}", path.display())),
            None => lines.push(format!("path: {}", path.display())),
        }
    }
    if let Some(cause) = error_causes(err).first() {
        lines.push(format!("caused by: {cause}"));
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
