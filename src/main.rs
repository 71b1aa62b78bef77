//! Purpose: `rowstream` CLI entry point.
//! Role: Binary crate root; parses args, runs commands, emits JSON lines on stdout.
//! Invariants: Streaming commands print each row/batch/page as soon as it is fetched.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: A closed stdout stops the stream cleanly and still releases the connection.
use std::ffi::OsString;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod command_dispatch;
mod seed;

use rowstream::api::{
    Condition, Error, ErrorKind, FileStore, InsertOutcome, Query, Value, to_exit_code,
};
use rowstream::table_paths::default_table_dir;
use seed::{SeedFormat, SeedRows};

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
    init_tracing();
    let exit_code = match run(std::env::args_os()) {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn run<I>(args: I) -> Result<RunOutcome, Error>
where
    I: IntoIterator<Item = OsString>,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
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
                    .with_hint("Try `rowstream --help`."));
            }
        },
    };

    let table_dir = cli.dir.unwrap_or_else(default_table_dir);
    command_dispatch::dispatch_command(cli.command, table_dir)
}

#[derive(Parser)]
#[command(
    name = "rowstream",
    version,
    about = "Stream rows, batches, and pages from file-backed tables in bounded memory",
    long_about = None,
    after_help = r#"EXAMPLES
  $ rowstream table create user_data --column user_id --column name --column email --column age --key user_id
  $ rowstream seed user_data user_data.csv
  $ rowstream stream "SELECT name, age FROM user_data WHERE age > ?" --param 25
  $ rowstream batches "SELECT * FROM user_data" --batch-size 50
  $ rowstream process "SELECT * FROM user_data" --batch-size 50 --filter "age > 25"
  $ rowstream paginate user_data --page-size 10 --pages 3
  $ rowstream average user_data age

Set RUST_LOG=debug to trace connection and fetch activity on stderr."#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        help = "Table directory (default: $ROWSTREAM_DIR or ~/.rowstream/tables)",
        value_hint = clap::ValueHint::DirPath
    )]
    dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage table files.
    Table {
        #[command(subcommand)]
        command: TableCommand,
    },
    /// Insert rows from a headered CSV or NDJSON file, ignoring duplicate primary keys.
    Seed {
        table: String,
        #[arg(value_hint = clap::ValueHint::FilePath)]
        file: PathBuf,
        #[arg(
            long,
            value_enum,
            help = "Input format (default: csv for .csv files, otherwise ndjson)"
        )]
        format: Option<SeedFormat>,
    },
    /// Stream one row per line from a query.
    Stream {
        query: String,
        #[command(flatten)]
        params: ParamArgs,
    },
    /// Stream fixed-size batches, one JSON array per line.
    Batches {
        query: String,
        #[command(flatten)]
        params: ParamArgs,
        #[arg(long, allow_negative_numbers = true)]
        batch_size: i64,
    },
    /// Stream batches and print only rows matching a filter condition.
    Process {
        query: String,
        #[command(flatten)]
        params: ParamArgs,
        #[arg(long, allow_negative_numbers = true)]
        batch_size: i64,
        #[arg(long, help = "Condition such as \"age > 25\"")]
        filter: String,
    },
    /// Lazily page through a table.
    Paginate {
        table: String,
        #[arg(long, allow_negative_numbers = true)]
        page_size: i64,
        #[arg(long, help = "Stop after this many pages")]
        pages: Option<u64>,
    },
    /// Average one numeric column without buffering its values.
    Average { table: String, column: String },
    /// Print a shell completion script.
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum TableCommand {
    /// Create an empty table file.
    Create {
        name: String,
        #[arg(long = "column", required = true)]
        columns: Vec<String>,
        #[arg(long)]
        key: Option<String>,
    },
    /// Show a table's columns and primary key.
    Info { name: String },
}

#[derive(Args)]
struct ParamArgs {
    #[arg(
        long = "param",
        allow_hyphen_values = true,
        help = "Positional parameter bound to the next `?` (integers and null are typed)"
    )]
    params: Vec<String>,
}

impl ParamArgs {
    fn bind(&self, text: String) -> Query {
        let values = self
            .params
            .iter()
            .map(|param| Value::parse_param(param))
            .collect();
        Query::new(text).with_params(values)
    }
}

/// Writes one JSON line. Returns `Ok(false)` once stdout has been closed.
fn emit_line<W: Write, T: Serialize + ?Sized>(out: &mut W, value: &T) -> Result<bool, Error> {
    let line = serde_json::to_string(value).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("json encode failed")
            .with_source(err)
    })?;
    match writeln!(out, "{line}") {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(false),
        Err(err) => Err(Error::new(ErrorKind::Io)
            .with_message("failed to write output")
            .with_source(err)),
    }
}

fn finish_output<W: Write>(out: &mut W) -> Result<(), Error> {
    match out.flush() {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(Error::new(ErrorKind::Io)
            .with_message("failed to flush output")
            .with_source(err)),
    }
}

fn seed_json(table: &str, outcome: &InsertOutcome, parse_rejected: u64) -> JsonValue {
    json!({
        "table": table,
        "inserted": outcome.inserted,
        "ignored": outcome.ignored,
        "rejected": outcome.rejected + parse_rejected,
    })
}

fn parse_filter(text: &str) -> Result<Condition, Error> {
    Condition::parse(text).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("invalid --filter: {}", error_message(&err)))
            .with_hint("Example: --filter \"age > 25\"")
    })
}

fn table_store(table_dir: PathBuf) -> FileStore {
    FileStore::new(table_dir)
}

fn print_completion(shell: Shell) {
    let mut cmd = Cli::command();
    clap_complete::aot::generate(shell, &mut cmd, "rowstream", &mut io::stdout());
}

fn emit_error(err: &Error) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err));
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
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::AlreadyExists => "already exists".to_string(),
        ErrorKind::Busy => "resource is busy".to_string(),
        ErrorKind::Permission => "permission denied".to_string(),
        ErrorKind::Corrupt => "corrupt data".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
        ErrorKind::Connection => "connection failed".to_string(),
        ErrorKind::Configuration => "invalid configuration".to_string(),
        ErrorKind::Query => "query failed".to_string(),
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

fn error_json(err: &Error) -> JsonValue {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(table) = err.table() {
        inner.insert("table".to_string(), json!(table));
    }
    if let Some(offset) = err.offset() {
        inner.insert("offset".to_string(), json!(offset));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), JsonValue::Object(inner));
    JsonValue::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some(table) = err.table() {
        lines.push(format!("table: {table}"));
    }
    if let Some(path) = err.path() {
        lines.push(format!("path: {}", path.display()));
    }
    if let Some(offset) = err.offset() {
        lines.push(format!("offset: {offset}"));
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

#[cfg(test)]
mod tests {
    use super::{Cli, emit_line, error_json, error_text};
    use clap::CommandFactory;
    use rowstream::api::{Error, ErrorKind, Value};
    use std::io;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn error_json_carries_context() {
        let err = Error::new(ErrorKind::Query)
            .with_message("no such table")
            .with_table("ghosts")
            .with_offset(10);
        let value = error_json(&err);
        assert_eq!(value["error"]["kind"], "Query");
        assert_eq!(value["error"]["message"], "no such table");
        assert_eq!(value["error"]["table"], "ghosts");
        assert_eq!(value["error"]["offset"], 10);
    }

    #[test]
    fn error_text_falls_back_to_kind_message() {
        let text = error_text(&Error::new(ErrorKind::Configuration).with_hint("use 1+"));
        assert_eq!(text, "error: invalid configuration\nhint: use 1+");
    }

    struct ClosedPipe;

    impl io::Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn broken_pipe_stops_output_without_error() {
        let mut out = ClosedPipe;
        assert!(!emit_line(&mut out, &Value::Int(1)).expect("emit"));
    }
}
