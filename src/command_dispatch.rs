//! Purpose: Hold top-level CLI command dispatch for `rowstream`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Each streaming command pulls one item, prints it, then pulls the next.
//! Invariants: Errors after partial output still exit non-zero; printed lines stay valid.

use super::*;

use rowstream::api::{self, Average};

pub(super) fn dispatch_command(command: Command, table_dir: PathBuf) -> Result<RunOutcome, Error> {
    let store = table_store(table_dir);
    match command {
        Command::Completion { shell } => {
            print_completion(shell);
            Ok(RunOutcome::ok())
        }
        Command::Table { command } => match command {
            TableCommand::Create { name, columns, key } => {
                let header = store.create_table(&name, columns, key)?;
                let path = store.table_path(&name)?;
                let mut out = io::stdout().lock();
                emit_line(
                    &mut out,
                    &json!({
                        "created": {
                            "table": name,
                            "path": path.display().to_string(),
                            "columns": header.columns,
                            "primary_key": header.primary_key,
                        }
                    }),
                )?;
                finish_output(&mut out)?;
                Ok(RunOutcome::ok())
            }
            TableCommand::Info { name } => {
                let header = store.table_header(&name)?;
                let path = store.table_path(&name)?;
                let mut out = io::stdout().lock();
                emit_line(
                    &mut out,
                    &json!({
                        "table": name,
                        "path": path.display().to_string(),
                        "columns": header.columns,
                        "primary_key": header.primary_key,
                    }),
                )?;
                finish_output(&mut out)?;
                Ok(RunOutcome::ok())
            }
        },
        Command::Seed {
            table,
            file,
            format,
        } => {
            let header = store.table_header(&table)?;
            let format = format.unwrap_or_else(|| SeedFormat::infer(&file));
            let mut rows = SeedRows::open(&file, format, &header.columns)?;
            let outcome = store.insert_ignore(&table, &mut rows)?;
            let parse_rejected = rows.finish()?;
            let mut out = io::stdout().lock();
            emit_line(&mut out, &seed_json(&table, &outcome, parse_rejected))?;
            finish_output(&mut out)?;
            Ok(RunOutcome::ok())
        }
        Command::Stream { query, params } => {
            let query = params.bind(query);
            let rows = api::stream_rows(&store, &query)?;
            let mut out = io::stdout().lock();
            for row in rows {
                if !emit_line(&mut out, &row?)? {
                    break;
                }
            }
            finish_output(&mut out)?;
            Ok(RunOutcome::ok())
        }
        Command::Batches {
            query,
            params,
            batch_size,
        } => {
            let batches = api::stream_batches(&store, params.bind(query), batch_size)?;
            let mut out = io::stdout().lock();
            for batch in batches {
                if !emit_line(&mut out, &batch?)? {
                    break;
                }
            }
            finish_output(&mut out)?;
            Ok(RunOutcome::ok())
        }
        Command::Process {
            query,
            params,
            batch_size,
            filter,
        } => {
            let condition = parse_filter(&filter)?;
            let batches = api::stream_batches(&store, params.bind(query), batch_size)?;
            let mut out = io::stdout().lock();
            for record in api::batch_processing(batches, condition) {
                if !emit_line(&mut out, &record?)? {
                    break;
                }
            }
            finish_output(&mut out)?;
            Ok(RunOutcome::ok())
        }
        Command::Paginate {
            table,
            page_size,
            pages,
        } => {
            let mut paginator = api::paginate(&store, &table, page_size)?;
            let mut out = io::stdout().lock();
            while pages.is_none_or(|limit| paginator.pages() < limit) {
                let Some(page) = paginator.next_page()? else {
                    break;
                };
                let line = json!({
                    "page": page.number,
                    "offset": page.offset,
                    "rows": page.records,
                });
                if !emit_line(&mut out, &line)? {
                    break;
                }
            }
            finish_output(&mut out)?;
            Ok(RunOutcome::ok())
        }
        Command::Average { table, column } => {
            let aggregate = api::average_column(&store, &table, &column)?;
            let average = match aggregate.average() {
                Average::Mean(mean) => json!(mean),
                Average::NoData => JsonValue::Null,
            };
            let mut out = io::stdout().lock();
            emit_line(
                &mut out,
                &json!({
                    "table": table,
                    "column": column,
                    "count": aggregate.count(),
                    "average": average,
                }),
            )?;
            finish_output(&mut out)?;
            Ok(RunOutcome::ok())
        }
    }
}
