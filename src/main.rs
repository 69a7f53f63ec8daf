mod printer;

use std::{
    io::{BufRead, BufReader, BufWriter, Write},
    net::{Shutdown, TcpListener, TcpStream},
    thread,
    time::Duration,
};

use anyhow::{Context, Error, Result};
use clap::Parser;
use heapdb::common::{PageId, PageNo, RecordId, SlotNo, TableId};
use heapdb::concurrency::TransactionId;
use heapdb::tuple::schema::{Schema, TypeId};
use heapdb::tuple::value::Value;
use heapdb::tuple::Tuple;
use heapdb::{Database, DatabaseConfig};
use log::{warn, LevelFilter, Log, Metadata, Record};
use printer::Printer;

#[derive(Parser)]
struct ServerConfig {
    #[arg(
        long,
        help = "Schema file with one table per line, data files are stored next to it"
    )]
    catalog: String,

    #[arg(long, default_value_t = 42666)]
    port: u16,

    #[arg(long, default_value_t = 50, help = "Size of buffer pool")]
    pool_size: usize,

    #[arg(
        long,
        default_value_t = 500,
        help = "Milliseconds a transaction waits for a lock before it is aborted"
    )]
    lock_timeout_ms: u64,

    #[arg(
        long,
        default_value_t = 50,
        help = "Milliseconds between two checks of a waiting lock request"
    )]
    lock_poll_interval_ms: u64,

    #[arg(long, default_value = "info", help = "One of off, error, warn, info, debug, trace")]
    log_level: String,
}

struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}: {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn trim_newline(s: &mut String) {
    let len = s.len();
    if s.ends_with("\r\n") {
        s.truncate(len - 2);
    } else if s.ends_with('\n') {
        s.truncate(len - 1);
    }
}

/// Runs `f` in a new transaction, which commits if `f` succeeds and aborts otherwise.
fn in_transaction<T>(db: &Database, f: impl FnOnce(TransactionId) -> Result<T>) -> Result<T> {
    let transaction = db.begin();
    match f(transaction.tid()) {
        Ok(result) => {
            transaction.commit()?;
            Ok(result)
        }
        Err(e) => {
            let tid = transaction.tid();
            if let Err(abort_error) = transaction.abort() {
                warn!("Failed to abort transaction {tid}: {abort_error:#}");
            }
            Err(e)
        }
    }
}

fn parse_values(schema: &Schema, args: &[&str]) -> Result<Vec<Value>> {
    if schema.columns().len() != args.len() {
        return Err(Error::msg(format!(
            "Expected {} values, but got {}",
            schema.columns().len(),
            args.len()
        )));
    }

    schema
        .columns()
        .iter()
        .zip(args)
        .map(|(column, arg)| match column.type_id() {
            TypeId::Integer => arg
                .parse::<i32>()
                .map(Value::Integer)
                .with_context(|| format!("'{arg}' is not an integer")),
            TypeId::Text => Ok(Value::String(arg.to_string())),
        })
        .collect()
}

fn table_id(db: &Database, table_name: &str) -> Result<TableId> {
    db.catalog()
        .get_table_id(table_name)
        .ok_or_else(|| Error::msg(format!("Could not find table {table_name}")))
}

fn execute_command(
    db: &Database,
    line: &str,
    writer: &mut BufWriter<&TcpStream>,
) -> Result<()> {
    let split = line.split_whitespace().collect::<Vec<&str>>();
    match split.as_slice() {
        [".tables"] => {
            let tables = db.catalog().list_tables();
            writer.write_all(tables.join(" ").as_bytes())?;
        }
        [".columns", table_name] => {
            let table_id = table_id(db, table_name)?;
            let schema = db.catalog().get_schema(table_id)?;
            let primary_key = db.catalog().get_primary_key(table_id)?;
            for column in schema.columns() {
                let name = column.column_name().unwrap_or_default();
                let marker = if name == primary_key { " (pk)" } else { "" };
                writer.write_all(format!("{name} {}{marker}\n", column.type_id()).as_bytes())?;
            }
        }
        [".scan", table_name] => {
            let table_id = table_id(db, table_name)?;
            let file = db.catalog().get_file(table_id)?;
            let tuples = in_transaction(db, |tid| {
                file.as_heap()
                    .iter(db.buffer_pool(), tid)?
                    .collect::<Result<Vec<_>>>()
            })?;
            Printer::new(file.schema()).print_all_tuples(&tuples, writer)?;
        }
        [".insert", table_name, args @ ..] => {
            let table_id = table_id(db, table_name)?;
            let schema = db.catalog().get_schema(table_id)?;
            let tuple = Tuple::new(parse_values(&schema, args)?);
            let record_id = in_transaction(db, |tid| {
                db.buffer_pool().insert_tuple(tid, table_id, tuple)
            })?;
            writer.write_all(format!("Inserted tuple at {record_id}").as_bytes())?;
        }
        [".delete", table_name, page_no, slot] => {
            let table_id = table_id(db, table_name)?;
            let page_no = page_no
                .parse::<PageNo>()
                .with_context(|| format!("'{page_no}' is not a page number"))?;
            let slot = slot
                .parse::<SlotNo>()
                .with_context(|| format!("'{slot}' is not a slot number"))?;
            let record_id = RecordId::new(PageId::new(table_id, page_no), slot);
            in_transaction(db, |tid| db.buffer_pool().delete_record(tid, record_id))?;
            writer.write_all(format!("Deleted tuple at {record_id}").as_bytes())?;
        }
        _ => writer.write_all(format!("Unknown command: {line}").as_bytes())?,
    }
    Ok(())
}

fn handle_client(mut stream: TcpStream, db: &Database) -> Result<()> {
    stream.write_all("Welcome to heapdb".as_bytes())?;

    let mut reader = BufReader::new(&stream);
    let mut writer = BufWriter::new(&stream);
    let mut line = String::new();

    loop {
        line.clear();
        writer.write_all("\n> ".as_bytes())?;
        writer.flush()?;
        reader.read_line(&mut line)?;

        if line.as_bytes().is_empty() {
            // Client didn't send anything.
            return Ok(());
        }
        trim_newline(&mut line);
        if line.eq(".exit") {
            break;
        }
        if let Err(e) = execute_command(db, &line, &mut writer) {
            writer.write_all(format!("Error: {e:#}").as_bytes())?;
        }
    }

    stream.shutdown(Shutdown::Both)?;
    Ok(())
}

fn main() -> Result<()> {
    let config = ServerConfig::parse();

    let log_level = config
        .log_level
        .parse::<LevelFilter>()
        .map_err(|e| Error::msg(format!("Invalid log level {}: {e}", config.log_level)))?;
    log::set_logger(&LOGGER).map_err(|e| Error::msg(e.to_string()))?;
    log::set_max_level(log_level);

    let db = Database::new(
        DatabaseConfig::default()
            .with_pool_size(config.pool_size)
            .with_lock_timeout(Duration::from_millis(config.lock_timeout_ms))
            .with_lock_poll_interval(Duration::from_millis(config.lock_poll_interval_ms)),
    )?;
    db.catalog()
        .load_schema(&config.catalog)
        .with_context(|| "Failed to load catalog".to_string())?;
    let listener = TcpListener::bind(("localhost", config.port))?;

    thread::scope(|scope| {
        let db = &db;

        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    scope.spawn(move || match handle_client(stream, db) {
                        Ok(()) => (),
                        Err(e) => println!("Failed to handle client. Cause: {e}"),
                    });
                }
                Err(e) => println!("Could not get tcp stream: {e}"),
            }
        }
    });

    Ok(())
}
