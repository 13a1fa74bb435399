//! AstralDB command-line front end.
//!
//! Maps the flag surface onto the library pipeline: `--query` dumps the
//! AST, `--check` validates a file, `-s` compiles and executes a file
//! against the store, `--compile`/`--from-bytecode` round-trip programs
//! through the JSON bytecode format. Exit code 0 on success, nonzero on
//! any error.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use astraldb::{build_bytecode, disassemble, parse, AstralDb, AstralError, Instruction, Vm};
use clap::Parser as ClapParser;
use tracing::info;

/// Default store path for execution modes.
const DB_PATH: &str = "astral.db";
/// Output path of `--compile`.
const COMPILE_OUT: &str = "out.abc";

#[derive(ClapParser, Debug)]
#[command(
    name = "astraldb",
    about = "AstralDB - an embedded, encrypted, SQL-driven relational store",
    disable_version_flag = true
)]
struct Cli {
    /// Show version.
    #[arg(short = 'v', long = "version")]
    version: bool,

    /// Execute the provided query text: parse and dump the AST.
    #[arg(short = 'q', long = "query", value_name = "QUERY")]
    query: Option<String>,

    /// Check the syntax of a query file only.
    #[arg(short = 'c', long = "check", value_name = "FILE")]
    check: Option<PathBuf>,

    /// Evaluate, compile, and run a query file, printing the disassembly.
    #[arg(short = 's', value_name = "FILE")]
    script: Option<PathBuf>,

    /// Execute a serialized bytecode file.
    #[arg(long = "from-bytecode", alias = "fb", value_name = "FILE")]
    from_bytecode: Option<PathBuf>,

    /// Compile a query file to a bytecode file.
    #[arg(long = "compile", alias = "cc", value_name = "FILE")]
    compile: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short = 'V', long = "verbose")]
    verbose: bool,

    /// Direct log output to this file.
    #[arg(short = 'l', long = "log-file", value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Run in REPL mode (reserved).
    #[arg(short = 'r', long = "repl")]
    repl: bool,

    /// Keep the store in memory only (reserved).
    #[arg(short = 'm', long = "mmap")]
    mmap: bool,

    /// A query file to parse and dump.
    #[arg(value_name = "QUERY_FILE")]
    file: Option<PathBuf>,
}

fn init_logging(cli: &Cli) {
    let filter = if cli.verbose { "debug" } else { "warn" };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false);
    match &cli.log_file {
        Some(path) => {
            match std::fs::OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => {
                    builder
                        .with_writer(std::sync::Mutex::new(file))
                        .with_ansi(false)
                        .init();
                }
                Err(err) => {
                    eprintln!("astraldb: cannot open log file {}: {err}", path.display());
                    builder.init();
                }
            }
        }
        None => builder.init(),
    }
}

fn read_query_file(path: &Path) -> Result<String, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|_| format!("astraldb: file {} does not exist", path.display()))?;
    if text.trim().is_empty() {
        return Err(format!("astraldb: file {} is empty", path.display()));
    }
    Ok(text)
}

/// Parse SQL and print each statement with its bytecode.
fn dump_ast(sql: &str) -> Result<(), AstralError> {
    let (statements, errors) = parse(sql);
    for stmt in &statements {
        println!("{stmt}");
        print!("{}", disassemble(&astraldb::emit(stmt)));
    }
    match errors.into_iter().next() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn cmd_query(sql: &str) -> Result<(), String> {
    dump_ast(sql).map_err(|e| format!("astraldb: {e}"))
}

fn cmd_check(path: &Path) -> Result<(), String> {
    let text = read_query_file(path)?;
    let (_, errors) = parse(&text);
    match errors.into_iter().next() {
        Some(err) => Err(format!("astraldb: {err}")),
        None => {
            println!("Query syntax OK");
            Ok(())
        }
    }
}

fn execute_program(code: &[Instruction]) -> Result<(), String> {
    let db = AstralDb::open(DB_PATH).map_err(|e| format!("astraldb: {e}"))?;
    let mut vm = Vm::new(db.engine());
    let outcome = vm.execute(code);
    for row in vm.take_results() {
        let mut cells: Vec<String> = row.iter().map(|(k, v)| format!("{k}: {v}")).collect();
        cells.sort();
        println!("{}", cells.join(", "));
    }
    outcome.map_err(|e| format!("astraldb: {e}"))?;
    db.close().map_err(|e| format!("astraldb: {e}"))
}

fn cmd_script(path: &Path) -> Result<(), String> {
    let text = read_query_file(path)?;
    let (statements, errors) = parse(&text);
    if let Some(err) = errors.into_iter().next() {
        return Err(format!("astraldb: {err}"));
    }
    let code = build_bytecode(&statements);
    execute_program(&code)?;
    println!("Executed bytecode:\n{}", disassemble(&code));
    Ok(())
}

fn cmd_compile(path: &Path) -> Result<(), String> {
    let text = read_query_file(path)?;
    let (statements, errors) = parse(&text);
    if let Some(err) = errors.into_iter().next() {
        return Err(format!("astraldb: {err}"));
    }
    let code = build_bytecode(&statements);
    let json = serde_json::to_string_pretty(&code)
        .map_err(|e| format!("astraldb: cannot serialize bytecode: {e}"))?;
    std::fs::write(COMPILE_OUT, json)
        .map_err(|e| format!("astraldb: cannot write {COMPILE_OUT}: {e}"))?;
    println!("Bytecode written to {COMPILE_OUT}");
    Ok(())
}

fn cmd_from_bytecode(path: &Path) -> Result<(), String> {
    let json = std::fs::read_to_string(path)
        .map_err(|_| format!("astraldb: bytecode file {} does not exist", path.display()))?;
    let code: Vec<Instruction> = serde_json::from_str(&json)
        .map_err(|e| format!("astraldb: invalid bytecode file: {e}"))?;
    execute_program(&code)
}

fn run(cli: &Cli) -> Result<(), String> {
    if cli.version {
        println!("AstralDB version {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    if let Some(sql) = &cli.query {
        return cmd_query(sql);
    }
    if let Some(path) = &cli.check {
        return cmd_check(path);
    }
    if let Some(path) = &cli.script {
        return cmd_script(path);
    }
    if let Some(path) = &cli.from_bytecode {
        return cmd_from_bytecode(path);
    }
    if let Some(path) = &cli.compile {
        return cmd_compile(path);
    }
    if cli.repl {
        println!("AstralDB REPL mode (not implemented yet)");
        return Ok(());
    }
    if cli.mmap {
        println!("AstralDB: in-memory mode enabled (not implemented)");
        return Ok(());
    }
    if let Some(path) = &cli.file {
        let text = read_query_file(path)?;
        return cmd_query(&text);
    }
    println!("AstralDB: no action given, try --help");
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);
    info!(verbose = cli.verbose, "astraldb starting");
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}
