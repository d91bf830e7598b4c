#![forbid(unsafe_code)]

use std::io::{self, BufRead, Read};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::IntoDiagnostic;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use eql_interpret::{InterpreterConfig, Session, StorageConfig};

#[derive(Parser, Debug)]
#[command(name = "eql", version, about = "EdgeQL interpreter")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Execute a script file (or stdin)
    Run {
        /// SDL file loaded into the default module
        #[arg(long)]
        schema: Option<PathBuf>,

        /// Keep data in this SQLite database instead of memory
        #[arg(long)]
        sqlite: Option<PathBuf>,

        /// Print one JSON document per statement
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Path to a .edgeql script; if omitted, reads from stdin
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Answer JSON-line requests on stdin/stdout
    Repl {
        #[arg(long)]
        schema: Option<PathBuf>,

        #[arg(long)]
        sqlite: Option<PathBuf>,
    },
}

#[derive(Debug, Deserialize)]
struct ReplIn {
    query: String,
    #[serde(default)]
    variables: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ReplOut {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    results: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn main() -> miette::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Run {
            schema,
            sqlite,
            json,
            file,
        } => {
            let src = if let Some(p) = file {
                std::fs::read_to_string(p).into_diagnostic()?
            } else {
                let mut buf = String::new();
                io::stdin().read_to_string(&mut buf).into_diagnostic()?;
                buf
            };
            let mut session = open_session(schema, sqlite)?;
            if json {
                for out in session.run_str_json(&src, &serde_json::Value::Null)? {
                    println!("{}", serde_json::to_string(&out).into_diagnostic()?);
                }
            } else {
                for out in session.run_str(&src)? {
                    let shown: Vec<String> = out.iter().map(|v| v.to_string()).collect();
                    println!("{{{}}}", shown.join(", "));
                }
            }
            Ok(())
        }
        Cmd::Repl { schema, sqlite } => repl_main(open_session(schema, sqlite)?),
    }
}

fn open_session(schema: Option<PathBuf>, sqlite: Option<PathBuf>) -> miette::Result<Session> {
    let sdl = match schema {
        Some(p) => Some(std::fs::read_to_string(p).into_diagnostic()?),
        None => None,
    };
    let storage = match sqlite {
        Some(path) => StorageConfig::Sqlite { path },
        None => StorageConfig::Memory,
    };
    Session::new(
        InterpreterConfig {
            storage,
            ..Default::default()
        },
        sdl.as_deref(),
    )
}

fn repl_main(mut session: Session) -> miette::Result<()> {
    let stdin = io::stdin();
    let mut stdin = stdin.lock();
    let mut line = String::new();
    loop {
        line.clear();
        if stdin.read_line(&mut line).into_diagnostic()? == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let msg = match serde_json::from_str::<ReplIn>(trimmed) {
            Ok(inp) => match session.run_str_json(&inp.query, &inp.variables) {
                Ok(results) => ReplOut {
                    ok: true,
                    results: Some(results),
                    error: None,
                },
                Err(e) => ReplOut {
                    ok: false,
                    results: None,
                    error: Some(e.to_string()),
                },
            },
            Err(e) => ReplOut {
                ok: false,
                results: None,
                error: Some(format!("bad request: {e}")),
            },
        };
        println!("{}", serde_json::to_string(&msg).into_diagnostic()?);
    }
    Ok(())
}
