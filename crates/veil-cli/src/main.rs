use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use veil_rewrite::SqlCommand;

mod commands;

use commands::explain::ExplainArgs;

#[derive(Parser, Debug)]
#[command(name = "veil", version, about = "Veil field-level encryption tools")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate an encryption policy file and print its rules.
    Check {
        /// Policy file (YAML or JSON)
        #[arg(long, env = "VEIL_CONFIG")]
        config: PathBuf,
    },

    /// Show how a statement would be rewritten, using a reversible preview cipher.
    Explain {
        /// Policy file (YAML or JSON)
        #[arg(long, env = "VEIL_CONFIG")]
        config: PathBuf,

        /// The SQL statement, with `?` placeholders
        #[arg(long)]
        sql: String,

        /// Statement kind (insert, update, select, delete). Detected from the SQL when omitted.
        #[arg(long)]
        kind: Option<SqlCommand>,

        /// Parameter object as JSON, e.g. '{"phone": "13800000000"}'
        #[arg(long)]
        params: Option<String>,

        /// Property path of each placeholder, in order, e.g. phone,id
        #[arg(long, value_delimiter = ',')]
        mappings: Vec<String>,

        /// Result rows to decrypt, as a JSON array
        #[arg(long)]
        rows: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Check { config } => commands::check::run(&config),
        Command::Explain {
            config,
            sql,
            kind,
            params,
            mappings,
            rows,
        } => commands::explain::run(ExplainArgs {
            config,
            sql,
            kind,
            params,
            mappings,
            rows,
        }),
    }
}
