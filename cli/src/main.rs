//! `loom-board`: operate on a board ledger file from the command line.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use clap::Subcommand;
use loom_board_core::{
    AppendOutcome, AppendRequest, DEFAULT_MAX_MESSAGE_LEN, PruneSelector, Tier, append_entry,
    prune_board,
};
use loom_git_ledger::{GitLedgerTransaction, TraceIngest};

#[derive(Parser)]
#[command(name = "loom-board", version, about = "Loom board ledger operations")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Append one ribbon to a board file.
    Add(AddArgs),
    /// Remove expired ribbons from a board file.
    Prune(PruneArgs),
    /// Commit one trace to a git-tracked board and push it.
    IngestTrace(IngestTraceArgs),
}

#[derive(Debug, clap::Args)]
struct AddArgs {
    /// Path to the board JSON file.
    #[arg(long)]
    board: PathBuf,

    #[arg(long)]
    agent_id: String,

    #[arg(long)]
    message: String,

    /// Tier id: ephemeral, day, 3day, permanent, or featured.
    #[arg(long, default_value = "ephemeral")]
    tier: String,

    #[arg(long, default_value = "api")]
    source: String,

    #[arg(long)]
    amount_usd: Option<f64>,

    /// Explicit weight override; bypasses tier policy.
    #[arg(long)]
    weight: Option<i64>,

    #[arg(long)]
    trace_id: Option<String>,

    #[arg(long)]
    provider: Option<String>,

    #[arg(long)]
    purchase_id: Option<String>,

    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGE_LEN)]
    max_message_len: usize,
}

#[derive(Debug, clap::Args)]
struct PruneArgs {
    /// Path to the board JSON file.
    #[arg(long)]
    board: PathBuf,

    /// `expiring`, `all`, or a single tier id.
    #[arg(long, default_value = "expiring")]
    tier: String,
}

#[derive(Debug, clap::Args)]
struct IngestTraceArgs {
    /// Path to the git working copy holding the board file.
    #[arg(long)]
    repo: PathBuf,

    #[arg(long, default_value = "main")]
    branch: String,

    #[arg(long)]
    agent_id: String,

    #[arg(long)]
    message: String,

    #[arg(long)]
    trace_id: String,

    #[arg(long, default_value = "browser-state")]
    source: String,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<ExitCode> {
    init_logging();

    let cli = Cli::parse();
    match cli.command {
        Command::Add(args) => {
            let tier = Tier::from_id(&args.tier)?;
            let outcome = append_entry(
                &args.board,
                &AppendRequest {
                    agent_id: args.agent_id,
                    message: args.message,
                    tier,
                    source: args.source,
                    amount_usd: args.amount_usd,
                    weight: args.weight,
                    trace_id: args.trace_id,
                    max_message_len: args.max_message_len,
                    provider: args.provider,
                    purchase_id: args.purchase_id,
                },
            )?;
            match outcome {
                AppendOutcome::Added => println!("added"),
                AppendOutcome::Ignored => println!("ignored"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Prune(args) => {
            let selector = PruneSelector::from_arg(&args.tier)?;
            let removed = prune_board(&args.board, selector)?;
            println!("removed={removed}");
            Ok(ExitCode::SUCCESS)
        }
        Command::IngestTrace(args) => {
            let txn = GitLedgerTransaction::with_branch(&args.repo, &args.branch);
            let outcome = txn.ingest_trace(&TraceIngest {
                agent_id: args.agent_id,
                message: args.message,
                trace_id: args.trace_id,
                source: args.source,
            });
            println!("{}", outcome.reason.code());
            if outcome.accepted {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn add_defaults() {
        let cli = Cli::try_parse_from([
            "loom-board",
            "add",
            "--board",
            "board.json",
            "--agent-id",
            "bot-1",
            "--message",
            "hello",
        ])
        .unwrap();
        let Command::Add(args) = cli.command else {
            panic!("expected add");
        };
        assert_eq!(args.tier, "ephemeral");
        assert_eq!(args.source, "api");
        assert_eq!(args.max_message_len, DEFAULT_MAX_MESSAGE_LEN);
        assert_eq!(args.amount_usd, None);
    }

    #[test]
    fn prune_defaults_to_expiring() {
        let cli =
            Cli::try_parse_from(["loom-board", "prune", "--board", "board.json"]).unwrap();
        let Command::Prune(args) = cli.command else {
            panic!("expected prune");
        };
        assert_eq!(args.tier, "expiring");
    }

    #[test]
    fn ingest_trace_requires_trace_id() {
        let result = Cli::try_parse_from([
            "loom-board",
            "ingest-trace",
            "--repo",
            ".",
            "--agent-id",
            "bot-1",
            "--message",
            "hello",
        ]);
        assert!(result.is_err());
    }
}
