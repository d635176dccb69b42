pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "signoff",
    about = "Signoff approval workflow CLI",
    long_about = "Configure multi-layer approval workflows, submit objects for approval, record decisions, and inspect approval state.",
    after_help = "Examples:\n  signoff migrate\n  signoff seed\n  signoff submit --type leave --id LV-1 --sender 3\n  signoff decide --approval <id> --user 42 --decision approve\n  signoff status --type leave --id LV-1"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load a workflow catalog (users, roles, employees, approver layers)")]
    Seed {
        #[arg(long, help = "TOML catalog to load; defaults to the built-in demo catalog")]
        file: Option<PathBuf>,
    },
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, DB connectivity, schema and workflow catalog")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Submit an object for approval, opening its lowest active level")]
    Submit {
        #[arg(long = "type", help = "Approvable type key, e.g. `leave`")]
        type_key: String,
        #[arg(long = "id", help = "Identifier of the object under approval")]
        object_id: String,
        #[arg(long, help = "User id of the requester")]
        sender: i64,
        #[arg(long, help = "Employee code overriding the requester's approval line")]
        approval_line: Option<String>,
    },
    #[command(about = "Approve or reject a pending approval as its assigned approver")]
    Decide {
        #[arg(long, help = "Approval id")]
        approval: String,
        #[arg(long, help = "User id of the acting approver")]
        user: i64,
        #[arg(long, help = "approve | reject")]
        decision: String,
    },
    #[command(about = "Open the next level when the current one is fully approved (sequential policy)")]
    Advance {
        #[arg(long = "type")]
        type_key: String,
        #[arg(long = "id")]
        object_id: String,
    },
    #[command(about = "Show the approval status and workflow state of an object")]
    Status {
        #[arg(long = "type")]
        type_key: String,
        #[arg(long = "id")]
        object_id: String,
    },
    #[command(about = "List pending approvals assigned to a user")]
    Inbox {
        #[arg(long)]
        user: i64,
    },
    #[command(about = "List every approval row of an object, oldest first")]
    History {
        #[arg(long = "type")]
        type_key: String,
        #[arg(long = "id")]
        object_id: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let result = dispatch(cli.command);

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

fn dispatch(command: Command) -> commands::CommandResult {
    use commands::{workflow, CommandResult};

    match command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed { file } => commands::seed::run(file.as_deref()),
        Command::Config => CommandResult { exit_code: 0, output: commands::config::run() },
        Command::Doctor { json } => {
            CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Submit { type_key, object_id, sender, approval_line } => {
            workflow::submit(&type_key, &object_id, sender, approval_line.as_deref())
        }
        Command::Decide { approval, user, decision } => {
            workflow::decide(&approval, user, &decision)
        }
        Command::Advance { type_key, object_id } => workflow::advance(&type_key, &object_id),
        Command::Status { type_key, object_id } => workflow::status(&type_key, &object_id),
        Command::Inbox { user } => workflow::inbox(user),
        Command::History { type_key, object_id } => workflow::history(&type_key, &object_id),
    }
}
