use anyhow::Result;
use clap::{Parser, Subcommand};

use braid::config::Config;
use braid::store::models::MessageRole;

mod cmd;

#[derive(Parser)]
#[command(name = "braid")]
#[command(version, about = "Conversation context and rolling summaries for branched project discussions")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the assembled context pack for a branch
    Context {
        branch_id: String,
        /// Recent-message window size
        #[arg(long, default_value = "20")]
        messages: usize,
        #[arg(long)]
        no_artifacts: bool,
        #[arg(long)]
        no_parents: bool,
        #[arg(long)]
        no_summary: bool,
    },
    /// Check whether a branch is due for summarization
    Needs { branch_id: String },
    /// Summarize a branch now
    Summarize { branch_id: String },
    /// Summarize a project from its recent work items
    SummarizeProject { project_id: String },
    /// Summarize every branch that is due
    Sweep,
    /// Append a message to a branch (triggers background summarization)
    Post {
        branch_id: String,
        content: String,
        #[arg(long, value_parser = parse_role, default_value = "user")]
        role: MessageRole,
        /// Id of the authoring user
        #[arg(long)]
        user: Option<String>,
    },
}

fn parse_role(s: &str) -> Result<MessageRole, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("braid=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Context {
            branch_id,
            messages,
            no_artifacts,
            no_parents,
            no_summary,
        } => {
            cmd::cmd_context(
                &config,
                branch_id,
                *messages,
                *no_artifacts,
                *no_parents,
                *no_summary,
            )
            .await?;
        }
        Commands::Needs { branch_id } => cmd::cmd_needs(&config, branch_id).await?,
        Commands::Summarize { branch_id } => cmd::cmd_summarize(&config, branch_id).await?,
        Commands::SummarizeProject { project_id } => {
            cmd::cmd_summarize_project(&config, project_id).await?;
        }
        Commands::Sweep => cmd::cmd_sweep(&config).await?,
        Commands::Post {
            branch_id,
            content,
            role,
            user,
        } => {
            cmd::cmd_post(&config, branch_id, *role, content, user.as_deref()).await?;
        }
    }

    Ok(())
}
