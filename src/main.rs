use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use repairdesk::config::DEFAULT_DB_PATH;
use repairdesk::desk::line::PostbackAction;

mod cmd;

#[derive(Parser)]
#[command(name = "repairdesk")]
#[command(version, about = "IT repair ticketing service with LINE postback triage")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        /// Port to serve on
        #[arg(short, long, env = "PORT", default_value = "3000")]
        port: u16,

        /// Interface to bind (ignored in dev mode, which binds 0.0.0.0)
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// SQLite database path, used when no PostgREST endpoint is configured
        #[arg(long, default_value = DEFAULT_DB_PATH)]
        db_path: PathBuf,

        /// Enable dev mode (permissive CORS, all interfaces)
        #[arg(long)]
        dev: bool,
    },
    /// Create or migrate the SQLite database, then exit
    InitDb {
        #[arg(long, default_value = DEFAULT_DB_PATH)]
        db_path: PathBuf,
    },
    /// Print an admin session token signed with ADMIN_COOKIE_SECRET
    SignToken {
        /// Username to sign (defaults to ADMIN_USER)
        #[arg(short, long)]
        username: Option<String>,
    },
    /// Send a signed LINE postback event to a running server
    Postback {
        /// Webhook URL
        #[arg(long, default_value = "http://localhost:3000/api/line/interactions")]
        url: String,

        #[arg(long, value_enum, default_value = "approve")]
        action: ActionArg,

        #[arg(long, default_value = "TEST-JOB-123")]
        job_id: String,

        /// LINE user id reported as the event source
        #[arg(long, default_value = "U_TEST_USER")]
        user_id: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ActionArg {
    Approve,
    Reject,
}

impl From<ActionArg> for PostbackAction {
    fn from(arg: ActionArg) -> Self {
        match arg {
            ActionArg::Approve => PostbackAction::Approve,
            ActionArg::Reject => PostbackAction::Reject,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    repairdesk::logging::init_tracing(cli.verbose, cli.log_json);

    match &cli.command {
        Commands::Serve {
            port,
            host,
            db_path,
            dev,
        } => {
            cmd::cmd_serve(host, *port, db_path.clone(), *dev).await?;
        }
        Commands::InitDb { db_path } => cmd::cmd_init_db(db_path)?,
        Commands::SignToken { username } => cmd::cmd_sign_token(username.as_deref())?,
        Commands::Postback {
            url,
            action,
            job_id,
            user_id,
        } => {
            cmd::cmd_postback(url, (*action).into(), job_id, user_id).await?;
        }
    }

    Ok(())
}
