use clap::Parser;
use consult::client::terminal;
use consult::core::config::{self, CliOverrides};
use consult::core::conversation::ParticipantId;
use simplelog::{ConfigBuilder, LevelFilter, WriteLogger};
use std::fs::File;

#[derive(Parser)]
#[command(name = "consult", about = "Live consultation chat client")]
struct Args {
    /// Who to chat with
    #[arg(short, long)]
    peer: String,

    /// Local participant id (overrides config and CONSULT_USER_ID)
    #[arg(short, long)]
    user: Option<String>,

    /// WebSocket endpoint of the live channel
    #[arg(long)]
    socket_url: Option<String>,

    /// Base URL of the REST API
    #[arg(long)]
    api_url: Option<String>,

    /// Bearer token for REST requests
    #[arg(long)]
    token: Option<String>,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let args = Args::parse();
    dotenv::dotenv().ok();

    // Initialize file logger - writes to consult.log in current directory
    let log_config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .build();

    if let Ok(log_file) = File::create("consult.log") {
        let _ = WriteLogger::init(LevelFilter::Debug, log_config, log_file);
    }

    let file_config = match config::load_config() {
        Ok(c) => c,
        Err(e) => {
            log::warn!("{}, falling back to defaults", e);
            eprintln!("warning: {e}, falling back to defaults");
            config::ConsultConfig::default()
        }
    };
    let resolved = config::resolve(
        &file_config,
        &CliOverrides {
            user_id: args.user,
            token: args.token,
            socket_url: args.socket_url,
            api_url: args.api_url,
        },
    );

    log::info!(
        "Consult starting up (socket: {}, api: {})",
        resolved.socket_url,
        resolved.api_url
    );

    terminal::run(resolved, ParticipantId::from(args.peer)).await
}
