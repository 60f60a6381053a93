use chat_client::{run, ChatClient, ClientConfig};
use chat_shared::{parse_port, wire, Console, ShutdownSignal, StdoutConsole, DEFAULT_HOST, DEFAULT_PORT};
use clap::Parser;
use log::{error, info};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Identifier announced to the server on every connection
    login_id: Option<String>,

    /// Server host to connect to
    #[arg(default_value = DEFAULT_HOST)]
    host: String,

    /// Server port; malformed values fall back to the default
    port: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let Some(login_id) = args.login_id else {
        println!("ERROR - No login ID specified. Connection aborted.");
        std::process::exit(1);
    };

    let port = match args.port.as_deref() {
        None => DEFAULT_PORT,
        Some(value) => parse_port(value).unwrap_or_else(|| {
            println!("invalid port number. Using default port number instead.");
            DEFAULT_PORT
        }),
    };

    let config = ClientConfig {
        login_id,
        host: args.host,
        port,
    };
    info!("Connecting to {}:{} as {:?}", config.host, config.port, config.login_id);

    let console: Arc<dyn Console> = Arc::new(StdoutConsole);
    let shutdown = ShutdownSignal::new();

    let (client, events) = match ChatClient::connect(config, console, shutdown.clone()).await {
        Ok(connected) => connected,
        Err(e) => {
            error!("{:?}", e);
            println!("ERROR - Can't setup connection! Terminating client.");
            std::process::exit(1);
        }
    };

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C, shutting down gracefully...");
                shutdown.trigger();
            }
        });
    }

    run(client, events, wire::lines(tokio::io::stdin())).await;

    // Stdin is read on a blocking thread that would otherwise keep the
    // runtime alive until the next line arrives.
    std::process::exit(0);
}
