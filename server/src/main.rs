use chat_server::{ChatServer, ServerConfig};
use chat_shared::{parse_port, wire, Console, ShutdownSignal, StdoutConsole, DEFAULT_BIND_HOST, DEFAULT_PORT};
use clap::Parser;
use log::{error, info};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on; missing or malformed values fall back to the default
    port: Option<String>,

    /// Address to bind to
    #[arg(short = 'H', long, default_value = DEFAULT_BIND_HOST)]
    host: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let port = args
        .port
        .as_deref()
        .and_then(parse_port)
        .unwrap_or(DEFAULT_PORT);

    let console: Arc<dyn Console> = Arc::new(StdoutConsole);
    let shutdown = ShutdownSignal::new();
    let config = ServerConfig {
        host: args.host,
        port,
    };

    let mut server = ChatServer::new(config, Arc::clone(&console), shutdown.clone());
    if let Err(e) = server.listen().await {
        error!("{:?}", e);
        console.display("ERROR - Could not listen for clients!");
    }

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C, shutting down gracefully...");
                shutdown.trigger();
            }
        });
    }

    server.run(wire::lines(tokio::io::stdin())).await;

    // Stdin is read on a blocking thread that would otherwise keep the
    // runtime alive until the next line arrives.
    std::process::exit(0);
}
