use clap::Parser;
use server::network::Server;
use shared::{BROADCAST_INTERVAL_MS, DEFAULT_PORT};
use std::time::Duration;

/// Main-method of the application.
/// Parses command-line arguments, binds the relay server and runs it until
/// interrupted.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "0.0.0.0")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    }

    let args = Args::parse();
    env_logger::init();

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(&address, Duration::from_millis(BROADCAST_INTERVAL_MS)).await?;

    // Handle shutdown gracefully
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                eprintln!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
