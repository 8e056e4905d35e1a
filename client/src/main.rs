use anyhow::{Context, Result};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use passage_shared::protocol::Frame;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

mod proxy;

#[derive(Parser)]
#[command(name = "passage")]
#[command(version = "0.1.0")]
#[command(about = "Expose a local HTTP service through a passage relay", long_about = None)]
struct Cli {
    /// Subdomain to register with the relay
    subdomain: String,

    /// Local port to expose
    port: u16,

    /// Relay control endpoint
    #[arg(short, long, default_value = "ws://localhost:8080/tunnel")]
    relay: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    run_tunnel(&cli.relay, &cli.subdomain, cli.port).await
}

async fn run_tunnel(relay_url: &str, subdomain: &str, local_port: u16) -> Result<()> {
    info!("connecting to relay: {}", relay_url);
    let (ws_stream, _) = connect_async(relay_url)
        .await
        .context("failed to connect to relay")?;
    let (mut write, mut read) = ws_stream.split();

    let register = Frame::Register {
        subdomain: subdomain.to_string(),
    };
    write.send(Message::Text(register.encode()?)).await?;
    info!(
        "registered '{}'; forwarding to http://127.0.0.1:{}",
        subdomain, local_port
    );

    let http = reqwest::Client::new();

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match Frame::parse(&text) {
                        Ok(Frame::Request { correlation_id, method, headers, url }) => {
                            debug!("forwarding {} {}", method, url);
                            let response =
                                proxy::execute(&http, local_port, correlation_id, &method, &headers, &url).await;
                            write.send(Message::Text(response.encode()?)).await?;
                        }
                        Ok(frame) => debug!("ignoring frame from relay: {:?}", frame),
                        Err(e) => warn!("malformed frame from relay: {}", e),
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    write.send(Message::Pong(data)).await?;
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("relay closed the connection");
                    break;
                }
                Some(Err(e)) => {
                    error!("websocket error: {}", e);
                    break;
                }
                _ => {}
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                write.send(Message::Close(None)).await?;
                break;
            }
        }
    }

    Ok(())
}
