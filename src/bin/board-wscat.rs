use std::time::Duration;

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser)]
#[command(name = "board-wscat")]
#[command(about = "Talk to a board-gateway socket from the terminal", long_about = None)]
struct Cli {
    /// Path to connect to, e.g. /chat/lobby
    path: String,

    #[arg(short, long, default_value = "ws://localhost:8080")]
    url: String,

    /// Send this single frame, print replies for `--wait` seconds, then exit.
    /// Without it, every stdin line is sent as one frame.
    #[arg(short, long)]
    send: Option<String>,

    #[arg(short, long, default_value_t = 2)]
    wait: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let target = format!("{}/{}", cli.url.trim_end_matches('/'), cli.path.trim_start_matches('/'));

    let (socket, response) = connect_async(target.as_str()).await?;
    if let Some(id) = response.headers().get("x-request-id").and_then(|v| v.to_str().ok()) {
        eprintln!("connected to {target} (request {id})");
    } else {
        eprintln!("connected to {target}");
    }
    let (mut sink, mut stream) = socket.split();

    let printer = tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(text)) => print_frame(text.as_str()),
                Ok(Message::Close(frame)) => {
                    match frame {
                        Some(frame) => eprintln!("closed: {} {}", u16::from(frame.code), frame.reason.as_str()),
                        None => eprintln!("closed"),
                    }
                    break;
                }
                Ok(_) => {}
                Err(error) => {
                    eprintln!("error: {error}");
                    break;
                }
            }
        }
    });

    match cli.send {
        Some(frame) => {
            check_frame(&frame)?;
            sink.send(Message::text(frame)).await?;
            let _ = tokio::time::timeout(Duration::from_secs(cli.wait), printer).await;
        }
        None => {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Err(error) = check_frame(line) {
                    eprintln!("not sent: {error}");
                    continue;
                }
                sink.send(Message::text(line.to_string())).await?;
            }
            let _ = tokio::time::timeout(Duration::from_secs(cli.wait), printer).await;
        }
    }

    let _ = sink.send(Message::Close(None)).await;
    Ok(())
}

/// Only JSON goes out; the gateway would answer anything else with an error frame.
fn check_frame(frame: &str) -> Result<(), serde_json::Error> {
    serde_json::from_str::<Value>(frame).map(|_| ())
}

fn print_frame(text: &str) {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => println!("{value}"),
        Err(_) => println!("{text}"),
    }
}
