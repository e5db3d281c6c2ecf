//! Tournament client - joins the server and plays from the terminal,
//! or automatically when INTERACTIVE=false

use std::io::Write;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error};

use rps_tournament_server::client::{random_choice, ClientSession};
use rps_tournament_server::config::ClientConfig;
use rps_tournament_server::ws::protocol::{Choice, ClientMsg, ServerMsg};

const PROMPT: &str = "Choose (rock/paper/scissors): ";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let config = ClientConfig::from_env()?;

    let (socket, _) = tokio_tungstenite::connect_async(config.server_url.as_str()).await?;
    println!("Connected to server at {}", config.server_url);
    let (mut sink, mut stream) = socket.split();

    send(&mut sink, &ClientMsg::Join).await?;

    let mut session = ClientSession::new();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut prompting = false;

    loop {
        tokio::select! {
            frame = stream.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        error!(error = %e, "WebSocket error");
                        break;
                    }
                };

                let msg = match serde_json::from_str::<ServerMsg>(&text) {
                    Ok(msg) => msg,
                    Err(_) => {
                        eprintln!("Invalid message from server: {text}");
                        continue;
                    }
                };

                let reaction = session.handle(&msg);
                for line in &reaction.lines {
                    println!("{line}");
                }
                if !session.in_match() {
                    prompting = false;
                }
                if !reaction.choose {
                    continue;
                }

                if config.interactive {
                    if !prompting {
                        prompting = true;
                        prompt();
                    }
                } else {
                    let choice = random_choice(&mut rand::thread_rng());
                    send(&mut sink, &ClientMsg::Choice { choice }).await?;
                    println!("Auto-choice sent: {choice}");
                }
            }
            line = stdin.next_line(), if stdin_open => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) | Err(_) => {
                        stdin_open = false;
                        continue;
                    }
                };
                if !prompting {
                    debug!("Ignoring input outside a prompt");
                    continue;
                }
                match line.parse::<Choice>() {
                    Ok(choice) => {
                        prompting = false;
                        send(&mut sink, &ClientMsg::Choice { choice }).await?;
                        println!("Choice sent: {choice}");
                    }
                    Err(_) => {
                        println!("Invalid choice. Please type rock, paper, or scissors.");
                        prompt();
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nExiting...");
                let _ = sink.send(Message::Close(None)).await;
                return Ok(());
            }
        }
    }

    println!("Disconnected from server");
    Ok(())
}

fn prompt() {
    print!("{PROMPT}");
    let _ = std::io::stdout().flush();
}

async fn send<S>(sink: &mut S, msg: &ClientMsg) -> anyhow::Result<()>
where
    S: futures::Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let json = serde_json::to_string(msg)?;
    sink.send(Message::Text(json)).await?;
    Ok(())
}
