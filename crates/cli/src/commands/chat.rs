//! `agentrelay chat`: interactive or single-message chat.
//!
//! A turn that ends with a question (ASK) prompts for the reply, which is
//! sent as the next turn of the same session. Ctrl-C aborts the running
//! turn.

use agentrelay_agent::{AgentLoop, ContentType, TurnEvent, TurnOutcome, TurnRequest};
use agentrelay_config::AppConfig;
use agentrelay_core::message::SessionId;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub async fn run(
    message: Option<String>,
    session: Option<String>,
    stream: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    AGENTRELAY_API_KEY = 'sk-...'");
        eprintln!("    OPENAI_API_KEY     = 'sk-...'");
        eprintln!();
        eprintln!("  Or add `api_key` to {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let agent = agentrelay_gateway::build_agent(&config);
    let session_id = SessionId::from_optional(session.as_deref()).0;
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    debug!(session_id = %session_id, stream, "Chat session ready");

    if let Some(msg) = message {
        let mut next = msg;
        loop {
            let outcome = run_turn(&agent, &session_id, next, stream).await?;
            if !outcome.is_question() {
                break;
            }
            match prompt(&mut stdin, "  Reply > ").await? {
                Some(reply) => next = reply,
                None => break,
            }
        }
        return Ok(());
    }

    println!();
    println!("  AgentRelay: interactive mode");
    println!();
    println!("  Model:     {}", config.default_model);
    println!("  Tools:     {}", agent.registry().names().join(", "));
    println!("  Session:   {session_id}");
    println!();
    println!("  Type your message and press Enter. Type 'exit' to quit.");
    println!();

    while let Some(line) = prompt(&mut stdin, "  You > ").await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if matches!(line.as_str(), "exit" | "quit") {
            break;
        }
        if let Err(e) = run_turn(&agent, &session_id, line, stream).await {
            eprintln!("  [Error] {e}");
        }
        println!();
    }

    println!();
    println!("  Goodbye!");
    Ok(())
}

async fn prompt(
    stdin: &mut Lines<BufReader<Stdin>>,
    label: &str,
) -> Result<Option<String>, std::io::Error> {
    print!("{label}");
    std::io::stdout().flush()?;
    stdin.next_line().await
}

/// Run one turn, aborting it on Ctrl-C.
async fn run_turn(
    agent: &Arc<AgentLoop>,
    session_id: &str,
    message: String,
    stream: bool,
) -> Result<TurnOutcome, Box<dyn std::error::Error>> {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let request = TurnRequest::user(message).with_session(session_id);
    let result = if stream {
        stream_turn(agent, request.streaming(), cancel).await
    } else {
        eprint!("  ...");
        let result = agent.run(request, cancel).await;
        eprint!("\r     \r");
        result.map_err(Into::into)
    };
    watcher.abort();

    let outcome = result?;
    if !stream {
        let label = if outcome.is_question() { "Question" } else { "Assistant" };
        for line in outcome.content().lines() {
            println!("  {label} > {line}");
        }
    }
    Ok(outcome)
}

async fn stream_turn(
    agent: &Arc<AgentLoop>,
    request: TurnRequest,
    cancel: CancellationToken,
) -> Result<TurnOutcome, Box<dyn std::error::Error>> {
    let session_id = request.session_id.clone().unwrap_or_default();
    let mut rx = agent.run_stream(request, cancel);
    let mut out = std::io::stdout();
    let mut answer = String::new();
    let mut asked = false;

    while let Some(event) = rx.recv().await {
        match &event {
            TurnEvent::Chunk { content_type, text } => {
                match content_type {
                    ContentType::Answer => answer.push_str(text),
                    ContentType::Ask => {
                        asked = true;
                        answer.push_str(text);
                    }
                    _ => {}
                }
                out.write_all(render_event(&event).as_bytes())?;
                out.flush()?;
            }
            TurnEvent::ToolCall { name, .. } => {
                println!("\n  [client tool '{name}' is not available in the terminal]");
            }
            TurnEvent::Done {
                finish_reason,
                steps,
                ..
            } => {
                println!();
                let message = if asked {
                    agentrelay_core::message::Message::assistant(answer.trim()).with_kind("ask")
                } else {
                    agentrelay_core::message::Message::assistant(answer.trim())
                };
                return Ok(TurnOutcome {
                    session_id,
                    message,
                    finish_reason: *finish_reason,
                    steps: *steps,
                });
            }
            TurnEvent::Error { message } => return Err(message.clone().into()),
        }
    }
    Err("turn ended without a result".into())
}

/// Terminal rendering of a streamed chunk.
pub fn render_event(event: &TurnEvent) -> String {
    let TurnEvent::Chunk { content_type, text } = event else {
        return String::new();
    };
    match content_type {
        ContentType::ActionStart => format!("\n  ⚙ {text}\n"),
        ContentType::Observation => format!("  {}\n", text.replace('\n', "\n  ")),
        ContentType::ActionEnd => String::new(),
        ContentType::Error => format!("\n  [Error] {text}\n"),
        _ => text.clone(),
    }
}
