//! Interactive coaching chat in the terminal.

use async_trait::async_trait;
use habitcoach_core::config::CoachConfig;
use habitcoach_core::dialogue::{ChatMode, DialogueCallback, GoalCompletion, VoiceState};
use habitcoach_core::error::DialogueError;
use habitcoach_core::typewriter::Typewriter;
use habitcoach_core::voice::{DiscardReason, TurnInput, TurnOrchestrator, TurnOutcome};
use std::io::{IsTerminal, Write};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

/// Prints dialogue events for a terminal user.
struct CliCallback;

#[async_trait]
impl DialogueCallback for CliCallback {
    async fn on_state_change(&self, state: VoiceState) {
        debug!(state = %state, "Dialogue state changed");
        if state == VoiceState::Processing {
            print!("\x1b[90m  ...\x1b[0m\r");
            let _ = std::io::stdout().flush();
        }
    }

    async fn on_complete(&self, completion: &GoalCompletion) {
        println!("\n\x1b[1;32m목표 설정이 끝났어요!\x1b[0m");
        match serde_json::to_string_pretty(completion) {
            Ok(json) => println!("{}", json),
            Err(e) => println!("\x1b[31mError: {}\x1b[0m", e),
        }
    }
}

/// Reveal a reply through the typewriter. Returns once the text is committed.
async fn render_reply(typewriter: &Typewriter, text: &str, history: &Arc<Mutex<Vec<String>>>) {
    let history = history.clone();
    let mut handle = typewriter.animate(text, move |full| {
        if let Ok(mut lines) = history.lock() {
            lines.push(full);
        }
    });

    // Piped output gets the whole reply at once.
    if !std::io::stdout().is_terminal() {
        handle.skip();
    }

    print!("\n\x1b[32m코치:\x1b[0m ");
    let mut rx = handle.subscribe();
    let mut printed = 0;
    loop {
        let shown = rx.borrow_and_update().clone();
        if shown.len() > printed {
            print!("{}", &shown[printed..]);
            let _ = std::io::stdout().flush();
            printed = shown.len();
        }
        if printed >= handle.full_text().len() || rx.changed().await.is_err() {
            break;
        }
    }
    handle.finished().await;
    println!("\n");
}

fn print_help() {
    println!("  /status   현재까지 파악한 목표를 보여줘요");
    println!("  /history  지금까지의 코치 답변을 보여줘요");
    println!("  /quit     대화를 끝내요");
}

/// Run the interactive chat until the goal is complete or the user quits.
pub async fn run_chat(
    config: CoachConfig,
    mode: ChatMode,
    user_name: Option<String>,
) -> anyhow::Result<()> {
    let provider = habitcoach_core::providers::create_provider(&config.llm)?;
    let typewriter = Typewriter::from_config(&config.typewriter);
    let model = provider.model_name().to_string();

    let mut orchestrator =
        TurnOrchestrator::new(provider, config, mode, Arc::new(CliCallback));
    if let Some(name) = user_name {
        orchestrator = orchestrator.with_user_name(name);
    }
    info!(
        session = %orchestrator.session().id(),
        mode = %mode,
        model = %model,
        "Chat started"
    );

    println!("\x1b[1;32mhabitcoach\x1b[0m \x1b[90m({}, {})\x1b[0m", mode, model);
    println!("  Type /help for commands, /quit to exit");

    let history = Arc::new(Mutex::new(Vec::new()));
    render_reply(&typewriter, orchestrator.opening_question(), &history).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\x1b[1;34m> \x1b[0m");
        let _ = std::io::stdout().flush();

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            orchestrator.teardown().await;
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/quit" | "/exit" | "/q" => {
                orchestrator.teardown().await;
                println!("다음에 또 이야기해요!");
                break;
            }
            "/help" => {
                print_help();
                continue;
            }
            "/status" => {
                let session = orchestrator.session();
                println!("{}", serde_json::to_string_pretty(session.record())?);
                println!(
                    "\x1b[90mstep: {}, state: {}, turns: {}\x1b[0m",
                    session.step(),
                    session.state(),
                    session.memory().len()
                );
                continue;
            }
            "/history" => {
                if let Ok(entries) = history.lock() {
                    for (i, entry) in entries.iter().enumerate() {
                        println!("{:>3}. {}", i + 1, entry);
                    }
                }
                continue;
            }
            cmd if cmd.starts_with('/') => {
                println!("Unknown command: {}. Type /help for commands.", cmd);
                continue;
            }
            _ => {}
        }

        match orchestrator
            .submit_turn(TurnInput::Text(input.to_string()))
            .await
        {
            Ok(TurnOutcome::Replied(result)) => {
                render_reply(&typewriter, &result.text, &history).await;
                // No audio device here: a spoken reply counts as played once shown.
                if result.awaiting_playback() {
                    debug!(mime = ?result.mime_type, "Skipping playback of spoken reply");
                    orchestrator.playback_finished().await?;
                }
                if orchestrator.session().is_closed() {
                    println!("홈에서 봐요!");
                    break;
                }
            }
            Ok(TurnOutcome::Discarded { reason }) => {
                let hint = match reason {
                    DiscardReason::AudioTooShort => "녹음이 너무 짧았어요.",
                    DiscardReason::EmptyInput => "입력이 비어 있어요.",
                    DiscardReason::EmptyReply | DiscardReason::ReplyTooShort => {
                        "답변을 제대로 받지 못했어요."
                    }
                };
                println!("\x1b[33m{} 다시 말씀해 주세요.\x1b[0m", hint);
            }
            Ok(TurnOutcome::Failed { apology }) => {
                println!("\n\x1b[31m코치:\x1b[0m {}\n", apology);
            }
            Ok(TurnOutcome::Cancelled) | Err(DialogueError::SessionClosed) => break,
            Err(e) => {
                println!("\x1b[31mError: {}\x1b[0m", e);
            }
        }
    }

    let usage = orchestrator.brain().total_usage();
    info!(
        input_tokens = usage.input_tokens,
        output_tokens = usage.output_tokens,
        "Chat ended"
    );
    Ok(())
}
