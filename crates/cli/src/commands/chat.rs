//! `marginalia chat`: Interactive or single-message chat mode.

use std::io::Write;
use std::sync::Arc;

use marginalia_agent::{AgentError, AgentLoop, AgentOutcome, AgentStreamEvent, EXHAUSTED_MESSAGE};
use marginalia_config::AppConfig;
use marginalia_core::{CancellationToken, Message};
use marginalia_providers::OpenAiCompatProvider;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Tool results longer than this are shortened in the transcript.
const PREVIEW_CHARS: usize = 200;

pub struct ChatOptions {
    pub message: Option<String>,
    pub stream: bool,
    pub max_iterations: Option<u32>,
}

pub async fn run(options: ChatOptions) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if let Some(max) = options.max_iterations {
        config.agent.max_iterations = max;
    }
    if !options.stream {
        config.agent.stream = false;
    }

    // Check for API key early so the error is clear
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    MARGINALIA_API_KEY=sk-...");
        eprintln!("    OPENAI_API_KEY=sk-...");
        eprintln!();
        eprintln!("  Or add `api_key` to your config file:");
        eprintln!("    {}", AppConfig::config_path().display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let provider = OpenAiCompatProvider::from_config(&config)?;
    let tools = Arc::new(marginalia_tools::default_registry());
    let agent = AgentLoop::from_config(Arc::new(provider), tools, &config)?;

    let mut history = Vec::new();

    if let Some(msg) = options.message {
        // Single message mode
        history.push(Message::user(msg));
        let result = ask(&agent, &mut history).await;
        report(&result);
        return match result {
            Ok(_) | Err(AgentError::Cancelled) => Ok(()),
            Err(e) => Err(e.into()),
        };
    }

    // Interactive mode
    println!();
    println!("  Marginalia — interactive chat");
    println!();
    println!("  Endpoint:  {}", config.base_url);
    println!("  Model:     {}", config.model);
    println!("  Tools:     {}", agent.tools().names().join(", "));
    println!();
    println!("  Type your message and press Enter.");
    println!("  Ctrl+C stops the current reply; 'exit' or Ctrl+D quits.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }

        history.push(Message::user(input));
        println!();

        let mut turn = history.clone();
        let result = ask(&agent, &mut turn).await;
        report(&result);
        settle(&mut history, turn, result_text(&result));
        println!();
    }

    println!();
    println!("  Goodbye!");
    println!();

    Ok(())
}

/// Run the agent once over `history`, cancelling it on Ctrl+C.
async fn ask(agent: &AgentLoop, history: &mut Vec<Message>) -> Result<AgentOutcome, AgentError> {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let mut printer = Printer::default();
    let mut sink = |event: AgentStreamEvent| printer.handle(event);
    let result = agent.run(history, &mut sink, &cancel).await;

    watcher.abort();
    result
}

/// Tell the user how a run ended when the streamed output does not.
fn report(result: &Result<AgentOutcome, AgentError>) {
    match result {
        Ok(outcome) if outcome.is_exhausted() => {
            eprintln!("  [stopped after {} iterations]", outcome.iterations());
            if outcome.text() == EXHAUSTED_MESSAGE {
                println!("{EXHAUSTED_MESSAGE}");
            }
        }
        Ok(_) => {}
        Err(AgentError::Cancelled) => eprintln!("  (cancelled)"),
        Err(e) => eprintln!("  [Error] {e}"),
    }
}

fn result_text(result: &Result<AgentOutcome, AgentError>) -> Option<String> {
    result.as_ref().ok().map(|o| o.text().to_string())
}

/// Close out a turn. `history` ends with the user's message; `turn` is the
/// copy the agent ran over.
///
/// A finished run keeps everything it appended and gains the answer, minus
/// the system prompt the loop put in front (it adds a fresh one every run).
/// A cancelled or failed turn is dropped along with its user message, so the
/// next request is never sent tool calls without their results.
fn settle(history: &mut Vec<Message>, mut turn: Vec<Message>, answer: Option<String>) {
    match answer {
        Some(text) => {
            if !turn.is_empty() {
                turn.remove(0);
            }
            turn.push(Message::assistant(text));
            *history = turn;
        }
        None => {
            history.pop();
        }
    }
}

/// Renders agent events as they arrive.
#[derive(Default)]
struct Printer {
    mid_line: bool,
}

impl Printer {
    fn handle(&mut self, event: AgentStreamEvent) {
        match event {
            AgentStreamEvent::Chunk { content } => {
                print!("{content}");
                let _ = std::io::stdout().flush();
                self.mid_line = !content.ends_with('\n');
            }
            AgentStreamEvent::ToolCallPending { .. } => {}
            AgentStreamEvent::ToolCall { name, input, .. } => {
                self.end_line();
                eprintln!("  [tool] {name} {input}");
            }
            AgentStreamEvent::ToolResult { name, output, .. } => {
                eprintln!("  [tool] {name} -> {}", preview(&output, PREVIEW_CHARS));
            }
            AgentStreamEvent::Done { .. } => self.end_line(),
        }
    }

    fn end_line(&mut self) {
        if self.mid_line {
            println!();
            self.mid_line = false;
        }
    }
}

/// Shorten `text` to at most `max` characters, marking the cut.
fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marginalia_core::{MessageToolCall, Role};

    #[test]
    fn preview_respects_char_boundaries() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("ééééé", 3), "ééé…");
    }

    #[test]
    fn finished_turn_keeps_tool_round_and_answer_without_prompt() {
        let mut history = vec![Message::user("2+2?")];
        let turn = vec![
            Message::system("sys"),
            Message::user("2+2?"),
            Message::assistant_with_tool_calls(
                "",
                vec![MessageToolCall {
                    id: "c1".into(),
                    name: "calc".into(),
                    arguments: r#"{"expr":"2+2"}"#.into(),
                }],
            ),
            Message::tool_result("c1", "4"),
        ];
        settle(&mut history, turn, Some("4".into()));

        let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            [Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert_eq!(history[3].content, "4");
    }

    #[test]
    fn prompts_do_not_stack_across_turns() {
        let mut history = vec![Message::user("first")];
        let mut turn = history.clone();
        turn.insert(0, Message::system("sys"));
        settle(&mut history, turn, Some("one".into()));

        history.push(Message::user("second"));
        let mut turn = history.clone();
        turn.insert(0, Message::system("sys"));
        settle(&mut history, turn, Some("two".into()));

        assert!(history.iter().all(|m| m.role != Role::System));
        assert_eq!(history.len(), 4);
    }

    #[test]
    fn failed_turn_is_rolled_back() {
        let mut history = vec![
            Message::user("first"),
            Message::assistant("answer"),
            Message::user("second"),
        ];
        let turn = vec![
            Message::system("sys"),
            Message::user("first"),
            Message::assistant("answer"),
            Message::user("second"),
            Message::assistant_with_tool_calls("", vec![]),
        ];
        settle(&mut history, turn, None);
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "answer");
    }

    #[test]
    fn report_handles_every_outcome() {
        report(&Ok(AgentOutcome::Completed {
            text: "4".into(),
            iterations: 1,
            tool_calls_made: 0,
        }));
        report(&Ok(AgentOutcome::IterationExhausted {
            partial: EXHAUSTED_MESSAGE.into(),
            iterations: 2,
            tool_calls_made: 2,
        }));
        report(&Err(AgentError::Cancelled));
    }
}
