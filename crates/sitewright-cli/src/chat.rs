// Interactive chat mode

use std::io::Write;
use std::path::PathBuf;

use rustyline::DefaultEditor;
use sitewright_chat::{ChatOrchestrator, MessageStatus};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{CliError, CliResult};
use crate::output::{self, OutputStyle};

/// Chat session bound to one terminal
pub struct ChatSession {
    orchestrator: ChatOrchestrator,
    output: Option<PathBuf>,
}

impl ChatSession {
    /// Create a new chat session; previews are written to `output` when set
    pub fn new(orchestrator: ChatOrchestrator, output: Option<PathBuf>) -> Self {
        Self {
            orchestrator,
            output,
        }
    }

    pub fn orchestrator(&self) -> &ChatOrchestrator {
        &self.orchestrator
    }

    /// Send one message and print the reply as it arrives
    ///
    /// Ctrl-C cancels the request in flight.
    pub async fn send(&mut self, input: &str) -> CliResult<()> {
        let signal = CancellationToken::new();
        let watcher = {
            let signal = signal.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    signal.cancel();
                }
            })
        };

        let mut printed = 0usize;
        let result = self
            .orchestrator
            .submit_with_signal(input, Some(signal), |message| {
                if let Some(delta) = message.content.get(printed..) {
                    print!("{}", delta);
                    let _ = std::io::stdout().flush();
                }
                printed = message.content.len();
            })
            .await;
        watcher.abort();

        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                if printed > 0 {
                    println!();
                }
                return Err(e.into());
            }
        };

        match reply.status {
            MessageStatus::Offline => {
                output::print_warning(
                    "No AI provider is configured, showing the offline starter page",
                );
                println!("{}", reply.content);
            }
            _ if printed == 0 => println!("{}", reply.content),
            _ => println!(),
        }

        let updated = self
            .orchestrator
            .preview()
            .map(|preview| preview.message_id == reply.id)
            .unwrap_or(false);
        if updated && self.write_preview()? {
            if let Some(path) = &self.output {
                output::print_success(&format!("Preview written to {}", path.display()));
            }
        }
        Ok(())
    }

    /// Write the current preview to the output file; returns whether anything was written
    pub fn write_preview(&self) -> CliResult<bool> {
        let (Some(path), Some(preview)) = (&self.output, self.orchestrator.preview()) else {
            return Ok(false);
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &preview.html)?;
        debug!(path = %path.display(), bytes = preview.html.len(), "Wrote preview");
        Ok(true)
    }

    /// Start interactive chat mode
    pub async fn start(&mut self) -> CliResult<()> {
        let style = OutputStyle::default();
        let (mut lines, ready) = spawn_line_reader(style.prompt("site>"));

        println!("Entering chat mode. Type 'exit' to quit, '/clear' to start over.");
        if !self.orchestrator.is_ready() {
            output::print_warning(
                "No AI provider is configured. Replies will use the offline starter page.",
            );
        }

        loop {
            let line = match lines.recv().await {
                Some(Ok(Some(line))) => line,
                Some(Err(e)) => return Err(CliError::Internal(e)),
                Some(Ok(None)) | None => {
                    println!("Goodbye!");
                    break;
                }
            };

            let line = line.trim();
            if line == "exit" || line == "quit" {
                println!("Goodbye!");
                break;
            }

            if line == "/clear" {
                self.orchestrator.clear();
                output::print_info("Conversation cleared");
            } else if !line.is_empty() {
                if let Err(e) = self.send(line).await {
                    output::print_error(&e.user_message());
                }
            }

            if ready.send(()).is_err() {
                break;
            }
        }

        Ok(())
    }
}

type ReadResult = Result<Option<String>, String>;

/// Read lines on a dedicated thread so the editor never crosses an await
///
/// The reader prompts again only after `ready` is signalled. `None` means
/// the user closed the input (Ctrl-D or Ctrl-C at the prompt).
fn spawn_line_reader(
    prompt: String,
) -> (tokio::sync::mpsc::Receiver<ReadResult>, std::sync::mpsc::Sender<()>) {
    let (line_tx, line_rx) = tokio::sync::mpsc::channel::<ReadResult>(1);
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<()>();

    std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                let _ = line_tx.blocking_send(Err(e.to_string()));
                return;
            }
        };

        loop {
            let line = match rl.readline(&prompt) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        let _ = rl.add_history_entry(line.as_str());
                    }
                    Some(line)
                }
                Err(_) => None,
            };
            let closed = line.is_none();
            if line_tx.blocking_send(Ok(line)).is_err() || closed {
                break;
            }
            if ready_rx.recv().is_err() {
                break;
            }
        }
    });

    (line_rx, ready_tx)
}
