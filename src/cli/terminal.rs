//! Terminal channel - Feeds stdin lines to the coordinator
//!
//! Each line becomes a `Channel::Terminal` turn. Replies stream back while
//! the user can keep typing; `/cancel`, `/workers` and `/quit` are handled
//! locally.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::core::{Channel, Delivery, DeliveryCallback};
use crate::runtime::{Coordinator, LogNotifier, Notifier};

use super::console::Console;
use super::signals::ExitConfirmation;

/// A parsed line of terminal input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Blank line
    Empty,
    /// Cancel the turn in flight and everything queued
    Cancel,
    /// Show live workers
    Workers,
    /// Leave the terminal
    Quit,
    /// Unrecognized slash command
    Unknown(String),
    /// A prompt for the assistant
    Prompt(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Command::Empty;
        }
        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            return Command::Quit;
        }

        match line.strip_prefix('/') {
            Some(command) => match command.to_ascii_lowercase().as_str() {
                "cancel" => Command::Cancel,
                "workers" => Command::Workers,
                "quit" | "exit" => Command::Quit,
                _ => Command::Unknown(line.to_string()),
            },
            None => Command::Prompt(line.to_string()),
        }
    }
}

/// Tracks the part of the current streamed reply already on screen
#[derive(Debug, Default)]
struct ReplyProgress {
    shown: String,
}

impl ReplyProgress {
    /// The part of `text` not yet printed, if `text` extends what was printed
    fn unseen<'a>(&self, text: &'a str) -> Option<&'a str> {
        text.strip_prefix(self.shown.as_str())
    }

    fn is_empty(&self) -> bool {
        self.shown.is_empty()
    }
}

/// Interactive terminal front end for a coordinator
pub struct TerminalChannel {
    coordinator: Arc<Coordinator>,
    console: Console,
}

impl TerminalChannel {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            coordinator,
            console: Console::new(),
        }
    }

    /// Read stdin until EOF or a confirmed `/quit`
    pub async fn run(&self) -> io::Result<()> {
        self.console.print_banner();
        self.console.print_prompt();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let (updates_tx, mut updates_rx) = mpsc::unbounded_channel::<Delivery>();
        let mut progress = ReplyProgress::default();
        let mut confirmation = ExitConfirmation::new();
        let mut stdin_open = true;

        loop {
            tokio::select! {
                line = lines.next_line(), if stdin_open => {
                    let Some(line) = line? else {
                        let running = self.coordinator.running_workers();
                        if running == 0 {
                            break;
                        }
                        // No way to confirm without input; wait for Ctrl-C
                        stdin_open = false;
                        self.console.println();
                        self.console.print_system(&format!(
                            "Input closed with {} worker(s) running. Press Ctrl-C to stop them and exit.",
                            running
                        ));
                        continue;
                    };

                    let command = Command::parse(&line);
                    if command != Command::Quit {
                        confirmation.reset();
                    }

                    match command {
                        Command::Empty => {}
                        Command::Quit => {
                            let running = self.coordinator.running_workers();
                            if confirmation.request(running) {
                                break;
                            }
                            self.console.print_system(&format!(
                                "{} worker(s) still running. Type /quit again to stop them and exit.",
                                running
                            ));
                        }
                        Command::Cancel => {
                            if self.coordinator.cancel() {
                                self.console.print_system("Cancelled.");
                            } else {
                                self.console.print_system("Nothing to cancel.");
                            }
                        }
                        Command::Workers => self.console.print_workers(&self.coordinator.list_workers()),
                        Command::Unknown(command) => {
                            self.console.print_error(&format!("Unknown command: {}", command));
                        }
                        Command::Prompt(prompt) => {
                            let tx = updates_tx.clone();
                            let deliver: DeliveryCallback = Box::new(move |text: &str, done: bool| {
                                let _ = tx.send(Delivery {
                                    text: text.to_string(),
                                    done,
                                });
                            });
                            self.coordinator.submit(prompt, Channel::Terminal, deliver);
                            continue;
                        }
                    }
                    self.console.print_prompt();
                }
                Some(update) = updates_rx.recv() => {
                    self.render(&mut progress, update);
                }
            }
        }

        Ok(())
    }

    fn render(&self, progress: &mut ReplyProgress, update: Delivery) {
        if !update.done {
            match progress.unseen(&update.text) {
                Some(unseen) => {
                    if progress.is_empty() {
                        self.console.print_assistant_prefix();
                    }
                    self.console.print_assistant_chunk(unseen);
                }
                // A retried turn restarts its reply
                None => {
                    self.console.println();
                    self.console.print_assistant_prefix();
                    self.console.print_assistant_chunk(&update.text);
                }
            }
            progress.shown = update.text;
            return;
        }

        if update.text.starts_with("Error: ") {
            if !progress.is_empty() {
                self.console.println();
            }
            self.console.print_error(update.text.trim_start_matches("Error: "));
        } else if progress.is_empty() {
            self.console.print_assistant(&update.text);
        } else {
            match progress.unseen(&update.text) {
                Some(rest) => self.console.print_assistant_chunk(rest),
                None => {
                    self.console.println();
                    self.console.print_assistant(&update.text);
                }
            }
            self.console.println();
        }

        *progress = ReplyProgress::default();
        self.console.print_prompt();
    }
}

/// Notifier that prints terminal-bound and broadcast notifications
///
/// Notifications for other channels are only logged; their transports live
/// outside this process.
#[derive(Default)]
pub struct ConsoleNotifier {
    console: Console,
}

impl ConsoleNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Notifier for ConsoleNotifier {
    fn notify(&self, text: &str, channel: Option<&Channel>) {
        match channel {
            None | Some(Channel::Terminal) => {
                self.console.print_notification(text, channel);
                self.console.print_prompt();
            }
            Some(_) => LogNotifier.notify(text, channel),
        }
    }
}
