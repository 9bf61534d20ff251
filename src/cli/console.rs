use colored::*;
use std::io::{self, Write};

use crate::core::Channel;
use crate::runtime::WorkerSummary;

/// Console handles all terminal output with colored formatting
pub struct Console {
    user_color: Color,
    assistant_color: Color,
    worker_color: Color,
}

impl Console {
    /// Create a new Console with default colors
    pub fn new() -> Self {
        Self {
            user_color: Color::Cyan,
            assistant_color: Color::Green,
            worker_color: Color::Magenta,
        }
    }

    /// Print the input prompt (without newline)
    pub fn print_prompt(&self) {
        print!("{} ", ">".color(self.user_color).bold());
        let _ = io::stdout().flush();
    }

    /// Print an assistant message prefix (without newline)
    pub fn print_assistant_prefix(&self) {
        print!("{} ", "Assistant:".color(self.assistant_color).bold());
        let _ = io::stdout().flush();
    }

    /// Print a chunk of assistant response (for streaming)
    pub fn print_assistant_chunk(&self, chunk: &str) {
        print!("{}", chunk.color(self.assistant_color));
        let _ = io::stdout().flush();
    }

    /// Print a complete assistant message with colored formatting
    pub fn print_assistant(&self, message: &str) {
        println!(
            "{} {}",
            "Assistant:".color(self.assistant_color).bold(),
            message.color(self.assistant_color)
        );
    }

    /// Print a newline
    pub fn println(&self) {
        println!();
    }

    /// Print a system message (errors, info, etc.)
    pub fn print_system(&self, message: &str) {
        println!("{} {}", "System:".yellow().bold(), message);
    }

    /// Print an error message
    pub fn print_error(&self, error: &str) {
        eprintln!("{} {}", "Error:".red().bold(), error);
    }

    /// Print a proactive notification (background results)
    pub fn print_notification(&self, text: &str, channel: Option<&Channel>) {
        let label = match channel {
            Some(channel) => format!("[{}]", channel),
            None => "[all]".to_string(),
        };
        println!();
        println!(
            "{} {}",
            format!("Notification {}:", label).color(self.worker_color).bold(),
            text
        );
    }

    /// Print the worker table
    pub fn print_workers(&self, workers: &[WorkerSummary]) {
        if workers.is_empty() {
            self.print_system("No active workers.");
            return;
        }

        println!("{}", "Workers:".color(self.worker_color).bold());
        for worker in workers {
            let status = match worker.status.as_str() {
                "running" => worker.status.as_str().yellow(),
                "error" => worker.status.as_str().red(),
                other => other.normal(),
            };
            println!(
                "  {} {} {}",
                worker.name.color(self.worker_color),
                format!("[{}]", status),
                worker.working_context.bright_black()
            );
        }
    }

    /// Print a welcome banner
    pub fn print_banner(&self) {
        println!("{}", "=".repeat(60).bright_blue());
        println!("{}", "  Shadow Assistant".bright_blue().bold());
        println!("{}", "=".repeat(60).bright_blue());
        println!();
        println!("Type a message and press Enter. Commands: /cancel, /workers, /quit");
        println!();
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}
