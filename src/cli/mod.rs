//! Terminal front end
//!
//! - `Console` - Colored terminal output
//! - `TerminalChannel` - Stdin-driven channel adapter with local commands
//! - `ConsoleNotifier` - Prints proactive notifications
//! - `wait_for_shutdown` - Double Ctrl-C confirmation while workers run

mod console;
pub mod signals;
pub mod terminal;

pub use console::Console;
pub use signals::{wait_for_shutdown, ExitConfirmation};
pub use terminal::{Command, ConsoleNotifier, TerminalChannel};
