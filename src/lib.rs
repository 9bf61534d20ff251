pub mod core;
pub mod runtime;
pub mod session;
pub mod store;
pub mod tools;

// Process-level configuration and logging
pub mod config;
pub mod logging;

// Terminal front end
pub mod cli;

#[cfg(test)]
pub(crate) mod testing;
