// Lockstep Infrastructure - System Adapters
// Implements: JobHandler (child processes)

pub mod command_handler;

pub use command_handler::{CommandHandler, CommandSpec};
