pub mod args;
pub mod session;

pub use args::{Cli, CliCommand, SessionCliArgs, SessionCommand};
pub use session::handle_session_command;
