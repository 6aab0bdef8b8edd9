//! Application wiring and commands.

mod commands;
mod runtime;

pub use commands::{listen, login, logout, request, status};
pub use runtime::SessionRuntime;
