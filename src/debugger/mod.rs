//! ocamldebug protocol plumbing
//!
//! Leaf pieces (argument classification, port search, output
//! classification) at the bottom; [`core::SessionCore`] ties them into the
//! protocol state of one session, and [`process`]/[`debuggee`] own the two
//! subprocesses.

pub mod arguments;
pub mod breakpoints;
pub mod codec;
pub mod command;
pub mod core;
pub mod debuggee;
pub mod events;
pub mod port;
pub mod process;
pub mod protocol;
pub mod stack;
pub mod time_index;
pub mod transcript;
pub mod watcher;

pub use arguments::Arguments;
pub use command::Visibility;
pub use events::{SessionEvent, SessionState};
