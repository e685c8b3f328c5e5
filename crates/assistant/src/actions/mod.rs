//! Actions the assistant can request: directive parsing, document templates,
//! and the dispatcher with its built-in handlers.

pub mod dispatcher;
pub mod handlers;
pub mod parser;
pub mod templates;

pub use dispatcher::{ActionDispatcher, ActionError, ActionHandler};
pub use parser::{parse_actions, strip_actions};
