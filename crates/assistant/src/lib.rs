//! # Bizpilot Assistant
//!
//! The conversational pipeline that answers an owner's message using their
//! own business data and suggests actions against it:
//!
//! ```text
//! message → ContextRetriever → PromptAssembler → ModelInvoker → parse_actions
//!                                                                   ↓
//!                                     ActionDispatcher (only when the caller asks)
//! ```
//!
//! [`ChatService`] ties the stages to the stores and adds conversation
//! management, feedback and statistics. [`SearchService`] and
//! [`detect_intent`] are independent of the turn pipeline.

pub mod actions;
pub mod intent;
pub mod invoker;
pub mod prompt;
pub mod relevance;
pub mod retriever;
pub mod search;
pub mod service;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use actions::{ActionDispatcher, ActionError, ActionHandler, parse_actions, strip_actions};
pub use intent::{Intent, IntentMatch, detect_intent};
pub use invoker::{Invocation, ModelInvoker};
pub use prompt::PromptAssembler;
pub use relevance::{KeywordScorer, RelevanceScorer};
pub use retriever::{ContextBundle, ContextRetriever, RetrievalWindows};
pub use search::{DomainGroups, RecordSummary, SearchResults, SearchService};
pub use service::{ChatError, ChatReply, ChatService, ConversationDetail};
