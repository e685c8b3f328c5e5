//! # Bizpilot Core
//!
//! Domain types, traits, and error definitions for the Bizpilot business
//! assistant. This crate has **zero framework dependencies**: it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (model backend, domain stores, conversation
//! persistence) is defined as a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod action;
pub mod error;
pub mod message;
pub mod provider;
pub mod records;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use action::{ActionRequest, ActionResult, ActionType};
pub use error::{ProviderError, StoreError};
pub use message::{
    ChatStatistics, ContextRefs, Conversation, ConversationUpdate, Message, NewMessage, Role,
};
pub use provider::{ChatTurn, Provider, ProviderRequest, ProviderResponse, Usage};
pub use records::{
    Campaign, CampaignStatus, Document, Domain, FinanceKind, FinanceRecord, NewCampaign,
    NewDocument, NewFinanceRecord, NewTask, OwnerId, RecordId, Task, TaskPriority, TaskStatus,
};
pub use store::{ConversationStore, DomainStore, ListQuery};
