//! Store implementations for Bizpilot.
//!
//! Both backends implement `DomainStore` and `ConversationStore`.

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// Case-insensitive substring test over optional fields.
pub(crate) fn any_contains(needle: &str, fields: &[Option<&str>]) -> bool {
    let needle = needle.to_lowercase();
    fields
        .iter()
        .flatten()
        .any(|f| f.to_lowercase().contains(&needle))
}
