//! Domain layer types and invariants.

pub mod error;
pub mod items;
pub mod level;

pub use error::DomainError;
pub use items::{AttributeValue, DocumentInfo, Item, ItemLink, ItemRevision};
pub use level::Level;
