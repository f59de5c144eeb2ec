pub mod entity;
pub mod error;
pub mod ids;
pub mod records;

pub use entity::{CollectionKey, CreatorApp, Entity, EntityMeta, EntityType, UPLOAD_ORDER};
pub use error::CoreError;
pub use ids::*;
pub use records::*;
