pub mod catalog;
pub mod definition;
pub mod resource;

pub use catalog::Catalog;
pub use definition::{
    FieldDefinition, FieldRules, FieldType, Permissions, ResourceDefinition, RESERVED_FIELDS,
};
pub use resource::{ChangeSet, Resource};
