//! Hot-reloadable static configuration engine (components L/M/N, §4.L-N):
//! a typed [`container::ConfigContainer`] per record type, an XML
//! [`loader`] that fills one from a file, and a [`manager::ConfigManager`]
//! that owns the type->container registry and performs atomic multi-table
//! reloads with rollback.

pub mod container;
pub mod converters;
pub mod loader;
pub mod manager;
pub mod schema;

pub use container::{ConfigContainer, ConfigRecord};
pub use manager::{ConfigManager, ReloadListener, ReloadResult};
pub use schema::{ConfigSchema, FieldBinding};
