pub mod config;
pub mod db;
pub mod directory;
pub mod error;
pub mod graph;

pub use config::Config;
pub use error::{CaselinkError, Result};
pub use graph::{Edge, Endpoint, EndpointKind, EntityRef, RoleLabel};
