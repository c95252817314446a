pub mod api;
pub mod aspect;
pub mod error;
pub mod filter;
pub mod key;
pub mod registry;
pub mod relationship;
pub mod schema;
pub mod schema_manifest;
pub mod urn;

pub use api::*;
pub use aspect::*;
pub use error::{ChronicleError, ChronicleResult};
pub use filter::*;
pub use key::*;
pub use registry::*;
pub use relationship::*;
pub use schema::*;
pub use schema_manifest::*;
pub use urn::*;
