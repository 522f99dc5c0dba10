// Application layer - use cases and orchestration over the repository.

pub mod error;
pub mod service;
pub mod summary;

pub use error::*;
pub use service::*;
pub use summary::*;
