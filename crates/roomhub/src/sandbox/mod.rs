//! Self-contained rental backend speaking the same JSON API the HTTP client
//! targets. Used for local development, demos, and end-to-end tests.

mod router;
mod state;

pub use router::sandbox_router;
pub use state::{SandboxBackend, SandboxError};
