//! Demo procedures - router, types, and context

mod context;
mod handlers;
mod types;

pub use context::*;
pub use handlers::*;
pub use types::*;
