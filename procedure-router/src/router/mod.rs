//! Router implementation with builder pattern
//!
//! This module provides the [`Router`] builder and the [`CompiledRouter`] it
//! compiles into.
//!
//! # Router
//!
//! ```rust,ignore
//! let router = Router::new()
//!     .context(AppContext::default())
//!     .middleware(request_logging)
//!     .procedure("health", procedure().query(health))
//!     .group("users", users())
//!     .procedure("chat", procedure().incoming(chat_events()).realtime(open_chat))
//!     .mount("/api/admin", admin_router()?)
//!     .compile()?;
//! ```
//!
//! # Routes
//!
//! Each procedure path `p` is bound to `/p`: reads and realtime procedures
//! answer `GET`, writes answer `POST`. Requests whose first two segments match
//! a mount key are delegated before route matching.
//!
//! [`CompiledRouter`] implements [`DynRouter`], so compiled routers of any
//! context type can be mounted under each other.

mod core;
mod dispatch;
mod service;
mod subrouter;

pub use core::{CompiledRouter, Router};
pub use service::RouterService;
pub use subrouter::{DynRouter, mount_key, rewrite_uri};
