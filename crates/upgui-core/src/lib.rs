//! # upgui-core - Core Domain Types
//!
//! Foundation crate for the uPlexa GUI backend. Provides the configuration
//! model, startup status codes, IPC envelope types, error handling, and the
//! logging bootstrap.
//!
//! This crate has **zero internal dependencies** -- it only depends on
//! external crates (serde, thiserror, tracing).
//!
//! ## Public API
//!
//! ### Configuration (`config`)
//! - [`Configuration`] - Section map with shallow-per-section merge and
//!   restart-diff rules
//! - [`AppSettings`], [`AppearanceSettings`], [`DaemonSettings`],
//!   [`WalletSettings`] - Typed section views with compiled-in defaults
//! - [`DaemonMode`] - local / remote / local_remote
//!
//! ### Status (`status`)
//! - [`StatusCode`], [`StartupState`] - The integer status codes the UI
//!   renders (frozen contract)
//!
//! ### IPC (`ipc`)
//! - [`Request`], [`Event`] - The `{module, method, data}` / `{event, data}`
//!   envelopes
//! - [`TargetModule`], [`CoreMethod`] - Closed dispatch enums with explicit
//!   unknown-is-no-op arms
//! - [`Notification`], [`Severity`] - User-visible toasts
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Custom error enum covering config, path, process, and RPC
//!   failures
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use upgui_core::prelude::*;
//! ```

pub mod config;
pub mod error;
pub mod ipc;
pub mod logging;
pub mod status;

/// Prelude for common imports used throughout all backend crates
pub mod prelude {
    pub use super::error::{Error, Result};
    pub use tracing::{debug, error, info, trace, warn};
}

// Re-export commonly used types at crate root for convenience
pub use config::{
    AppSettings, AppearanceSettings, Configuration, DaemonMode, DaemonSettings, DataPaths,
    Section, WalletSettings,
};
pub use error::{Error, Result};
pub use ipc::{CoreMethod, Event, Notification, Request, Severity, TargetModule};
pub use status::{StartupState, StatusCode};
