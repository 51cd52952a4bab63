//! # ripple-nav
//!
//! Fragment history and URL routing for the Ripple runtime.
//!
//! - **Platform** - The host navigation API, plus an in-memory implementation
//! - **WatchStrategy** - Push state > hash change > polling fallback ladder
//! - **History** - Owns the URL, the registered routes and the watcher
//! - **Router** - Named routes with captured arguments and route events
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Router    │────▶│   History   │────▶│  Platform   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │ check_url          │ pop-state /
//!        │ route:<name>      ▼                    │ hash-change
//!        └────────────── RoutePattern ◀───────────┘
//! ```
//!
//! There is one [`History`] per navigation surface. Create it explicitly
//! and hand it to each [`Router`].

pub mod config;
pub mod history;
pub mod pattern;
pub mod platform;
pub mod router;
pub mod strategy;

pub use config::{ConfigError, HistoryConfig};
pub use history::{History, HistoryError, NavigateOptions, RouteEvent, RouteHandler};
pub use pattern::{RouteError, RoutePattern};
pub use platform::{ListenerId, Location, MemoryPlatform, NavEvent, NavListener, Platform};
pub use router::{RouteAction, Router, RouterId};
pub use strategy::{select_strategy, WatchStrategy};
