#![deny(unsafe_code)]

//! Shared test utilities for the Colloquy workspace.
//!
//! Provides config builders, a scripted mock provider server, event
//! drain helpers, and tracing setup so that individual crate tests stay
//! concise and consistent.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! colloquy-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod events;
pub mod mock;
pub mod tracing_setup;
