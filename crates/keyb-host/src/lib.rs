//! # keyb-host
//!
//! Host integration for the [`keyb_core`] engine: TOML configuration,
//! directory-backed resource stores, and the `keyb` diagnostic binary.
//!
//! The engine itself never touches the filesystem or knows where its
//! layout and code-page files live; this crate supplies those concerns
//! the way an emulator embedding the engine would.

pub mod config;
pub mod resources;
