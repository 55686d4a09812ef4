//! Playback session layer: one native engine session per load, a single
//! active session receiving commands, and asynchronous retirement of the
//! sessions it replaces.
//!
//! Start with [`Playback`] for the host-facing API, or drive a
//! [`SessionManager`] directly.

pub mod config;
pub mod engine;
pub mod error;
pub mod facade;
pub mod manager;
pub mod surface;
pub mod teardown;
pub mod worker;

pub use config::SessionConfig;
pub use error::PlaybackError;
pub use facade::Playback;
pub use manager::{ManagerEvent, SessionManager};
pub use surface::SurfaceRegistry;
