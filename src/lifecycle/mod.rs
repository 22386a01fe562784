//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     Load config → Validate → Build components → Spawn background loops
//!
//! Shutdown (shutdown.rs):
//!     trigger() → every loop's select! sees recv() → loop exits after its
//!     current batch
//! ```
//!
//! # Design Decisions
//! - Background loops never own request-path state; they stop independently
//! - A loop finishes the batch in hand before exiting

pub mod shutdown;

pub use shutdown::Shutdown;
