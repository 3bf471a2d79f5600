//! Shared domain types for the DevCraft generation client.
//!
//! Job handles, status snapshots, terminal outcomes and the JSON
//! payloads exchanged with the DevCraft API.

pub mod error;
pub mod status;
pub mod types;
pub mod wire;
