//! Types and helpers shared between the player and its control clients.

pub mod chunk;
pub mod config;
pub mod directory;
pub mod platform;
pub mod protocol;
