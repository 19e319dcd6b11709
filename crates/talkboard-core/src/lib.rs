//! Core types, config, and errors for Talkboard.

pub mod config;
pub mod error;
pub mod types;

pub use error::{Result, TalkboardError};
