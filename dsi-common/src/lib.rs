//! # DSI Common Library
//!
//! Shared code for the dataset import tools including:
//! - Catalog schema bootstrap and row models
//! - Configuration loading and data root resolution
//! - Common error types

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};
