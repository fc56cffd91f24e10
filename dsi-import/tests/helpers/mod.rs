//! Test Helper Utilities
//!
//! Shared utilities for testing dsi-import

#![allow(dead_code)]

pub mod catalog_utils;
pub mod dataset_builder;

pub use catalog_utils::{count_rows, create_test_env, parameter_value, seed_subject, TestEnv};
pub use dataset_builder::{write_file, DatasetBuilder, PARTICIPANTS_HEADER};
