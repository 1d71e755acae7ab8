//! Shared type definitions
//!
//! This module contains the data types used across the adapter.

pub mod config;
pub mod generation;
pub mod message;
pub mod model;
pub mod request;
