//! System utilities
//!
//! Accelerator detection used to resolve model placement at load time.

pub mod gpu;
