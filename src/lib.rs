//! Kernel-side pieces around the pager: runtime configuration and the
//! program loader.

pub mod config;
pub mod loader;
