//! Centralized constants for quotactl.
//!
//! All project-wide constant values live here.
//! Change a value in one place and it applies everywhere.

pub mod api;
pub mod env;
pub mod exit;
pub mod retry;
