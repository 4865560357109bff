//! API route modules.

pub mod sessions;
