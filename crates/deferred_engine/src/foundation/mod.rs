//! Foundation module - core utilities shared by the renderer
//!
//! - Math types and conversions
//! - Injectable logging

pub mod logging;
pub mod math;
