//! Utility modules: developer bench logging and numeric conversions.
pub mod devlog;
pub mod num;
