//! Bundle planning for vault actions
//!
//! A bundle is the ordered list of operations for one user intent, the
//! signatures and approval transactions it depends on, and the bundler
//! multicall that executes it atomically.

pub mod builder;
pub mod types;


pub use builder::BundleBuilder;
pub use types::*;
