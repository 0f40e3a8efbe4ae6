//! Environment module
//!
//! The local `.env` file and the names of the keys it carries.

pub mod keys;
pub mod store;

pub use store::EnvStore;
