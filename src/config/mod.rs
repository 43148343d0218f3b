//! Backend configuration: precision and language policies.

pub mod policy;

pub use policy::{Dialect, Policy, Precision};
