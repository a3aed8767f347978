//! PAMDes Shared Types and Utilities
//!
//! Types, errors, and helpers shared by the billing core, the API server and the worker.

pub mod db;
pub mod error;
pub mod policy;
pub mod types;

pub use db::*;
pub use error::*;
pub use policy::{can, Action, Resource, Role};
pub use types::*;
