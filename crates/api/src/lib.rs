#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! PAMDes API Library
//!
//! HTTP surface of the PAMDes billing core: tariff administration, bills,
//! QRIS payments and the Tripay callback.

pub mod actor;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use actor::Actor;
pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
