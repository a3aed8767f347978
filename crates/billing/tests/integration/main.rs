//! Database-backed billing tests
//!
//! These tests need a disposable Postgres database. Migrations are applied on
//! connect and every test works in its own freshly created village.
//!
//! ## Running Tests
//! ```bash
//! export DATABASE_URL="postgres://localhost/pamdes_test"
//! cargo test -p pamdes-billing --test integration -- --ignored --test-threads=1
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

mod common;
mod payment_flow;
mod tariff_ranges;
