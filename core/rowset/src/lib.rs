//! FILENAME: core/rowset/src/lib.rs
//! Shared record types for the pivot and drill engines.
//!
//! Backend payloads are flat records mapping a field name to a scalar.
//! This crate keeps those records in backend field order so that column
//! synthesis can follow the order the backend chose.

pub mod value;
pub mod row;

pub use value::Value;
pub use row::Row;
