//! Beacon operator library
//!
//! Controller wiring for Installation resources. The monitoring logic itself
//! lives in `beacon-monitoring`.

pub mod controller;
