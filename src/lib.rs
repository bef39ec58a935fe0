//! Just-in-time node provisioning.
//!
//! Watches for pods the scheduler has given up on, batches them by the
//! constraints they jointly satisfy, bin-packs each batch onto the cheapest
//! feasible cloud instance types, and asks the provider to launch those
//! nodes.

pub mod binpacking;
pub mod cache;
pub mod config;
pub mod controller;
pub mod instance_type;
pub mod packable;
pub mod providers;
pub mod provisioner;
pub mod resources;
pub mod schedule;
