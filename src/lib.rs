#![forbid(unsafe_code)]
#![allow(clippy::missing_errors_doc)]

pub mod config;
pub mod core;
pub mod error;
pub mod events;
pub mod fetch;
pub mod lifecycle;
pub mod order;
pub mod store;
