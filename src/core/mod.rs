#![forbid(unsafe_code)]

pub mod exec;
pub mod git;
pub mod naming;
