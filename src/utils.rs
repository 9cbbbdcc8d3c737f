#![forbid(unsafe_code)]

pub mod config;
pub mod errors;
pub mod hello_utils;
