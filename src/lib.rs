pub mod config;
pub mod debugger;
