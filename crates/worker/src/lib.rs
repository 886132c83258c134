//! Device daemon for the fieldsync engine.

pub mod command;
pub mod config;
