//! Core renderer settings

pub mod config;
