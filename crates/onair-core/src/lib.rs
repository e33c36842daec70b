pub mod catalog;
pub mod config;
pub mod error;
pub mod platform;
pub mod schedule;
pub mod view;
