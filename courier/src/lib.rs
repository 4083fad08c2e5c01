pub mod config;
pub mod controller;

pub use controller::{Courier, SHUTDOWN_BROADCAST};
