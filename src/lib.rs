pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod logging;
pub mod push;
pub mod upstream;

pub use tracing;

#[derive(Debug, Clone, Copy)]
pub enum Signal {
    Shutdown,
}
