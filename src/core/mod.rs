//! Core types - pure abstractions shared across the codebase.

mod driver;
mod state;

pub use driver::BuildMode;
pub use state::{
    is_healthy, is_serving, is_shutdown, register_server, set_healthy, set_serving,
    setup_shutdown_handler,
};
