pub mod error;
pub mod middleware;
pub mod models;
pub mod server;
pub mod services;
pub mod state;

pub use server::{build_router, run};
