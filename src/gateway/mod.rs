//! HTTP server assembly

mod router;
mod server;

pub use router::create_router;
pub use server::Gateway;
