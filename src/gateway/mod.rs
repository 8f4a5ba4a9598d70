pub mod handlers;
mod rejection;
mod routes;

pub use rejection::handle_rejection;
pub use routes::routes;
