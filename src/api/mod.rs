pub mod error;
pub mod routes;

pub use error::ErrorResponse;
pub use routes::{create_router, AppState};
