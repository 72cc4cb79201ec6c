mod datasets;
mod response;
mod server;

pub use datasets::list_datasets;
pub use response::ApiError;
pub use server::{GatewayServer, HealthResponse, REQUEST_ID_HEADER};
