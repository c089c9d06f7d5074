pub mod middleware;

pub use middleware::{ApiRequest, AuthClient};
