pub mod auth;
pub mod community;
pub mod conversations;
pub mod error;
pub mod groups;
pub mod messages;
pub mod middleware;
pub mod routes;
pub mod status;
pub mod users;

pub use routes::api_router;
