pub mod auth;
pub mod payments;
pub mod routes;
