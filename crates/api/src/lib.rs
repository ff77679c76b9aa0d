pub mod app;
pub mod middleware;
