mod app;
pub mod webhook;

pub use app::add_routes;
