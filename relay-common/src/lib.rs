pub mod compose;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod metrics;
pub mod post;
pub mod relay;
pub mod retry;
pub mod wordpress;
