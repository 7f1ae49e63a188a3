pub mod api;
pub mod event;
pub mod job;
pub mod message;
pub mod relay;
