pub mod capture;
pub mod clock;
pub mod encryption;
pub mod event_store;
pub mod hedged;
pub mod network;
pub mod relay;
pub mod scheduler;
pub mod transport;
pub mod upload;
pub mod worker;
