pub mod batch;
pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod normalize;
pub mod pipeline;
pub mod reference;
pub mod server;
pub mod sink;
pub mod timestamp;
pub mod transport;
