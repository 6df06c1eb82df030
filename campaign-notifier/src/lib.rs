pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod decoder;
pub mod error;
pub mod join;
pub mod metrics_consts;
pub mod pipeline;
pub mod reference;
pub mod retry;
pub mod server;
pub mod sink;
pub mod stream;
pub mod test_utils;
pub mod types;
pub mod window;
