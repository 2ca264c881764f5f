pub mod api;
pub mod config;
pub mod engine;
pub mod limits;
pub mod maintenance;
pub mod model;
pub mod notify;
pub mod observability;
pub mod relay;
pub mod seed;
pub mod slot;
pub mod tenant;
pub mod wal;
