pub mod admission;
pub mod config;
pub mod logging;
pub mod rest_store;
