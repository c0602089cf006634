pub mod config;
pub mod lock;
pub mod logging;
pub mod model;
pub mod notify;
pub mod provider;
pub mod scheduler;
pub mod store;
pub mod version;
