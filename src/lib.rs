// Library for tests to access modules

pub mod aggregator;
pub mod clock;
pub mod config;
pub mod models;
pub mod poller;
pub mod registry;
pub mod store;
pub mod usage;
pub mod version;
