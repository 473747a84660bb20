pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod gap;
pub mod ledger;
pub mod naming;
pub mod output;
pub mod paths;
pub mod persist;
pub mod raster;
pub mod summary;
