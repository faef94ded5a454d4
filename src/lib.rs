pub mod auto_concurrency;
pub mod buildinfo;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod parse;
pub mod repo;
pub mod resolve;
pub mod server;
pub mod spec;
pub mod transfer;
pub mod util;

pub use error::TransferError;
