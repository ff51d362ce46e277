pub mod backup;
pub mod bootstrap;
pub mod catalog;
pub mod config;
pub mod diagnostics;
pub mod domain;
pub mod error;
pub mod json_parse;
pub mod migrate;
pub mod schema;
pub mod storage;
pub mod store;
pub mod sync;
pub mod vcs;
