pub mod accession_log;
pub mod app;
pub mod checkpoint;
pub mod config;
pub mod domain;
pub mod error;
pub mod manifest;
pub mod metadata;
pub mod output;
pub mod receipt;
pub mod sentinel;
pub mod store;
pub mod submission;
pub mod upload;
pub mod webin;
