//! Integration tests

mod common;
mod config_test;
mod ingest_test;
mod store_test;
