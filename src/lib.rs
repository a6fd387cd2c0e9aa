//! Artist graph crawler - shared modules for the binary and tests.

pub mod catalog;
pub mod crawl;
pub mod graph;
pub mod models;
pub mod persistence;
pub mod progress;
pub mod relations;
pub mod safety;
pub mod spotify;
