pub mod arena;
pub mod aspect_sets;
pub mod batch;
pub mod capture;
pub mod chart;
pub mod columns;
pub mod config;
pub mod engine;
pub mod error_codes;
pub mod report;
pub mod session;
pub mod store;
