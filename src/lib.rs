pub mod annotations;
pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod file_util;
pub mod fs_util;
pub mod genome;
pub mod ontology;
pub mod output;
pub mod params;
pub mod report;
pub mod rpc;
pub mod staging;
pub mod toolchain;
pub mod workspace;
