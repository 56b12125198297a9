//! Pipeline for US Census geographic boundary data: download per-state
//! fragments, merge them into nationwide coverages, enrich each feature
//! with a HEROP_ID, BBOX, and display LABEL, then export to shapefile,
//! GeoJSON, and PMTiles, optionally publishing to S3.

pub mod app;
pub mod archive;
pub mod config;
pub mod dataset;
pub mod domain;
pub mod enrich;
pub mod error;
pub mod export;
pub mod fetch;
pub mod lookups;
pub mod manifest;
pub mod publish;
pub mod store;
pub mod tiles;
