//! Overlay catalog model
//!
//! - [`definition`]: the metadata record of one overlay
//! - [`database`]: name-keyed definitions merged from catalog sources
//! - [`xml`]: the catalog document codec

pub mod database;
pub mod definition;
pub mod xml;

pub use database::{CatalogSource, LoadReport, OverlayDatabase};
pub use definition::{OverlayDefinition, Owner, Quality, Source, Status, DEFAULT_PRIORITY};
