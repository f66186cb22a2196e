// src/lib.rs

pub mod artifact;
pub mod config;
pub mod export;
pub mod extract;
pub mod fetch;
pub mod pipeline;
pub mod server;

pub use artifact::{ArtifactResolver, ResolveError, ResolvedArtifact};
pub use config::Config;
pub use export::{Artifact, ExportError, SpreadsheetExporter};
pub use extract::{CellValue, ExtractedTable, HeaderPolicy, TableCollection, TableExtractor};
pub use fetch::{FetchError, PageFetcher, SourceDocument};
pub use pipeline::{Pipeline, PipelineError};
