//! HTTP request handlers organized by functionality

pub mod api;
pub mod streaming;

// Re-export handler functions
pub use api::{
    FileResponse, HealthResponse, MetadataQuery, MetadataResponse, StatsResponse, api_health,
    api_metadata, api_stats,
};
pub use streaming::{stream_file, stream_subtitle};
