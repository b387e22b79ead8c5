// Lead Pipeline - Core Library
// Exposes all modules for use in the CLI and tests

pub mod db;
pub mod attributes;     // Label catalog and value transforms
pub mod rules;          // Marketing qualification rules
pub mod deduplication;  // Latest-wins selection
pub mod temporal;       // create_dte parsing
pub mod flatten;        // Entity attribute flattener
pub mod tracking;       // URL tracking-parameter extractor
pub mod reconciliation; // Golden file comparison
pub mod config;

// Re-export commonly used types
pub use db::{
    Property, PropertyValue, LoadEvent, InsertStats,
    setup_database, load_properties_csv, load_property_values_csv,
    insert_properties, insert_property_values, import_csv_files,
    record_load, get_load_history,
    get_all_properties, get_all_property_values, count_properties, count_property_values,
    replace_marketing_projects, get_marketing_projects,
};
pub use attributes::{
    LabelCatalog, LabelDefinition, OutputColumn, ValueTransform, FieldValue, ValueError,
    extract_email, parse_decimal,
};
pub use rules::MarketingRules;
pub use deduplication::{select_latest, GroupKey, JoinedValue, LatestSelection};
pub use temporal::parse_timestamp;
pub use flatten::{
    Flattener, FlattenedRecord, FlattenOutput, FlattenReport, flatten_for_marketing,
};
pub use tracking::{TrackingExtractor, TrackingParameter, TrackingRecord, SourceUrl};
pub use reconciliation::{
    GoldenComparator, ComparisonReport, LineDiscrepancy, DiscrepancyCategory,
};
pub use config::PipelineConfig;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
