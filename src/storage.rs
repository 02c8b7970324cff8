pub mod attributes;
pub mod facet;
pub mod metadata_store;
pub mod reconcile;
pub mod records;
pub mod tx;
