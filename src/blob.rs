pub mod blob_store;
pub mod fs_blob_store;
pub mod manager;
pub mod transient_blob_store;
