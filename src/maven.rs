pub mod checksum;
pub mod content_facet;
pub mod coordinates;
pub mod paths;
pub mod policy;
pub mod proxy_facet;
