pub mod blob;
pub mod config;
pub mod error;
pub mod maven;
pub mod repository;
pub mod storage;
pub mod util;

#[cfg(test)]
mod test_support;
