pub mod digesting_stream;
pub mod http_downloader;
pub mod keyed_lock;
pub mod mime;
pub mod payload;
