pub mod fetcher;
pub mod source;
