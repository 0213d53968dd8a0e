mod error;
mod fetchspec;

pub use error::CacheError;
pub use fetchspec::FetchSpec;
