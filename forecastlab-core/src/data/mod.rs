//! Data acquisition and the scraped data store.

pub mod fred;
pub mod provider;
pub mod store;
pub mod yahoo;

pub use fred::FredProvider;
pub use provider::{DataError, DataProvider, DataSource, FetchResult};
pub use store::{ScrapedFolder, ScrapedStore};
pub use yahoo::YahooProvider;
