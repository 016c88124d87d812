mod auth;
mod discover;
mod scrape;

pub use auth::LoginArgs;
pub use discover::DiscoverArgs;
pub use scrape::ScrapeArgs;
