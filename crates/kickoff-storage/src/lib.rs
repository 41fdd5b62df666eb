//! Rate-limited provider fetch client + fixture persistence for kickoff.

mod fetch;
mod memory;
mod postgres;
mod repository;

pub use fetch::{
    FetchError, FetchedResponse, HttpClientConfig, RateLimitConfig, RateLimitedClient,
    SlidingWindowLimiter,
};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use repository::{FixtureRepository, PersistenceError, StandingsSnapshot};

pub const CRATE_NAME: &str = "kickoff-storage";
