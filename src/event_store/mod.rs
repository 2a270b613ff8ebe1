mod models;
mod schema;
mod store;
mod trait_def;

pub use models::{
    Category, Event, Location, PopularityCollection, PopularityRef, FALLBACK_ARTIST_IMAGE,
};
pub use store::SqliteEventStore;
pub use trait_def::EventStore;
