pub mod connection;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_with_settings, DbPool};
pub use repositories::{
    ContextStore, DatasetRepository, InMemoryContextStore, InMemoryDatasetRepository,
    InMemoryTurnRepository, RepositoryError, SqlContextStore, SqlDatasetRepository,
    SqlTurnRepository, TurnRepository,
};
