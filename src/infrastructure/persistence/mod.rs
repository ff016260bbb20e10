pub mod database;
pub mod repositories;

pub use database::{Database, PoolSettings};
pub use repositories::SqliteCandleRepository;
pub use repositories::evaluation_repository::SqliteEvaluationRepository;
pub use repositories::prediction_repository::SqlitePredictionRepository;
pub use repositories::training_repository::SqliteTrainingRepository;
