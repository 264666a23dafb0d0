pub mod classifier;
pub mod gateway;
pub mod store;

pub use classifier::{classify, ClassificationResult};
pub use gateway::{ForecastGateway, ForecastOutcome};
pub use store::SnapshotStore;
