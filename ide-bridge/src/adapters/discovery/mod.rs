pub mod store;

pub use store::{DiscoveryRecord, DiscoveryStore, IdeInfo};
