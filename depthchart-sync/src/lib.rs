pub mod types;
pub mod traits;
pub mod fetcher;
pub mod discovery;
pub mod parser;
pub mod aggregator;
pub mod reconciler;
pub mod roster_store;
pub mod memory_store;
pub mod pipeline;

pub use types::*;
pub use traits::{PageSource, RosterStore, RosterTransaction};
pub use fetcher::{Fetcher, StaticPages};
pub use discovery::discover_team_links;
pub use parser::DepthChartParser;
pub use aggregator::{ScrapeResult, SnapshotAggregator};
pub use reconciler::Reconciler;
pub use roster_store::PgRosterStore;
pub use memory_store::{FailPoint, MemoryRosterStore, RosterTables};
pub use pipeline::DepthChartSync;
