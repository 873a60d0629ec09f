pub mod flat;
pub mod metric;
pub mod snapshot;

pub use flat::{rank, FlatIndex};
pub use metric::similarity;
pub use snapshot::{Snapshot, FORMAT_TAG, FORMAT_VERSION, SNAPSHOT_FILE};
