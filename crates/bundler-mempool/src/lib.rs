pub mod entry_points;
pub mod store;

pub use entry_points::EntryPointRegistry;
pub use store::{MempoolStore, PooledUserOp};
