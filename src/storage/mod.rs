pub mod remote;
pub mod store;

pub use remote::{RedisStore, RemoteError};
pub use store::{AbortedCheckStore, StorageError};
