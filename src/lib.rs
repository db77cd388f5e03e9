pub mod config;
pub mod connectivity;
pub mod error;
pub mod ffi;
pub mod filter;
pub mod merge;
pub mod mirror;
pub mod oplog;
pub mod optimistic;
pub mod remote;
pub mod repository;
pub mod resource;
pub mod store;
pub mod sync;

pub use config::{ConfigError, SyncConfig};
pub use connectivity::Connectivity;
pub use error::{RemoteError, SyncError};
pub use filter::{Page, PageMeta, ResourceFilter};
pub use mirror::MirrorStore;
pub use oplog::{OpKind, PendingOperation, PendingQueue};
pub use optimistic::{Optimistic, OptimisticState, ResourceView};
pub use remote::{HttpRemote, RemoteService};
pub use repository::Repository;
pub use resource::Resource;
pub use store::SqliteStore;
pub use sync::{Replayed, Replayer, SyncReport};
