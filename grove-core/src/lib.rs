//! Grove Core - a live local mirror of one remote repository
//!
//! This library clones a repository once, keeps it fresh with a background
//! pull loop, and answers searches, ranged reads and glob listings against
//! the checkout.

pub mod cache;
pub mod config;
pub mod error;
pub mod files;
pub mod generation;
pub mod git;
pub mod protocol;
pub mod search;
pub mod service;
pub mod session;

pub use cache::{ContentCache, Invalidate};
pub use config::{Config, RefreshPolicy};
pub use error::{AcquireError, ErrorEnvelope, FsError, GroveError, SearchError};
pub use generation::{CheckoutStatus, Generation};
pub use git::Acquirer;
pub use protocol::{MatchRecord, ProtocolLine};
pub use search::{SearchEngine, SearchQuery, SearchStream};
pub use service::{CachedFile, RepositoryService, ServiceOptions, ServiceStatus};
pub use session::{Checkout, Session};

/// Result type alias for grove operations
pub type Result<T> = std::result::Result<T, GroveError>;
