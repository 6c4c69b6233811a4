pub mod ipfs;
pub mod local;
pub mod retry;

pub use ipfs::{IpfsBackend, IpfsProvider};
pub use local::{ContentId, LocalBackend};
pub use retry::{RetryConfig, Retryable, Retrying, retry_with_backoff};
