//! 请求生命周期核心：错误归一化、重试策略、缓存协调、用户文案、取消作用域

pub mod cache;
pub mod coordinator;
pub mod error;
pub mod fetcher;
pub mod lifecycle;
pub mod messages;
pub mod normalizer;
pub mod observer;
pub mod retry;

pub use cache::{CacheSnapshot, EntryState};
pub use coordinator::{
    CoordinatorConfig, MutationOptions, RequestCoordinator, RequestOptions, SurfaceEvent,
};
pub use error::{ErrorClass, NormalizedError, RawFailure, RequestError};
pub use fetcher::Fetcher;
pub use lifecycle::{ShutdownManager, ShutdownReason, SurfaceScope};
pub use messages::to_user_message;
pub use normalizer::classify;
pub use observer::{FailureObserver, FailureReport, RecordingObserver, TracingObserver};
pub use retry::{RetryPlan, RetryPolicy};
