pub mod error;
pub mod retry;
pub mod time_window;

pub use error::{ApiError, ApiResult};
pub use retry::{RetryPolicy, retry_with_backoff};
pub use time_window::parse_time_window_secs;
