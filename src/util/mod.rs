//! Small helpers shared by the fetch pipeline and the store.
//!
//! - **URL validation**: scheme and host checks before a feed is fetched
//! - **Time**: millisecond-precision clock and HTTP date formatting

mod time;
mod url_validator;

pub use self::time::{http_date, now};
pub(crate) use self::time::{from_millis, to_millis};
pub use self::url_validator::{validate_feed_url, HostPolicy, UrlValidationError};
