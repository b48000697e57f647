//! Small utilities shared across the crate.

mod url;

pub use self::url::Url;
