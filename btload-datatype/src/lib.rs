pub mod error;
pub mod memcmp;

pub use memcmp::*;
