pub mod catalog;
pub mod conf;
pub mod error;
pub mod file;
pub mod heap;
pub mod index;
pub mod row;
pub mod serde;
pub mod thread;
pub mod trx;
pub mod value;
pub mod wal;

pub mod prelude {
    pub use crate::conf::*;
    pub use crate::error::*;
    pub use crate::file::*;
    pub use crate::heap::*;
    pub use crate::index::*;
    pub use crate::trx::*;
    pub use crate::value::*;
}
