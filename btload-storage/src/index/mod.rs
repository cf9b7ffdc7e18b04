//! B-tree index bulk loading.
//!
//! Offline path: [`load::build_index_offline`] sorts all keys and writes
//! the tree bottom-up into a new file. Online path:
//! [`online::build_index_online`] applies keys through the live index
//! while the table is open for DML.
pub mod entry;
pub mod fk;
pub mod key;
pub mod live;
pub mod load;
pub mod node;
pub mod online;
pub mod sort;
pub mod tree;

pub use entry::{EntryFormat, IndexEntry};
pub use fk::{verify_foreign_key, ForeignKeyRef, PartitionResolver};
pub use key::{ExtractedKey, FunctionIndex, KeyColumn, KeyDomain, KeyExtractor, RowFilter};
pub use live::{IndexInsert, LiveIndex};
pub use load::{build_index_offline, BuiltIndex, LoadArgs, LoadContext, LoadStats};
pub use node::RootMeta;
pub use online::{build_index_online, OnlineBuildStats, OnlineContext};
pub use tree::{BTreeReader, IndexLookup, LeafCursor, LeafItem, TreeShape};
