mod spec;

pub use spec::*;

pub type ObjID = u64;
pub type TableID = ObjID;
pub type IndexID = ObjID;
