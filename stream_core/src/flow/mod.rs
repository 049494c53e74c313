pub mod key;
pub mod table;

pub use key::{Direction, FlowKey, HalfKey};
pub use table::{FlowEntry, FlowTable};
