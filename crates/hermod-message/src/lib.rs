//! The unit of data Hermod moves between sources and sinks (spec §3, §4.1).

mod message;
mod operation;
mod pool;
mod value;

pub use message::{Message, MessageRecord};
pub use operation::Operation;
pub use pool::MessagePool;
pub use value::{sanitize, Value};
