//! Types shared by every layer: identifiers, node references, the finger table
//! and the wire messages.

mod finger_table;
mod id;
pub mod messages;
mod node;

pub use finger_table::*;
pub use id::*;
pub use messages::{
    Entry, ErrorSpecific, Message, MessageType, RequestSpecific, ResponseSpecific, Step,
};
pub use node::*;
