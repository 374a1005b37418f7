pub mod defs;
pub mod event;
pub mod reader;
pub mod source;
pub mod writer;

pub use event::{Builder, EdgeEvent, EdgeKind, Event, PropertyValue, ReadContext};
pub use reader::{BinaryReader, ParseSummary};
pub use source::{BinarySource, GraphDigest, ParseMonitor, DEFAULT_BUFFER_SIZE};
pub use writer::{BlockSpec, DumpWriter, GraphSpec, NodeClassSpec, NodeSpec, PortValue, Prop};
