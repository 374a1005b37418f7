pub mod builder;
pub mod graph;
pub mod group;

pub use builder::ModelBuilder;
pub use graph::{InputBlock, InputEdge, InputGraph, InputNode, Properties};
pub use group::{Document, FolderElement, Group};
