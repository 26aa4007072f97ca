//! Graph IR: SSA values and nodes, interned kinds, the textual format,
//! alias analysis, and the pattern-based subgraph rewriter.

pub mod alias;
mod graph;
pub mod subgraph;
pub mod symbol;
pub mod text;

pub use alias::AliasDb;
pub use graph::{Graph, NodeId, TypeKind, Use, ValueId};
pub use subgraph::SubgraphRewriter;
pub use symbol::{kinds, Symbol};
pub use text::{parse_graph, print_graph, TextIrError};
