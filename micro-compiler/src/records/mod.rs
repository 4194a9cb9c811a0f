//! Record schemas the runtime reads, and builders from the annotated graph.
//!
//! - `netdef`: `NetDef` and its nested records, packed with [`net_def_excludes`]
//! - `graph`: the runtime `Graph` record, packed without exclusions

pub mod graph;
pub mod netdef;

pub use graph::{build_graph_record, IoSource, GRAPH, OP_CONTEXT, OP_IO_INFO};
pub use netdef::{
    build_net_def, net_def_excludes, ARGUMENT, CONST_TENSOR, IO_INFO, NET_DEF, OPERATOR_DEF,
    OUTPUT_SHAPE,
};
