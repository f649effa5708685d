//! Multicast tree computation (component C6): KMB Steiner-tree approximation driven by
//! group-membership and link-weight events.

mod engine;
mod graph;
mod kmb;
mod state;

pub use engine::{RoutingEngine, RoutingError, SourceLocator};
pub use graph::{AdjList, Link};
pub use kmb::{attach_source, prim_mst, steiner_tree};
pub use state::{MulticastGroup, SourceTree};
