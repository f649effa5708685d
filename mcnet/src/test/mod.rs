//! Multi-module scenarios that exercise the routing engine, the composite link weight
//! and the link-load sampler together, colocated here rather than inside the unit
//! `#[cfg(test)]` blocks of the modules they span.
