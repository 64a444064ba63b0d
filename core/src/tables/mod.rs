//! Collaborator tables: interfaces and routes
//!
//! The engine only reads these. Population (routing protocols, address
//! configuration) lives elsewhere; the `Static*` tables here are plain
//! in-memory implementations used by the CLI driver and tests.

pub mod interface;
pub mod routing;

pub use interface::{InterfaceEntry, InterfaceId, InterfaceTable, StaticInterfaceTable};
pub use routing::{ChildInterface, MulticastRoute, Route, RoutingTable, StaticRoutingTable};
