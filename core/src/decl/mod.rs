//! Class and member-function declarations consumed by the layout algorithms.

mod builder;
mod graph;
mod paths;
mod spec;


pub use builder::*;
pub use graph::*;
pub use paths::*;
pub use spec::*;
