//! Generic utility primitives with zero domain knowledge.
//!
//! - `color` - Stderr coloring and the debug switch
//! - `shell` - Shell escaping and quoting

pub mod color;
pub mod shell;
