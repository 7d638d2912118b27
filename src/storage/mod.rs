//! C4 — Column & List Storage: fixed-width columns, chunked adjacency/
//! property lists, and string overflow (spec.md §4.4).

pub mod column;
pub mod list;
pub mod overflow;
