//! C5 — Hash Index: separate-chaining primary-key index over node offsets
//! (spec.md §4.5).

pub mod hash_index;
