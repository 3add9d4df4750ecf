pub mod classify;
pub mod expr;
pub mod glob;
pub mod netlist;
pub mod pass;
pub mod rewrite;
pub mod shape;
pub mod sm;
pub mod target;
