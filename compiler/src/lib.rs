// kplan — Kernel circuit latch planner
//
// Library root. Front end (lexer, parser, lower) builds a `Circuit`; the
// planner (order, liveness, alloc) binds its registers to shared latches;
// verify re-checks the resulting `LatchPlan`.

pub mod alloc;
pub mod ast;
pub mod catalog;
pub mod diag;
pub mod dot;
pub mod graph;
pub mod id;
pub mod kernel_set;
pub mod latch;
pub mod lexer;
pub mod liveness;
pub mod lower;
pub mod order;
pub mod parser;
pub mod pass;
pub mod pipeline;
pub mod plan;
pub mod types;
pub mod verify;
