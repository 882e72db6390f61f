//! Chain compilation
//!
//! Turns a route's effective middleware list, endpoint and render stage
//! into one closure tree, checking at bind time that every stage can be
//! called with all of its required arguments.

mod compile;

pub use compile::{CompiledChain, PROCESS_REQUEST, Position, compile_chain};
