//! Named-value injection
//!
//! Stages declare their parameters by name; at request time the injector
//! calls each stage with exactly the subset of available values it asked
//! for, filling declared defaults for anything absent.

mod injector;
mod signature;
mod stage;
mod value;

pub use injector::{NEXT, inject};
pub use signature::{Param, ParamKind, Signature, SignatureCache, inspect_signature};
pub use stage::{Args, Next, Stage, StageResult};
pub use value::{ArgName, ArgSet, Reply, Value, Values, value};

pub(crate) use stage::ChainFn;
