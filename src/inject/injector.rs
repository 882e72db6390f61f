use crate::error::DispatchError;
use crate::inject::{Args, Next, Signature, Stage, StageResult, Values};
use std::sync::Arc;

/// The reserved name of the continuation parameter.
pub const NEXT: &str = "next";

/// Call `stage` with the subset of `available` it declared.
///
/// Provided values always win over the stage's own defaults; a declared
/// optional parameter falls back to its default only when absent.
pub fn inject(
    stage: &Stage,
    signature: &Signature,
    available: &Values,
    next: Option<Next<'_>>,
) -> StageResult {
    let mut selected = Values::new();
    for name in signature.names() {
        if name == NEXT {
            continue;
        }
        match available
            .value(name.as_str())
            .or_else(|| signature.default_for(name.as_str()))
        {
            Some(v) => {
                selected.insert_value(name.clone(), Arc::clone(v));
            }
            None => {
                tracing::error!(
                    stage = stage.name(),
                    argument = %name,
                    "bind-time analysis missed a required argument"
                );
                return Err(DispatchError::MissingValue {
                    stage: stage.name().to_string(),
                    name: name.clone(),
                }
                .into());
            }
        }
    }
    stage.call(Args::new(stage.name(), selected, next))
}
