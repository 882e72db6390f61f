use crate::error::{BindError, Result};
use crate::inject::{
    ArgName, ArgSet, ChainFn, NEXT, Next, Reply, Signature, SignatureCache, Stage, StageResult,
    Values, inject,
};
use crate::middleware::{CONTEXT, MiddlewareHandle, Phase};
use std::fmt;
use std::sync::Arc;

/// Name of the generated stage joining the request chain to the endpoint
/// and render chains.
pub const PROCESS_REQUEST: &str = "process_request";

/// One middleware phase inside a sub-chain.
struct Link {
    stage: Stage,
    signature: Arc<Signature>,
    provides: ArgSet,
}

/// The innermost callable of a sub-chain, as far as planning is concerned.
struct Terminal {
    label: String,
    names: ArgSet,
    required: ArgSet,
}

impl Terminal {
    fn of(stage: &Stage, signature: &Signature) -> Self {
        Self {
            label: stage.name().to_string(),
            names: declared(signature).cloned().collect(),
            required: signature.required().iter().filter(|n| *n != NEXT).cloned().collect(),
        }
    }
}

fn declared(signature: &Signature) -> impl Iterator<Item = &ArgName> {
    signature.names().iter().filter(|n| *n != NEXT)
}

/// A position of the compiled chain and the names its `next` accepts.
/// Terminal stages have no continuation.
#[derive(Debug, Clone)]
pub struct Position {
    pub stage: String,
    pub next_accepts: Option<ArgSet>,
}

/// A route's compiled request chain. Immutable once built; rebinding a
/// route produces a new one.
#[derive(Clone)]
pub struct CompiledChain {
    entry: Arc<ChainFn>,
    args: ArgSet,
    positions: Vec<Position>,
}

impl CompiledChain {
    /// Names the chain takes from the values it is called with.
    pub fn args(&self) -> &ArgSet {
        &self.args
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    /// Run the chain. Values outside [`CompiledChain::args`] are dropped.
    pub fn call(&self, values: &Values) -> StageResult {
        (self.entry)(values.restrict(&self.args))
    }
}

impl fmt::Debug for CompiledChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledChain")
            .field("args", &self.args)
            .field("positions", &self.positions)
            .finish()
    }
}

fn links_for(
    middlewares: &[MiddlewareHandle],
    phase: Phase,
    cache: &SignatureCache,
) -> Result<Vec<Link>> {
    middlewares
        .iter()
        .filter_map(|mw| mw.stage(phase).map(|stage| (mw, stage)))
        .map(|(mw, stage)| {
            Ok(Link {
                stage: stage.clone(),
                signature: cache.inspect(stage)?,
                provides: mw
                    .meta()
                    .phase_provides(phase)
                    .iter()
                    .map(|n| ArgName::from(n.as_str()))
                    .collect(),
            })
        })
        .collect()
}

/// Names a sub-chain takes from `available`: everything some stage declares
/// that no earlier stage in the sub-chain provides.
fn chain_args(links: &[Link], terminal: &Terminal, available: &ArgSet) -> ArgSet {
    let mut provided = ArgSet::new();
    let mut args = ArgSet::new();
    for link in links {
        args.extend(
            declared(&link.signature)
                .filter(|n| !provided.contains(*n) && available.contains(*n))
                .cloned(),
        );
        provided.extend(link.provides.iter().cloned());
    }
    args.extend(
        terminal
            .names
            .iter()
            .filter(|n| !provided.contains(*n) && available.contains(*n))
            .cloned(),
    );
    args
}

/// Walk the sub-chain in call order and fail on the first stage whose
/// required names are not available at its position.
fn check_resolved(links: &[Link], terminal: &Terminal, available: &ArgSet) -> Result<()> {
    let mut avail = available.clone();
    for link in links {
        let missing: Vec<ArgName> = link
            .signature
            .required()
            .iter()
            .filter(|n| *n != NEXT && !avail.contains(*n))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(BindError::UnresolvedArgument {
                stage: link.stage.name().to_string(),
                missing,
            });
        }
        avail.extend(link.provides.iter().cloned());
    }
    let missing: Vec<ArgName> = terminal
        .required
        .iter()
        .filter(|n| !avail.contains(*n))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(BindError::UnresolvedArgument {
            stage: terminal.label.clone(),
            missing,
        });
    }
    Ok(())
}

fn positions(links: &[Link], terminal: &Terminal, available: &ArgSet) -> Vec<Position> {
    let mut out = Vec::with_capacity(links.len() + 1);
    let mut avail = available.clone();
    for (i, link) in links.iter().enumerate() {
        avail.extend(link.provides.iter().cloned());
        out.push(Position {
            stage: link.stage.name().to_string(),
            next_accepts: Some(chain_args(&links[i + 1..], terminal, &avail)),
        });
    }
    out.push(Position {
        stage: terminal.label.clone(),
        next_accepts: None,
    });
    out
}

/// Wrap `inner` in the links, outermost first.
fn fold_links(links: Vec<Link>, inner: Arc<ChainFn>) -> Arc<ChainFn> {
    links.into_iter().rev().fold(inner, |next_fn, link| {
        let Link {
            stage,
            signature,
            provides,
        } = link;
        let wrapped: Arc<ChainFn> = Arc::new(move |scope: Values| {
            let next = Next::new(stage.name(), &scope, &provides, &*next_fn);
            inject(&stage, &signature, &scope, Some(next))
        });
        wrapped
    })
}

fn terminal_fn(stage: &Stage, signature: Arc<Signature>) -> Arc<ChainFn> {
    let stage = stage.clone();
    Arc::new(move |scope: Values| inject(&stage, &signature, &scope, None))
}

fn reject_reserved(stage: &Stage, signature: &Signature, reserved: &[&str]) -> Result<()> {
    match reserved.iter().find(|name| signature.declares(name)) {
        Some(name) => Err(BindError::reserved(stage.name(), ArgName::from(*name))),
        None => Ok(()),
    }
}

/// Compile the full chain of a route.
///
/// Request phases run first, in declaration order, around a generated
/// `process_request` stage. That stage runs the endpoint phases and the
/// endpoint; a [`Reply::Response`] is returned as is, anything else is
/// handed to the render phases and the render stage as `context`.
///
/// `preprovided` lists every name supplied from outside the chain (URL
/// captures, builtins, resources).
pub fn compile_chain(
    middlewares: &[MiddlewareHandle],
    endpoint: &Stage,
    render: &Stage,
    preprovided: &ArgSet,
    cache: &SignatureCache,
) -> Result<CompiledChain> {
    let endpoint_sig = cache.inspect(endpoint)?;
    let render_sig = cache.inspect(render)?;
    reject_reserved(endpoint, &endpoint_sig, &[NEXT, CONTEXT])?;
    reject_reserved(render, &render_sig, &[NEXT])?;

    let request_links = links_for(middlewares, Phase::Request, cache)?;
    let endpoint_links = links_for(middlewares, Phase::Endpoint, cache)?;
    let render_links = links_for(middlewares, Phase::Render, cache)?;

    let req_avail: ArgSet = preprovided
        .iter()
        .filter(|n| *n != NEXT && *n != CONTEXT)
        .cloned()
        .collect();
    let mut ep_avail = req_avail.clone();
    for link in &request_links {
        ep_avail.extend(link.provides.iter().cloned());
    }
    let mut rn_avail = ep_avail.clone();
    rn_avail.insert(ArgName::from(CONTEXT));

    let endpoint_terminal = Terminal::of(endpoint, &endpoint_sig);
    let render_terminal = Terminal::of(render, &render_sig);
    let ep_args = chain_args(&endpoint_links, &endpoint_terminal, &ep_avail);
    let rn_args = chain_args(&render_links, &render_terminal, &rn_avail);

    let req_inner_args: ArgSet = ep_args
        .iter()
        .chain(rn_args.iter())
        .filter(|n| *n != CONTEXT)
        .cloned()
        .collect();
    let process_terminal = Terminal {
        label: PROCESS_REQUEST.to_string(),
        names: req_inner_args.clone(),
        required: req_inner_args,
    };

    check_resolved(&request_links, &process_terminal, &req_avail)?;
    check_resolved(&endpoint_links, &endpoint_terminal, &ep_avail)?;
    check_resolved(&render_links, &render_terminal, &rn_avail)?;

    let args = chain_args(&request_links, &process_terminal, &req_avail);
    let mut positions_out = positions(&request_links, &process_terminal, &req_avail);
    positions_out.extend(positions(&endpoint_links, &endpoint_terminal, &ep_avail));
    positions_out.extend(positions(&render_links, &render_terminal, &rn_avail));

    let endpoint_chain = fold_links(endpoint_links, terminal_fn(endpoint, endpoint_sig));
    let render_chain = fold_links(render_links, terminal_fn(render, render_sig));

    let render_scope: ArgSet = rn_args.iter().filter(|n| *n != CONTEXT).cloned().collect();
    let process_request: Arc<ChainFn> = Arc::new(move |scope: Values| {
        match endpoint_chain(scope.restrict(&ep_args))? {
            Reply::Response(resp) => Ok(Reply::Response(resp)),
            Reply::Context(context) => {
                let mut values = scope.restrict(&render_scope);
                values.insert_value(ArgName::from(CONTEXT), context);
                render_chain(values)
            }
        }
    });

    Ok(CompiledChain {
        entry: fold_links(request_links, process_request),
        args,
        positions: positions_out,
    })
}
