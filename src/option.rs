/// Policy knobs for the split-octagon domain. The flags are associated
/// constants so every combination monomorphizes; no dispatch happens at run
/// time.
///
/// * `CHROME_DIJKSTRA`: restore closure after a meet with per-source
///   Dijkstra over the warm potentials instead of a full Johnson pass.
/// * `WIDEN_RESTABILIZE`: after a widening, re-close only from the
///   destabilized vertices instead of running Johnson over the whole graph.
/// * `SPECIAL_ASSIGN`: take the fast assignment path that seeds the fresh
///   vertex potentials from the evaluated expression.
pub trait Params: Clone + 'static {
    const CHROME_DIJKSTRA: bool;
    const WIDEN_RESTABILIZE: bool;
    const SPECIAL_ASSIGN: bool;
}

#[derive(Clone, Debug)]
pub struct DefaultParams;

impl Params for DefaultParams {
    const CHROME_DIJKSTRA: bool = true;
    const WIDEN_RESTABILIZE: bool = true;
    const SPECIAL_ASSIGN: bool = true;
}

/// Everything off; useful to cross-check the incremental paths against the
/// plain ones.
#[derive(Clone, Debug)]
pub struct SimpleParams;

impl Params for SimpleParams {
    const CHROME_DIJKSTRA: bool = false;
    const WIDEN_RESTABILIZE: bool = false;
    const SPECIAL_ASSIGN: bool = false;
}

/// Default cap on `ub - lb` for an array-expansion initialization; larger
/// initializations are skipped with a warning.
pub const DEFAULT_MAX_INIT_SIZE: u64 = 512;
