//! Backlog-driven worker scaling.

/// Backlog per worker above which workers are added.
const SCALE_UP_FACTOR: usize = 10;
/// Backlog per worker below which idle workers are removed.
const SCALE_DOWN_FACTOR: usize = 2;

/// Change to apply to one engine's worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    Hold,
    Add(usize),
    /// Stop this many idle workers.
    Remove(usize),
}

/// Plans one scaling step for an engine.
///
/// * backlog > 10 x current and below `max`: add
///   `min(ceil(backlog / 10) - current, max - current)`.
/// * backlog < 2 x current with more than one idle worker: remove
///   `floor((current - backlog / 2) / 2)`, never more than the idle workers
///   and never the last one.
pub fn plan_scaling(backlog: usize, current: usize, idle: usize, max: usize) -> ScaleDecision {
    if backlog > SCALE_UP_FACTOR * current && current < max {
        let wanted = backlog.div_ceil(SCALE_UP_FACTOR).saturating_sub(current);
        let add = wanted.min(max - current);
        return if add > 0 {
            ScaleDecision::Add(add)
        } else {
            ScaleDecision::Hold
        };
    }

    if backlog < SCALE_DOWN_FACTOR * current && idle > 1 {
        // floor((current - backlog / 2) / 2) == floor((2 * current - backlog) / 4)
        let surplus = (2 * current - backlog) / 4;
        let remove = surplus.min(idle).min(current.saturating_sub(1));
        if remove > 0 {
            return ScaleDecision::Remove(remove);
        }
    }

    ScaleDecision::Hold
}
