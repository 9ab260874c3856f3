//! Static tree analysis.
//!
//! Advisory diagnostics about the topology of a filter tree: branches that can
//! never receive the data they work on, results biased by an upstream stage,
//! and missing or conflicting ancestors. The analysis never mutates the tree
//! and never blocks a refresh.

use crate::pipeline::filter::{Filter, FilterBehavior, FilterKind};
use crate::pipeline::id::FilterId;
use crate::pipeline::masks::PropagationMasks;
use crate::pipeline::tree::FilterTree;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// A filter that can never receive what it works on.
    DeadComputation,
    SamplingBias,
    CompositionBias,
    MissingAncestor,
    ConflictingSettings,
}

/// One finding. `filters` names the one or two filters involved, upstream
/// first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeDiagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub filters: Vec<FilterId>,
    pub short: String,
    pub long: String,
}

impl std::fmt::Display for TreeDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let severity = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{severity}: {}", self.short)
    }
}

/// Runs every check over a tree.
pub struct TreeAnalyser;

impl TreeAnalyser {
    /// Analyse `tree`. Masks are computed once and shared by all checks; each
    /// check only appends to the result.
    pub fn analyse(tree: &FilterTree) -> Vec<TreeDiagnostic> {
        let masks = PropagationMasks::compute(tree);
        let mut out = Vec::new();

        Self::check_blocking_pairs(tree, &masks, &mut out);
        Self::check_sampling_bias(tree, &mut out);
        Self::check_composition_bias(tree, &mut out);
        Self::check_required_ancestors(tree, &mut out);
        Self::check_unranged_conflicts(tree, &mut out);

        let errors = out.iter().filter(|d| d.severity == Severity::Error).count();
        if out.is_empty() {
            tracing::debug!("Tree analysis: no findings for {} filters", tree.len());
        } else {
            tracing::info!(
                "Tree analysis: {} errors, {} warnings",
                errors,
                out.len() - errors
            );
        }
        out
    }

    fn label(tree: &FilterTree, id: FilterId) -> String {
        tree.filter(id)
            .map_or_else(|| id.to_string(), |f| format!("{} ({})", f.name(), id))
    }

    // ── Dead computation ──

    fn check_blocking_pairs(
        tree: &FilterTree,
        masks: &PropagationMasks,
        out: &mut Vec<TreeDiagnostic>,
    ) {
        for id in tree.breadth_first() {
            let Some(filter) = tree.filter(id) else {
                continue;
            };
            let uses = filter.use_mask();
            // An empty use mask means the filter only forwards.
            if uses.is_empty() || !(masks.incoming(tree, id) & uses).is_empty() {
                continue;
            }
            let wanted: Vec<&str> = uses.types().map(|t| t.name()).collect();
            let wanted = wanted.join(", ");

            match tree.parent(id) {
                Some(parent) => out.push(TreeDiagnostic {
                    severity: Severity::Error,
                    kind: DiagnosticKind::DeadComputation,
                    filters: vec![parent, id],
                    short: format!(
                        "{} receives no data it can use",
                        Self::label(tree, id)
                    ),
                    long: format!(
                        "{} works on {} but nothing of that type can reach it through {}. \
                         It will never produce a result; move it below a filter that \
                         provides {}.",
                        Self::label(tree, id),
                        wanted,
                        Self::label(tree, parent),
                        wanted
                    ),
                }),
                None => out.push(TreeDiagnostic {
                    severity: Severity::Error,
                    kind: DiagnosticKind::DeadComputation,
                    filters: vec![id],
                    short: format!("{} has no data source", Self::label(tree, id)),
                    long: format!(
                        "{} works on {} but sits at the top of the tree, where it \
                         receives nothing.",
                        Self::label(tree, id),
                        wanted
                    ),
                }),
            }
        }
    }

    // ── Bias ──

    /// Nearest ancestor of `id` satisfying `pred`.
    fn nearest_ancestor(
        tree: &FilterTree,
        id: FilterId,
        pred: impl Fn(&Filter) -> bool,
    ) -> Option<FilterId> {
        tree.ancestors(id)
            .into_iter()
            .find(|a| tree.filter(*a).is_some_and(&pred))
    }

    fn check_sampling_bias(tree: &FilterTree, out: &mut Vec<TreeDiagnostic>) {
        for id in tree.breadth_first() {
            let Some(filter) = tree.filter(id) else {
                continue;
            };
            let ranged = tree.has_ancestor_of_kind(id, FilterKind::RangeFile);
            if !filter.density_sensitive(ranged) {
                continue;
            }
            let Some(source) = Self::nearest_ancestor(tree, id, |f| f.alters_density()) else {
                continue;
            };
            out.push(TreeDiagnostic {
                severity: Severity::Warning,
                kind: DiagnosticKind::SamplingBias,
                filters: vec![source, id],
                short: format!("{} is biased by sampling", Self::label(tree, id)),
                long: format!(
                    "{} changes the point density upstream of {}, whose result depends \
                     on density. Values will be scaled by the sampling rate.",
                    Self::label(tree, source),
                    Self::label(tree, id)
                ),
            });
        }
    }

    fn check_composition_bias(tree: &FilterTree, out: &mut Vec<TreeDiagnostic>) {
        for id in tree.breadth_first() {
            let Some(filter) = tree.filter(id) else {
                continue;
            };
            let ranged = tree.has_ancestor_of_kind(id, FilterKind::RangeFile);
            if !filter.composition_sensitive(ranged) {
                continue;
            }
            let Some(source) = Self::nearest_ancestor(tree, id, |f| f.alters_composition())
            else {
                continue;
            };
            out.push(TreeDiagnostic {
                severity: Severity::Warning,
                kind: DiagnosticKind::CompositionBias,
                filters: vec![source, id],
                short: format!("{} is biased by composition", Self::label(tree, id)),
                long: format!(
                    "{} keeps species at different rates upstream of {}, whose result \
                     depends on species ratios.",
                    Self::label(tree, source),
                    Self::label(tree, id)
                ),
            });
        }
    }

    // ── Ancestry ──

    fn check_required_ancestors(tree: &FilterTree, out: &mut Vec<TreeDiagnostic>) {
        for id in tree.breadth_first() {
            let Some(required) = tree.filter(id).and_then(|f| f.required_ancestor()) else {
                continue;
            };
            if tree.has_ancestor_of_kind(id, required) {
                continue;
            }
            out.push(TreeDiagnostic {
                severity: Severity::Error,
                kind: DiagnosticKind::MissingAncestor,
                filters: vec![id],
                short: format!(
                    "{} needs a {} above it",
                    Self::label(tree, id),
                    required.display_name()
                ),
                long: format!(
                    "{} only works below a {} filter. Add one upstream or move this \
                     filter.",
                    Self::label(tree, id),
                    required.display_name()
                ),
            });
        }
    }

    fn check_unranged_conflicts(tree: &FilterTree, out: &mut Vec<TreeDiagnostic>) {
        for id in tree.breadth_first() {
            if !tree.filter(id).is_some_and(|f| f.needs_unranged()) {
                continue;
            }
            let Some(source) = Self::nearest_ancestor(tree, id, |f| f.drops_unranged()) else {
                continue;
            };
            out.push(TreeDiagnostic {
                severity: Severity::Warning,
                kind: DiagnosticKind::ConflictingSettings,
                filters: vec![source, id],
                short: format!("{} never sees unranged points", Self::label(tree, id)),
                long: format!(
                    "{} discards points outside every range, but {} is set to include \
                     them.",
                    Self::label(tree, source),
                    Self::label(tree, id)
                ),
            });
        }
    }
}
