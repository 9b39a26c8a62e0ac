//! Dependency Impact Analyzer
//!
//! "What breaks if I change this column?"
//! Walks the dependency graph breadth-first through a [`DependencyLookup`].
//! All lookups of one level run concurrently; results are merged into the
//! visited set sequentially once the whole level has returned, so output
//! order only depends on the graph, never on lookup timing.
//!
//! A failed lookup drops that node's subtree and marks the result partial.
//! A deadline or cancellation stops the walk at the current level and
//! returns what was collected so far.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::config::{MAX_DEPTH, MIN_DEPTH};
use crate::error::{validation_error, AppResult};
use crate::models::{DependencyObject, Direction, ImpactDetail, ObjectRef};
use crate::warehouse::DependencyLookup;

// ============================================================================
// Cancellation
// ============================================================================

/// Sender half; cancelling is idempotent
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

/// Receiver half, cheap to clone into each traversal
#[derive(Debug, Clone)]
pub struct CancelToken(watch::Receiver<bool>);

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancelled. Never resolves if the handle is dropped first.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

pub fn cancellation() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(tx), CancelToken(rx))
}

/// Bounds applied to every lookup round
#[derive(Debug, Clone, Default)]
pub struct TraversalOptions {
    pub deadline: Option<Instant>,
    pub cancel: Option<CancelToken>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopReason {
    DeadlineExceeded,
    Cancelled,
}

/// Run `fut` unless the deadline passes or the token fires first
async fn bounded<F: Future>(fut: F, options: &TraversalOptions) -> Result<F::Output, StopReason> {
    let mut cancel = options.cancel.clone();
    tokio::select! {
        biased;
        _ = wait_cancelled(cancel.as_mut()) => Err(StopReason::Cancelled),
        _ = wait_deadline(options.deadline) => Err(StopReason::DeadlineExceeded),
        output = fut => Ok(output),
    }
}

async fn wait_cancelled(token: Option<&mut CancelToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// ============================================================================
// Traversal
// ============================================================================

/// Result of one directional walk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Traversal {
    /// Level 1, in discovery order
    pub direct: Vec<DependencyObject>,
    /// Levels 2..=max_depth, in discovery order
    pub transitive: Vec<DependencyObject>,
    /// Deepest level whose lookups completed
    pub depth_reached: u8,
    pub failed_lookups: usize,
    pub stopped: Option<StopReason>,
}

impl Traversal {
    pub fn is_partial(&self) -> bool {
        self.failed_lookups > 0 || self.stopped.is_some()
    }

    pub fn blast_radius(&self) -> usize {
        self.direct.len() + self.transitive.len()
    }

    fn all(&self) -> impl Iterator<Item = &DependencyObject> {
        self.direct.iter().chain(self.transitive.iter())
    }
}

/// Which directions to walk and how deep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImpactSettings {
    pub max_depth: u8,
    pub include_downstream: bool,
    pub include_upstream: bool,
}

impl Default for ImpactSettings {
    fn default() -> Self {
        Self {
            max_depth: crate::config::DEFAULT_DEPTH,
            include_downstream: true,
            include_upstream: true,
        }
    }
}

fn check_depth(max_depth: u8) -> AppResult<()> {
    if !(MIN_DEPTH..=MAX_DEPTH).contains(&max_depth) {
        return Err(validation_error(format!(
            "max_depth must be {}-{}, got {}",
            MIN_DEPTH, MAX_DEPTH, max_depth
        )));
    }
    Ok(())
}

pub struct ImpactAnalyzer;

impl ImpactAnalyzer {
    /// Walk the graph from `changed` up to `max_depth` levels.
    ///
    /// The starting object is never reported as its own dependent, even
    /// through a cycle.
    pub async fn analyze_impact(
        changed: &ObjectRef,
        direction: Direction,
        lookup: &dyn DependencyLookup,
        max_depth: u8,
        options: &TraversalOptions,
    ) -> AppResult<Traversal> {
        check_depth(max_depth)?;

        let mut traversal = Traversal::default();
        let mut visited: HashSet<(String, String)> = HashSet::new();
        visited.insert(changed.qualified_name().key());

        let mut frontier: Vec<ObjectRef> = vec![changed.clone()];

        for level in 1..=max_depth {
            if frontier.is_empty() {
                break;
            }

            let lookups = join_all(
                frontier
                    .iter()
                    .map(|node| lookup.neighbors(node, direction)),
            );
            let results = match bounded(lookups, options).await {
                Ok(results) => results,
                Err(reason) => {
                    warn!(
                        "{} traversal from {} stopped at level {}: {:?}",
                        direction, changed, level, reason
                    );
                    traversal.stopped = Some(reason);
                    break;
                }
            };

            let mut next = Vec::new();
            for (node, result) in frontier.iter().zip(results) {
                match result {
                    Ok(neighbors) => {
                        for object in neighbors {
                            if !visited.insert(object.qualified_name().key()) {
                                continue;
                            }
                            next.push(object.to_object_ref());
                            if level == 1 {
                                traversal.direct.push(object);
                            } else {
                                traversal.transitive.push(object);
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Lookup failed for {} ({}): {}", node, direction, e);
                        traversal.failed_lookups += 1;
                    }
                }
            }

            traversal.depth_reached = level;
            frontier = next;
        }

        debug!(
            "{} impact of {}: {} direct, {} transitive, depth {}, partial={}",
            direction,
            changed,
            traversal.direct.len(),
            traversal.transitive.len(),
            traversal.depth_reached,
            traversal.is_partial()
        );

        Ok(traversal)
    }

    /// Build the impact detail for one changed object
    pub async fn impact_detail(
        changed: &ObjectRef,
        lookup: &dyn DependencyLookup,
        settings: &ImpactSettings,
        options: &TraversalOptions,
    ) -> AppResult<ImpactDetail> {
        check_depth(settings.max_depth)?;

        let mut detail = ImpactDetail::default();

        if settings.include_downstream {
            let downstream = Self::analyze_impact(
                changed,
                Direction::Downstream,
                lookup,
                settings.max_depth,
                options,
            )
            .await?;

            let (applications, apps_partial) =
                Self::collect_applications(changed, &downstream, lookup, options).await;

            detail.partial |= downstream.is_partial() || apps_partial;
            detail.max_depth_reached = downstream.depth_reached;
            detail.blast_radius = downstream.blast_radius();
            detail.affected_applications = applications;
            detail.direct_dependents = downstream.direct;
            detail.transitive_dependents = downstream.transitive;
        }

        if settings.include_upstream {
            let upstream = Self::analyze_impact(
                changed,
                Direction::Upstream,
                lookup,
                settings.max_depth,
                options,
            )
            .await?;

            detail.partial |= upstream.is_partial();
            detail.upstream_dependencies = upstream.all().cloned().collect();
        }

        Ok(detail)
    }

    /// Applications consuming the changed object or any of its dependents
    async fn collect_applications(
        changed: &ObjectRef,
        downstream: &Traversal,
        lookup: &dyn DependencyLookup,
        options: &TraversalOptions,
    ) -> (BTreeSet<String>, bool) {
        let targets: Vec<ObjectRef> = std::iter::once(changed.clone())
            .chain(downstream.all().map(DependencyObject::to_object_ref))
            .collect();

        let lookups = join_all(targets.iter().map(|target| lookup.applications(target)));
        let results = match bounded(lookups, options).await {
            Ok(results) => results,
            Err(_) => return (BTreeSet::new(), true),
        };

        let mut applications = BTreeSet::new();
        let mut partial = false;
        for (target, result) in targets.iter().zip(results) {
            match result {
                Ok(apps) => applications.extend(apps),
                Err(e) => {
                    warn!("Application lookup failed for {}: {}", target, e);
                    partial = true;
                }
            }
        }
        (applications, partial)
    }
}

/// Walk the graph from `changed`. See [`ImpactAnalyzer::analyze_impact`].
pub async fn analyze_impact(
    changed: &ObjectRef,
    direction: Direction,
    lookup: &dyn DependencyLookup,
    max_depth: u8,
) -> AppResult<Traversal> {
    ImpactAnalyzer::analyze_impact(changed, direction, lookup, max_depth, &TraversalOptions::default())
        .await
}
