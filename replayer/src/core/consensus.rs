//! Anchor-consensus scoring for click relocation.
//!
//! Every anchor that matched on screen contributes click proposals: its match
//! centers translated back into the recorded click's frame. Proposals that
//! agree land in one cluster; a cluster is accepted only when enough distinct
//! anchors back it and it clearly beats the runner-up. The selection is
//! precision-biased: no answer is preferred over a wrong click.

use tracing::debug;

use crate::config::LocatorConfig;
use crate::core::geometry::Point;

/// One anchor match translated back to the reference point's frame.
/// Ephemeral; produced and consumed within a single locate call.
#[derive(Debug, Clone, PartialEq)]
pub struct ClickProposal {
    pub point: Point,
    pub weight: f64,
    pub anchor_id: String,
}

/// Drop points that sit within `tolerance_px` of an earlier point.
pub fn dedupe_points(points: &[Point], tolerance_px: i32) -> Vec<Point> {
    let tolerance_sq = i64::from(tolerance_px) * i64::from(tolerance_px);
    let mut deduped: Vec<Point> = Vec::new();
    for &point in points {
        if deduped
            .iter()
            .any(|existing| point.distance_sq(*existing) <= tolerance_sq)
        {
            continue;
        }
        deduped.push(point);
    }
    deduped
}

/// First-fit grouping: a proposal joins the first cluster whose
/// representative (its first member) is within `tolerance_px`, else it
/// starts a new cluster.
pub fn cluster_proposals(proposals: &[ClickProposal], tolerance_px: i32) -> Vec<Vec<ClickProposal>> {
    let tolerance_sq = i64::from(tolerance_px) * i64::from(tolerance_px);
    let mut clusters: Vec<Vec<ClickProposal>> = Vec::new();
    for proposal in proposals {
        let assigned = clusters.iter_mut().find(|cluster| {
            proposal.point.distance_sq(cluster[0].point) <= tolerance_sq
        });
        match assigned {
            Some(cluster) => cluster.push(proposal.clone()),
            None => clusters.push(vec![proposal.clone()]),
        }
    }
    clusters
}

fn cluster_center(cluster: &[ClickProposal]) -> Point {
    let total_x: i64 = cluster.iter().map(|item| i64::from(item.point.x)).sum();
    let total_y: i64 = cluster.iter().map(|item| i64::from(item.point.y)).sum();
    let count = cluster.len() as f64;
    // Ties round to even so a .5 centroid does not bias toward one side.
    Point::new(
        (total_x as f64 / count).round_ties_even() as i32,
        (total_y as f64 / count).round_ties_even() as i32,
    )
}

/// Weighted agreement: sum of the highest weight contributed per distinct
/// anchor id. Repeat hits from one anchor never double-count.
fn cluster_weight(cluster: &[ClickProposal]) -> f64 {
    let mut per_anchor: Vec<(&str, f64)> = Vec::new();
    for item in cluster {
        match per_anchor.iter_mut().find(|(id, _)| *id == item.anchor_id) {
            Some((_, weight)) => {
                if item.weight > *weight {
                    *weight = item.weight;
                }
            }
            None => per_anchor.push((&item.anchor_id, item.weight)),
        }
    }
    per_anchor.iter().map(|(_, weight)| weight).sum()
}

fn distinct_anchor_count(cluster: &[ClickProposal]) -> usize {
    let mut seen: Vec<&str> = Vec::new();
    for item in cluster {
        if !seen.contains(&item.anchor_id.as_str()) {
            seen.push(&item.anchor_id);
        }
    }
    seen.len()
}

/// Pick the consensus click point, or refuse.
///
/// Refusal cases: no proposals, best cluster backed by fewer than two
/// distinct anchors, best score under the floor, or the runner-up within the
/// required margin.
pub fn select_click_point(
    proposals: &[ClickProposal],
    expected_point: Option<Point>,
    config: &LocatorConfig,
) -> Option<Point> {
    if proposals.is_empty() {
        return None;
    }

    let mut ranked: Vec<(f64, Point, usize)> = cluster_proposals(proposals, config.cluster_tolerance_px)
        .iter()
        .map(|cluster| {
            let center = cluster_center(cluster);
            let penalty = match expected_point {
                Some(expected) => {
                    let distance = center.distance(expected);
                    (distance / config.distance_penalty_divisor_px).min(1.0)
                        * config.distance_penalty_max
                }
                None => 0.0,
            };
            (
                cluster_weight(cluster) - penalty,
                center,
                distinct_anchor_count(cluster),
            )
        })
        .collect();

    // Rank by score, then by how many anchors agree.
    ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then(b.2.cmp(&a.2)));
    let (top_score, top_center, top_anchor_count) = ranked[0];

    if top_score < config.min_score {
        debug!(top_score, "consensus refused: best cluster under score floor");
        return None;
    }
    if top_anchor_count < 2 {
        debug!(top_anchor_count, "consensus refused: single-anchor cluster");
        return None;
    }
    if let Some(&(second_score, _, _)) = ranked.get(1) {
        if top_score - second_score < config.min_margin {
            debug!(
                top_score,
                second_score, "consensus refused: runner-up within margin"
            );
            return None;
        }
    }
    Some(top_center)
}
