//! Ordered-tier resolution of an alert to its delivery destinations.
//!
//! Resolution consults the cached destination snapshot only; it never talks
//! to the directory itself and has no side effects.

use crate::core::{Alert, DeliveryError, Destination};
use tracing::debug;

/// How strictly explicit `output_ids` overrides are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    /// Queue-triggered dispatch: an override tier emptied by deleted
    /// destinations silently falls through to the next tier.
    Queue,
    /// Operator-triggered resend: explicitly supplied `output_ids` that no
    /// longer intersect the directory are an input error, not a fallthrough.
    Direct,
}

/// Maps an alert to the destinations it should be delivered to.
///
/// Tiers, first non-empty result wins:
/// 1. the `SKIP` sentinel suppresses delivery entirely;
/// 2. dynamic `destinations` overrides, intersected with the directory;
/// 3. user-configured `output_ids`, intersected with the directory;
/// 4. every destination whose `default_for_severity` covers the alert.
///
/// IDs referencing deleted destinations are dropped; a tier emptied that way
/// falls through. That fallthrough is deliberate policy: deleting a
/// destination reroutes its alerts to the next tier rather than failing
/// them.
pub fn resolve(
    alert: &Alert,
    destinations: &[Destination],
    mode: ResolveMode,
) -> Result<Vec<Destination>, DeliveryError> {
    if alert.skip_requested() {
        debug!(alert_id = %alert.alert_id, "alert requested SKIP, no destinations resolved");
        return Ok(Vec::new());
    }

    if !alert.destinations.is_empty() {
        let matched = intersect_by_id(&alert.destinations, destinations);
        if !matched.is_empty() {
            return Ok(matched);
        }
        debug!(
            alert_id = %alert.alert_id,
            "dynamic destination overrides all deleted, falling through"
        );
    }

    if !alert.output_ids.is_empty() {
        let matched = intersect_by_id(&alert.output_ids, destinations);
        if !matched.is_empty() {
            return Ok(matched);
        }
        if mode == ResolveMode::Direct {
            return Err(DeliveryError::InvalidInput(format!(
                "none of the requested destination IDs exist: {:?}",
                alert.output_ids
            )));
        }
        debug!(
            alert_id = %alert.alert_id,
            "configured output overrides all deleted, falling through"
        );
    }

    Ok(destinations
        .iter()
        .filter(|d| d.default_for_severity.contains(&alert.severity))
        .cloned()
        .collect())
}

/// Intersects an ID override list with the live directory, preserving the
/// override order and dropping IDs that no longer exist.
fn intersect_by_id(ids: &[String], destinations: &[Destination]) -> Vec<Destination> {
    ids.iter()
        .filter_map(|id| destinations.iter().find(|d| &d.destination_id == id))
        .cloned()
        .collect()
}
