//! Delegation resolver: which trusted targets role describes a path.
//!
//! The walk is a pre-order depth-first search from the top-level targets
//! role. Children are visited in delegation order, a terminating delegation
//! that covers the path cuts off every role still pending, and a visited set
//! plus a visit budget keep cyclic or oversized delegation graphs in check.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{debug, warn};
use tuf_metadata::{TargetFile, Targets, ROOT, TARGETS};

use crate::error::Result;

/// Supplies verified targets roles to the resolver.
#[async_trait]
pub trait TargetsLoader: Send {
    /// Returns the trusted `role`, delegated by `delegator`, loading it first
    /// when it is not trusted yet.
    async fn load_targets(&mut self, role: &str, delegator: &str) -> Result<Targets>;
}

/// Looks up `target_path`, visiting at most `max_delegations` roles.
pub async fn find_target<L>(
    loader: &mut L,
    target_path: &str,
    max_delegations: u32,
) -> Result<Option<TargetFile>>
where
    L: TargetsLoader + ?Sized,
{
    // (role, delegator) pairs; the top of the stack is visited next.
    let mut pending: Vec<(String, String)> = vec![(TARGETS.to_string(), ROOT.to_string())];
    let mut visited: HashSet<String> = HashSet::new();
    let mut budget = max_delegations;

    while budget > 0 {
        let Some((role, delegator)) = pending.pop() else {
            return Ok(None);
        };
        if visited.contains(&role) {
            continue;
        }

        let targets = loader.load_targets(&role, &delegator).await?;
        if let Some(target) = targets.targets.get(target_path) {
            debug!(role = %role, path = target_path, "resolver: found target");
            return Ok(Some(target.clone()));
        }
        visited.insert(role.clone());
        budget -= 1;

        let Some(delegations) = &targets.delegations else {
            continue;
        };
        let mut children = Vec::new();
        for (child, terminating) in delegations.roles_for_target(target_path) {
            debug!(role = %role, child = %child, terminating, "resolver: following delegation");
            children.push((child, role.clone()));
            if terminating {
                pending.clear();
                break;
            }
        }
        children.reverse();
        pending.extend(children);
    }

    if !pending.is_empty() {
        warn!(
            max_delegations,
            path = target_path,
            "resolver: delegation visit budget exhausted"
        );
    }
    Ok(None)
}
