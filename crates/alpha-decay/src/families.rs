//! Strategy families: ordered groups of sibling strategies that can stand in
//! for one another during rotation.

use std::collections::BTreeMap;

use tokio::sync::RwLock;

/// Strip a trailing `_v<N>` version suffix (`momentum_v3` -> `momentum`).
pub fn strip_version_suffix(strategy_id: &str) -> &str {
    match strategy_id.rfind("_v") {
        Some(idx)
            if idx > 0
                && strategy_id.len() > idx + 2
                && strategy_id[idx + 2..].chars().all(|c| c.is_ascii_digit()) =>
        {
            &strategy_id[..idx]
        }
        _ => strategy_id,
    }
}

/// Member after `strategy_id` in the ordered list, or the newest member when
/// `strategy_id` is last or not listed.
pub fn next_sibling(members: &[String], strategy_id: &str) -> Option<String> {
    let last = members.last()?;
    match members.iter().position(|m| m == strategy_id) {
        Some(idx) if idx + 1 < members.len() => Some(members[idx + 1].clone()),
        _ => Some(last.clone()),
    }
}

/// Runtime-updatable family definitions.
pub struct FamilyRegistry {
    families: RwLock<BTreeMap<String, Vec<String>>>,
}

impl FamilyRegistry {
    pub fn new(families: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            families: RwLock::new(families),
        }
    }

    pub async fn register(&self, name: &str, members: Vec<String>) {
        tracing::info!("Registered strategy family {} ({} members)", name, members.len());
        self.families.write().await.insert(name.to_string(), members);
    }

    pub async fn remove(&self, name: &str) -> Option<Vec<String>> {
        self.families.write().await.remove(name)
    }

    pub async fn snapshot(&self) -> BTreeMap<String, Vec<String>> {
        self.families.read().await.clone()
    }

    /// Family containing `strategy_id`: exact membership first, then a family
    /// sharing its unversioned name.
    pub async fn family_of(&self, strategy_id: &str) -> Option<(String, Vec<String>)> {
        let families = self.families.read().await;

        if let Some((name, members)) = families
            .iter()
            .find(|(_, members)| members.iter().any(|m| m == strategy_id))
        {
            return Some((name.clone(), members.clone()));
        }

        let base = strip_version_suffix(strategy_id);
        if let Some(members) = families.get(base) {
            return Some((base.to_string(), members.clone()));
        }
        families
            .iter()
            .find(|(_, members)| members.iter().any(|m| strip_version_suffix(m) == base))
            .map(|(name, members)| (name.clone(), members.clone()))
    }

    /// Replacement candidate for `strategy_id` within its family.
    pub async fn resolve_sibling(&self, strategy_id: &str) -> Option<String> {
        let (_, members) = self.family_of(strategy_id).await?;
        next_sibling(&members, strategy_id)
    }
}
