use std::time::Duration;

use anyhow::Result;

use crate::document::{LibraryVariable, ResolvedType};
use crate::path;

#[derive(Debug)]
pub struct LibraryCache {
    ttl: Duration,
    entry: Option<(Duration, Vec<LibraryVariable>)>,
    fetches: usize,
}

impl LibraryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: None,
            fetches: 0,
        }
    }

    pub fn is_fresh(&self, now: Duration) -> bool {
        match &self.entry {
            Some((fetched_at, _)) => now.saturating_sub(*fetched_at) < self.ttl,
            None => false,
        }
    }

    pub fn get_or_fetch<F>(&mut self, now: Duration, fetch: F) -> Result<&[LibraryVariable]>
    where
        F: FnOnce() -> Result<Vec<LibraryVariable>>,
    {
        if !self.is_fresh(now) {
            let variables = fetch()?;
            self.fetches += 1;
            self.entry = Some((now, variables));
        }
        Ok(self
            .entry
            .as_ref()
            .map(|(_, variables)| variables.as_slice())
            .unwrap_or(&[]))
    }

    pub fn fetches(&self) -> usize {
        self.fetches
    }
}

/// Library variable whose name matches `token_path`: an exact normalised
/// name first, then the longest trailing match of two or more segments.
/// Equal suffix lengths are ranked by containment, then by declaration order.
pub fn find_library_match<'a>(
    variables: &'a [LibraryVariable],
    token_path: &str,
    expected: ResolvedType,
) -> Option<&'a LibraryVariable> {
    let target = path::normalize(token_path);
    if target.is_empty() {
        return None;
    }
    let typed = || variables.iter().filter(move |variable| variable.resolved_type == expected);

    if let Some(exact) = typed().find(|variable| path::normalize(&variable.name) == target) {
        return Some(exact);
    }

    let mut best: Option<(usize, f64, &LibraryVariable)> = None;
    for variable in typed() {
        let suffix = path::common_suffix_len(&variable.name, &target);
        if suffix < path::MIN_SUFFIX_SEGMENTS {
            continue;
        }
        let containment = path::containment_score(&variable.name, &target);
        let better = match &best {
            Some((best_suffix, best_containment, _)) => {
                suffix > *best_suffix || (suffix == *best_suffix && containment > *best_containment)
            }
            None => true,
        };
        if better {
            best = Some((suffix, containment, variable));
        }
    }
    best.map(|(_, _, variable)| variable)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> Vec<LibraryVariable> {
        vec![
            LibraryVariable {
                key: "k-primary".into(),
                name: "brand/text/primary".into(),
                collection_name: "Brand".into(),
                resolved_type: ResolvedType::Color,
            },
            LibraryVariable {
                key: "k-surface".into(),
                name: "system/background/surface".into(),
                collection_name: "System".into(),
                resolved_type: ResolvedType::Color,
            },
            LibraryVariable {
                key: "k-space".into(),
                name: "system/background/surface".into(),
                collection_name: "System".into(),
                resolved_type: ResolvedType::Float,
            },
        ]
    }

    #[test]
    fn exact_name_wins() {
        let library = library();
        let hit = find_library_match(&library, "system.background.surface", ResolvedType::Color);
        assert_eq!(hit.map(|v| v.key.as_str()), Some("k-surface"));
        let hit = find_library_match(&library, "system.background.surface", ResolvedType::Float);
        assert_eq!(hit.map(|v| v.key.as_str()), Some("k-space"));
    }

    #[test]
    fn falls_back_to_suffix() {
        let library = library();
        let hit = find_library_match(&library, "theme/text/primary", ResolvedType::Color);
        assert_eq!(hit.map(|v| v.key.as_str()), Some("k-primary"));
        assert!(find_library_match(&library, "primary", ResolvedType::Color).is_none());
    }

    #[test]
    fn cache_respects_ttl() {
        let mut cache = LibraryCache::new(Duration::from_secs(30));
        cache.get_or_fetch(Duration::ZERO, || Ok(library())).unwrap();
        cache.get_or_fetch(Duration::from_secs(29), || Ok(Vec::new())).unwrap();
        assert_eq!(cache.fetches(), 1);
        let fresh = cache.get_or_fetch(Duration::from_secs(30), || Ok(Vec::new())).unwrap();
        assert!(fresh.is_empty());
        assert_eq!(cache.fetches(), 2);
    }
}
