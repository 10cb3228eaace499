use chrono::Datelike;
use dashmap::DashMap;

/// Per-prefix monotonic reference number sequences,
/// `{PREFIX}-{year}-{seq:05}`. Display-only: uniqueness of entities rests
/// on their Ulids, the sequence just has to never repeat within a prefix.
/// Counters are re-seeded from replayed references on startup.
#[derive(Default)]
pub struct RefSequences {
    /// Keyed by `"{PREFIX}-{year}"`, holding the highest sequence issued.
    counters: DashMap<String, u64>,
}

impl RefSequences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next reference for `prefix` in the current year.
    pub fn next(&self, prefix: &str) -> String {
        let year = chrono::Utc::now().year();
        let key = format!("{prefix}-{year}");
        let mut entry = self.counters.entry(key).or_insert(0);
        *entry += 1;
        format!("{prefix}-{year}-{:05}", *entry)
    }

    /// Advance the counter past an already-issued reference (WAL replay).
    /// Malformed references are ignored.
    pub fn observe(&self, reference: &str) {
        let Some((key, seq)) = split_reference(reference) else {
            return;
        };
        let mut entry = self.counters.entry(key.to_string()).or_insert(0);
        if seq > *entry {
            *entry = seq;
        }
    }
}

/// `"VHB-2025-00042"` → `("VHB-2025", 42)`.
fn split_reference(reference: &str) -> Option<(&str, u64)> {
    let (key, seq) = reference.rsplit_once('-')?;
    Some((key, seq.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_are_monotonic_per_prefix() {
        let refs = RefSequences::new();
        let a = refs.next("VHB");
        let b = refs.next("VHB");
        let c = refs.next("VNB");
        assert!(a.ends_with("-00001"), "{a}");
        assert!(b.ends_with("-00002"), "{b}");
        assert!(c.ends_with("-00001"), "{c}");
        assert!(a.starts_with("VHB-"));
        assert!(c.starts_with("VNB-"));
    }

    #[test]
    fn observe_reseeds_past_replayed_references() {
        let refs = RefSequences::new();
        refs.observe("SV-2025-00007");
        refs.observe("SV-2025-00003");
        let year = chrono::Utc::now().year();
        if year == 2025 {
            assert_eq!(refs.next("SV"), "SV-2025-00008");
        } else {
            // A new year restarts the sequence.
            assert_eq!(refs.next("SV"), format!("SV-{year}-00001"));
        }
    }

    #[test]
    fn observe_ignores_malformed() {
        let refs = RefSequences::new();
        refs.observe("not a reference");
        refs.observe("VHB-2025-");
        let first = refs.next("VHB");
        assert!(first.ends_with("-00001"), "{first}");
    }
}
