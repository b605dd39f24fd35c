//! Duplicate detection and deduplication planning.
//!
//! Candidates are found from cheap metadata (size plus normalized name, or
//! equal known hashes). Every candidate is confirmed by content hash before it
//! can appear in a plan; a plan is only a proposal until it is applied.

use crate::error::{CacheError, CacheResult};
use hoard_core::{ContentHash, SourceType, hash_payload, normalize_name};
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

/// An artifact as seen by the deduplication engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupMember {
    pub identifier: String,
    pub source_type: SourceType,
    pub canonical_path: PathBuf,
    pub size_bytes: u64,
    pub content_hash: Option<ContentHash>,
    pub is_symlink: bool,
    pub symlink_target: Option<PathBuf>,
    /// `None` for artifacts present on disk but not yet registered.
    pub created_at: Option<OffsetDateTime>,
}

impl DedupMember {
    /// The bytes to hash: the foreign blob for foreign links, else the payload.
    pub fn payload_path(&self) -> &Path {
        match (&self.source_type, &self.symlink_target) {
            (SourceType::ForeignSymlink, Some(target)) => target,
            _ => &self.canonical_path,
        }
    }

    /// Hoard-owned links already point at another artifact's payload.
    fn is_deduplicated(&self) -> bool {
        self.is_symlink && !self.source_type.is_protected()
    }

    fn name(&self) -> &str {
        self.identifier
            .split_once(':')
            .map(|(_, name)| name)
            .unwrap_or(&self.identifier)
    }
}

/// Replace one mutable artifact's payload with a link to the canonical one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkAction {
    pub identifier: String,
    pub path: PathBuf,
    pub target_identifier: String,
    pub target: PathBuf,
    pub content_hash: ContentHash,
    pub size_bytes: u64,
}

/// A set of artifacts confirmed to hold identical bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub content_hash: ContentHash,
    pub size_bytes: u64,
    pub canonical: String,
    pub canonical_path: PathBuf,
    /// Non-canonical members, sorted.
    pub duplicates: Vec<String>,
}

/// A heuristic candidate whose members turned out to differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedCandidate {
    pub identifiers: Vec<String>,
    pub distinct_hashes: usize,
}

/// A member that could not be hashed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HashFailure {
    pub identifier: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DedupPlan {
    pub groups: Vec<DuplicateGroup>,
    pub actions: Vec<LinkAction>,
    pub rejected: Vec<RejectedCandidate>,
    pub failures: Vec<HashFailure>,
    pub savings_bytes: u64,
    /// Hashes computed during confirmation, by identifier.
    #[serde(skip)]
    pub computed_hashes: Vec<(String, ContentHash)>,
}

impl DedupPlan {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Group candidate duplicates without reading any file content.
///
/// Returns index sets into `members`, each with at least two entries.
pub fn candidate_groups(members: &[DedupMember]) -> Vec<Vec<usize>> {
    let mut parent: Vec<usize> = (0..members.len()).collect();
    fn find(parent: &mut [usize], i: usize) -> usize {
        let mut root = i;
        while parent[root] != root {
            root = parent[root];
        }
        let mut node = i;
        while parent[node] != root {
            let next = parent[node];
            parent[node] = root;
            node = next;
        }
        root
    }

    let mut by_name: HashMap<(u64, String), usize> = HashMap::new();
    let mut by_hash: HashMap<(u64, ContentHash), usize> = HashMap::new();
    for (i, member) in members.iter().enumerate() {
        if member.is_deduplicated() {
            continue;
        }
        let mut keys = Vec::with_capacity(2);
        let normalized = normalize_name(member.name());
        if !normalized.is_empty() {
            match by_name.entry((member.size_bytes, normalized)) {
                Entry::Occupied(e) => keys.push(*e.get()),
                Entry::Vacant(e) => {
                    e.insert(i);
                }
            }
        }
        if let Some(hash) = member.content_hash {
            match by_hash.entry((member.size_bytes, hash)) {
                Entry::Occupied(e) => keys.push(*e.get()),
                Entry::Vacant(e) => {
                    e.insert(i);
                }
            }
        }
        for j in keys {
            let (a, b) = (find(&mut parent, i), find(&mut parent, j));
            if a != b {
                parent[a] = b;
            }
        }
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..members.len() {
        if members[i].is_deduplicated() {
            continue;
        }
        let root = find(&mut parent, i);
        groups.entry(root).or_default().push(i);
    }
    groups.into_values().filter(|g| g.len() > 1).collect()
}

/// Pick the member that keeps the bytes.
///
/// Already-canonical payloads (targets of existing links) win, then local
/// imports, downloads, hub cache scans, and finally foreign links. Ties go to
/// the earliest registration, then to the identifier.
pub fn select_canonical(group: &[&DedupMember], linked_targets: &HashSet<PathBuf>) -> usize {
    let rank = |m: &DedupMember| -> u8 {
        if !m.is_symlink && linked_targets.contains(&m.canonical_path) {
            return 0;
        }
        match m.source_type {
            SourceType::LocalImport => 1,
            SourceType::Download => 2,
            SourceType::NativeCacheScan => 3,
            SourceType::ForeignSymlink => 4,
        }
    };

    let mut best = 0;
    for (i, member) in group.iter().enumerate().skip(1) {
        let current = group[best];
        let key = (
            rank(member),
            member.created_at.is_none(),
            member.created_at,
            &member.identifier,
        );
        let best_key = (
            rank(current),
            current.created_at.is_none(),
            current.created_at,
            &current.identifier,
        );
        if key < best_key {
            best = i;
        }
    }
    best
}

/// Confirm candidates by hash and build a plan.
pub async fn plan(
    members: Vec<DedupMember>,
    linked_targets: &HashSet<PathBuf>,
    cancel: &CancellationToken,
) -> CacheResult<DedupPlan> {
    let mut plan = DedupPlan::default();
    let mut members = members;

    for candidate in candidate_groups(&members) {
        // Confirmation: hash every member whose hash is unknown.
        let mut hashed: Vec<(usize, ContentHash)> = Vec::with_capacity(candidate.len());
        for &i in &candidate {
            if cancel.is_cancelled() {
                return Err(CacheError::Cancelled);
            }
            let hash = match members[i].content_hash {
                Some(hash) => hash,
                None => match hash_in_background(members[i].payload_path(), cancel).await {
                    Ok(hash) => {
                        members[i].content_hash = Some(hash);
                        plan.computed_hashes.push((members[i].identifier.clone(), hash));
                        hash
                    }
                    Err(CacheError::Cancelled) => return Err(CacheError::Cancelled),
                    Err(e) => {
                        tracing::warn!(identifier = %members[i].identifier, error = %e, "Failed to hash candidate");
                        plan.failures.push(HashFailure {
                            identifier: members[i].identifier.clone(),
                            message: e.to_string(),
                        });
                        continue;
                    }
                },
            };
            hashed.push((i, hash));
        }

        let mut by_hash: BTreeMap<ContentHash, Vec<usize>> = BTreeMap::new();
        for (i, hash) in &hashed {
            by_hash.entry(*hash).or_default().push(*i);
        }
        if by_hash.len() > 1 {
            let mut identifiers: Vec<String> = hashed
                .iter()
                .map(|(i, _)| members[*i].identifier.clone())
                .collect();
            identifiers.sort();
            tracing::debug!(?identifiers, "Candidate rejected: content differs");
            plan.rejected.push(RejectedCandidate {
                identifiers,
                distinct_hashes: by_hash.len(),
            });
        }

        for (hash, indices) in by_hash {
            if indices.len() < 2 {
                continue;
            }
            let group: Vec<&DedupMember> = indices.iter().map(|&i| &members[i]).collect();
            let canonical = group[select_canonical(&group, linked_targets)];

            let mut duplicates = Vec::new();
            for member in &group {
                if member.identifier == canonical.identifier {
                    continue;
                }
                duplicates.push(member.identifier.clone());
                plan.savings_bytes += member.size_bytes;
                if !member.source_type.is_protected() && !member.is_symlink {
                    plan.actions.push(LinkAction {
                        identifier: member.identifier.clone(),
                        path: member.canonical_path.clone(),
                        target_identifier: canonical.identifier.clone(),
                        target: canonical.canonical_path.clone(),
                        content_hash: hash,
                        size_bytes: member.size_bytes,
                    });
                }
            }
            duplicates.sort();

            plan.groups.push(DuplicateGroup {
                content_hash: hash,
                size_bytes: canonical.size_bytes,
                canonical: canonical.identifier.clone(),
                canonical_path: canonical.canonical_path.clone(),
                duplicates,
            });
        }
    }

    plan.groups.sort_by(|a, b| a.canonical.cmp(&b.canonical));
    Ok(plan)
}

/// Hash a payload on a blocking thread.
pub async fn hash_in_background(path: &Path, cancel: &CancellationToken) -> CacheResult<ContentHash> {
    let path = path.to_path_buf();
    let cancel = cancel.clone();
    tokio::task::spawn_blocking(move || hash_payload(&path, &cancel))
        .await
        .map_err(|e| CacheError::Io(std::io::Error::other(format!("hash task failed: {e}"))))?
        .map_err(CacheError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(identifier: &str, source_type: SourceType, size: u64) -> DedupMember {
        DedupMember {
            identifier: identifier.to_string(),
            source_type,
            canonical_path: PathBuf::from(format!("/payload/{identifier}")),
            size_bytes: size,
            content_hash: None,
            is_symlink: source_type == SourceType::ForeignSymlink,
            symlink_target: (source_type == SourceType::ForeignSymlink)
                .then(|| PathBuf::from(format!("/blobs/{identifier}"))),
            created_at: None,
        }
    }

    #[test]
    fn test_candidates_need_equal_size_and_name() {
        let members = vec![
            member("ollama:llama3.2:7b", SourceType::ForeignSymlink, 100),
            member("hub:org/Llama-3.2-7B-4bit", SourceType::NativeCacheScan, 100),
            member("hf:org/Llama-3.2-7B-8bit", SourceType::Download, 200),
            member("hf:org/mistral-7b", SourceType::Download, 100),
        ];
        assert_eq!(candidate_groups(&members), vec![vec![0, 1]]);
    }

    #[test]
    fn test_known_hashes_group_across_names() {
        let hash = ContentHash::compute(b"same");
        let mut a = member("hf:org/alpha", SourceType::Download, 4);
        let mut b = member("local:beta.gguf", SourceType::LocalImport, 4);
        a.content_hash = Some(hash);
        b.content_hash = Some(hash);
        assert_eq!(candidate_groups(&[a, b]), vec![vec![0, 1]]);
    }

    #[test]
    fn test_hoard_links_are_not_candidates() {
        let a = member("hf:org/model", SourceType::Download, 4);
        let mut b = member("local:model", SourceType::LocalImport, 4);
        b.is_symlink = true;
        b.symlink_target = Some(a.canonical_path.clone());
        assert!(candidate_groups(&[a, b]).is_empty());
    }

    #[test]
    fn test_canonical_priority() {
        let hub = member("hub:org/m", SourceType::NativeCacheScan, 1);
        let ollama = member("ollama:m:latest", SourceType::ForeignSymlink, 1);
        let download = member("hf:org/m", SourceType::Download, 1);
        let local = member("local:m", SourceType::LocalImport, 1);
        let none = HashSet::new();

        assert_eq!(select_canonical(&[&hub, &ollama], &none), 0);
        assert_eq!(select_canonical(&[&ollama, &download, &hub], &none), 1);
        assert_eq!(select_canonical(&[&download, &local], &none), 1);

        // An existing link target keeps its role.
        let linked: HashSet<PathBuf> = [hub.canonical_path.clone()].into();
        assert_eq!(select_canonical(&[&local, &hub], &linked), 1);
    }

    #[test]
    fn test_canonical_ties_by_age_then_identifier() {
        let mut older = member("hf:org/b", SourceType::Download, 1);
        let mut newer = member("hf:org/a", SourceType::Download, 1);
        older.created_at = Some(OffsetDateTime::UNIX_EPOCH);
        newer.created_at = Some(OffsetDateTime::UNIX_EPOCH + time::Duration::days(1));
        let none = HashSet::new();
        assert_eq!(select_canonical(&[&newer, &older], &none), 1);

        older.created_at = None;
        newer.created_at = None;
        assert_eq!(select_canonical(&[&older, &newer], &none), 1);
    }

    #[tokio::test]
    async fn test_plan_rejects_same_name_different_bytes() {
        let temp = tempfile::tempdir().unwrap();
        let a_path = temp.path().join("a");
        let b_path = temp.path().join("b");
        std::fs::write(&a_path, b"aaaa").unwrap();
        std::fs::write(&b_path, b"bbbb").unwrap();

        let mut a = member("hf:org/model", SourceType::Download, 4);
        a.canonical_path = a_path;
        let mut b = member("local:model", SourceType::LocalImport, 4);
        b.canonical_path = b_path;

        let plan = plan(vec![a, b], &HashSet::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(plan.groups.is_empty());
        assert!(plan.actions.is_empty());
        assert_eq!(plan.savings_bytes, 0);
        assert_eq!(plan.rejected.len(), 1);
        assert_eq!(plan.rejected[0].distinct_hashes, 2);
        assert_eq!(plan.computed_hashes.len(), 2);
    }

    #[tokio::test]
    async fn test_plan_links_mutable_members_only() {
        let temp = tempfile::tempdir().unwrap();
        let bytes = b"identical";
        let paths: Vec<PathBuf> = (0..3).map(|i| temp.path().join(format!("p{i}"))).collect();
        for p in &paths {
            std::fs::write(p, bytes).unwrap();
        }

        let mut hub = member("hub:org/model", SourceType::NativeCacheScan, 9);
        hub.canonical_path = paths[0].clone();
        let mut ollama = member("ollama:model:latest", SourceType::ForeignSymlink, 9);
        ollama.symlink_target = Some(paths[1].clone());
        let mut download = member("hf:org/model", SourceType::Download, 9);
        download.canonical_path = paths[2].clone();

        let plan = plan(
            vec![hub, ollama, download],
            &HashSet::new(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(plan.groups.len(), 1);
        let group = &plan.groups[0];
        assert_eq!(group.canonical, "hf:org/model");
        assert_eq!(group.duplicates, vec!["hub:org/model", "ollama:model:latest"]);
        // Protected members are never converted.
        assert!(plan.actions.is_empty());
        assert_eq!(plan.savings_bytes, 18);
    }

    #[tokio::test]
    async fn test_plan_honors_cancellation() {
        let temp = tempfile::tempdir().unwrap();
        let mut a = member("hf:org/model", SourceType::Download, 1);
        a.canonical_path = temp.path().join("a");
        let mut b = member("local:model", SourceType::LocalImport, 1);
        b.canonical_path = temp.path().join("b");
        std::fs::write(&a.canonical_path, b"x").unwrap();
        std::fs::write(&b.canonical_path, b"x").unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            plan(vec![a, b], &HashSet::new(), &cancel).await,
            Err(CacheError::Cancelled)
        ));
    }
}
