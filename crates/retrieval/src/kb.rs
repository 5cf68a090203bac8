//! Knowledge-base retrieval: index lifecycle with stamp-based
//! invalidation, a process-wide vector-store cache, and a TTL+LRU
//! query-result cache.
//!
//! The stamp sidecar summarizes the corpus (file count, newest mtime,
//! root, chunk params). A mismatch between the stored stamp and the
//! corpus on disk schedules a rebuild; the in-memory store snapshot is
//! keyed by the stamp signature so readers never see a stale index
//! without also seeing its stale signature.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde::{Deserialize, Serialize};

use mf_domain::error::{Error, Result};
use mf_domain::result::Citation;

use crate::chunker::chunk_docs;
use crate::loaders::{list_corpus_files, load_docs};
use crate::session_index::title_for;
use crate::vector::VectorStore;
use crate::Embedder;

/// Query-result cache bounds: max entries and the batch evicted when
/// the cap is hit.
const QUERY_CACHE_CAP: usize = 512;
const QUERY_CACHE_EVICT: usize = 64;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stamp
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Corpus summary persisted next to the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KbStamp {
    pub count: usize,
    pub latest_mtime_ns: u128,
    pub root: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

fn mtime_ns(path: &Path) -> u128 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Search result types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KbMatch {
    pub text: String,
    pub source: String,
    pub page: Option<usize>,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KbSearchResult {
    pub query: String,
    pub matches: Vec<KbMatch>,
    /// Set when an entity hint existed but no source passed the strict
    /// filter; the synthesizer renders a fixed notice for this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_not_found: Option<String>,
    #[serde(skip)]
    pub citations: Vec<Citation>,
}

struct CachedQuery {
    at: Instant,
    result: KbSearchResult,
}

struct VsSnapshot {
    signature: String,
    store: Arc<VectorStore>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entity hints & source boost
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Extract a short entity phrase from a KB query: quoted text first,
/// then conversational "tell me about / who is / employee X" patterns.
pub fn entity_hint(query: &str) -> Option<String> {
    let q = query.trim();
    if q.is_empty() {
        return None;
    }

    let quoted = Regex::new(r#""([^"]{2,})"|'([^']{2,})'"#).expect("static regex");
    if let Some(caps) = quoted.captures(q) {
        let inner = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str())?;
        return Some(squash_ws(inner));
    }

    let patterns = [
        r"(?i)(?:^|\b)(?:can you|could you|please)\s+(?:tell me about|about|who is|profile of)\s+(?:employee|employees|person)?\s*([a-zA-Z][a-zA-Z .'-]{2,})",
        r"(?i)(?:^|\b)(?:tell me about|about|who is|profile of)\s+(?:employee|employees|person)?\s*([a-zA-Z][a-zA-Z .'-]{2,})",
        r"(?i)\b(?:employee|employees|person)\s+([a-zA-Z][a-zA-Z .'-]{2,})",
    ];
    for p in patterns {
        let re = Regex::new(p).expect("static regex");
        if let Some(caps) = re.captures(q) {
            let raw = caps.get(1)?.as_str().trim_matches(|c: char| " .?!,;:\"'".contains(c));
            let role_strip = Regex::new(r"(?i)^(employee|employees|person)\s+").expect("static regex");
            let name = squash_ws(&role_strip.replace(raw, ""));
            if !name.is_empty() {
                return Some(name);
            }
        }
    }
    None
}

fn squash_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn hint_tokens(hint: &str) -> Vec<String> {
    hint.to_lowercase()
        .split_whitespace()
        .filter(|t| t.len() >= 2)
        .map(str::to_string)
        .collect()
}

/// Path-affinity boost: +100 when every hint token appears in the
/// source path, +1 per query token (≥3 chars) present in the path.
pub fn source_boost(query: &str, source: &str, hint: Option<&str>) -> f32 {
    let src = source.to_lowercase();
    let mut score = 0.0;

    if let Some(hint) = hint {
        let tokens = hint_tokens(hint);
        if !tokens.is_empty() && tokens.iter().all(|t| src.contains(t.as_str())) {
            score += 100.0;
        }
    }

    let cleaned: String = query
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == ' ' { c } else { ' ' })
        .collect();
    score += cleaned
        .split_whitespace()
        .filter(|t| t.len() >= 3 && src.contains(*t))
        .count() as f32;

    score
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// KbService
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process-wide KB retrieval service.
pub struct KbService {
    root: PathBuf,
    index_dir: PathBuf,
    stamp_path: PathBuf,
    chunk_size: usize,
    chunk_overlap: usize,
    cache_ttl: Duration,
    embedder: Arc<dyn Embedder>,
    vs_cache: RwLock<Option<VsSnapshot>>,
    query_cache: Mutex<HashMap<String, CachedQuery>>,
}

impl KbService {
    pub fn new(
        root: PathBuf,
        index_dir: PathBuf,
        stamp_path: PathBuf,
        chunk_size: usize,
        chunk_overlap: usize,
        cache_ttl: Duration,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            root,
            index_dir,
            stamp_path,
            chunk_size,
            chunk_overlap,
            cache_ttl,
            embedder,
            vs_cache: RwLock::new(None),
            query_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a corpus exists on disk at all. The intent classifier
    /// only routes kb_rag when this holds.
    pub fn corpus_exists(&self) -> bool {
        !list_corpus_files(&self.root).is_empty()
    }

    fn wanted_stamp(&self, files: &[PathBuf]) -> KbStamp {
        KbStamp {
            count: files.len(),
            latest_mtime_ns: files.iter().map(|p| mtime_ns(p)).max().unwrap_or(0),
            root: self.root.display().to_string(),
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
        }
    }

    fn read_stamp(&self) -> Option<KbStamp> {
        let raw = std::fs::read_to_string(&self.stamp_path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    fn write_stamp(&self, stamp: &KbStamp) -> Result<()> {
        if let Some(parent) = self.stamp_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.stamp_path, serde_json::to_string_pretty(stamp)?)?;
        Ok(())
    }

    /// The current index signature: the persisted stamp rendered as
    /// canonical JSON. Changes whenever a rebuild lands.
    pub fn signature(&self) -> String {
        self.read_stamp()
            .and_then(|s| serde_json::to_string(&s).ok())
            .unwrap_or_default()
    }

    /// Ensure the on-disk index matches the corpus; rebuild when the
    /// stamp is missing or stale. Returns true when a rebuild ran.
    pub async fn ensure_index(&self, force: bool) -> Result<bool> {
        let files = list_corpus_files(&self.root);
        if files.is_empty() {
            return Err(Error::Index(format!(
                "No KB files found in {}",
                self.root.display()
            )));
        }

        let wanted = self.wanted_stamp(&files);
        if !force && VectorStore::exists(&self.index_dir) && self.read_stamp().as_ref() == Some(&wanted) {
            return Ok(false);
        }

        let docs = load_docs(&files);
        if docs.is_empty() {
            return Err(Error::Index("No readable KB documents found".into()));
        }

        let chunks = chunk_docs(&docs, self.chunk_size, self.chunk_overlap);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;
        let store = VectorStore::from_embedded(chunks, embeddings)?;
        store.save(&self.index_dir)?;
        self.write_stamp(&wanted)?;

        tracing::info!(
            files = files.len(),
            chunks = store.len(),
            root = %self.root.display(),
            "knowledge-base index rebuilt"
        );
        Ok(true)
    }

    /// Load the vector store, reusing the in-memory snapshot while the
    /// signature matches. Writers replace the whole snapshot at once.
    async fn load_store(&self) -> Result<Arc<VectorStore>> {
        self.ensure_index(false).await?;
        let sig = self.signature();

        {
            let cache = self.vs_cache.read();
            if let Some(snap) = cache.as_ref() {
                if snap.signature == sig {
                    return Ok(Arc::clone(&snap.store));
                }
            }
        }

        let store = Arc::new(VectorStore::load(&self.index_dir)?);
        *self.vs_cache.write() = Some(VsSnapshot {
            signature: sig,
            store: Arc::clone(&store),
        });
        Ok(store)
    }

    /// Search the KB with entity-aware ranking and result caching.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<KbSearchResult> {
        let top_k = top_k.max(1);
        let q_key = squash_ws(&query.trim().to_lowercase());
        let sig = self.signature();
        let cache_key = format!("{q_key}|k={top_k}|sig={sig}");

        {
            let cache = self.query_cache.lock();
            if let Some(hit) = cache.get(&cache_key) {
                if hit.at.elapsed() <= self.cache_ttl {
                    return Ok(hit.result.clone());
                }
            }
        }

        let store = self.load_store().await?;
        let query_vec = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Index("empty query embedding".into()))?;

        let fetch_k = (top_k * 4).max(8);
        let hits = store.search(&query_vec, fetch_k);

        let hint = entity_hint(query);
        let mut scored: Vec<(&crate::vector::VectorEntry, f32)> = hits
            .into_iter()
            .map(|(entry, sim)| {
                let boost = source_boost(query, &entry.source, hint.as_deref());
                (entry, sim + boost)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        // Strict entity filter: when a hint exists, restrict to sources
        // whose path contains every hint token; no survivor means the
        // entity is not in the corpus.
        if let Some(hint) = &hint {
            let tokens = hint_tokens(hint);
            let strict: Vec<_> = scored
                .iter()
                .filter(|(entry, _)| {
                    let src = entry.source.to_lowercase();
                    !tokens.is_empty() && tokens.iter().all(|t| src.contains(t.as_str()))
                })
                .cloned()
                .collect();
            if strict.is_empty() {
                let result = KbSearchResult {
                    query: query.to_string(),
                    matches: Vec::new(),
                    entity_not_found: Some(hint.clone()),
                    citations: Vec::new(),
                };
                self.cache_insert(cache_key, result.clone());
                return Ok(result);
            }
            scored = strict;
        }

        scored.truncate(top_k);

        let cwd = std::env::current_dir().unwrap_or_default();
        let mut matches = Vec::new();
        let mut citations = Vec::new();
        for (entry, score) in scored {
            let rel = Path::new(&entry.source)
                .strip_prefix(&cwd)
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| entry.source.clone());
            matches.push(KbMatch {
                text: entry.text.clone(),
                source: rel.clone(),
                page: entry.page,
                score,
            });
            citations.push(Citation {
                title: title_for(&entry.source, entry.page),
                url: rel,
                snippet: Some(entry.text.chars().take(260).collect()),
            });
        }

        let result = KbSearchResult {
            query: query.to_string(),
            matches,
            entity_not_found: None,
            citations,
        };
        self.cache_insert(cache_key, result.clone());
        Ok(result)
    }

    fn cache_insert(&self, key: String, result: KbSearchResult) {
        let mut cache = self.query_cache.lock();
        cache.insert(key, CachedQuery { at: Instant::now(), result });

        if cache.len() > QUERY_CACHE_CAP {
            let mut by_age: Vec<(String, Instant)> =
                cache.iter().map(|(k, v)| (k.clone(), v.at)).collect();
            by_age.sort_by_key(|(_, at)| *at);
            for (k, _) in by_age.into_iter().take(QUERY_CACHE_EVICT) {
                cache.remove(&k);
            }
        }
    }

    #[cfg(test)]
    fn query_cache_len(&self) -> usize {
        self.query_cache.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Embeds by hashing each word into a small dense space; identical
    /// texts always embed identically.
    struct HashEmbedder;

    #[async_trait::async_trait]
    impl Embedder for HashEmbedder {
        async fn embed(&self, input: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(input
                .iter()
                .map(|text| {
                    let mut v = vec![0.0f32; 16];
                    for word in text.to_lowercase().split_whitespace() {
                        let mut h: u32 = 2166136261;
                        for b in word.bytes() {
                            h = h.wrapping_mul(16777619) ^ b as u32;
                        }
                        v[(h % 16) as usize] += 1.0;
                    }
                    v
                })
                .collect())
        }
    }

    struct Fixture {
        _dirs: (tempfile::TempDir, tempfile::TempDir),
        svc: KbService,
        root: PathBuf,
    }

    fn fixture() -> Fixture {
        let corpus = tempfile::tempdir().unwrap();
        let index = tempfile::tempdir().unwrap();
        let root = corpus.path().to_path_buf();

        std::fs::create_dir_all(root.join("employees")).unwrap();
        std::fs::write(
            root.join("employees/avery-lancaster.md"),
            "Avery Lancaster leads the claims engineering team and joined in 2019.",
        )
        .unwrap();
        std::fs::write(
            root.join("products.md"),
            "The flagship product covers automated claims triage for insurers.",
        )
        .unwrap();

        let svc = KbService::new(
            root.clone(),
            index.path().join("faiss"),
            index.path().join("stamp.json"),
            200,
            40,
            Duration::from_secs(180),
            Arc::new(HashEmbedder),
        );
        Fixture {
            _dirs: (corpus, index),
            svc,
            root,
        }
    }

    #[test]
    fn entity_hint_from_quotes_and_cues() {
        assert_eq!(entity_hint(r#"look up "Avery Lancaster""#).as_deref(), Some("Avery Lancaster"));
        assert_eq!(
            entity_hint("tell me about employee Jane Doe").as_deref(),
            Some("Jane Doe")
        );
        assert_eq!(entity_hint("who is Marco Polo").as_deref(), Some("Marco Polo"));
        assert_eq!(entity_hint("summarize the quarterly report"), None);
    }

    #[test]
    fn source_boost_rewards_path_affinity() {
        let full = source_boost(
            "tell me about Avery Lancaster",
            "employees/avery-lancaster.md",
            Some("Avery Lancaster"),
        );
        assert!(full >= 100.0);

        let none = source_boost("tell me about Avery Lancaster", "products.md", Some("Avery Lancaster"));
        assert!(none < 100.0);
    }

    #[tokio::test]
    async fn ensure_index_rebuilds_only_on_change() {
        let fx = fixture();
        assert!(fx.svc.ensure_index(false).await.unwrap());
        assert!(!fx.svc.ensure_index(false).await.unwrap());

        // Touching the corpus invalidates the stamp.
        std::fs::write(fx.root.join("new-doc.md"), "fresh content about pricing").unwrap();
        assert!(fx.svc.ensure_index(false).await.unwrap());
    }

    #[tokio::test]
    async fn empty_corpus_is_an_index_error() {
        let corpus = tempfile::tempdir().unwrap();
        let index = tempfile::tempdir().unwrap();
        let svc = KbService::new(
            corpus.path().to_path_buf(),
            index.path().join("faiss"),
            index.path().join("stamp.json"),
            200,
            40,
            Duration::from_secs(180),
            Arc::new(HashEmbedder),
        );
        assert!(!svc.corpus_exists());
        let err = svc.ensure_index(false).await.unwrap_err();
        assert!(err.to_string().contains("No KB files found"));
    }

    #[tokio::test]
    async fn entity_match_restricts_to_matching_sources() {
        let fx = fixture();
        let out = fx.svc.search("tell me about employee Avery Lancaster", 4).await.unwrap();
        assert!(out.entity_not_found.is_none());
        assert!(!out.matches.is_empty());
        for m in &out.matches {
            assert!(m.source.to_lowercase().contains("avery"));
        }
        assert!(out.citations[0].title.contains("avery-lancaster.md"));
    }

    #[tokio::test]
    async fn unknown_entity_returns_not_found_marker() {
        let fx = fixture();
        let out = fx.svc.search("tell me about employee Jane Doe", 4).await.unwrap();
        assert_eq!(out.entity_not_found.as_deref(), Some("Jane Doe"));
        assert!(out.matches.is_empty());
    }

    #[tokio::test]
    async fn repeat_queries_hit_the_cache_and_stay_equal() {
        let fx = fixture();
        let a = fx.svc.search("automated claims triage", 3).await.unwrap();
        let cached_len = fx.svc.query_cache_len();
        let b = fx.svc.search("automated claims triage", 3).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(fx.svc.query_cache_len(), cached_len);
    }

    #[tokio::test]
    async fn signature_changes_with_corpus() {
        let fx = fixture();
        fx.svc.ensure_index(false).await.unwrap();
        let sig_a = fx.svc.signature();
        assert!(!sig_a.is_empty());

        std::fs::write(fx.root.join("another.md"), "more knowledge").unwrap();
        fx.svc.ensure_index(false).await.unwrap();
        assert_ne!(fx.svc.signature(), sig_a);
    }
}
