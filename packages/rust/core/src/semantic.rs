//! Similarity search over fetched pages.
//!
//! The processor hands every freshly fetched page to a [`SemanticIndex`].
//! [`LexicalIndex`] is the built-in backend: hashed bag-of-words vectors
//! compared by cosine similarity. Anything that can upsert by key and rank
//! by query text can stand in for it.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use sitemind_shared::{PageContent, PageKey, Result, SemanticEntry};
use sitemind_storage::ContentStore;

/// Vector width for hashed token features.
const DIMENSIONS: usize = 512;

/// Characters of page text kept in a search payload.
const EXCERPT_CHARS: usize = 280;

/// Constraints on a search.
#[derive(Debug, Clone)]
pub struct SearchFilter {
    pub domain: Option<String>,
    pub limit: usize,
    /// Hits scoring below this are dropped.
    pub min_similarity: f32,
}

impl Default for SearchFilter {
    fn default() -> Self {
        Self {
            domain: None,
            limit: 10,
            min_similarity: 0.0,
        }
    }
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Page key the entry was indexed under.
    pub id: String,
    pub similarity: f32,
    pub payload: Value,
}

/// Upsert-by-key document index with ranked text search.
#[async_trait]
pub trait SemanticIndex: Send + Sync {
    /// Insert `entry`, replacing any entry with the same key.
    async fn index(&self, entry: SemanticEntry) -> Result<()>;

    /// Returns whether an entry was removed.
    async fn remove(&self, key: &PageKey) -> Result<bool>;

    /// Best matches first.
    async fn search(&self, query: &str, filter: &SearchFilter) -> Result<Vec<SearchHit>>;
}

/// Build the index entry for a fetched page owned by `domain`.
pub fn entry_for(key: &PageKey, content: &PageContent, domain: &str) -> SemanticEntry {
    let excerpt: String = content.normalized_text.chars().take(EXCERPT_CHARS).collect();
    SemanticEntry {
        key: key.clone(),
        url: content.url.clone(),
        display_name: content.display_name.clone(),
        domain: domain.to_string(),
        prompt_text: format!("{}\n\n{}", content.display_name, content.normalized_text),
        compact_payload: json!({
            "key": key.as_str(),
            "url": content.url,
            "display_name": content.display_name,
            "domain": domain,
            "excerpt": excerpt,
            "length": content.length,
        }),
    }
}

// ---------------------------------------------------------------------------
// LexicalIndex
// ---------------------------------------------------------------------------

struct Indexed {
    domain: String,
    vector: Vec<f32>,
    payload: Value,
}

/// In-memory hashed bag-of-words index.
#[derive(Default)]
pub struct LexicalIndex {
    entries: RwLock<HashMap<String, Indexed>>,
}

impl LexicalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Index every cached page of `domain` from `store`. Returns the number indexed.
    #[instrument(skip(self, store))]
    pub async fn load_domain(&self, store: &ContentStore, domain: &str) -> Result<usize> {
        let total = store.get_url_count(domain).await?;
        let mut loaded = 0;
        for key in store.page_keys(domain, total).await? {
            if let Some(content) = store.get_content(&key).await? {
                self.index(entry_for(&key, &content, domain)).await?;
                loaded += 1;
            }
        }
        debug!(loaded, "index warmed from store");
        Ok(loaded)
    }
}

impl std::fmt::Debug for LexicalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LexicalIndex").finish_non_exhaustive()
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
        .map(str::to_lowercase)
}

/// L2-normalized term-frequency vector.
fn embed(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; DIMENSIONS];
    for token in tokens(text) {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        vector[(hasher.finish() % DIMENSIONS as u64) as usize] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[async_trait]
impl SemanticIndex for LexicalIndex {
    async fn index(&self, entry: SemanticEntry) -> Result<()> {
        let indexed = Indexed {
            domain: entry.domain,
            vector: embed(&entry.prompt_text),
            payload: entry.compact_payload,
        };
        self.entries
            .write()
            .await
            .insert(entry.key.as_str().to_string(), indexed);
        Ok(())
    }

    async fn remove(&self, key: &PageKey) -> Result<bool> {
        Ok(self.entries.write().await.remove(key.as_str()).is_some())
    }

    async fn search(&self, query: &str, filter: &SearchFilter) -> Result<Vec<SearchHit>> {
        let query = embed(query);
        let entries = self.entries.read().await;

        let mut hits: Vec<SearchHit> = entries
            .iter()
            .filter(|(_, e)| filter.domain.as_deref().is_none_or(|d| e.domain == d))
            .map(|(id, e)| SearchHit {
                id: id.clone(),
                similarity: cosine(&query, &e.vector),
                payload: e.payload.clone(),
            })
            .filter(|h| h.similarity > 0.0 && h.similarity >= filter.min_similarity)
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(filter.limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sitemind_shared::CachePolicy;

    fn page(url: &str, name: &str, text: &str) -> (PageKey, PageContent) {
        (
            PageKey::from_url(url),
            PageContent {
                url: url.into(),
                display_name: name.into(),
                normalized_text: text.into(),
                fetched_at: Utc::now(),
                length: text.chars().count(),
            },
        )
    }

    async fn seeded() -> LexicalIndex {
        let index = LexicalIndex::new();
        for (domain, url, name, text) in [
            (
                "example.com",
                "https://example.com/rust",
                "Rust",
                "Ownership and borrowing keep Rust programs memory safe.",
            ),
            (
                "example.com",
                "https://example.com/bread",
                "Bread",
                "Knead the dough, let it rise, then bake the bread.",
            ),
            (
                "other.org",
                "https://other.org/rust",
                "Rust elsewhere",
                "Borrowing rules in Rust explained again.",
            ),
        ] {
            let (key, content) = page(url, name, text);
            index.index(entry_for(&key, &content, domain)).await.unwrap();
        }
        index
    }

    #[tokio::test]
    async fn ranks_relevant_pages_first() {
        let index = seeded().await;
        let hits = index
            .search("rust borrowing", &SearchFilter::default())
            .await
            .unwrap();

        assert!(hits.len() >= 2);
        assert!(hits[..2].iter().all(|h| h.payload["url"].as_str().unwrap().ends_with("/rust")));
        assert!(hits.windows(2).all(|w| w[0].similarity >= w[1].similarity));
    }

    #[tokio::test]
    async fn filters_by_domain_and_limit() {
        let index = seeded().await;
        let filter = SearchFilter {
            domain: Some("other.org".into()),
            ..SearchFilter::default()
        };
        let hits = index.search("rust", &filter).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload["domain"], "other.org");

        let one = SearchFilter {
            limit: 1,
            ..SearchFilter::default()
        };
        assert_eq!(index.search("rust", &one).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reindex_replaces_entry() {
        let index = seeded().await;
        let (key, content) = page(
            "https://example.com/bread",
            "Bread",
            "Sourdough starters need regular feeding.",
        );
        index.index(entry_for(&key, &content, "example.com")).await.unwrap();

        assert_eq!(index.len().await, 3);
        let stale = index.search("knead dough", &SearchFilter::default()).await.unwrap();
        assert!(stale.iter().all(|h| h.similarity < 0.5));
        let hits = index.search("sourdough", &SearchFilter::default()).await.unwrap();
        assert_eq!(hits[0].id, key.as_str());

        assert!(index.remove(&key).await.unwrap());
        assert!(!index.remove(&key).await.unwrap());
    }

    #[tokio::test]
    async fn loads_cached_pages_from_store() {
        let store = ContentStore::in_memory(CachePolicy::default());
        for (url, text) in [
            ("https://example.com/a", "Alpha page about caching."),
            ("https://example.com/b", "Beta page, never fetched."),
        ] {
            let record = sitemind_shared::PageRecord::from_descriptor(
                &sitemind_shared::PageDescriptor::new(url),
                "example.com",
            );
            store.index_page(&record).await.unwrap();
            if url.ends_with("/a") {
                let (key, content) = page(url, "Alpha", text);
                store.put_content(&key, &content).await.unwrap();
            }
        }

        let index = LexicalIndex::new();
        assert_eq!(index.load_domain(&store, "example.com").await.unwrap(), 1);
        let hits = index.search("caching", &SearchFilter::default()).await.unwrap();
        assert_eq!(hits[0].payload["display_name"], "Alpha");
    }

    #[tokio::test]
    async fn off_host_pages_belong_to_their_sitemap_domain() {
        let store = ContentStore::in_memory(CachePolicy::default());
        let url = "https://cdn.example.net/guide";
        let record = sitemind_shared::PageRecord::from_descriptor(
            &sitemind_shared::PageDescriptor::new(url),
            "example.com",
        );
        store.index_page(&record).await.unwrap();
        let (key, content) = page(url, "Guide", "Deployment guide for widgets.");
        store.put_content(&key, &content).await.unwrap();

        let index = LexicalIndex::new();
        assert_eq!(index.load_domain(&store, "example.com").await.unwrap(), 1);
        let filter = SearchFilter {
            domain: Some("example.com".into()),
            ..SearchFilter::default()
        };
        let hits = index.search("deployment widgets", &filter).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload["domain"], "example.com");
    }
}
