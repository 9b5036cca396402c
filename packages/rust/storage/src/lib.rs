//! Persistence for sitemind.
//!
//! [`ContentStore`] owns every persisted key: sitemap metadata, progress
//! status, the per-domain page index, page records, and cached content,
//! prompts, and responses. It runs on any [`KvStore`]:
//! - [`MemoryKv`] for tests and throwaway runs
//! - [`LibsqlKv`] for a durable local database file
//!
//! Backends are opened once, shared, and closed explicitly.

mod database;
mod kv;
mod migrations;
mod store;

pub use database::LibsqlKv;
pub use kv::{KvStore, MemoryKv};
pub use store::{ContentStore, StoreStats};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use sitemind_shared::{
        CachePolicy, PageContent, PageDescriptor, PageKey, PageRecord, ProcessingStatus,
        PromptCacheEntry, ResponseCacheEntry, RunStatus, SitemapMeta, SitemapStatus,
    };
    use uuid::Uuid;

    async fn durable_store() -> ContentStore {
        let tmp = std::env::temp_dir().join(format!("sitemind_test_{}.db", Uuid::now_v7()));
        ContentStore::open(&tmp, CachePolicy::default())
            .await
            .expect("open test db")
    }

    /// The same store contract, on both backends.
    async fn stores() -> Vec<ContentStore> {
        vec![
            ContentStore::in_memory(CachePolicy::default()),
            durable_store().await,
        ]
    }

    fn record(url: &str) -> PageRecord {
        PageRecord::from_descriptor(&PageDescriptor::new(url), "example.com")
    }

    fn content(url: &str, text: &str) -> PageContent {
        PageContent {
            url: url.into(),
            display_name: "Page".into(),
            normalized_text: text.into(),
            fetched_at: Utc::now(),
            length: text.chars().count(),
        }
    }

    #[tokio::test]
    async fn sitemap_meta_and_status_overwrite() {
        for store in stores().await {
            assert!(store.get_sitemap_meta("example.com").await.unwrap().is_none());

            let mut meta = SitemapMeta {
                domain: "example.com".into(),
                sitemap_url: "https://example.com/sitemap.xml".into(),
                total_urls: 3,
                processed_urls: 0,
                last_processed: Utc::now(),
                status: SitemapStatus::Processing,
            };
            store.put_sitemap_meta(&meta).await.unwrap();
            meta.status = SitemapStatus::Completed;
            meta.processed_urls = 3;
            store.put_sitemap_meta(&meta).await.unwrap();
            assert_eq!(store.get_sitemap_meta("example.com").await.unwrap(), Some(meta));

            let mut status = ProcessingStatus::started("example.com", RunStatus::Scraping);
            status.current_url = Some("https://example.com/a".into());
            store.put_status(&status).await.unwrap();
            let mut next = ProcessingStatus::started("example.com", RunStatus::Completed);
            next.progress.total = 3;
            store.put_status(&next).await.unwrap();

            let stored = store.get_status("example.com").await.unwrap().unwrap();
            assert_eq!(stored.status, RunStatus::Completed);
            assert!(stored.current_url.is_none(), "status writes must not merge");
        }
    }

    #[tokio::test]
    async fn index_page_is_idempotent_and_keeps_order() {
        for store in stores().await {
            let urls = ["https://example.com/a", "https://example.com/b", "https://example.com/c"];
            for url in urls {
                assert!(store.index_page(&record(url)).await.unwrap());
            }

            let first = store.get_page(&PageKey::from_url(urls[0])).await.unwrap().unwrap();
            store
                .mark_processed(&first.key, true, None)
                .await
                .unwrap();

            // re-index the first page: no new entry, position and state kept
            assert!(!store.index_page(&record(urls[0])).await.unwrap());
            assert_eq!(store.get_url_count("example.com").await.unwrap(), 3);

            let listed: Vec<String> = store
                .list_pages("example.com", 10, 0)
                .await
                .unwrap()
                .into_iter()
                .map(|r| r.url)
                .collect();
            assert_eq!(listed, urls);

            let again = store.get_page(&first.key).await.unwrap().unwrap();
            assert_eq!(again.indexed_at, first.indexed_at);
            assert!(again.processed);

            // fresh sitemap fields on a re-index do not replace the stored ones
            let mut refreshed = record(urls[1]);
            refreshed.display_name = "Renamed".into();
            refreshed.priority = Some(0.9);
            refreshed.change_frequency = Some("daily".into());
            assert!(!store.index_page(&refreshed).await.unwrap());
            let kept = store.get_page(&refreshed.key).await.unwrap().unwrap();
            assert_eq!(kept.display_name, record(urls[1]).display_name);
            assert_eq!(kept.priority, None);
            assert_eq!(kept.change_frequency, None);
            assert_eq!(kept.domain, "example.com");

            let recent: Vec<String> = store
                .recent_pages("example.com", 2)
                .await
                .unwrap()
                .into_iter()
                .map(|r| r.url)
                .collect();
            assert_eq!(recent, vec![urls[2], urls[1]]);

            let page2: Vec<String> = store
                .list_pages("example.com", 2, 1)
                .await
                .unwrap()
                .into_iter()
                .map(|r| r.url)
                .collect();
            assert_eq!(page2, vec![urls[1], urls[2]]);

            assert!(store.page_exists("example.com", &first.key).await.unwrap());
            assert!(!store.page_exists("other.com", &first.key).await.unwrap());
        }
    }

    #[tokio::test]
    async fn mark_processed_only_touches_status_fields() {
        for store in stores().await {
            let page = record("https://example.com/a");
            store.index_page(&page).await.unwrap();

            assert!(
                store
                    .mark_processed(&page.key, false, Some("HTTP 500"))
                    .await
                    .unwrap()
            );
            let stored = store.get_page(&page.key).await.unwrap().unwrap();
            assert!(!stored.processed);
            assert_eq!(stored.error.as_deref(), Some("HTTP 500"));
            assert_eq!(stored.display_name, page.display_name);
            assert_eq!(stored.indexed_at, page.indexed_at);

            let unknown = PageKey::from_url("https://example.com/never-indexed");
            assert!(!store.mark_processed(&unknown, true, None).await.unwrap());
            assert!(store.get_page(&unknown).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn cached_artifacts_roundtrip_and_delete() {
        for store in stores().await {
            let key = PageKey::from_url("https://example.com/a");
            let body = content("https://example.com/a", "Hello");
            store.put_content(&key, &body).await.unwrap();
            store
                .put_prompt(
                    &key,
                    &PromptCacheEntry {
                        prompt: "p".into(),
                        cached_at: Utc::now(),
                    },
                )
                .await
                .unwrap();
            store
                .put_response(
                    &key,
                    &ResponseCacheEntry {
                        prompt: "p".into(),
                        response: "r".into(),
                        cached_at: Utc::now(),
                    },
                )
                .await
                .unwrap();

            assert_eq!(store.get_content(&key).await.unwrap(), Some(body));
            assert_eq!(store.get_prompt(&key).await.unwrap().unwrap().prompt, "p");
            assert_eq!(store.get_response(&key).await.unwrap().unwrap().response, "r");

            assert!(store.del_response(&key).await.unwrap());
            assert!(store.del_prompt(&key).await.unwrap());
            assert!(store.get_response(&key).await.unwrap().is_none());
            assert!(store.get_content(&key).await.unwrap().is_some());
            assert!(store.del_content(&key).await.unwrap());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn content_and_status_expire() {
        let policy = CachePolicy {
            content_ttl: std::time::Duration::from_secs(60),
            status_ttl: std::time::Duration::from_secs(10),
            ..CachePolicy::default()
        };
        let store = ContentStore::new(Arc::new(MemoryKv::new()), policy);
        let key = PageKey::from_url("https://example.com/a");
        store
            .put_content(&key, &content("https://example.com/a", "x"))
            .await
            .unwrap();
        store
            .put_status(&ProcessingStatus::started("example.com", RunStatus::Indexing))
            .await
            .unwrap();

        tokio::time::advance(std::time::Duration::from_secs(11)).await;
        assert!(store.get_status("example.com").await.unwrap().is_none());
        assert!(store.get_content(&key).await.unwrap().is_some());

        tokio::time::advance(std::time::Duration::from_secs(60)).await;
        assert!(store.get_content(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn leases_are_exclusive_and_owner_released() {
        for store in stores().await {
            let key = PageKey::from_url("https://example.com/a");
            assert!(store.acquire_lease(&key, "owner").await.unwrap());
            assert!(!store.acquire_lease(&key, "intruder").await.unwrap());
            assert!(store.lease_held(&key).await.unwrap());

            assert!(!store.release_lease(&key, "intruder").await.unwrap());
            assert!(store.release_lease(&key, "owner").await.unwrap());
            assert!(!store.lease_held(&key).await.unwrap());
        }
    }

    #[tokio::test]
    async fn stats_and_purge() {
        for store in stores().await {
            for url in ["https://example.com/a", "https://example.com/b"] {
                let page = record(url);
                store.index_page(&page).await.unwrap();
                store.put_content(&page.key, &content(url, "text")).await.unwrap();
            }
            let other = PageRecord::from_descriptor(
                &PageDescriptor::new("https://other.org/x"),
                "other.org",
            );
            store.index_page(&other).await.unwrap();
            store
                .put_status(&ProcessingStatus::started("example.com", RunStatus::Completed))
                .await
                .unwrap();

            assert_eq!(
                store.list_domains().await.unwrap(),
                vec!["example.com".to_string(), "other.org".to_string()]
            );
            let stats = store.get_stats().await.unwrap();
            assert_eq!(stats.domains, 2);
            assert_eq!(stats.pages, 3);
            assert_eq!(stats.cached_content, 2);
            assert_eq!(stats.cached_prompts, 0);

            assert_eq!(store.purge_domain("example.com").await.unwrap(), 2);
            assert_eq!(store.list_domains().await.unwrap(), vec!["other.org".to_string()]);
            assert_eq!(store.get_url_count("example.com").await.unwrap(), 0);
            assert!(store.get_status("example.com").await.unwrap().is_none());
            assert_eq!(store.count_by_pattern("content:").await.unwrap(), 0);
            assert_eq!(store.get_url_count("other.org").await.unwrap(), 1);

            // purging an unknown domain is harmless
            assert_eq!(store.purge_domain("missing.net").await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn shared_url_stays_with_its_first_domain() {
        for store in stores().await {
            let url = "https://shared.example.org/page";
            let key = PageKey::from_url(url);
            let first = PageRecord::from_descriptor(&PageDescriptor::new(url), "a.com");
            let second = PageRecord::from_descriptor(&PageDescriptor::new(url), "b.com");

            assert!(store.index_page(&first).await.unwrap());
            assert!(!store.index_page(&second).await.unwrap());
            store.put_content(&key, &content(url, "shared")).await.unwrap();

            let owner = store.get_page(&key).await.unwrap().unwrap();
            assert_eq!(owner.domain, "a.com");
            for domain in ["a.com", "b.com"] {
                let listed = store.list_pages(domain, 10, 0).await.unwrap();
                assert_eq!(store.get_url_count(domain).await.unwrap(), listed.len());
                assert!(listed.iter().all(|r| r.domain == domain));
            }
            assert_eq!(store.get_url_count("b.com").await.unwrap(), 0);

            assert_eq!(store.purge_domain("b.com").await.unwrap(), 0);
            assert!(store.get_page(&key).await.unwrap().is_some());
            assert!(store.get_content(&key).await.unwrap().is_some());

            assert_eq!(store.purge_domain("a.com").await.unwrap(), 1);
            assert!(store.get_page(&key).await.unwrap().is_none());
            assert!(store.get_content(&key).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn purge_keeps_records_owned_elsewhere() {
        let kv = Arc::new(MemoryKv::new());
        let store = ContentStore::new(kv.clone(), CachePolicy::default());
        let url = "https://shared.example.org/page";
        let owned = PageRecord::from_descriptor(&PageDescriptor::new(url), "b.com");
        store.index_page(&owned).await.unwrap();
        store.put_content(&owned.key, &content(url, "kept")).await.unwrap();

        // an a.com index entry pointing at b.com's record
        kv.zadd_if_absent("urls:a.com", owned.key.as_str()).await.unwrap();

        assert_eq!(store.purge_domain("a.com").await.unwrap(), 0);
        assert_eq!(store.get_url_count("a.com").await.unwrap(), 0);
        assert_eq!(store.get_url_count("b.com").await.unwrap(), 1);
        assert_eq!(store.list_pages("b.com", 10, 0).await.unwrap().len(), 1);
        assert!(store.get_content(&owned.key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn durable_store_survives_reopen() {
        let tmp = std::env::temp_dir().join(format!("sitemind_test_{}.db", Uuid::now_v7()));
        let page = record("https://example.com/a");
        {
            let store = ContentStore::open(&tmp, CachePolicy::default()).await.unwrap();
            store.index_page(&page).await.unwrap();
            store.close().await.unwrap();
        }
        let store = ContentStore::open(&tmp, CachePolicy::default()).await.unwrap();
        assert_eq!(store.get_page(&page.key).await.unwrap(), Some(page));
        assert_eq!(store.page_keys("example.com", 10).await.unwrap().len(), 1);
    }
}
