//! Paginated change feed over the canonical store.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::AccountRegistry;
use reelsync_protocol::{ChangesPage, ChangesQuery};
use std::sync::Arc;

/// Serves the pull side of sync: everything that changed since a client's
/// high-water mark, in ascending `last_modified` order.
pub struct ChangeFeed {
    registry: Arc<AccountRegistry>,
    config: ServerConfig,
}

impl ChangeFeed {
    /// Creates a feed over the given store.
    pub fn new(registry: Arc<AccountRegistry>, config: ServerConfig) -> Self {
        Self { registry, config }
    }

    /// Answers one change-feed query.
    ///
    /// With a `limit` the response is a proper page with `has_more`; without
    /// one it is the legacy whole-window variant, still bounded by the
    /// server's hard cap so a cold client cannot request an unbounded body.
    pub fn changes(&self, account_id: &str, query: &ChangesQuery) -> ServerResult<ChangesPage> {
        if query.since < 0.0 || query.since.is_nan() {
            return Err(ServerError::InvalidRequest(format!(
                "invalid since: {}",
                query.since
            )));
        }
        if query.limit == Some(0) {
            return Err(ServerError::InvalidRequest("limit must be positive".into()));
        }

        let account = match self.registry.existing(account_id) {
            Some(account) => account,
            // An account nobody has written to has no changes.
            None => return Ok(ChangesPage::empty()),
        };

        let window = {
            let data = account.lock();
            data.records_since(query.since)
        };

        let offset = query.offset.unwrap_or(0) as usize;
        let limit = match query.limit {
            Some(limit) => limit.min(self.config.max_page) as usize,
            None => self.config.legacy_cap as usize,
        };

        let remaining = window.len().saturating_sub(offset);
        let records: Vec<_> = window.into_iter().skip(offset).take(limit).collect();
        let has_more = remaining > records.len();

        tracing::debug!(
            account = account_id,
            since = query.since,
            returned = records.len(),
            has_more,
            "change feed pull"
        );
        Ok(ChangesPage { records, has_more })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelsync_protocol::{ChangeRecord, EntityKey, MovieState};

    fn feed_with(count: usize) -> ChangeFeed {
        let registry = Arc::new(AccountRegistry::new(16));
        {
            let account = registry.account("alice");
            let mut data = account.lock();
            for i in 0..count {
                let id = format!("tt{i:04}");
                let mut movie = MovieState::new(&id);
                movie.last_modified = (i + 1) as f64;
                data.entities
                    .insert(EntityKey::Movie(id), ChangeRecord::Movie(movie));
            }
        }
        ChangeFeed::new(registry, ServerConfig::default())
    }

    #[test]
    fn pages_cover_the_window_exactly_once() {
        let feed = feed_with(25);
        let mut seen = Vec::new();
        let mut offset = 0;

        loop {
            let page = feed
                .changes("alice", &ChangesQuery::paged(0.0, 10).with_offset(offset))
                .unwrap();
            offset += page.records.len() as u32;
            seen.extend(page.records);
            if !page.has_more {
                break;
            }
        }

        assert_eq!(seen.len(), 25);
        for (i, record) in seen.iter().enumerate() {
            assert_eq!(record.last_modified(), (i + 1) as f64);
        }
    }

    #[test]
    fn since_is_strict() {
        let feed = feed_with(5);
        let page = feed.changes("alice", &ChangesQuery::paged(3.0, 10)).unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].last_modified(), 4.0);
    }

    #[test]
    fn has_more_reflects_the_window() {
        let feed = feed_with(5);
        let page = feed.changes("alice", &ChangesQuery::paged(0.0, 3)).unwrap();
        assert_eq!(page.records.len(), 3);
        assert!(page.has_more);

        let rest = feed
            .changes("alice", &ChangesQuery::paged(0.0, 3).with_offset(3))
            .unwrap();
        assert_eq!(rest.records.len(), 2);
        assert!(!rest.has_more);
    }

    #[test]
    fn limit_clamped_to_max_page() {
        let registry = Arc::new(AccountRegistry::new(16));
        {
            let account = registry.account("alice");
            let mut data = account.lock();
            for i in 0..10 {
                let id = format!("tt{i:04}");
                let mut movie = MovieState::new(&id);
                movie.last_modified = (i + 1) as f64;
                data.entities
                    .insert(EntityKey::Movie(id), ChangeRecord::Movie(movie));
            }
        }
        let feed = ChangeFeed::new(registry, ServerConfig::default().with_max_page(4));

        let page = feed
            .changes("alice", &ChangesQuery::paged(0.0, 1_000))
            .unwrap();
        assert_eq!(page.records.len(), 4);
        assert!(page.has_more);
    }

    #[test]
    fn legacy_pull_is_capped() {
        let registry = Arc::new(AccountRegistry::new(16));
        {
            let account = registry.account("alice");
            let mut data = account.lock();
            for i in 0..10 {
                let id = format!("tt{i:04}");
                let mut movie = MovieState::new(&id);
                movie.last_modified = (i + 1) as f64;
                data.entities
                    .insert(EntityKey::Movie(id), ChangeRecord::Movie(movie));
            }
        }
        let feed = ChangeFeed::new(registry, ServerConfig::default().with_legacy_cap(6));

        let page = feed.changes("alice", &ChangesQuery::legacy(0.0)).unwrap();
        assert_eq!(page.records.len(), 6);
        assert!(page.has_more);
    }

    #[test]
    fn unknown_account_is_empty() {
        let feed = feed_with(5);
        let page = feed.changes("nobody", &ChangesQuery::legacy(0.0)).unwrap();
        assert!(page.records.is_empty());
        assert!(!page.has_more);
    }

    #[test]
    fn invalid_queries_rejected() {
        let feed = feed_with(1);
        assert!(feed
            .changes("alice", &ChangesQuery::legacy(-1.0))
            .is_err());
        assert!(feed
            .changes("alice", &ChangesQuery::paged(0.0, 0))
            .is_err());
    }
}
