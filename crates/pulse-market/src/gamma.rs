//! Gamma API client: market discovery, tags, sports.

use std::sync::Arc;

use tracing::debug;

use crate::http::{HttpError, HttpPool};
use crate::parse::parse_tag_id;
use crate::types::{GammaEvent, GammaSport, GammaTag};

/// Default Gamma API base URL.
pub const DEFAULT_GAMMA_BASE: &str = "https://gamma-api.polymarket.com";

/// Client for the Gamma discovery endpoints.
pub struct GammaClient {
    pool: Arc<HttpPool>,
    base_url: String,
}

impl GammaClient {
    pub fn new(pool: Arc<HttpPool>, base_url: impl Into<String>) -> Self {
        Self {
            pool,
            base_url: base_url.into(),
        }
    }

    /// Fetch one page of active, non-closed events, newest first.
    pub async fn events_page(&self, limit: u32, offset: u32) -> Result<Vec<GammaEvent>, HttpError> {
        let url = format!("{}/events", self.base_url);
        let query = [
            ("active", "true".to_string()),
            ("closed", "false".to_string()),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
            ("order", "id".to_string()),
            ("ascending", "false".to_string()),
        ];
        self.pool.get_json(&url, &query).await
    }

    /// Fetch one page of the tag dictionary.
    pub async fn tags_page(&self, limit: u32, offset: u32) -> Result<Vec<GammaTag>, HttpError> {
        let url = format!("{}/tags", self.base_url);
        let query = [
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
        ];
        self.pool.get_json(&url, &query).await
    }

    /// Fetch the sports listing and flatten it into the set of tag IDs that
    /// belong to sports.
    pub async fn sport_tag_ids(&self) -> Result<Vec<i64>, HttpError> {
        let url = format!("{}/sports", self.base_url);
        let sports: Vec<GammaSport> = self.pool.get_json(&url, &[]).await?;
        Ok(flatten_sport_tags(&sports))
    }
}

/// Flatten the comma-joined `tags` field of each sport into a sorted,
/// deduplicated list of tag IDs.
fn flatten_sport_tags(sports: &[GammaSport]) -> Vec<i64> {
    let mut tag_ids = Vec::new();
    for sport in sports {
        let raw = match sport.tags.as_deref() {
            Some(raw) => raw,
            None => continue,
        };
        for part in raw.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let value = serde_json::Value::String(part.to_string());
            if let Some(id) = parse_tag_id(Some(&value)) {
                tag_ids.push(id);
            } else {
                debug!(tag = part, "skipping non-numeric sport tag");
            }
        }
    }
    tag_ids.sort_unstable();
    tag_ids.dedup();
    tag_ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sport_tags_flattening() {
        let sports: Vec<GammaSport> = serde_json::from_str(
            r#"[
                {"id": 1, "label": "Soccer", "tags": "100, 101"},
                {"id": 2, "label": "NBA", "tags": "101,102"},
                {"id": 3, "label": "Empty", "tags": ""},
                {"id": 4, "label": "NoTags"}
            ]"#,
        )
        .unwrap();

        assert_eq!(flatten_sport_tags(&sports), vec![100, 101, 102]);
    }

    #[test]
    fn test_sport_tags_skips_garbage() {
        let sports: Vec<GammaSport> =
            serde_json::from_str(r#"[{"id": 1, "label": "X", "tags": "abc, 7"}]"#).unwrap();
        assert_eq!(flatten_sport_tags(&sports), vec![7]);
    }
}
