//! Data API client: taker trades, open interest, wallet positions.

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::http::{HttpError, HttpPool};
use crate::types::{DataApiTrade, OpenInterestEntry, PositionEntry};

/// Default data API base URL.
pub const DEFAULT_DATA_API_BASE: &str = "https://data-api.polymarket.com";

/// Condition IDs per open-interest request.
const OI_BATCH_SIZE: usize = 50;

/// Client for the public data API endpoints.
pub struct DataApiClient {
    pool: Arc<HttpPool>,
    base_url: String,
}

/// Query parameters for a trades page.
#[derive(Debug, Clone)]
pub struct TradesQuery {
    pub limit: u32,
    pub offset: u32,
    /// Only trades that consumed book liquidity.
    pub taker_only: bool,
    /// Lower bound on cash notional, applied upstream.
    pub min_cash_usd: Decimal,
}

impl DataApiClient {
    pub fn new(pool: Arc<HttpPool>, base_url: impl Into<String>) -> Self {
        Self {
            pool,
            base_url: base_url.into(),
        }
    }

    /// Fetch one page of taker trades above the cash-notional floor.
    pub async fn trades_page(&self, query: &TradesQuery) -> Result<Vec<DataApiTrade>, HttpError> {
        let url = format!("{}/trades", self.base_url);
        let params = [
            ("limit", query.limit.to_string()),
            ("offset", query.offset.to_string()),
            ("takerOnly", query.taker_only.to_string()),
            ("filterType", "CASH".to_string()),
            ("filterAmount", query.min_cash_usd.to_string()),
        ];
        self.pool.get_json(&url, &params).await
    }

    /// Fetch open interest for a set of condition IDs, batched upstream.
    pub async fn open_interest(
        &self,
        condition_ids: &[String],
    ) -> Result<Vec<OpenInterestEntry>, HttpError> {
        let url = format!("{}/oi", self.base_url);
        let mut entries = Vec::with_capacity(condition_ids.len());
        for batch in condition_ids.chunks(OI_BATCH_SIZE) {
            let params: Vec<(&str, String)> =
                batch.iter().map(|id| ("market", id.clone())).collect();
            let mut page: Vec<OpenInterestEntry> = self.pool.get_json(&url, &params).await?;
            entries.append(&mut page);
        }
        Ok(entries)
    }

    /// Fetch current positions for a wallet.
    pub async fn positions(
        &self,
        wallet: &str,
        limit: u32,
        size_threshold: Decimal,
    ) -> Result<Vec<PositionEntry>, HttpError> {
        let url = format!("{}/positions", self.base_url);
        let params = [
            ("user", wallet.to_string()),
            ("limit", limit.to_string()),
            ("offset", "0".to_string()),
            ("sizeThreshold", size_threshold.to_string()),
        ];
        self.pool.get_json(&url, &params).await
    }
}
