//! CLOB REST client: orderbook snapshots and single-sided prices.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::http::{HttpError, HttpPool};
use crate::parse::{parse_book, NormalizedBook};
use crate::types::ClobBook;

/// Default CLOB REST base URL.
pub const DEFAULT_CLOB_BASE: &str = "https://clob.polymarket.com";

/// Token IDs per books request.
const BOOKS_BATCH_SIZE: usize = 500;

#[derive(Debug, Serialize)]
struct BookParams<'a> {
    token_id: &'a str,
}

/// Client for the CLOB REST endpoints.
pub struct ClobClient {
    pool: Arc<HttpPool>,
    base_url: String,
}

impl ClobClient {
    pub fn new(pool: Arc<HttpPool>, base_url: impl Into<String>) -> Self {
        Self {
            pool,
            base_url: base_url.into(),
        }
    }

    /// Fetch orderbook snapshots for a set of tokens, batched upstream.
    /// Unparseable books are dropped with a counted warning.
    pub async fn books(&self, token_ids: &[String]) -> Result<Vec<NormalizedBook>, HttpError> {
        let url = format!("{}/books", self.base_url);
        let mut books = Vec::with_capacity(token_ids.len());
        let mut dropped = 0usize;

        for batch in token_ids.chunks(BOOKS_BATCH_SIZE) {
            let payload: Vec<BookParams<'_>> = batch
                .iter()
                .map(|token_id| BookParams { token_id })
                .collect();
            let page: Vec<ClobBook> = self.pool.post_json(&url, &payload).await?;
            for raw in &page {
                match parse_book(raw) {
                    Some(book) => books.push(book),
                    None => dropped += 1,
                }
            }
        }

        if dropped > 0 {
            warn!(dropped, upstream = "clob", "dropped unparseable book payloads");
        }
        Ok(books)
    }

    /// Fetch the book for a single token.
    pub async fn book(&self, token_id: &str) -> Result<Option<NormalizedBook>, HttpError> {
        let url = format!("{}/book", self.base_url);
        let query = [("token_id", token_id.to_string())];
        let raw: ClobBook = self.pool.get_json(&url, &query).await?;
        Ok(parse_book(&raw))
    }

    /// Fetch the current price on one side of a token's book.
    pub async fn price(
        &self,
        token_id: &str,
        side: pulse_common::Side,
    ) -> Result<Option<rust_decimal::Decimal>, HttpError> {
        #[derive(serde::Deserialize)]
        struct PriceResponse {
            price: Option<serde_json::Value>,
        }

        let url = format!("{}/price", self.base_url);
        let query = [
            ("token_id", token_id.to_string()),
            ("side", side.to_string()),
        ];
        let raw: PriceResponse = self.pool.get_json(&url, &query).await?;
        Ok(pulse_common::value::to_decimal(raw.price.as_ref()))
    }
}
