//! Wallet exposure refresh for position-tracked wallets.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::warn;

use pulse_common::value::to_decimal;

use super::JobContext;

struct ExposureBucket {
    net: Decimal,
    cost: Decimal,
    total: Decimal,
}

pub async fn sync_positions(ctx: Arc<JobContext>) -> anyhow::Result<usize> {
    let now = Utc::now();
    let wallets = ctx.store.tracked_wallets(now)?;
    if wallets.is_empty() {
        return Ok(0);
    }

    let settings = &ctx.settings;
    let mut processed = 0usize;

    for wallet in &wallets {
        let positions = match ctx
            .data_api
            .positions(
                wallet,
                settings.positions_page_limit,
                settings.positions_size_threshold,
            )
            .await
        {
            Ok(positions) => positions,
            Err(e) if e.is_throttled() => {
                warn!(
                    component = "sync_positions",
                    upstream = "data_api",
                    processed,
                    "throttled, truncating wallet walk"
                );
                break;
            }
            Err(e) => return Err(e.into()),
        };

        // Aggregate per market; NO-outcome holdings count negative.
        let mut buckets: HashMap<String, ExposureBucket> = HashMap::new();
        for position in &positions {
            let condition_id = match position.condition_id.as_deref() {
                Some(id) if !id.is_empty() => id.to_string(),
                _ => continue,
            };
            let size = match to_decimal(position.size.as_ref()) {
                Some(size) => size,
                None => continue,
            };
            let avg_price = to_decimal(position.avg_price.as_ref());
            let outcome = position
                .outcome
                .as_deref()
                .map(|o| o.trim().to_lowercase())
                .unwrap_or_default();
            let sign = if outcome == "no" {
                Decimal::NEGATIVE_ONE
            } else {
                Decimal::ONE
            };

            let bucket = buckets.entry(condition_id).or_insert(ExposureBucket {
                net: Decimal::ZERO,
                cost: Decimal::ZERO,
                total: Decimal::ZERO,
            });
            bucket.net += size * sign;
            if let Some(price) = avg_price {
                bucket.cost += size.abs() * price;
            }
            bucket.total += size.abs();
        }

        let exposures: Vec<(String, Decimal, Option<Decimal>)> = buckets
            .into_iter()
            .map(|(condition_id, bucket)| {
                let avg_entry = if bucket.total > Decimal::ZERO {
                    Some(bucket.cost / bucket.total)
                } else {
                    None
                };
                (condition_id, bucket.net, avg_entry)
            })
            .collect();

        ctx.store.replace_wallet_exposures(wallet, &exposures, now)?;
        processed += positions.len();
    }

    Ok(processed)
}
