//! Redeemable positions from the Polymarket Data API, grouped per condition.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;

use crate::models::DataApiPosition;
use crate::redeem::RedeemableItem;
use crate::shares::shares_to_raw;

pub const DATA_API_URL: &str = "https://data-api.polymarket.com";
const PAGE_SIZE: usize = 500;
const MAX_PAGES: usize = 20;

/// Supplies redeemable items for a token holder. Implementations only return
/// positions whose market is resolved.
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn redeemable_items(&self, holder: Address) -> Result<Vec<RedeemableItem>>;
}

pub struct DataApiPositions {
    client: Client,
    base_url: String,
}

impl DataApiPositions {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub async fn fetch_redeemable(&self, holder: Address) -> Result<Vec<DataApiPosition>> {
        let user = holder.to_string();
        collect_pages(PAGE_SIZE, MAX_PAGES, |offset| self.fetch_page(&user, offset)).await
    }

    async fn fetch_page(&self, user: &str, offset: usize) -> Result<Vec<DataApiPosition>> {
        let url = format!("{}/positions", self.base_url);
        let limit = PAGE_SIZE.to_string();
        let offset = offset.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[
                ("user", user),
                ("redeemable", "true"),
                ("limit", limit.as_str()),
                ("offset", offset.as_str()),
            ])
            .send()
            .await
            .context("Failed to fetch redeemable positions")?;
        if !response.status().is_success() {
            anyhow::bail!("Data API returned {} for redeemable positions", response.status());
        }
        response
            .json::<Vec<DataApiPosition>>()
            .await
            .context("Failed to parse Data API positions")
    }
}

/// Requests pages at increasing offsets until one comes back short. Stops at
/// `max_pages` with a warning; the rest is picked up after earlier items are
/// redeemed.
async fn collect_pages<T, F, Fut>(page_size: usize, max_pages: usize, mut fetch_page: F) -> Result<Vec<T>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let mut rows = Vec::new();
    for page in 0..max_pages {
        let batch = fetch_page(page * page_size).await?;
        let done = batch.len() < page_size;
        rows.extend(batch);
        if done {
            return Ok(rows);
        }
    }
    warn!(
        "Data API still had redeemable positions after {} rows, the remainder waits for a later run",
        rows.len()
    );
    Ok(rows)
}

#[async_trait]
impl PositionSource for DataApiPositions {
    async fn redeemable_items(&self, holder: Address) -> Result<Vec<RedeemableItem>> {
        let positions = self.fetch_redeemable(holder).await?;
        Ok(group_positions(&positions))
    }
}

/// Accepts hex with or without `0x`; short values are left-padded to 32 bytes.
pub fn parse_condition_id(raw: &str) -> Option<B256> {
    let raw = raw.trim();
    let hex = raw.strip_prefix("0x").unwrap_or(raw);
    if hex.is_empty() || hex.len() > 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    format!("0x{:0>64}", hex).parse().ok()
}

fn parse_token_id(raw: Option<&str>) -> Option<U256> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse().ok()
}

/// Folds per-outcome rows into one item per condition, in first-seen order.
///
/// A row fills its own outcome slot from `asset` and `size`, and the other
/// slot's token id from `oppositeAsset` unless a row for that side already
/// set it. Rows that are not redeemable, hold nothing, or carry an unusable
/// condition id are dropped.
pub fn group_positions(positions: &[DataApiPosition]) -> Vec<RedeemableItem> {
    let mut order: Vec<B256> = Vec::new();
    let mut items: HashMap<B256, RedeemableItem> = HashMap::new();

    for position in positions {
        if !position.redeemable || position.size.is_sign_negative() || position.size.is_zero() {
            continue;
        }
        let Some(condition_id) = position.condition_id.as_deref().and_then(parse_condition_id) else {
            debug!("Skipping redeemable position without a usable conditionId: {:?}", position.condition_id);
            continue;
        };

        let slot = match position.outcome_index {
            Some(1) => 1,
            Some(0) | None => 0,
            Some(other) => {
                debug!("Condition {} has unexpected outcomeIndex {}, using 0", condition_id, other);
                0
            }
        };

        let item = items.entry(condition_id).or_insert_with(|| {
            order.push(condition_id);
            RedeemableItem::new(condition_id, [None, None], position.negative_risk)
        });

        item.neg_risk |= position.negative_risk;
        item.hinted_amounts[slot] = shares_to_raw(position.size);
        if let Some(token_id) = parse_token_id(position.asset.as_deref()) {
            item.token_ids[slot] = Some(token_id);
        }
        if let Some(opposite) = parse_token_id(position.opposite_asset.as_deref()) {
            item.token_ids[1 - slot].get_or_insert(opposite);
        }
        if item.title.is_none() {
            item.title = position.title.clone();
        }
    }

    order
        .into_iter()
        .filter_map(|condition_id| items.remove(&condition_id))
        .collect()
}
