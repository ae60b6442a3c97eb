use crate::error::AppError;
use crate::sniper::transport::MarketTransport;
use crate::sniper::types::{Listing, ListingRecord, ListingToken};
use std::sync::Arc;

const UNKNOWN_LABEL: &str = "Unknown";

/// Resolves notification tokens into normalized listings, one lookup call per batch.
pub struct ListingFetcher {
    transport: Arc<dyn MarketTransport>,
    batch_size: usize,
}

impl ListingFetcher {
    pub fn new(transport: Arc<dyn MarketTransport>, batch_size: usize) -> Self {
        Self {
            transport,
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub async fn fetch(
        &self,
        tokens: &[ListingToken],
        query_id: &str,
    ) -> Result<Vec<Listing>, AppError> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        if tokens.len() > self.batch_size {
            return Err(AppError::InvalidArgument(format!(
                "batch of {} tokens exceeds limit {}",
                tokens.len(),
                self.batch_size
            )));
        }

        let records = self.transport.fetch_listings(query_id, tokens).await?;
        Ok(records
            .into_iter()
            .filter_map(|record| normalize_record(query_id, record))
            .collect())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|raw| !raw.trim().is_empty())
}

/// Records without a claim token cannot be acted on and are dropped.
pub fn normalize_record(query_id: &str, record: ListingRecord) -> Option<Listing> {
    let Some(claim_token) = non_empty(record.claim_token) else {
        tracing::debug!(query = query_id, token = %record.id, "listing has no claim token");
        return None;
    };

    let item_name = non_empty(record.item_name)
        .or_else(|| non_empty(record.type_line))
        .unwrap_or_else(|| UNKNOWN_LABEL.to_string());

    Some(Listing {
        query_id: query_id.to_string(),
        token: record.id,
        claim_token,
        item_name,
        price_amount: record.price_amount,
        price_currency: non_empty(record.price_currency),
        account_name: non_empty(record.account_name).unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
    })
}
