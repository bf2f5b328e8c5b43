use serde::Deserialize;

use crate::market::types::RawCandle;

/// Body of `GET /products/{id}/candles`.
///
/// Success is a bare array of tuples; failures come back as
/// `{"message": "..."}`, sometimes with a 200 status.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CandlesBody {
    Candles(Vec<RawCandle>),
    Message(ApiMessage),
}

#[derive(Debug, Deserialize)]
pub struct ApiMessage {
    pub message: String,
}

/// 24h stats for a product. Only used as an existence probe.
#[derive(Debug, Deserialize)]
pub struct ProductStats {
    pub last: Option<String>,
}
