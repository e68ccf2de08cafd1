//! HTTP client for the ledger gateway.
use std::sync::Arc;

use gig_market_engine::{
    db_types::ContractAddress,
    traits::{ChainReader, ChainReaderError, RawTransaction},
};
use log::*;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION},
    Client,
};

use crate::{config::ChainGatewayConfig, errors::ServerError};

/// Fetches contract transaction windows from the ledger gateway over HTTP.
///
/// Timeouts and connection failures are reported as transient so the scheduler retries the same window on the
/// next tick. A 4xx response means the contract address or credentials are wrong and retrying is pointless.
#[derive(Clone)]
pub struct HttpChainReader {
    base_url: String,
    client: Arc<Client>,
}

impl HttpChainReader {
    pub fn new(config: &ChainGatewayConfig) -> Result<Self, ServerError> {
        let mut headers = HeaderMap::with_capacity(2);
        let api_key = config.api_key.reveal();
        if !api_key.is_empty() {
            let val = HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|e| ServerError::InitializeError(e.to_string()))?;
            headers.insert(AUTHORIZATION, val);
        }
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| ServerError::InitializeError(e.to_string()))?;
        let base_url = config.base_url.trim_end_matches('/').to_string();
        Ok(Self { base_url, client: Arc::new(client) })
    }

    fn url(&self, contract: &ContractAddress) -> String {
        format!("{}/contracts/{contract}/transactions", self.base_url)
    }
}

impl ChainReader for HttpChainReader {
    async fn fetch_transactions(
        &self,
        contract: &ContractAddress,
        after: Option<u64>,
        limit: usize,
    ) -> Result<Vec<RawTransaction>, ChainReaderError> {
        let url = self.url(contract);
        trace!("⛓️ Fetching up to {limit} transactions for {contract} after {after:?}");
        let mut req = self.client.get(&url).query(&[("limit", limit.to_string())]);
        if let Some(after) = after {
            req = req.query(&[("after", after.to_string())]);
        }
        let response = req.send().await.map_err(|e| ChainReaderError::Transient(e.to_string()))?;
        let status = response.status();
        if status.is_client_error() {
            let message = response.text().await.unwrap_or_default();
            return Err(ChainReaderError::FatalConfig(format!(
                "Gateway rejected the request for {contract} with {status}. {message}"
            )));
        }
        if !status.is_success() {
            return Err(ChainReaderError::Transient(format!("Gateway returned {status} for {contract}")));
        }
        let txs = response
            .json::<Vec<RawTransaction>>()
            .await
            .map_err(|e| ChainReaderError::Transient(format!("Could not decode the gateway response. {e}")))?;
        trace!("⛓️ Fetched {} transactions for {contract}", txs.len());
        Ok(txs)
    }
}
