// src/core/kv/rest.rs

//! The production `KvStore` client: a reqwest-based adapter for an HTTP KV
//! namespace.
//!
//! Wire contract: `GET/PUT/DELETE {base}/values/{key}` for single-key
//! operations (value bytes in the body, metadata JSON in the
//! `x-kv-metadata` header, TTL as the `ttl` query parameter) and
//! `GET {base}/keys?prefix=&cursor=&limit=` returning a [`ListPage`] JSON
//! document.

use super::{KvStore, ListOptions, ListPage, PutOptions};
use crate::core::errors::RefractError;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde_json::Value;
use url::Url;

const METADATA_HEADER: &str = "x-kv-metadata";

pub struct RestKvStore {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl RestKvStore {
    pub fn new(base_url: Url, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            token,
        }
    }

    fn value_url(&self, key: &str) -> Result<Url, RefractError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RefractError::InvalidRequest("KV base URL cannot be a base".into()))?
            .push("values")
            .push(key);
        Ok(url)
    }

    fn keys_url(&self) -> Result<Url, RefractError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RefractError::InvalidRequest("KV base URL cannot be a base".into()))?
            .push("keys");
        Ok(url)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl KvStore for RestKvStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, RefractError> {
        Ok(self.get_with_metadata(key).await?.0)
    }

    async fn get_with_metadata(
        &self,
        key: &str,
    ) -> Result<(Option<Bytes>, Option<Value>), RefractError> {
        let url = self.value_url(key)?;
        let response = self.authorize(self.http.get(url)).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok((None, None)),
            status if status.is_success() => {
                let metadata = response
                    .headers()
                    .get(METADATA_HEADER)
                    .and_then(|raw| raw.to_str().ok())
                    .and_then(|raw| serde_json::from_str(raw).ok());
                let bytes = response.bytes().await?;
                Ok((Some(bytes), metadata))
            }
            status => Err(RefractError::KvUnavailable(format!(
                "GET {key} returned {status}"
            ))),
        }
    }

    async fn put(&self, key: &str, value: Bytes, opts: PutOptions) -> Result<(), RefractError> {
        let mut url = self.value_url(key)?;
        if let Some(ttl) = opts.ttl_seconds {
            url.query_pairs_mut().append_pair("ttl", &ttl.to_string());
        }

        let mut req = self.authorize(self.http.put(url)).body(value);
        if let Some(metadata) = &opts.metadata {
            req = req.header(METADATA_HEADER, serde_json::to_string(metadata)?);
        }

        let response = req.send().await?;
        if !response.status().is_success() {
            return Err(RefractError::KvUnavailable(format!(
                "PUT {key} returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RefractError> {
        let url = self.value_url(key)?;
        let response = self.authorize(self.http.delete(url)).send().await?;
        // 404 on delete keeps the operation idempotent.
        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(RefractError::KvUnavailable(format!(
                "DELETE {key} returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn list(&self, opts: ListOptions) -> Result<ListPage, RefractError> {
        let mut url = self.keys_url()?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("prefix", &opts.prefix);
            if let Some(cursor) = &opts.cursor {
                query.append_pair("cursor", cursor);
            }
            if opts.limit > 0 {
                query.append_pair("limit", &opts.limit.to_string());
            }
        }

        let response = self.authorize(self.http.get(url)).send().await?;
        if !response.status().is_success() {
            return Err(RefractError::KvUnavailable(format!(
                "LIST returned {}",
                response.status()
            )));
        }
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}
