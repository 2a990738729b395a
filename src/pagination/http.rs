//! HTTP pagers for the three upstream paging conventions.

use super::{Page, PageCursor, PageError, Paginator, Strategy};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::marker::PhantomData;

/// Send a request and classify the outcome the same way the chain RPC client does:
/// network, 429 and 5xx are transient; other 4xx and undecodable bodies are permanent.
async fn send_json(request: RequestBuilder) -> Result<serde_json::Value, PageError> {
    let response = request
        .send()
        .await
        .map_err(|e| PageError::Transient(format!("network error: {}", e)))?;

    let status = response.status();
    if status == 429 || status.is_server_error() {
        return Err(PageError::Transient(format!("HTTP {}", status.as_u16())));
    }
    if !status.is_success() {
        return Err(PageError::Permanent(format!("HTTP {}", status.as_u16())));
    }

    response
        .json::<serde_json::Value>()
        .await
        .map_err(|e| PageError::Permanent(format!("parse error: {}", e)))
}

fn decode<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, PageError> {
    serde_json::from_value(value).map_err(|e| PageError::Permanent(format!("parse error: {}", e)))
}

/// GraphQL collection paged with `first`/`skip` variables.
///
/// The query must declare `$first: Int!` and `$skip: Int!`; the records are read
/// from `data.<collection>`.
#[derive(Debug, Clone)]
pub struct SubgraphPager<T> {
    client: Client,
    url: String,
    query: String,
    collection: String,
    variables: serde_json::Map<String, serde_json::Value>,
    _item: PhantomData<fn() -> T>,
}

impl<T> SubgraphPager<T> {
    pub fn new(client: Client, url: String, query: String, collection: String) -> Self {
        SubgraphPager {
            client,
            url,
            query,
            collection,
            variables: serde_json::Map::new(),
            _item: PhantomData,
        }
    }

    /// Extra query variable passed through unchanged on every page.
    pub fn with_variable(mut self, name: &str, value: serde_json::Value) -> Self {
        self.variables.insert(name.to_string(), value);
        self
    }
}

#[async_trait]
impl<T: DeserializeOwned + Send> Paginator for SubgraphPager<T> {
    type Item = T;

    fn strategy(&self) -> Strategy {
        Strategy::Sentinel
    }

    async fn fetch_page(&self, cursor: PageCursor) -> Result<Page<T>, PageError> {
        let mut variables = self.variables.clone();
        variables.insert("first".to_string(), cursor.limit.into());
        variables.insert("skip".to_string(), cursor.offset.into());
        let payload = serde_json::json!({ "query": self.query, "variables": variables });

        let mut body = send_json(self.client.post(&self.url).json(&payload)).await?;
        if let Some(errors) = body.get("errors").filter(|e| !e.is_null()) {
            return Err(PageError::Permanent(format!("graphql errors: {}", errors)));
        }
        let records = body
            .get_mut("data")
            .and_then(|data| data.get_mut(&self.collection))
            .map(serde_json::Value::take)
            .ok_or_else(|| {
                PageError::Permanent(format!("missing data.{} in response", self.collection))
            })?;
        Ok(Page::new(decode(records)?))
    }
}

/// REST list paged with `?offset=&limit=`, answering a bare JSON array.
#[derive(Debug, Clone)]
pub struct OffsetLimitPager<T> {
    client: Client,
    url: String,
    _item: PhantomData<fn() -> T>,
}

impl<T> OffsetLimitPager<T> {
    pub fn new(client: Client, url: String) -> Self {
        OffsetLimitPager {
            client,
            url,
            _item: PhantomData,
        }
    }
}

#[async_trait]
impl<T: DeserializeOwned + Send> Paginator for OffsetLimitPager<T> {
    type Item = T;

    fn strategy(&self) -> Strategy {
        Strategy::Sentinel
    }

    async fn fetch_page(&self, cursor: PageCursor) -> Result<Page<T>, PageError> {
        let request = self
            .client
            .get(&self.url)
            .query(&[("offset", cursor.offset), ("limit", cursor.limit)]);
        let body = send_json(request).await?;
        Ok(Page::new(decode(body)?))
    }
}

#[derive(Debug, Deserialize)]
struct CountedPage<T> {
    count: u64,
    records: Vec<T>,
}

/// REST list paged with `?page=&pageSize=` (page is zero-based), answering
/// `{ "count": n, "records": [...] }`.
#[derive(Debug, Clone)]
pub struct PageCountPager<T> {
    client: Client,
    url: String,
    _item: PhantomData<fn() -> T>,
}

impl<T> PageCountPager<T> {
    pub fn new(client: Client, url: String) -> Self {
        PageCountPager {
            client,
            url,
            _item: PhantomData,
        }
    }
}

#[async_trait]
impl<T: DeserializeOwned + Send> Paginator for PageCountPager<T> {
    type Item = T;

    fn strategy(&self) -> Strategy {
        Strategy::CountFirst
    }

    async fn fetch_page(&self, cursor: PageCursor) -> Result<Page<T>, PageError> {
        let request = self
            .client
            .get(&self.url)
            .query(&[("page", cursor.page_index()), ("pageSize", cursor.limit)]);
        let page: CountedPage<T> = decode(send_json(request).await?)?;
        Ok(Page::with_total(page.records, page.count))
    }
}
