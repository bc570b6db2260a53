use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::banner::model::METAFIELD_NAMESPACE;
use crate::banner::reconcile::MetafieldStore;
use crate::config::ShopifySettings;

const METAFIELDS_SET: &str = r#"
mutation($m: [MetafieldsSetInput!]!) {
  metafieldsSet(metafields: $m) {
    metafields { id namespace key }
    userErrors { field message }
  }
}
"#;

const PRODUCT_METAFIELD_IDS: &str = r#"
query($id: ID!, $idents: [HasMetafieldsIdentifier!]!) {
  product(id: $id) {
    metafields(identifiers: $idents) { id key namespace }
  }
}
"#;

const METAFIELD_DELETE: &str = r#"
mutation($id: ID!) {
  metafieldDelete(input: {id: $id}) {
    deletedId
    userErrors { field message }
  }
}
"#;

fn truncate_for_log(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        let mut cut = max_len;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push('…');
    }
    s
}

/// Map a raw product identifier to a Shopify product GID.
///
/// Numeric ids become `gid://shopify/Product/{id}` and `gid://` ids are kept.
/// Anything else (blank, SKUs, handles) gives `None`.
pub fn product_gid(raw: &str) -> Option<String> {
    let id = raw.trim();
    if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) {
        return Some(format!("gid://shopify/Product/{id}"));
    }
    if id.starts_with("gid://") && id.len() > "gid://".len() {
        return Some(id.to_string());
    }
    None
}

/// `MetafieldsSetInput` for a date-typed product metafield.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DateMetafieldInput {
    pub owner_id: String,
    pub namespace: String,
    pub key: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub value: String,
}

impl DateMetafieldInput {
    pub fn new(owner_id: &str, key: &str, value: NaiveDate) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            namespace: METAFIELD_NAMESPACE.to_string(),
            key: key.to_string(),
            kind: "date",
            value: value.format("%Y-%m-%d").to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MetafieldRef {
    id: String,
    key: String,
}

/// Shopify Admin GraphQL client for product metafields.
///
/// Endpoint: `https://{shop}/admin/api/{version}/graphql.json`, authenticated
/// with the `X-Shopify-Access-Token` header.
#[derive(Clone)]
pub struct ShopifyProvider {
    endpoint: String,
    http: Client,
    token: String,
}

impl ShopifyProvider {
    pub fn new(settings: &ShopifySettings) -> Result<Self> {
        let http = Client::builder()
            .user_agent("promo-banner-sync/0.1")
            .timeout(settings.request_timeout)
            .build()?;

        Ok(Self {
            endpoint: graphql_endpoint(&settings.shop, &settings.api_version),
            http,
            token: settings.token.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// POST one GraphQL document; non-2xx status and top-level `errors` are failures.
    async fn graphql(&self, query: &str, variables: Value) -> Result<Value> {
        let resp = self
            .http
            .post(&self.endpoint)
            .header("X-Shopify-Access-Token", &self.token)
            .header("Accept", "application/json")
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .context("shopify request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = truncate_for_log(resp.text().await.unwrap_or_default(), 2000);
            return Err(anyhow!("shopify graphql failed: {status} body={body}"));
        }

        let body: Value = resp.json().await.context("shopify response was not json")?;
        if let Some(errors) = body.get("errors").filter(|e| !e.is_null()) {
            return Err(anyhow!(
                "graphql errors: {}",
                truncate_for_log(errors.to_string(), 2000)
            ));
        }
        Ok(body)
    }

    pub async fn metafields_set(&self, metafields: &[DateMetafieldInput]) -> Result<()> {
        let body = self
            .graphql(METAFIELDS_SET, json!({ "m": metafields }))
            .await?;
        check_user_errors(&body, "metafieldsSet")
    }

    pub async fn metafield_ids(
        &self,
        product_id: &str,
        keys: &[&str],
    ) -> Result<HashMap<String, String>> {
        let idents: Vec<Value> = keys
            .iter()
            .map(|k| json!({ "namespace": METAFIELD_NAMESPACE, "key": k }))
            .collect();
        let body = self
            .graphql(
                PRODUCT_METAFIELD_IDS,
                json!({ "id": product_id, "idents": idents }),
            )
            .await?;
        parse_metafield_ids(&body, keys)
    }

    pub async fn metafield_delete(&self, metafield_id: &str) -> Result<()> {
        let body = self
            .graphql(METAFIELD_DELETE, json!({ "id": metafield_id }))
            .await?;
        check_user_errors(&body, "metafieldDelete")
    }
}

#[async_trait]
impl MetafieldStore for ShopifyProvider {
    async fn set_date(&self, product_id: &str, key: &str, value: NaiveDate) -> Result<()> {
        self.metafields_set(&[DateMetafieldInput::new(product_id, key, value)])
            .await
    }

    async fn existing_metafield_ids(
        &self,
        product_id: &str,
        keys: &[&str],
    ) -> Result<HashMap<String, String>> {
        self.metafield_ids(product_id, keys).await
    }

    async fn delete_metafield(&self, metafield_id: &str) -> Result<()> {
        self.metafield_delete(metafield_id).await
    }
}

fn graphql_endpoint(shop: &str, api_version: &str) -> String {
    let scheme = if shop.starts_with("localhost") || shop.starts_with("127.0.0.1") {
        "http"
    } else {
        "https"
    };
    format!(
        "{scheme}://{}/admin/api/{}/graphql.json",
        shop.trim_end_matches('/'),
        api_version.trim()
    )
}

fn check_user_errors(body: &Value, mutation: &str) -> Result<()> {
    let errors = body
        .get("data")
        .and_then(|d| d.get(mutation))
        .and_then(|m| m.get("userErrors"))
        .and_then(|e| e.as_array());
    match errors {
        Some(list) if !list.is_empty() => {
            let messages: Vec<String> = list
                .iter()
                .map(|e| {
                    let message = e.get("message").and_then(|m| m.as_str()).unwrap_or("?");
                    match e.get("field").filter(|f| !f.is_null()) {
                        Some(field) => format!("{field}: {message}"),
                        None => message.to_string(),
                    }
                })
                .collect();
            Err(anyhow!("{mutation} userErrors: {}", messages.join("; ")))
        }
        Some(_) => Ok(()),
        None => Err(anyhow!("{mutation}: response has no payload")),
    }
}

/// Pull `{key -> id}` out of a product metafields lookup, limited to `keys`.
/// A missing product reads as "no metafields".
fn parse_metafield_ids(body: &Value, keys: &[&str]) -> Result<HashMap<String, String>> {
    let product = body
        .get("data")
        .and_then(|d| d.get("product"))
        .ok_or_else(|| anyhow!("product lookup: response has no data"))?;
    if product.is_null() {
        debug!("product not found; treating its metafields as absent");
        return Ok(HashMap::new());
    }

    let refs: Vec<Option<MetafieldRef>> = match product.get("metafields") {
        Some(list) if !list.is_null() => serde_json::from_value(list.clone())
            .context("unexpected metafields shape in product lookup")?,
        _ => Vec::new(),
    };
    Ok(refs
        .into_iter()
        .flatten()
        .filter(|mf| keys.iter().any(|k| *k == mf.key))
        .map(|mf| (mf.key, mf.id))
        .collect())
}
