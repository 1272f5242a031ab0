//! Template and research operations.
//!
//! Each operation validates its input, resolves its policy and hands a
//! fully described call to the read or write path in `service.rs`.

use serde_json::{json, Value};

use crate::cache::{CacheKey, CacheTag};
use crate::client::service::{rate_key, ReadCall, ServiceClient, WriteCall};
use crate::client::types::{CallerId, ClientError, Served};
use crate::security::validation::{self, MAX_CATEGORY_LEN, MAX_QUERY_LEN};
use crate::upstream::{Operation, RequestDescriptor};

impl ServiceClient {
    /// All template categories. Falls back to the configured built-in list.
    pub async fn list_categories(&self) -> Result<Served, ClientError> {
        let op = Operation::ListCategories;
        let policy = self.policy(op);
        self.read(ReadCall {
            policy,
            descriptor: RequestDescriptor::get(op, "/api/templates/categories", policy.timeout),
            cache_key: CacheKey::new(op).build(),
            rate_key: rate_key(op, None),
            tags: Vec::new(),
            fallback: json!(self.config().fallback.categories),
        })
        .await
    }

    /// Templates in `category`. Cached under the category exactly as sent;
    /// invalidation by category ignores case.
    pub async fn list_templates_by_category(&self, category: &str) -> Result<Served, ClientError> {
        let op = Operation::ListTemplatesByCategory;
        let category = self.validate(op, validation::text("category", category, MAX_CATEGORY_LEN))?;
        let policy = self.policy(op);
        self.read(ReadCall {
            policy,
            descriptor: RequestDescriptor::get(op, "/api/templates", policy.timeout)
                .with_query("category", category.clone()),
            cache_key: CacheKey::new(op).param("category", category.clone()).build(),
            rate_key: rate_key(op, None),
            tags: vec![CacheTag::category(&category)],
            fallback: json!([]),
        })
        .await
    }

    /// Templates owned by `caller`.
    pub async fn list_caller_templates(&self, caller: &str) -> Result<Served, ClientError> {
        let op = Operation::ListCallerTemplates;
        let caller = self.validate(op, CallerId::new(caller))?;
        let policy = self.policy(op);
        self.read(ReadCall {
            policy,
            descriptor: RequestDescriptor::get(op, format!("/api/templates/user/{}", caller), policy.timeout),
            cache_key: CacheKey::new(op).param("caller", caller.as_str()).build(),
            rate_key: rate_key(op, Some(&caller)),
            tags: vec![CacheTag::caller(caller.as_str())],
            fallback: json!([]),
        })
        .await
    }

    pub async fn list_popular(&self, limit: u32) -> Result<Served, ClientError> {
        let op = Operation::ListPopular;
        let limit = self.validate(op, validation::popular_limit(limit))?;
        let policy = self.policy(op);
        self.read(ReadCall {
            policy,
            descriptor: RequestDescriptor::get(op, "/api/templates/popular", policy.timeout)
                .with_query("limit", limit.to_string()),
            cache_key: CacheKey::new(op).param("limit", limit.to_string()).build(),
            rate_key: rate_key(op, None),
            tags: Vec::new(),
            fallback: json!([]),
        })
        .await
    }

    /// Research search. Results are shared across callers; the rate limit
    /// is per caller.
    pub async fn search(&self, caller: &str, query: &str) -> Result<Served, ClientError> {
        let op = Operation::Search;
        let caller = self.validate(op, CallerId::new(caller))?;
        let query = self.validate(op, validation::text("query", query, MAX_QUERY_LEN))?;
        let policy = self.policy(op);
        self.read(ReadCall {
            policy,
            descriptor: RequestDescriptor::get(op, "/api/research/search", policy.timeout)
                .with_query("q", query.clone()),
            cache_key: CacheKey::new(op).text("q", &query).build(),
            rate_key: rate_key(op, Some(&caller)),
            tags: Vec::new(),
            fallback: json!([]),
        })
        .await
    }

    /// Create a template from a JSON object. Invalidates the caller's list
    /// and, when the payload names one, the category's list.
    pub async fn create_template(&self, caller: &str, payload: Value) -> Result<Value, ClientError> {
        let op = Operation::CreateTemplate;
        let caller = self.validate(op, CallerId::new(caller))?;
        self.validate(op, validation::json_object("payload", &payload))?;

        let mut invalidates = vec![CacheTag::caller(caller.as_str())];
        if let Some(category) = payload.get("category").and_then(Value::as_str) {
            invalidates.push(CacheTag::category(category));
        }

        let mut body = payload;
        if let Value::Object(fields) = &mut body {
            fields.insert("user_id".to_string(), json!(caller.as_str()));
        }

        let policy = self.policy(op);
        self.write(WriteCall {
            policy,
            descriptor: RequestDescriptor::post(op, "/api/templates", body, policy.timeout),
            rate_key: rate_key(op, Some(&caller)),
            invalidates,
        })
        .await
    }

    /// Ask the service to generate a template from a natural-language query.
    pub async fn generate_from_query(&self, caller: &str, query: &str) -> Result<Value, ClientError> {
        let op = Operation::GenerateFromQuery;
        let caller = self.validate(op, CallerId::new(caller))?;
        let query = self.validate(op, validation::text("query", query, MAX_QUERY_LEN))?;
        let policy = self.policy(op);
        self.write(WriteCall {
            policy,
            descriptor: RequestDescriptor::post(
                op,
                "/api/templates/generate",
                json!({ "query": query, "user_id": caller.as_str() }),
                policy.timeout,
            ),
            rate_key: rate_key(op, Some(&caller)),
            invalidates: vec![CacheTag::caller(caller.as_str())],
        })
        .await
    }

    /// Fill a template's fields. Idempotent, so retried like a read, but
    /// never cached and failures are surfaced.
    pub async fn fill_template(&self, caller: &str, template_id: &str, fields: Value) -> Result<Value, ClientError> {
        let op = Operation::FillTemplate;
        let caller = self.validate(op, CallerId::new(caller))?;
        let template_id = self.validate(op, validation::identifier("template_id", template_id))?;
        self.validate(op, validation::json_object("fields", &fields))?;
        let policy = self.policy(op);
        self.write(WriteCall {
            policy,
            descriptor: RequestDescriptor::post(
                op,
                format!("/api/templates/{}/fill", template_id),
                json!({ "fields": fields, "user_id": caller.as_str() }),
                policy.timeout,
            ),
            rate_key: rate_key(op, Some(&caller)),
            invalidates: Vec::new(),
        })
        .await
    }
}
