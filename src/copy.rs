//! Marketing copy generation.
//!
//! The text service is treated as an opaque capability: it takes a product
//! name and description and must answer with a bare JSON object holding
//! exactly `page_1`, `page_2` and `page_3`. Anything else fails the run
//! before rendering starts.

use crate::llm::{LlmClient, LlmError, LlmMessage};
use crate::models::GeneratedCopy;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, info};

const COPY_KEYS: [&str; 3] = ["page_1", "page_2", "page_3"];

#[derive(Debug, Error)]
pub enum CopyError {
    #[error("copy service failed: {0}")]
    Service(#[from] LlmError),
    #[error("copy service timed out after {0:?}")]
    Timeout(Duration),
    #[error("copy is not a JSON object: {0}")]
    Malformed(String),
    #[error("copy is missing `{0}`")]
    MissingKey(&'static str),
    #[error("copy field `{0}` must be a non-empty string")]
    NotText(&'static str),
    #[error("copy has unexpected field `{0}`")]
    UnexpectedKey(String),
}

#[async_trait]
pub trait CopyGenerator: Send + Sync {
    async fn generate_copy(
        &self,
        product_name: &str,
        product_description: &str,
    ) -> Result<GeneratedCopy, CopyError>;
}

/// Asks the LLM gateway for carousel copy.
pub struct LlmCopyGenerator {
    llm: Arc<LlmClient>,
    timeout: Duration,
}

impl LlmCopyGenerator {
    pub fn new(llm: Arc<LlmClient>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }
}

#[async_trait]
impl CopyGenerator for LlmCopyGenerator {
    async fn generate_copy(
        &self,
        product_name: &str,
        product_description: &str,
    ) -> Result<GeneratedCopy, CopyError> {
        let prompt = build_prompt(product_name, product_description);
        let messages = [LlmMessage::user(prompt)];
        let call = self.llm.chat(&messages);
        let response = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| CopyError::Timeout(self.timeout))??;

        debug!(target = "reel.llm", raw = %response.text, "copy_response");
        if let Some(usage) = response.usage {
            info!(
                target = "reel.llm",
                function = self.llm.function_name(),
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "copy_usage"
            );
        }
        parse_copy(&response.text)
    }
}

pub fn build_prompt(product_name: &str, product_description: &str) -> String {
    format!(
        r#"You are a professional product copywriter. Given the following product information, create 3 distinct and engaging product page descriptions for an e-commerce carousel.

Product Name: {product_name}
Product Description: {product_description}

Requirements:
1. Create 3 different angles/perspectives for the same product
2. Each description should be 2-3 sentences long
3. Focus on different benefits: features, lifestyle, and value proposition
4. Make them compelling and sales-oriented
5. Keep each description between 100-150 characters

Respond with the JSON object only. No code fences, no commentary, no text before or after it. Use exactly this shape:
{{
"page_1": "First product description focusing on key features and functionality",
"page_2": "Second product description focusing on lifestyle and user experience",
"page_3": "Third product description focusing on value and quality benefits"
}}"#
    )
}

/// Parses raw service output into [`GeneratedCopy`].
///
/// Only surrounding whitespace is tolerated; fenced or annotated output is
/// rejected like any other malformed reply.
pub fn parse_copy(raw: &str) -> Result<GeneratedCopy, CopyError> {
    let value: Value =
        serde_json::from_str(raw.trim()).map_err(|err| CopyError::Malformed(err.to_string()))?;
    let mut fields = match value {
        Value::Object(fields) => fields,
        other => {
            return Err(CopyError::Malformed(format!(
                "expected object, got {}",
                kind_of(&other)
            )));
        }
    };

    let [page_1, page_2, page_3] = COPY_KEYS.map(|key| take_text(&mut fields, key));
    let copy = GeneratedCopy {
        page_1: page_1?,
        page_2: page_2?,
        page_3: page_3?,
    };

    if let Some(extra) = fields.keys().next() {
        return Err(CopyError::UnexpectedKey(extra.clone()));
    }
    Ok(copy)
}

fn take_text(fields: &mut Map<String, Value>, key: &'static str) -> Result<String, CopyError> {
    match fields.remove(key) {
        None => Err(CopyError::MissingKey(key)),
        Some(Value::String(text)) if !text.trim().is_empty() => Ok(text),
        Some(_) => Err(CopyError::NotText(key)),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
