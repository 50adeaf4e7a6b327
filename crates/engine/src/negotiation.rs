//! Content negotiation: request writers and response readers keyed by
//! content type.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use serde_json::Value;
use tether_types::content_type::{self, APPLICATION_JSON, FORM_URLENCODED, TEXT_PLAIN};
use tether_util::{encode_form, parse_response_json_strict};

/// What a writer serializes: placed form fields and the body argument.
#[derive(Debug, Clone, Copy)]
pub struct RequestPayload<'a> {
    pub form: &'a [(String, String)],
    pub body: Option<&'a Value>,
}

/// Serializes a request body for one content type.
pub trait RequestWriter: Send + Sync {
    fn write_body(&self, payload: RequestPayload<'_>) -> anyhow::Result<String>;
}

/// Reads a response body for one content type into JSON.
pub trait ResponseReader: Send + Sync {
    fn read(&self, body: &str, status: u16) -> anyhow::Result<Value>;
}

/// `application/json` writer.
///
/// The body argument is serialized as-is. Without one, form fields are sent
/// as a flat JSON object.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRequestWriter;

impl RequestWriter for JsonRequestWriter {
    fn write_body(&self, payload: RequestPayload<'_>) -> anyhow::Result<String> {
        if let Some(body) = payload.body {
            return serde_json::to_string(body).context("serialize JSON body");
        }
        if payload.form.is_empty() {
            return Ok(String::new());
        }
        let object: serde_json::Map<String, Value> = payload
            .form
            .iter()
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect();
        serde_json::to_string(&object).context("serialize JSON body")
    }
}

/// `application/x-www-form-urlencoded` writer.
///
/// Form fields are encoded in placement order. An object body argument is
/// flattened into fields when no form fields were placed.
#[derive(Debug, Default, Clone, Copy)]
pub struct FormRequestWriter;

impl RequestWriter for FormRequestWriter {
    fn write_body(&self, payload: RequestPayload<'_>) -> anyhow::Result<String> {
        if !payload.form.is_empty() {
            return Ok(encode_form(payload.form));
        }
        match payload.body {
            None | Some(Value::Null) => Ok(String::new()),
            Some(Value::Object(map)) => {
                let pairs: Vec<(String, String)> = map
                    .iter()
                    .map(|(key, value)| (key.clone(), crate::builder::wire_string(value)))
                    .collect();
                Ok(encode_form(&pairs))
            }
            Some(other) => anyhow::bail!("form bodies must be objects, got {other}"),
        }
    }
}

/// `text/plain` writer: the body argument's string form.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextRequestWriter;

impl RequestWriter for TextRequestWriter {
    fn write_body(&self, payload: RequestPayload<'_>) -> anyhow::Result<String> {
        Ok(payload.body.map(crate::builder::wire_string).unwrap_or_default())
    }
}

/// Strict JSON reader. An empty body reads as `null`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonResponseReader;

impl ResponseReader for JsonResponseReader {
    fn read(&self, body: &str, status: u16) -> anyhow::Result<Value> {
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(parse_response_json_strict(body, Some(status))?)
    }
}

/// Plain text reader: the body becomes a JSON string.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextResponseReader;

impl ResponseReader for TextResponseReader {
    fn read(&self, body: &str, _status: u16) -> anyhow::Result<Value> {
        Ok(Value::String(body.to_string()))
    }
}

/// Content-type table consulted when building requests and reading responses.
#[derive(Clone)]
pub struct ContentNegotiation {
    writers: HashMap<String, Arc<dyn RequestWriter>>,
    readers: HashMap<String, Arc<dyn ResponseReader>>,
}

impl ContentNegotiation {
    /// An empty table.
    pub fn empty() -> Self {
        Self {
            writers: HashMap::new(),
            readers: HashMap::new(),
        }
    }

    pub fn with_writer(mut self, content_type: &str, writer: impl RequestWriter + 'static) -> Self {
        self.writers.insert(content_type::normalize(content_type), Arc::new(writer));
        self
    }

    pub fn with_reader(mut self, content_type: &str, reader: impl ResponseReader + 'static) -> Self {
        self.readers.insert(content_type::normalize(content_type), Arc::new(reader));
        self
    }

    /// Writer for `content_type`. `+json` media types fall back to JSON.
    pub fn writer(&self, content_type: &str) -> Option<Arc<dyn RequestWriter>> {
        lookup(&self.writers, content_type)
    }

    /// Reader for `content_type`. `+json` media types fall back to JSON.
    pub fn reader(&self, content_type: &str) -> Option<Arc<dyn ResponseReader>> {
        lookup(&self.readers, content_type)
    }
}

impl Default for ContentNegotiation {
    fn default() -> Self {
        Self::empty()
            .with_writer(APPLICATION_JSON, JsonRequestWriter)
            .with_writer(FORM_URLENCODED, FormRequestWriter)
            .with_writer(TEXT_PLAIN, TextRequestWriter)
            .with_reader(APPLICATION_JSON, JsonResponseReader)
            .with_reader(TEXT_PLAIN, TextResponseReader)
    }
}

impl fmt::Debug for ContentNegotiation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut writers: Vec<&String> = self.writers.keys().collect();
        let mut readers: Vec<&String> = self.readers.keys().collect();
        writers.sort();
        readers.sort();
        f.debug_struct("ContentNegotiation")
            .field("writers", &writers)
            .field("readers", &readers)
            .finish()
    }
}

fn lookup<T: ?Sized>(table: &HashMap<String, Arc<T>>, raw: &str) -> Option<Arc<T>> {
    let normalized = content_type::normalize(raw);
    if let Some(entry) = table.get(&normalized) {
        return Some(Arc::clone(entry));
    }
    if normalized.ends_with("+json") {
        return table.get(APPLICATION_JSON).cloned();
    }
    None
}
