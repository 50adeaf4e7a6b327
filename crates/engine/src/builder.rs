//! Turns a contract plus arguments into a ready-to-send [`Invocation`].

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use tether_types::{Invocation, MethodContract, MethodId, ParamBinding, WireKind, content_type};
use tether_util::{append_query, build_path, join_url, unresolved_placeholders};

use crate::args::{ArgValue, ParamsDigest};
use crate::config::DefaultParams;
use crate::error::{CodecDirection, RestError};
use crate::injection::InjectionRegistry;
use crate::negotiation::{ContentNegotiation, RequestPayload, RequestWriter};

/// Signs a request after it is built, under the call's lock.
pub trait RequestSigner: Send + Sync {
    fn sign(&self, request: &mut RequestDraft) -> anyhow::Result<()>;
}

impl<F> RequestSigner for F
where
    F: Fn(&mut RequestDraft) -> anyhow::Result<()> + Send + Sync,
{
    fn sign(&self, request: &mut RequestDraft) -> anyhow::Result<()> {
        self(request)
    }
}

/// Mutable view of a request under construction.
///
/// Digests read it, signers may change it. `path` is already resolved and
/// encoded; `body` is the serialized form of `form` and `body_value`.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDraft {
    pub method_id: MethodId,
    pub verb: tether_types::HttpVerb,
    pub base_url: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: IndexMap<String, String>,
    pub form: Vec<(String, String)>,
    pub body_value: Option<Value>,
    pub body: String,
    pub content_type: Option<String>,
}

impl RequestDraft {
    /// Absolute URL including the encoded query string.
    pub fn url(&self) -> String {
        append_query(&join_url(&self.base_url, &self.path), &self.query)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Insert or replace a header, matching existing names case-insensitively.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|key, _| !key.eq_ignore_ascii_case(&name));
        self.headers.insert(name, value.into());
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        find_pair(&self.query, name)
    }

    pub fn set_query(&mut self, name: impl Into<String>, value: impl Into<String>) {
        upsert_pair(&mut self.query, name.into(), value.into());
    }

    pub fn form_value(&self, name: &str) -> Option<&str> {
        find_pair(&self.form, name)
    }

    pub fn set_form(&mut self, name: impl Into<String>, value: impl Into<String>) {
        upsert_pair(&mut self.form, name.into(), value.into());
    }

    fn has(&self, kind: WireKind, name: &str, path_vars: &IndexMap<String, String>) -> bool {
        match kind {
            WireKind::Path => path_vars.contains_key(name),
            WireKind::Query => self.query_value(name).is_some(),
            WireKind::Header => self.header(name).is_some(),
            WireKind::Form => self.form_value(name).is_some(),
            WireKind::Body => self.body_value.is_some(),
        }
    }
}

fn find_pair<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
}

fn upsert_pair(pairs: &mut Vec<(String, String)>, name: String, value: String) {
    match pairs.iter_mut().find(|(key, _)| *key == name) {
        Some(existing) => existing.1 = value,
        None => pairs.push((name, value)),
    }
}

/// String form of a JSON value as written into a URL, header or form field.
pub(crate) fn wire_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

struct PendingDigest {
    index: usize,
    name: String,
    placements: Vec<(WireKind, String)>,
    digest: Arc<dyn ParamsDigest>,
}

/// Build-stage collaborators for one call.
pub(crate) struct RequestBuilder<'a> {
    pub contract: &'a MethodContract,
    pub injections: &'a InjectionRegistry,
    pub negotiation: &'a ContentNegotiation,
    pub defaults: &'a DefaultParams,
    pub signer: Option<&'a dyn RequestSigner>,
}

impl RequestBuilder<'_> {
    /// Build the invocation for `args` (explicit arguments followed by
    /// injected values).
    ///
    /// Order: place plain and synchronized values, fill configured defaults,
    /// serialize the body, evaluate digests over the result, check the path,
    /// and finally run the signer.
    pub(crate) fn build(&self, args: &[ArgValue]) -> Result<Invocation, RestError> {
        let contract = self.contract;
        let mut snapshots: Vec<Value> = args.iter().map(ArgValue::snapshot).collect();
        let mut path_vars = IndexMap::new();
        let mut draft = RequestDraft {
            method_id: contract.id.clone(),
            verb: contract.verb,
            base_url: contract.base_url.clone(),
            path: String::new(),
            query: Vec::new(),
            headers: IndexMap::new(),
            form: Vec::new(),
            body_value: None,
            body: String::new(),
            content_type: None,
        };

        let mut pending = Vec::new();
        let mut all_placements = Vec::new();
        for binding in &contract.params {
            let placements = self.placements(binding);
            all_placements.extend(placements.iter().map(|(kind, _)| *kind));
            match args.get(binding.source_index).unwrap_or(&ArgValue::Absent) {
                ArgValue::Absent => {}
                ArgValue::Value(value) => place_all(&mut draft, &mut path_vars, &placements, value),
                ArgValue::Synchronized(key) => {
                    if let Some(value) = key.create_value() {
                        place_all(&mut draft, &mut path_vars, &placements, &value);
                        if let Some(snapshot) = snapshots.get_mut(binding.source_index) {
                            *snapshot = value;
                        }
                    }
                }
                ArgValue::Digest(digest) => pending.push(PendingDigest {
                    index: binding.source_index,
                    name: binding.name.clone(),
                    placements,
                    digest: Arc::clone(digest),
                }),
            }
        }

        for (kind, params) in self.defaults {
            for (name, value) in params {
                if !draft.has(*kind, name, &path_vars) {
                    place(&mut draft, &mut path_vars, *kind, name, value);
                }
            }
        }

        draft.content_type = contract.consumes.clone().or_else(|| {
            if all_placements.contains(&WireKind::Form) {
                Some(content_type::FORM_URLENCODED.to_string())
            } else if all_placements.contains(&WireKind::Body) {
                Some(content_type::APPLICATION_JSON.to_string())
            } else {
                None
            }
        });
        let writer = match &draft.content_type {
            Some(content_type) => Some(self.negotiation.writer(content_type).ok_or_else(|| {
                RestError::UnsupportedContentType {
                    content_type: content_type.clone(),
                    direction: CodecDirection::Request,
                }
            })?),
            None => None,
        };

        self.render(&mut draft, &path_vars, writer.as_deref())?;
        for digest in pending {
            let value = digest
                .digest
                .digest(&draft)
                .map_err(|source| RestError::Digest {
                    name: digest.name.clone(),
                    source,
                })?;
            place_all(&mut draft, &mut path_vars, &digest.placements, &value);
            if let Some(snapshot) = snapshots.get_mut(digest.index) {
                *snapshot = value;
            }
            self.render(&mut draft, &path_vars, writer.as_deref())?;
        }

        if let Some(missing) = unresolved_placeholders(&draft.path).into_iter().next() {
            return Err(RestError::InvalidArgument {
                method: contract.id.clone(),
                reason: format!("no value for path parameter '{missing}'"),
            });
        }

        if let Some(signer) = self.signer {
            signer.sign(&mut draft).map_err(RestError::Signer)?;
        }

        Ok(Invocation {
            method_id: draft.method_id.clone(),
            verb: draft.verb,
            url: draft.url(),
            path: draft.path,
            query: draft.query,
            headers: draft.headers,
            body: draft.body,
            content_type: draft.content_type,
            arguments: snapshots,
        })
    }

    fn placements(&self, binding: &ParamBinding) -> Vec<(WireKind, String)> {
        match binding.kind.wire_kind() {
            Some(kind) => vec![(kind, binding.name.clone())],
            None => self
                .injections
                .marks_for(&binding.name)
                .iter()
                .map(|mark| {
                    let name = if mark.kind.is_named() { &mark.name } else { &binding.name };
                    (mark.kind, name.clone())
                })
                .collect(),
        }
    }

    fn render(
        &self,
        draft: &mut RequestDraft,
        path_vars: &IndexMap<String, String>,
        writer: Option<&dyn RequestWriter>,
    ) -> Result<(), RestError> {
        draft.path = build_path(&self.contract.path_template(), path_vars);
        if let Some(writer) = writer {
            draft.body = writer
                .write_body(RequestPayload {
                    form: &draft.form,
                    body: draft.body_value.as_ref(),
                })
                .map_err(|error| RestError::InvalidArgument {
                    method: self.contract.id.clone(),
                    reason: format!("cannot serialize request body: {error:#}"),
                })?;
        }
        Ok(())
    }
}

fn place_all(draft: &mut RequestDraft, path_vars: &mut IndexMap<String, String>, placements: &[(WireKind, String)], value: &Value) {
    for (kind, name) in placements {
        place(draft, path_vars, *kind, name, value);
    }
}

fn place(draft: &mut RequestDraft, path_vars: &mut IndexMap<String, String>, kind: WireKind, name: &str, value: &Value) {
    if value.is_null() {
        return;
    }
    match kind {
        WireKind::Path => {
            path_vars.insert(name.to_string(), wire_string(value));
        }
        WireKind::Query => draft.set_query(name, wire_string(value)),
        WireKind::Header => draft.set_header(name, wire_string(value)),
        WireKind::Form => draft.set_form(name, wire_string(value)),
        WireKind::Body => draft.body_value = Some(value.clone()),
    }
}
