//! Registration-time API descriptions.
//!
//! An [`ApiDescriptor`] is the explicit replacement for annotation scanning:
//! it is either assembled in code with the builder methods below or parsed
//! from a YAML/JSON schema literal with [`parse_api_descriptor`]. The engine
//! derives one [`MethodContract`] per method from it.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::content_type;
use crate::{HttpVerb, InjectableBinding, MethodContract, MethodId, ParamBinding, ParamKind, WireKind};

/// One caller-supplied argument position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "in")]
    pub location: WireKind,
    #[serde(default)]
    pub name: String,
}

/// Declaration of a single API method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub id: MethodId,
    #[serde(default)]
    pub verb: HttpVerb,
    #[serde(default)]
    pub path: String,
    /// Argument positions in call order.
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    #[serde(default)]
    pub consumes: Option<String>,
    #[serde(default = "default_produces")]
    pub produces: String,
    /// Method-level injectables, added after the interface-level ones.
    #[serde(default)]
    pub injectables: Vec<InjectableBinding>,
}

fn default_produces() -> String {
    content_type::APPLICATION_JSON.to_string()
}

impl MethodDescriptor {
    pub fn new(id: impl Into<MethodId>, verb: HttpVerb, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            verb,
            path: path.into(),
            params: Vec::new(),
            consumes: None,
            produces: default_produces(),
            injectables: Vec::new(),
        }
    }

    pub fn get(id: impl Into<MethodId>, path: impl Into<String>) -> Self {
        Self::new(id, HttpVerb::Get, path)
    }

    pub fn post(id: impl Into<MethodId>, path: impl Into<String>) -> Self {
        Self::new(id, HttpVerb::Post, path)
    }

    pub fn with_param(mut self, location: WireKind, name: impl Into<String>) -> Self {
        self.params.push(ParamSpec {
            location,
            name: name.into(),
        });
        self
    }

    pub fn consumes(mut self, content_type: impl Into<String>) -> Self {
        self.consumes = Some(content_type.into());
        self
    }

    pub fn produces(mut self, content_type: impl Into<String>) -> Self {
        self.produces = content_type.into();
        self
    }

    pub fn with_injectable(mut self, binding: InjectableBinding) -> Self {
        self.injectables.push(binding);
        self
    }
}

/// Declaration of a whole API: shared path prefix, interface-level
/// injectables, and its methods.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApiDescriptor {
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub injectables: Vec<InjectableBinding>,
    #[serde(default)]
    pub methods: Vec<MethodDescriptor>,
}

impl ApiDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_injectable(mut self, binding: InjectableBinding) -> Self {
        self.injectables.push(binding);
        self
    }

    pub fn with_method(mut self, method: MethodDescriptor) -> Self {
        self.methods.push(method);
        self
    }

    pub fn method(&self, id: &MethodId) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|method| &method.id == id)
    }

    /// Interface-level injectables followed by the method's own.
    pub fn effective_injectables<'a>(&'a self, method: &'a MethodDescriptor) -> Vec<&'a InjectableBinding> {
        self.injectables.iter().chain(method.injectables.iter()).collect()
    }

    /// Every injectable declared anywhere in the API.
    pub fn all_injectables(&self) -> Vec<&InjectableBinding> {
        self.injectables
            .iter()
            .chain(self.methods.iter().flat_map(|method| method.injectables.iter()))
            .collect()
    }

    /// Derive the contract for `id` against `base_url`.
    ///
    /// # Returns
    /// `None` when the API declares no method with that identifier.
    pub fn contract_for(&self, base_url: &str, id: &MethodId) -> Option<MethodContract> {
        let method = self.method(id)?;
        let mut params: Vec<ParamBinding> = method
            .params
            .iter()
            .enumerate()
            .map(|(index, spec)| ParamBinding::new(ParamKind::from(spec.location), spec.name.clone(), index))
            .collect();
        let injectables: Vec<InjectableBinding> = self.effective_injectables(method).into_iter().cloned().collect();
        let explicit_arity = params.len();
        for (offset, binding) in injectables.iter().enumerate() {
            params.push(ParamBinding::new(ParamKind::Injected, binding.name.clone(), explicit_arity + offset));
        }

        Some(MethodContract {
            id: method.id.clone(),
            verb: method.verb,
            base_url: base_url.to_string(),
            interface_path: self.path.clone(),
            method_path: method.path.clone(),
            params,
            consumes: method.consumes.clone(),
            produces: method.produces.clone(),
            injectables,
        })
    }

    /// Check structural consistency of the description.
    ///
    /// Rules:
    /// - method identifiers are unique
    /// - every `{placeholder}` in a path has a matching path parameter, and
    ///   every explicit path parameter appears in the path
    /// - a method has at most one body parameter
    pub fn validate(&self) -> Result<(), DescriptorError> {
        let mut seen = HashSet::new();
        for method in &self.methods {
            if !seen.insert(method.id.as_str()) {
                return Err(DescriptorError::DuplicateMethod { id: method.id.to_string() });
            }

            let template = format!("{}/{}", self.path, method.path);
            let placeholders = placeholder_names(&template);
            let path_params: Vec<&str> = method
                .params
                .iter()
                .filter(|spec| spec.location == WireKind::Path)
                .map(|spec| spec.name.as_str())
                .collect();
            let injected_paths: Vec<&str> = self
                .effective_injectables(method)
                .into_iter()
                .filter(|binding| binding.marks.contains(&WireKind::Path))
                .map(|binding| binding.name.as_str())
                .collect();

            for placeholder in &placeholders {
                if !path_params.contains(placeholder) && !injected_paths.contains(placeholder) {
                    return Err(DescriptorError::UnboundPlaceholder {
                        method: method.id.to_string(),
                        placeholder: placeholder.to_string(),
                    });
                }
            }
            for name in &path_params {
                if !placeholders.contains(name) {
                    return Err(DescriptorError::UnusedPathParam {
                        method: method.id.to_string(),
                        name: name.to_string(),
                    });
                }
            }

            let body_count = method.params.iter().filter(|spec| spec.location == WireKind::Body).count();
            if body_count > 1 {
                return Err(DescriptorError::MultipleBodies {
                    method: method.id.to_string(),
                });
            }
        }
        Ok(())
    }
}

fn placeholder_names(template: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            break;
        };
        names.push(&after[..end]);
        rest = &after[end + 1..];
    }
    names
}

/// Parse an API description from YAML (or JSON, which YAML accepts).
///
/// # Errors
/// Returns [`DescriptorError::Parse`] for malformed documents and the
/// structural errors of [`ApiDescriptor::validate`].
///
/// # Example
/// ```rust
/// use tether_types::parse_api_descriptor;
///
/// let api = parse_api_descriptor(r#"
/// name: exchange
/// path: /api
/// injectables:
///   - name: Signature
///     type: digest
///     marks: [header]
/// methods:
///   - id: balance
///     verb: POST
///     path: /balance
///     consumes: application/x-www-form-urlencoded
///     params:
///       - { in: form, name: currency }
/// "#)?;
/// assert_eq!(api.methods.len(), 1);
/// # Ok::<(), tether_types::DescriptorError>(())
/// ```
pub fn parse_api_descriptor(text: &str) -> Result<ApiDescriptor, DescriptorError> {
    let descriptor: ApiDescriptor = serde_yaml::from_str(text)?;
    descriptor.validate()?;
    Ok(descriptor)
}

/// Errors raised while reading or checking an API description.
#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("failed to parse API description: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("method '{id}' is declared more than once")]
    DuplicateMethod { id: String },

    #[error("method '{method}' has path placeholder '{{{placeholder}}}' without a path parameter")]
    UnboundPlaceholder { method: String, placeholder: String },

    #[error("method '{method}' declares path parameter '{name}' that its path never uses")]
    UnusedPathParam { method: String, name: String },

    #[error("method '{method}' declares more than one body parameter")]
    MultipleBodies { method: String },
}
