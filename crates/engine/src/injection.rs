//! Providers for out-of-band parameters and their construction-time validation.
//!
//! An API declares *injectables*: named values the caller never passes
//! explicitly, such as an API key header or a request signature. Each one is
//! satisfied by a [`Provider`] registered under the same name. The whole
//! provider set is checked against the API once, when the client is built,
//! so configuration mistakes never reach the network.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use tether_types::{ApiDescriptor, InjectableBinding, MethodContract, MethodId, ValueType, WireKind, WireMark};
use tracing::{debug, warn};

use crate::args::ArgValue;
use crate::error::ValidationError;

/// Supplier of one injected value.
///
/// `get` is called afresh on every invocation that needs the value.
pub trait Provider: Send + Sync {
    /// Type of the values this provider supplies.
    fn value_type(&self) -> ValueType;

    /// Where the supplied value goes on the wire.
    fn marks(&self) -> &[WireMark];

    fn get(&self) -> ArgValue;
}

/// [`Provider`] built from a closure plus declared type and marks.
pub struct FnProvider<F> {
    value_type: ValueType,
    marks: Vec<WireMark>,
    supplier: F,
}

impl<F> FnProvider<F>
where
    F: Fn() -> ArgValue + Send + Sync,
{
    pub fn new(value_type: ValueType, marks: impl IntoIterator<Item = WireMark>, supplier: F) -> Self {
        Self {
            value_type,
            marks: marks.into_iter().collect(),
            supplier,
        }
    }

    /// A string-typed provider written to the header `name`.
    pub fn header(name: impl Into<String>, supplier: F) -> Self {
        Self::new(ValueType::String, [WireMark::header(name)], supplier)
    }
}

impl<F> Provider for FnProvider<F>
where
    F: Fn() -> ArgValue + Send + Sync,
{
    fn value_type(&self) -> ValueType {
        self.value_type
    }

    fn marks(&self) -> &[WireMark] {
        &self.marks
    }

    fn get(&self) -> ArgValue {
        (self.supplier)()
    }
}

/// Providers supplied by the caller, keyed by injectable name.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: IndexMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, provider: impl Provider + 'static) -> Self {
        self.register(name, Arc::new(provider));
        self
    }

    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Provider>> {
        self.providers.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Validated providers plus a per-method cache of injectable names.
pub struct InjectionRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
    names_by_method: RwLock<HashMap<MethodId, Arc<[String]>>>,
    type_mismatches: AtomicU64,
}

impl InjectionRegistry {
    /// Validate `providers` against every injectable declared in `api`.
    ///
    /// Checks, in order:
    /// 1. every provider name matches some declared injectable
    /// 2. no method declares the same injectable name twice
    /// 3. every injectable has a provider
    /// 4. each provider's type and wire marks fit its injectable
    ///
    /// # Errors
    /// The first violation found, as a [`ValidationError`].
    pub fn new(providers: ProviderRegistry, api: &ApiDescriptor) -> Result<Self, ValidationError> {
        let declared: HashSet<&str> = api.all_injectables().into_iter().map(|binding| binding.name.as_str()).collect();
        if let Some(unknown) = providers.names().find(|name| !declared.contains(name)) {
            return Err(ValidationError::UnknownProvider {
                name: unknown.to_string(),
                api: api.name.clone(),
            });
        }

        for method in &api.methods {
            let effective = api.effective_injectables(method);
            let mut seen = HashSet::new();
            for binding in &effective {
                if !seen.insert(binding.name.as_str()) {
                    return Err(ValidationError::DuplicateBinding {
                        api: api.name.clone(),
                        method: method.id.clone(),
                        name: binding.name.clone(),
                    });
                }
            }
            for binding in effective {
                let provider = providers.get(&binding.name).ok_or_else(|| ValidationError::MissingProvider {
                    api: api.name.clone(),
                    method: method.id.clone(),
                    name: binding.name.clone(),
                })?;
                check_provider(binding, provider.as_ref())?;
            }
        }

        debug!(api = %api.name, provider_count = providers.len(), "injection providers validated");
        Ok(Self {
            providers: providers.providers.into_iter().collect(),
            names_by_method: RwLock::new(HashMap::new()),
            type_mismatches: AtomicU64::new(0),
        })
    }

    /// Fresh values for the contract's injectables, in declaration order.
    ///
    /// Names without a provider yield [`ArgValue::Absent`]; construction-time
    /// validation makes that unreachable for contracts of the validated API.
    /// A value whose runtime type contradicts its provider's declaration is
    /// still used, but logged and counted in
    /// [`type_mismatches`](Self::type_mismatches).
    pub fn injected_args(&self, contract: &MethodContract) -> Vec<ArgValue> {
        self.names_for(contract)
            .iter()
            .map(|name| match self.providers.get(name) {
                Some(provider) => {
                    let value = provider.get();
                    let declared = provider.value_type();
                    let supplied = value.value_type();
                    if supplied != ValueType::Any && !declared.accepts(supplied) {
                        self.type_mismatches.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            method = %contract.id,
                            provider = %name,
                            declared = %declared,
                            supplied = %supplied,
                            "provider supplied a value of an undeclared type"
                        );
                    }
                    value
                }
                None => ArgValue::Absent,
            })
            .collect()
    }

    /// Injected values seen so far whose type contradicted their provider.
    pub fn type_mismatches(&self) -> u64 {
        self.type_mismatches.load(Ordering::Relaxed)
    }

    /// Placement marks of the provider registered under `name`.
    pub fn marks_for(&self, name: &str) -> &[WireMark] {
        self.providers.get(name).map(|provider| provider.marks()).unwrap_or_default()
    }

    fn names_for(&self, contract: &MethodContract) -> Arc<[String]> {
        if let Some(names) = self.names_by_method.read().expect("injection name cache lock").get(&contract.id) {
            return Arc::clone(names);
        }
        let names: Arc<[String]> = contract.injectable_names().into();
        self.names_by_method
            .write()
            .expect("injection name cache lock")
            .entry(contract.id.clone())
            .or_insert(names)
            .clone()
    }
}

impl fmt::Debug for InjectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectionRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn check_provider(binding: &InjectableBinding, provider: &dyn Provider) -> Result<(), ValidationError> {
    let supplied = provider.value_type();
    if !binding.expected_type.accepts(supplied) && supplied != ValueType::Any {
        return Err(ValidationError::TypeMismatch {
            name: binding.name.clone(),
            expected: binding.expected_type,
            supplied,
        });
    }

    let marks = provider.marks();
    for required in &binding.marks {
        let Some(mark) = marks.iter().find(|mark| mark.kind == *required) else {
            return Err(ValidationError::MissingWireMark {
                name: binding.name.clone(),
                expected: *required,
                found: describe_marks(marks),
            });
        };
        if required.is_named() && mark.name != binding.name {
            return Err(ValidationError::WireMarkNameMismatch {
                name: binding.name.clone(),
                kind: *required,
                found: mark.name.clone(),
            });
        }
    }

    if marks.len() > binding.marks.len() {
        return Err(ValidationError::UnexpectedWireMarks {
            name: binding.name.clone(),
            expected: describe_kinds(&binding.marks),
            found: describe_marks(marks),
        });
    }
    Ok(())
}

fn describe_marks(marks: &[WireMark]) -> String {
    marks.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

fn describe_kinds(kinds: &BTreeSet<WireKind>) -> String {
    kinds.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tether_types::MethodDescriptor;

    fn signed_api() -> ApiDescriptor {
        ApiDescriptor::new("Exchange")
            .with_injectable(InjectableBinding::new("Signature", ValueType::String, [WireKind::Header]))
            .with_method(MethodDescriptor::get("balance", "/balance"))
            .with_method(
                MethodDescriptor::post("order", "/order")
                    .with_injectable(InjectableBinding::new("nonce", ValueType::Integer, [WireKind::Form])),
            )
    }

    fn signature_provider() -> FnProvider<impl Fn() -> ArgValue + Send + Sync> {
        FnProvider::header("Signature", || ArgValue::from("sig"))
    }

    fn nonce_provider() -> FnProvider<impl Fn() -> ArgValue + Send + Sync> {
        FnProvider::new(ValueType::Integer, [WireMark::form("nonce")], || ArgValue::from(1_u64))
    }

    fn validate(providers: ProviderRegistry) -> Result<InjectionRegistry, ValidationError> {
        InjectionRegistry::new(providers, &signed_api())
    }

    #[test]
    fn complete_provider_set_validates() {
        let registry = validate(
            ProviderRegistry::new()
                .with("Signature", signature_provider())
                .with("nonce", nonce_provider()),
        )
        .unwrap();
        assert_eq!(registry.marks_for("Signature"), &[WireMark::header("Signature")]);
        assert!(registry.marks_for("unknown").is_empty());
    }

    #[test]
    fn undeclared_runtime_types_are_counted() {
        let registry = validate(
            ProviderRegistry::new()
                .with("Signature", FnProvider::header("Signature", || ArgValue::from(42_u64)))
                .with("nonce", nonce_provider()),
        )
        .unwrap();
        let contract = signed_api().contract_for("http://h", &MethodId::new("order")).unwrap();

        let values = registry.injected_args(&contract);
        assert_eq!(values.len(), 2);
        assert_eq!(registry.type_mismatches(), 1);

        registry.injected_args(&contract);
        assert_eq!(registry.type_mismatches(), 2);
    }

    #[test]
    fn missing_provider_fails() {
        let error = validate(ProviderRegistry::new().with("Signature", signature_provider())).unwrap_err();
        assert!(matches!(error, ValidationError::MissingProvider { ref name, .. } if name == "nonce"));
    }

    #[test]
    fn unknown_provider_fails_first() {
        let error = validate(ProviderRegistry::new().with("Bogus", signature_provider())).unwrap_err();
        assert!(matches!(error, ValidationError::UnknownProvider { ref name, .. } if name == "Bogus"));
    }

    #[test]
    fn duplicate_binding_on_one_method_fails() {
        let api = signed_api().with_method(
            MethodDescriptor::get("dup", "/dup")
                .with_injectable(InjectableBinding::new("Signature", ValueType::String, [WireKind::Header])),
        );
        let error = InjectionRegistry::new(ProviderRegistry::new().with("Signature", signature_provider()), &api).unwrap_err();
        assert!(matches!(error, ValidationError::DuplicateBinding { ref method, .. } if method.as_str() == "dup"));
    }

    #[test]
    fn incompatible_type_fails() {
        let providers = ProviderRegistry::new()
            .with("Signature", FnProvider::new(ValueType::Boolean, [WireMark::header("Signature")], || ArgValue::from(true)))
            .with("nonce", nonce_provider());
        let error = validate(providers).unwrap_err();
        assert!(matches!(
            error,
            ValidationError::TypeMismatch {
                expected: ValueType::String,
                supplied: ValueType::Boolean,
                ..
            }
        ));
    }

    #[test]
    fn any_typed_binding_accepts_every_provider() {
        let api = ApiDescriptor::new("Loose")
            .with_injectable(InjectableBinding::new("X-Trace", ValueType::Any, [WireKind::Header]))
            .with_method(MethodDescriptor::get("ping", "/ping"));
        let providers = ProviderRegistry::new().with(
            "X-Trace",
            FnProvider::new(ValueType::Object, [WireMark::header("X-Trace")], || ArgValue::Absent),
        );
        assert!(InjectionRegistry::new(providers, &api).is_ok());
    }

    #[test]
    fn wire_mark_mismatches_fail() {
        let missing = ProviderRegistry::new()
            .with("Signature", FnProvider::new(ValueType::String, [WireMark::query("Signature")], || ArgValue::Absent))
            .with("nonce", nonce_provider());
        assert!(matches!(validate(missing).unwrap_err(), ValidationError::MissingWireMark { expected: WireKind::Header, .. }));

        let extra = ProviderRegistry::new()
            .with(
                "Signature",
                FnProvider::new(
                    ValueType::String,
                    [WireMark::header("Signature"), WireMark::query("Signature")],
                    || ArgValue::Absent,
                ),
            )
            .with("nonce", nonce_provider());
        assert!(matches!(validate(extra).unwrap_err(), ValidationError::UnexpectedWireMarks { .. }));

        let misnamed = ProviderRegistry::new()
            .with("Signature", FnProvider::header("X-Signature", || ArgValue::Absent))
            .with("nonce", nonce_provider());
        let error = validate(misnamed).unwrap_err();
        assert!(matches!(error, ValidationError::WireMarkNameMismatch { ref found, .. } if found == "X-Signature"));
        assert!(error.to_string().contains("expected=Signature, found=X-Signature"));
    }

    #[test]
    fn providers_are_called_fresh_for_every_invocation() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let registry = validate(
            ProviderRegistry::new()
                .with(
                    "Signature",
                    FnProvider::header("Signature", || {
                        let call = CALLS.fetch_add(1, Ordering::SeqCst);
                        ArgValue::from(format!("sig-{call}"))
                    }),
                )
                .with("nonce", nonce_provider()),
        )
        .unwrap();
        let contract = signed_api().contract_for("http://h", &MethodId::new("order")).unwrap();

        let first = registry.injected_args(&contract);
        let second = registry.injected_args(&contract);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].snapshot(), serde_json::json!("sig-0"));
        assert_eq!(second[0].snapshot(), serde_json::json!("sig-1"));
        assert_eq!(CALLS.load(Ordering::SeqCst), 2);
    }
}
