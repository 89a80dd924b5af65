//! Shims: compatibility interfaces whose methods forward to differently
//! named members of the real target type

use super::load_unit;
use crate::error::CatalogError;
use crate::loader::Loader;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Declared form of a shim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShimDecl {
    /// Shim interface
    pub iface: String,

    /// Target type name(s): a string or a list of strings
    #[serde(default)]
    pub target: Value,

    /// Forwarding methods
    #[serde(default)]
    pub methods: Vec<ShimMethodDecl>,
}

/// Declared form of one forwarding method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShimMethodDecl {
    /// Method name on the shim interface
    pub name: String,

    /// Descriptor shared by the interface method and its target
    pub descriptor: String,

    /// Candidate target method name(s), tried in order
    #[serde(default)]
    pub target: Value,
}

/// A compiled shim method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShimMethod {
    /// Method name on the shim interface
    pub name: String,
    /// Descriptor
    pub descriptor: String,
    /// Candidate target method names, in preference order
    pub targets: Vec<String>,
}

/// A compiled shim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShimType {
    /// Shim interface
    pub iface: String,
    /// Target type names, in declaration order (never empty)
    pub targets: Vec<String>,
    /// Forwarding methods
    pub shim_methods: Vec<ShimMethod>,
}

/// Normalize a shim target value to a non-empty list of names
///
/// Accepts a list of strings or a single string. Anything else, including
/// `null` and an empty list, is rejected with a message naming the shape.
pub fn decode_shim_value(value: &Value) -> Result<Vec<String>, String> {
    let names = if let Ok(names) = serde_json::from_value::<Vec<String>>(value.clone()) {
        names
    } else if let Value::String(name) = value {
        vec![name.clone()]
    } else {
        let shape = match value {
            Value::Null => return Err("unexpected shim value: null".to_string()),
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Object(_) => "object",
            Value::Array(_) => "array with non-string elements",
            Value::String(_) => "string",
        };
        return Err(format!("unexpected shim value type: {}", shape));
    };

    if names.is_empty() {
        return Err("shim value lists no targets".to_string());
    }
    if names.iter().any(|n| n.is_empty()) {
        return Err("shim value contains an empty name".to_string());
    }
    Ok(names)
}

impl ShimType {
    /// Compile a declared shim, checking its methods against the interface unit
    pub fn build(decl: &ShimDecl, loader: &Arc<dyn Loader>, index: usize) -> Result<Self, CatalogError> {
        let context = format!("shim #{} ({})", index, decl.iface);
        let shim_error = |message: String| CatalogError::ShimValue {
            context: context.clone(),
            message,
        };
        let invalid = |message: String| CatalogError::Invalid {
            context: context.clone(),
            message,
        };

        let targets = decode_shim_value(&decl.target).map_err(shim_error)?;

        let iface = load_unit(loader, &decl.iface, &context)?;
        if !iface.is_interface() {
            return Err(invalid(format!("{} is not an interface", iface.name)));
        }
        if decl.methods.is_empty() {
            return Err(invalid("no shim methods".to_string()));
        }

        let mut shim_methods = Vec::with_capacity(decl.methods.len());
        for method in &decl.methods {
            if iface.find_method(&method.name, &method.descriptor).is_none() {
                return Err(invalid(format!(
                    "{} does not declare {}{}",
                    iface.name, method.name, method.descriptor
                )));
            }
            let candidates = decode_shim_value(&method.target).map_err(|message| CatalogError::ShimValue {
                context: format!("{} method {}", context, method.name),
                message,
            })?;
            shim_methods.push(ShimMethod {
                name: method.name.clone(),
                descriptor: method.descriptor.clone(),
                targets: candidates,
            });
        }

        Ok(Self {
            iface: decl.iface.clone(),
            targets,
            shim_methods,
        })
    }

    /// Whether the type is one of the shim's targets
    pub fn targets_type(&self, name: &str) -> bool {
        self.targets.iter().any(|t| t == name)
    }
}
