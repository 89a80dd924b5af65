//! Advice: a pointcut paired with the calls injected around matched methods

use super::{load_unit, markers};
use crate::error::CatalogError;
use crate::loader::Loader;
use crate::pattern::NamePattern;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use weft_bytecode::{access, MemberRef};

/// Declared form of a pointcut
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PointcutDecl {
    /// Pattern over the declaring type name
    pub class_name: String,

    /// Pattern over the method name
    pub method_name: String,

    /// Pattern over the method descriptor (any when omitted)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_descriptor: Option<String>,

    /// Marker the declaring type must carry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_marker: Option<String>,

    /// Marker the method must carry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_marker: Option<String>,

    /// Type the woven type must be or descend from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub super_type_restriction: Option<String>,

    /// Timer label
    #[serde(default)]
    pub timer: String,

    /// Deprecated timer label, used when `timer` is empty
    #[serde(default)]
    pub timer_name: String,
}

/// Declared form of an advice entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdviceDecl {
    /// Type declaring the advice methods
    pub advice: String,

    /// Match predicate
    pub pointcut: PointcutDecl,
}

/// Compiled match predicate
#[derive(Debug, Clone)]
pub struct Pointcut {
    /// Pattern over the declaring type name
    pub class_name: NamePattern,
    /// Pattern over the method name
    pub method_name: NamePattern,
    /// Pattern over the method descriptor
    pub method_descriptor: NamePattern,
    /// Marker the declaring type must carry
    pub class_marker: Option<String>,
    /// Marker the method must carry
    pub method_marker: Option<String>,
    /// Type the woven type must be or descend from
    pub super_type_restriction: Option<String>,
    /// Timer label
    pub timer: String,
    /// Deprecated timer label
    pub timer_name: String,
}

impl Pointcut {
    /// Compile a declared pointcut
    pub fn compile(decl: &PointcutDecl, context: &str) -> Result<Self, CatalogError> {
        let pattern = |text: &str, field: &str| {
            NamePattern::parse(text).map_err(|source| CatalogError::Pattern {
                context: format!("{} {}", context, field),
                source,
            })
        };

        Ok(Self {
            class_name: pattern(&decl.class_name, "class_name")?,
            method_name: pattern(&decl.method_name, "method_name")?,
            method_descriptor: match &decl.method_descriptor {
                Some(descriptor) => pattern(descriptor, "method_descriptor")?,
                None => NamePattern::any(),
            },
            class_marker: decl.class_marker.clone(),
            method_marker: decl.method_marker.clone(),
            super_type_restriction: decl.super_type_restriction.clone(),
            timer: decl.timer.clone(),
            timer_name: decl.timer_name.clone(),
        })
    }

    /// Resolved timer label
    ///
    /// `timer` wins when non-empty, otherwise the deprecated `timer_name`
    /// applies (which may itself be empty, meaning untimed).
    pub fn timer_label(&self) -> &str {
        if self.timer.is_empty() {
            &self.timer_name
        } else {
            &self.timer
        }
    }
}

/// A compiled advice entry
#[derive(Debug, Clone)]
pub struct Advice {
    /// Type declaring the advice methods
    pub advice_type: String,
    /// Match predicate
    pub pointcut: Pointcut,
    /// Called on entry
    pub on_before: Option<MemberRef>,
    /// Called before each normal return
    pub on_return: Option<MemberRef>,
    /// Called when the body throws
    pub on_throw: Option<MemberRef>,
    /// Called on every exit, after `on_return`/`on_throw`
    pub on_after: Option<MemberRef>,
}

impl Advice {
    /// Compile a declared advice entry, reading advice methods from its unit
    pub fn build(decl: &AdviceDecl, loader: &Arc<dyn Loader>, index: usize) -> Result<Self, CatalogError> {
        let context = format!("advice #{} ({})", index, decl.advice);
        let pointcut = Pointcut::compile(&decl.pointcut, &context)?;
        let unit = load_unit(loader, &decl.advice, &context)?;

        let mut advice = Self {
            advice_type: decl.advice.clone(),
            pointcut,
            on_before: None,
            on_return: None,
            on_throw: None,
            on_after: None,
        };

        for method in &unit.methods {
            let slots = [
                (markers::ON_BEFORE, &mut advice.on_before),
                (markers::ON_RETURN, &mut advice.on_return),
                (markers::ON_THROW, &mut advice.on_throw),
                (markers::ON_AFTER, &mut advice.on_after),
            ];
            for (marker, slot) in slots {
                if !method.has_marker(marker) {
                    continue;
                }
                let invalid = |message: String| CatalogError::Invalid {
                    context: context.clone(),
                    message,
                };
                if slot.is_some() {
                    return Err(invalid(format!("more than one {} method", marker)));
                }
                if method.access & access::STATIC == 0 || method.descriptor != "()V" {
                    return Err(invalid(format!(
                        "{} method {}{} must be static ()V",
                        marker, method.name, method.descriptor
                    )));
                }
                *slot = Some(MemberRef::new(&unit.name, &method.name, &method.descriptor));
            }
        }

        Ok(advice)
    }

    /// Whether matched methods get a timer
    pub fn is_timed(&self) -> bool {
        !self.pointcut.timer_label().is_empty()
    }

    /// Whether anything runs when the body throws
    pub fn handles_throw(&self) -> bool {
        self.is_timed() || self.on_throw.is_some() || self.on_after.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pointcut(timer: &str, timer_name: &str) -> Pointcut {
        let decl = PointcutDecl {
            class_name: "a/T".to_string(),
            method_name: "m".to_string(),
            timer: timer.to_string(),
            timer_name: timer_name.to_string(),
            ..Default::default()
        };
        Pointcut::compile(&decl, "test").unwrap()
    }

    #[test]
    fn test_timer_label_precedence() {
        assert_eq!(pointcut("explicit", "legacy").timer_label(), "explicit");
        assert_eq!(pointcut("", "legacyM").timer_label(), "legacyM");
        assert_eq!(pointcut("", "").timer_label(), "");
    }

    #[test]
    fn test_descriptor_defaults_to_any() {
        let pointcut = pointcut("", "");
        assert!(pointcut.method_descriptor.matches("(ILa/B;)V"));
    }

    #[test]
    fn test_bad_pattern_names_field() {
        let decl = PointcutDecl {
            class_name: "/(/".to_string(),
            method_name: "m".to_string(),
            ..Default::default()
        };
        let err = Pointcut::compile(&decl, "advice #0").unwrap_err();
        assert!(err.to_string().contains("class_name"));
    }
}
