//! Weft Weaver
//!
//! Rewrites code units as a host loads them, injecting advice calls, timer
//! start/stop pairs, mixin members, shim delegates and static-initializer
//! patches according to a [`RuleCatalog`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use weft_weaver::{CatalogHandle, MemoryLoader, RuleCatalog, TypeWorld, Weaver, WeaverConfig};
//!
//! let loader = MemoryLoader::new(1, None).into_handle();
//! let catalog = RuleCatalog::from_json(r#"{ "advice": [] }"#, &loader).unwrap();
//! let weaver = Weaver::new(
//!     Arc::new(CatalogHandle::new(catalog)),
//!     Arc::new(TypeWorld::new()),
//!     WeaverConfig::default(),
//! );
//! # let bytes = Vec::new();
//! let woven = weaver.transform(&bytes, "app/Service", None, &loader);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod catalog;
pub mod config;
pub mod error;
pub mod loader;
pub mod matcher;
pub mod pattern;
pub mod timer;
pub mod transform;
pub mod weaver;
pub mod world;

pub use catalog::{markers, CatalogDecl, CatalogHandle, RuleCatalog};
pub use config::WeaverConfig;
pub use error::{CatalogError, ConfigError, PatternError, WeaveError};
pub use loader::{DirLoader, Loader, LoaderId, MemoryLoader};
pub use matcher::{MatchPlan, Matcher};
pub use pattern::NamePattern;
pub use timer::{NopTimerService, WeavingStats, WeavingTimer, WeavingTimerService};
pub use weaver::{WeaveOutcome, Weaver};
pub use world::{AnalyzedType, Hierarchy, TypeWorld};
