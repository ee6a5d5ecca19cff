//! Context stack and keep-directive caching for a template definition language.
//!
//! A [`Runtime`] owns an explicitly built [`Namespace`] and the durable keep
//! tables. Each request drives its own [`Context`]: a branchable stack of
//! frames that resolves names and memoizes computed values according to the
//! `keep` statements and durability of the definitions involved.

pub mod arena;
pub mod cache;
pub mod config;
pub mod context;
pub mod definition;
pub mod error;
pub mod eval;
pub mod metrics;
pub mod namespace;
pub mod runtime;
pub mod scope;
pub mod snapshot;
pub mod value;

pub use cache::{CacheEntry, ElementRef, Holder, Pointer, ResolvedInstance};
pub use config::EngineConfig;
pub use context::{ArgumentBinding, Context, Frame, Lookup, Marker, RootId};
pub use definition::{
    Access, Body, DefId, Definition, DefinitionKind, Durability, Instantiation, KeepStatement,
};
pub use error::{ConfigError, ContextError, Redirection, Severity};
pub use eval::{EvalError, Evaluator};
pub use metrics::{RuntimeStats, StatsSnapshot};
pub use namespace::{Canonical, Namespace, NamespaceBuilder};
pub use runtime::Runtime;
pub use snapshot::KeepSnapshot;
pub use value::{Argument, ArgumentList, ParameterList, Value};
