//! Definitions: named, parameterized templates that produce values.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::value::{ArgumentList, ParameterList, Value};

/// Index of a definition inside its `Namespace`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct DefId(pub u32);

impl fmt::Display for DefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Who may see a definition's cached values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// Only frames still inside the owning definition.
    Local,
    Site,
    #[default]
    Public,
}

/// How long a computed value stays cached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    /// Recomputed on every instantiation.
    Dynamic,
    /// Cached in the frame that instantiated it.
    #[default]
    InContext,
    /// Cached site-wide.
    Global,
    /// Cached runtime-wide.
    Cosmic,
    /// Cached runtime-wide, never invalidated.
    Static,
}

impl Durability {
    pub fn is_global(self) -> bool {
        matches!(self, Durability::Global | Durability::Cosmic | Durability::Static)
    }
}

/// `keep x`, `keep x as y`, `keep x in c`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeepStatement {
    pub target: Arc<str>,
    #[serde(default)]
    pub alias: Option<Arc<str>>,
    #[serde(default)]
    pub container: Option<Arc<str>>,
}

impl KeepStatement {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.into(),
            alias: None,
            container: None,
        }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn in_container(mut self, container: &str) -> Self {
        self.container = Some(container.into());
        self
    }
}

/// A request to evaluate a (possibly dotted) name with arguments.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Instantiation {
    pub name: Arc<str>,
    pub arguments: ArgumentList,
}

impl Instantiation {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            arguments: ArgumentList::new(),
        }
    }

    pub fn with_arguments(name: &str, arguments: ArgumentList) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// First segment of a dotted name.
    pub fn head(&self) -> &str {
        first_segment(&self.name)
    }
}

pub fn first_segment(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

/// The closed set of definition shapes that dereference to another definition
/// before they can be pushed.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum DefinitionKind {
    #[default]
    Plain,
    /// Top-level namespace; frames for a site share the root frame's cache.
    Site,
    Collection { elements: Vec<Instantiation> },
    /// `alias = target(args)`.
    Alias { target: Instantiation },
    /// `collection[index]`.
    ElementRef { collection: Arc<str>, index: usize },
    Flavor { underlying: DefId },
    TypeWrapper { underlying: DefId },
    /// An element of a collection bound to an instantiation.
    CollectionElement { instantiation: Instantiation },
}

impl DefinitionKind {
    /// True when the kind must be dereferenced before pushing.
    pub fn is_indirect(&self) -> bool {
        !matches!(
            self,
            DefinitionKind::Plain | DefinitionKind::Site | DefinitionKind::Collection { .. }
        )
    }
}

/// What a definition evaluates to.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Body {
    #[default]
    Empty,
    Literal(Value),
    Ref(Instantiation),
    Concat(Vec<Body>),
    List(Vec<Body>),
    /// Evaluate `body` once per element of `over`, with the element bound to `item`.
    Each {
        item: Arc<str>,
        over: Box<Body>,
        body: Box<Body>,
    },
    /// The superdefinition's body, evaluated in the current frame.
    Super,
    /// Abandon the current output for another location.
    Redirect { status: u16, location: Arc<str>, message: Arc<str> },
}

#[derive(Clone, Debug)]
pub struct Definition {
    pub id: DefId,
    pub name: Arc<str>,
    pub full_name: Arc<str>,
    pub access: Access,
    pub durability: Durability,
    pub kind: DefinitionKind,
    pub owner: Option<DefId>,
    pub site: Option<DefId>,
    pub superdefinition: Option<DefId>,
    pub parameters: ParameterList,
    pub children: BTreeMap<Arc<str>, DefId>,
    pub keeps: Vec<KeepStatement>,
    pub body: Body,
}

impl Definition {
    pub fn is_site(&self) -> bool {
        matches!(self.kind, DefinitionKind::Site)
    }

    pub fn is_global(&self) -> bool {
        self.durability.is_global()
    }

    pub fn keeps(&self) -> &[KeepStatement] {
        &self.keeps
    }

    pub fn keep_for(&self, name: &str) -> Option<&KeepStatement> {
        self.keeps
            .iter()
            .find(|keep| &*keep.target == name || keep.alias.as_deref() == Some(name))
    }

    pub fn child(&self, name: &str) -> Option<DefId> {
        self.children.get(name).copied()
    }
}
