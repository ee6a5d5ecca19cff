//! Explicitly owned tree of definitions.
//!
//! Definitions live in a flat arena addressed by `DefId`; owner, site and
//! superdefinition links are indices, so the tree has no reference cycles.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::definition::{
    Access, Body, DefId, Definition, DefinitionKind, Durability, KeepStatement, first_segment,
};
use crate::error::ContextError;
use crate::value::{ArgumentList, ParameterList, pad_arguments};

#[cfg(feature = "cli")]
mod spec;
#[cfg(feature = "cli")]
pub use spec::{ArgumentSpec, BodySpec, DefinitionSpec, InstantiationSpec, NamespaceSpec, SpecError};

#[derive(Debug, Default)]
pub struct Namespace {
    definitions: Vec<Definition>,
    roots: BTreeMap<Arc<str>, DefId>,
}

/// A definition resolved to something pushable, with its arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Canonical {
    pub definition: DefId,
    pub arguments: ArgumentList,
}

impl Namespace {
    pub fn builder() -> NamespaceBuilder {
        NamespaceBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn get(&self, id: DefId) -> Option<&Definition> {
        self.definitions.get(id.0 as usize)
    }

    /// Definition for an id minted by this namespace.
    ///
    /// # Panics
    /// On an id from another namespace.
    pub fn definition(&self, id: DefId) -> &Definition {
        &self.definitions[id.0 as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Definition> {
        self.definitions.iter()
    }

    pub fn roots(&self) -> impl Iterator<Item = DefId> + '_ {
        self.roots.values().copied()
    }

    /// Resolve a fully-qualified dotted name from the top level.
    pub fn lookup(&self, name: &str) -> Option<DefId> {
        let mut segments = name.split('.');
        let head = segments.next()?;
        let mut current = *self.roots.get(head)?;
        for segment in segments {
            current = self.child_definition(current, segment)?;
        }
        Some(current)
    }

    /// Resolve a dotted name as seen from inside `scope`: the head segment is
    /// searched through the owner chain, then the top level.
    pub fn lookup_from(&self, scope: Option<DefId>, name: &str) -> Option<DefId> {
        let head = first_segment(name);
        let mut start = None;
        let mut owner = scope;
        while let Some(id) = owner {
            if let Some(child) = self.child_definition(id, head) {
                start = Some(child);
                break;
            }
            if &*self.definition(id).name == head {
                start = Some(id);
                break;
            }
            owner = self.definition(id).owner;
        }
        let mut current = match start {
            Some(found) => found,
            None => *self.roots.get(head)?,
        };
        for segment in name.split('.').skip(1) {
            current = self.child_definition(current, segment)?;
        }
        Some(current)
    }

    /// Child named `name`, declared directly or inherited.
    pub fn child_definition(&self, def: DefId, name: &str) -> Option<DefId> {
        let mut current = Some(def);
        let mut remaining = self.definitions.len();
        while let Some(id) = current {
            let definition = self.definition(id);
            if let Some(child) = definition.child(name) {
                return Some(child);
            }
            if remaining == 0 {
                break;
            }
            remaining -= 1;
            current = definition.superdefinition;
        }
        None
    }

    pub fn has_child_definition(&self, def: DefId, name: &str, local_allowed: bool) -> bool {
        self.child_definition(def, name)
            .is_some_and(|child| local_allowed || self.definition(child).access != Access::Local)
    }

    /// `def == other` or `def` extends `other` through its superdefinition chain.
    pub fn equals_or_extends(&self, def: DefId, other: DefId) -> bool {
        let mut current = Some(def);
        let mut remaining = self.definitions.len();
        while let Some(id) = current {
            if id == other {
                return true;
            }
            if remaining == 0 {
                break;
            }
            remaining -= 1;
            current = self.definition(id).superdefinition;
        }
        false
    }

    /// `def == ancestor` or `def` is nested (through owners) inside `ancestor`.
    pub fn is_within(&self, def: DefId, ancestor: DefId) -> bool {
        let mut current = Some(def);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.definition(id).owner;
        }
        false
    }

    pub fn keeps(&self, def: DefId) -> &[KeepStatement] {
        self.definition(def).keeps()
    }

    /// Dereference aliases, element references, flavors, type wrappers and
    /// collection elements down to a definition that can be pushed.
    ///
    /// `scope` is the definition on top of the current context; names are
    /// resolved from there when the indirect definition has no owner.
    /// Returns `Ok(None)` when a link resolves to nothing.
    pub fn resolve_canonical(
        &self,
        def: DefId,
        arguments: ArgumentList,
        scope: Option<DefId>,
        max_hops: usize,
    ) -> Result<Option<Canonical>, ContextError> {
        let mut current = def;
        let mut arguments = arguments;
        for _ in 0..=max_hops {
            let definition = self.definition(current);
            let next = match &definition.kind {
                DefinitionKind::Plain | DefinitionKind::Site | DefinitionKind::Collection { .. } => {
                    let arguments = pad_arguments(arguments, &definition.parameters);
                    return Ok(Some(Canonical {
                        definition: current,
                        arguments,
                    }));
                }
                DefinitionKind::Alias { target } => {
                    let from = definition.owner.or(scope);
                    if !target.arguments.is_empty() {
                        arguments = target.arguments.clone();
                    }
                    self.lookup_from(from, &target.name)
                }
                DefinitionKind::ElementRef { collection, index } => {
                    let from = definition.owner.or(scope);
                    match self.element_instantiation(from, collection, *index) {
                        Some((owner, element)) => {
                            arguments = element.arguments.clone();
                            self.lookup_from(owner, &element.name)
                        }
                        None => None,
                    }
                }
                DefinitionKind::Flavor { underlying } | DefinitionKind::TypeWrapper { underlying } => {
                    Some(*underlying)
                }
                DefinitionKind::CollectionElement { instantiation } => {
                    let from = definition.owner.or(scope);
                    arguments = instantiation.arguments.clone();
                    self.lookup_from(from, &instantiation.name)
                }
            };
            match next {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Err(ContextError::DereferenceLoop {
            name: self.definition(def).full_name.to_string(),
            limit: max_hops,
        })
    }

    fn element_instantiation(
        &self,
        scope: Option<DefId>,
        collection: &str,
        index: usize,
    ) -> Option<(Option<DefId>, &crate::definition::Instantiation)> {
        let collection = self.lookup_from(scope, collection)?;
        let definition = self.definition(collection);
        match &definition.kind {
            DefinitionKind::Collection { elements } => {
                elements.get(index).map(|element| (definition.owner, element))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct NamespaceBuilder {
    definitions: Vec<Definition>,
    roots: BTreeMap<Arc<str>, DefId>,
}

impl NamespaceBuilder {
    /// Add a top-level site.
    pub fn site(&mut self, name: &str) -> DefId {
        self.define(None, name).kind(DefinitionKind::Site).id()
    }

    /// Add a definition owned by `owner` (top level when `None`).
    pub fn define(&mut self, owner: Option<DefId>, name: &str) -> DefinitionBuilder<'_> {
        let id = DefId(self.definitions.len() as u32);
        let name: Arc<str> = name.into();
        let (full_name, site) = match owner {
            Some(owner_id) => {
                let owner_def = &mut self.definitions[owner_id.0 as usize];
                owner_def.children.insert(name.clone(), id);
                let site = if owner_def.is_site() { Some(owner_id) } else { owner_def.site };
                let full_name: Arc<str> = format!("{}.{}", owner_def.full_name, name).into();
                (full_name, site)
            }
            None => {
                self.roots.insert(name.clone(), id);
                (name.clone(), None)
            }
        };
        self.definitions.push(Definition {
            id,
            name,
            full_name,
            access: Access::default(),
            durability: Durability::default(),
            kind: DefinitionKind::Plain,
            owner,
            site,
            superdefinition: None,
            parameters: ParameterList::new(),
            children: BTreeMap::new(),
            keeps: Vec::new(),
            body: Body::Empty,
        });
        DefinitionBuilder { builder: self, id }
    }

    /// Reopen an already added definition.
    pub fn edit(&mut self, id: DefId) -> DefinitionBuilder<'_> {
        DefinitionBuilder { builder: self, id }
    }

    pub fn build(self) -> Namespace {
        Namespace {
            definitions: self.definitions,
            roots: self.roots,
        }
    }
}

pub struct DefinitionBuilder<'a> {
    builder: &'a mut NamespaceBuilder,
    id: DefId,
}

impl DefinitionBuilder<'_> {
    fn definition_mut(&mut self) -> &mut Definition {
        &mut self.builder.definitions[self.id.0 as usize]
    }

    pub fn access(mut self, access: Access) -> Self {
        self.definition_mut().access = access;
        self
    }

    pub fn durability(mut self, durability: Durability) -> Self {
        self.definition_mut().durability = durability;
        self
    }

    pub fn kind(mut self, kind: DefinitionKind) -> Self {
        let is_site = matches!(kind, DefinitionKind::Site);
        let id = self.id;
        let definition = self.definition_mut();
        definition.kind = kind;
        if is_site {
            definition.site = Some(id);
        }
        self
    }

    pub fn extends(mut self, superdefinition: DefId) -> Self {
        self.definition_mut().superdefinition = Some(superdefinition);
        self
    }

    pub fn parameters(mut self, parameters: &[&str]) -> Self {
        self.definition_mut().parameters = parameters.iter().map(|name| Arc::from(*name)).collect();
        self
    }

    pub fn keep(mut self, keep: KeepStatement) -> Self {
        self.definition_mut().keeps.push(keep);
        self
    }

    pub fn body(mut self, body: Body) -> Self {
        self.definition_mut().body = body;
        self
    }

    pub fn id(self) -> DefId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::Instantiation;
    use crate::value::{Argument, Value};
    use smallvec::smallvec;

    fn sample() -> (Namespace, DefId, DefId, DefId) {
        let mut builder = Namespace::builder();
        let site = builder.site("shop");
        let page = builder.define(Some(site), "page").id();
        let title = builder.define(Some(page), "title").access(Access::Local).id();
        builder.define(Some(page), "footer");
        (builder.build(), site, page, title)
    }

    #[test]
    fn full_names_and_sites() {
        let (namespace, site, page, title) = sample();
        assert_eq!(&*namespace.definition(title).full_name, "shop.page.title");
        assert_eq!(namespace.definition(title).site, Some(site));
        assert_eq!(namespace.definition(page).site, Some(site));
        assert_eq!(namespace.definition(site).site, Some(site));
        assert_eq!(namespace.lookup("shop.page.title"), Some(title));
    }

    #[test]
    fn lookup_walks_owner_chain() {
        let (namespace, _, page, title) = sample();
        let footer = namespace.lookup("shop.page.footer").unwrap();
        assert_eq!(namespace.lookup_from(Some(footer), "title"), Some(title));
        assert_eq!(namespace.lookup_from(Some(footer), "page.title"), Some(title));
        assert_eq!(namespace.lookup_from(Some(page), "missing"), None);
    }

    #[test]
    fn local_children_hidden_without_permission() {
        let (namespace, _, page, _) = sample();
        assert!(namespace.has_child_definition(page, "title", true));
        assert!(!namespace.has_child_definition(page, "title", false));
        assert!(namespace.has_child_definition(page, "footer", false));
    }

    #[test]
    fn inherited_children_and_extension() {
        let mut builder = Namespace::builder();
        let base = builder.define(None, "base").id();
        let inherited = builder.define(Some(base), "header").id();
        let derived = builder.define(None, "derived").extends(base).id();
        let namespace = builder.build();

        assert_eq!(namespace.child_definition(derived, "header"), Some(inherited));
        assert!(namespace.equals_or_extends(derived, base));
        assert!(!namespace.equals_or_extends(base, derived));
        assert!(namespace.is_within(inherited, base));
        assert!(!namespace.is_within(inherited, derived));
    }

    #[test]
    fn canonical_resolution_unwraps_every_kind() {
        let mut builder = Namespace::builder();
        let site = builder.site("s");
        let target = builder.define(Some(site), "target").parameters(&["a", "b"]).id();
        let flavor = builder
            .define(Some(site), "flavored")
            .kind(DefinitionKind::Flavor { underlying: target })
            .id();
        let alias = builder
            .define(Some(site), "alias")
            .kind(DefinitionKind::Alias {
                target: Instantiation::with_arguments(
                    "flavored",
                    smallvec![Argument::Value(Value::Int(7))],
                ),
            })
            .id();
        builder.define(Some(site), "items").kind(DefinitionKind::Collection {
            elements: vec![Instantiation::new("alias"), Instantiation::new("target")],
        });
        let element = builder
            .define(Some(site), "second")
            .kind(DefinitionKind::ElementRef { collection: "items".into(), index: 1 })
            .id();
        let namespace = builder.build();

        let canonical = namespace
            .resolve_canonical(alias, ArgumentList::new(), None, 10)
            .unwrap()
            .unwrap();
        assert_eq!(canonical.definition, target);
        assert_eq!(canonical.arguments.len(), 2);
        assert_eq!(canonical.arguments[0], Argument::Value(Value::Int(7)));
        assert!(canonical.arguments[1].is_missing());

        let canonical = namespace
            .resolve_canonical(flavor, ArgumentList::new(), None, 10)
            .unwrap()
            .unwrap();
        assert_eq!(canonical.definition, target);

        let canonical = namespace
            .resolve_canonical(element, ArgumentList::new(), None, 10)
            .unwrap()
            .unwrap();
        assert_eq!(canonical.definition, target);
    }

    #[test]
    fn alias_cycle_is_a_dereference_loop() {
        let mut builder = Namespace::builder();
        let a = builder
            .define(None, "a")
            .kind(DefinitionKind::Alias { target: Instantiation::new("b") })
            .id();
        builder
            .define(None, "b")
            .kind(DefinitionKind::Alias { target: Instantiation::new("a") });
        let namespace = builder.build();

        let result = namespace.resolve_canonical(a, ArgumentList::new(), None, 10);
        assert!(matches!(result, Err(ContextError::DereferenceLoop { .. })));
    }

    #[test]
    fn dangling_alias_resolves_to_nothing() {
        let mut builder = Namespace::builder();
        let a = builder
            .define(None, "a")
            .kind(DefinitionKind::Alias { target: Instantiation::new("nowhere") })
            .id();
        let namespace = builder.build();
        assert_eq!(namespace.resolve_canonical(a, ArgumentList::new(), None, 10), Ok(None));
    }
}
