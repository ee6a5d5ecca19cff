//! Serialized definition trees, loaded by the CLI driver.
//!
//! ```json
//! { "definitions": [
//!     { "name": "shop", "site": true, "children": [
//!         { "name": "page", "keeps": [{ "target": "title", "alias": "heading" }],
//!           "body": { "concat": [{ "ref": { "name": "heading" } }, { "literal": "!" }] },
//!           "children": [{ "name": "title", "body": { "literal": "Home" } }] } ] } ] }
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Namespace, NamespaceBuilder};
use crate::definition::{Access, Body, DefId, DefinitionKind, Durability, Instantiation, KeepStatement};
use crate::value::{Argument, Value};

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("invalid definition tree: {0}")]
    Json(#[from] serde_json::Error),
    #[error("`{definition}` extends unknown definition `{extends}`")]
    UnknownSuperdefinition { definition: String, extends: String },
    #[error("`{definition}` wraps unknown definition `{underlying}`")]
    UnknownUnderlying { definition: String, underlying: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NamespaceSpec {
    pub definitions: Vec<DefinitionSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DefinitionSpec {
    pub name: String,
    #[serde(default)]
    pub site: bool,
    #[serde(default)]
    pub access: Access,
    #[serde(default)]
    pub durability: Durability,
    #[serde(default)]
    pub parameters: Vec<String>,
    /// Fully-qualified name of the superdefinition.
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub keeps: Vec<KeepStatement>,
    #[serde(default)]
    pub body: BodySpec,
    #[serde(default)]
    pub children: Vec<DefinitionSpec>,
    #[serde(default)]
    pub alias: Option<InstantiationSpec>,
    #[serde(default)]
    pub elements: Option<Vec<InstantiationSpec>>,
    /// Fully-qualified name of the definition this flavor wraps.
    #[serde(default)]
    pub flavor_of: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstantiationSpec {
    pub name: String,
    #[serde(default)]
    pub args: Vec<ArgumentSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgumentSpec {
    Ref { r#ref: InstantiationSpec },
    Value(Value),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BodySpec {
    #[default]
    Empty,
    Literal(Value),
    Ref(InstantiationSpec),
    Concat(Vec<BodySpec>),
    List(Vec<BodySpec>),
    Each {
        item: String,
        over: Box<BodySpec>,
        body: Box<BodySpec>,
    },
    Super,
    Redirect {
        status: u16,
        location: String,
        #[serde(default)]
        message: String,
    },
}

impl InstantiationSpec {
    fn to_instantiation(&self) -> Instantiation {
        Instantiation {
            name: self.name.as_str().into(),
            arguments: self.args.iter().map(ArgumentSpec::to_argument).collect(),
        }
    }
}

impl ArgumentSpec {
    fn to_argument(&self) -> Argument {
        match self {
            ArgumentSpec::Ref { r#ref } => r#ref.to_instantiation().into(),
            ArgumentSpec::Value(value) => Argument::Value(value.clone()),
        }
    }
}

impl BodySpec {
    fn to_body(&self) -> Body {
        match self {
            BodySpec::Empty => Body::Empty,
            BodySpec::Literal(value) => Body::Literal(value.clone()),
            BodySpec::Ref(instantiation) => Body::Ref(instantiation.to_instantiation()),
            BodySpec::Concat(parts) => Body::Concat(parts.iter().map(BodySpec::to_body).collect()),
            BodySpec::List(items) => Body::List(items.iter().map(BodySpec::to_body).collect()),
            BodySpec::Each { item, over, body } => Body::Each {
                item: item.as_str().into(),
                over: Box::new(over.to_body()),
                body: Box::new(body.to_body()),
            },
            BodySpec::Super => Body::Super,
            BodySpec::Redirect { status, location, message } => Body::Redirect {
                status: *status,
                location: Arc::from(location.as_str()),
                message: Arc::from(message.as_str()),
            },
        }
    }
}

impl NamespaceSpec {
    pub fn from_json(json: &str) -> Result<Self, SpecError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn build(&self) -> Result<Namespace, SpecError> {
        let mut builder = Namespace::builder();
        let mut pending = Vec::new();
        for definition in &self.definitions {
            add_definition(&mut builder, None, definition, &mut pending);
        }
        let mut namespace = builder.build();
        // Superdefinitions and flavors may point forward, so they are linked last.
        for (id, link) in pending {
            match link {
                Link::Extends(name) => {
                    let Some(superdefinition) = namespace.lookup(&name) else {
                        return Err(SpecError::UnknownSuperdefinition {
                            definition: namespace.definition(id).full_name.to_string(),
                            extends: name,
                        });
                    };
                    namespace.definitions[id.0 as usize].superdefinition = Some(superdefinition);
                }
                Link::Flavor(name) => {
                    let Some(underlying) = namespace.lookup(&name) else {
                        return Err(SpecError::UnknownUnderlying {
                            definition: namespace.definition(id).full_name.to_string(),
                            underlying: name,
                        });
                    };
                    namespace.definitions[id.0 as usize].kind = DefinitionKind::Flavor { underlying };
                }
            }
        }
        Ok(namespace)
    }
}

enum Link {
    Extends(String),
    Flavor(String),
}

fn add_definition(
    builder: &mut NamespaceBuilder,
    owner: Option<DefId>,
    spec: &DefinitionSpec,
    pending: &mut Vec<(DefId, Link)>,
) {
    let kind = if spec.site {
        DefinitionKind::Site
    } else if let Some(alias) = &spec.alias {
        DefinitionKind::Alias { target: alias.to_instantiation() }
    } else if let Some(elements) = &spec.elements {
        DefinitionKind::Collection {
            elements: elements.iter().map(InstantiationSpec::to_instantiation).collect(),
        }
    } else {
        DefinitionKind::Plain
    };
    let parameters: Vec<&str> = spec.parameters.iter().map(String::as_str).collect();
    let mut definition = builder
        .define(owner, &spec.name)
        .kind(kind)
        .access(spec.access)
        .durability(spec.durability)
        .parameters(&parameters)
        .body(spec.body.to_body());
    for keep in &spec.keeps {
        definition = definition.keep(keep.clone());
    }
    let id = definition.id();
    if let Some(extends) = &spec.extends {
        pending.push((id, Link::Extends(extends.clone())));
    }
    if let Some(underlying) = &spec.flavor_of {
        pending.push((id, Link::Flavor(underlying.clone())));
    }
    for child in &spec.children {
        add_definition(builder, Some(id), child, pending);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TREE: &str = r#"{ "definitions": [
        { "name": "shop", "site": true, "children": [
            { "name": "base", "children": [{ "name": "header", "body": { "literal": "H" } }] },
            { "name": "page", "extends": "shop.base",
              "keeps": [{ "target": "title", "alias": "heading" }],
              "body": { "concat": [{ "ref": { "name": "heading" } }, { "literal": "!" }] },
              "children": [{ "name": "title", "durability": "dynamic", "body": { "literal": "Home" } }] },
            { "name": "greet", "parameters": ["who"],
              "body": { "ref": { "name": "who" } } },
            { "name": "call", "body": { "ref": { "name": "greet", "args": ["you"] } } }
        ] }
    ] }"#;

    #[test]
    fn builds_tree_with_links() {
        let namespace = NamespaceSpec::from_json(TREE).unwrap().build().unwrap();
        let page = namespace.lookup("shop.page").unwrap();
        let base = namespace.lookup("shop.base").unwrap();
        assert!(namespace.equals_or_extends(page, base));
        assert!(namespace.child_definition(page, "header").is_some());

        let title = namespace.lookup("shop.page.title").unwrap();
        assert_eq!(namespace.definition(title).durability, Durability::Dynamic);
        assert_eq!(namespace.keeps(page)[0].alias.as_deref(), Some("heading"));

        let call = namespace.lookup("shop.call").unwrap();
        match &namespace.definition(call).body {
            Body::Ref(instantiation) => {
                assert_eq!(instantiation.arguments[0], Argument::Value(Value::text("you")));
            }
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn unknown_superdefinition_is_reported() {
        let json = r#"{ "definitions": [{ "name": "a", "extends": "nowhere" }] }"#;
        let error = NamespaceSpec::from_json(json).unwrap().build().unwrap_err();
        assert!(matches!(error, SpecError::UnknownSuperdefinition { .. }));
    }
}
