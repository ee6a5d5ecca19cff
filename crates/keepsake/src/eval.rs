//! Reference evaluator driving a `Context` over definition bodies.

use std::sync::Arc;

use thiserror::Error;

use crate::cache::Holder;
use crate::context::{Context, Frame, Lookup, Marker};
use crate::definition::{Body, DefId, DefinitionKind, Durability, Instantiation};
use crate::error::{ContextError, Redirection};
use crate::namespace::Namespace;
use crate::value::{Argument, ArgumentList, Value, same_arguments};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error("circular reference to `{0}`")]
    CircularReference(String),
    #[error("`{0}` has no superdefinition")]
    NoSuperdefinition(String),
    #[error("cannot iterate over `{0}`")]
    NotIterable(String),
}

impl EvalError {
    pub fn redirection(&self) -> Option<&Redirection> {
        match self {
            EvalError::Context(ContextError::Redirect(redirection)) => Some(redirection),
            _ => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, EvalError::Context(error) if error.is_fatal())
    }
}

impl From<Redirection> for EvalError {
    fn from(redirection: Redirection) -> Self {
        EvalError::Context(redirection.into())
    }
}

/// Evaluates instantiations, memoizing results through the context caches.
#[derive(Debug, Default)]
pub struct Evaluator {
    /// Instantiations in progress, keyed by where they were requested.
    active: Vec<(Marker, Arc<str>, ArgumentList)>,
    /// Loop items bound by enclosing `each` bodies.
    loop_bindings: Vec<(Arc<str>, Value)>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate a top-level definition in a fresh stack position.
    pub fn evaluate_definition(
        &mut self,
        context: &mut Context,
        definition: DefId,
    ) -> Result<Value, EvalError> {
        let name = context.namespace().definition(definition).full_name.clone();
        self.evaluate(context, &Instantiation::new(&name))
    }

    pub fn evaluate(
        &mut self,
        context: &mut Context,
        instantiation: &Instantiation,
    ) -> Result<Value, EvalError> {
        let name = &instantiation.name;
        if !name.contains('.') && instantiation.arguments.is_empty() {
            if let Some(binding) = context.argument_for(name) {
                return match binding.argument {
                    Argument::Value(value) => Ok(value),
                    Argument::Missing => Ok(Value::Null),
                    Argument::Instance(argument) => {
                        self.enter(context, name, &instantiation.arguments)?;
                        let result = self.evaluate_in_caller(context, binding.depth, &argument);
                        self.active.pop();
                        result
                    }
                };
            }
        }

        let namespace = context.runtime().namespace().clone();
        let target = context.keep_target(name).unwrap_or_else(|| name.clone());
        let definition = namespace.lookup_from(context.top_definition(), &target);

        let global_key = definition
            .map(|id| namespace.definition(id))
            .filter(|definition| definition.is_global())
            .map(|definition| definition.full_name.clone());
        let mut request = Lookup::new(name).with_arguments(&instantiation.arguments);
        if let Some(definition) = definition {
            request = request.for_definition(definition);
        }
        if let Some(global_key) = &global_key {
            request = request.global(global_key);
        }
        if let Some(value) = context.lookup(&request)? {
            return Ok(value);
        }

        let Some(definition) = definition else {
            return Err(ContextError::UndefinedDefinition(name.to_string()).into());
        };

        self.enter(context, &target, &instantiation.arguments)?;
        let result = self.instantiate(context, &namespace, definition, instantiation);
        self.active.pop();
        let (resolved, value) = result?;

        let durability = namespace.definition(definition).durability;
        if durability != Durability::Dynamic || context.is_kept(&target) {
            let holder = Holder::new(definition, instantiation.arguments.clone(), value.clone())
                .with_resolution(resolved.definition, resolved.arguments);
            context.put(&target, holder)?;
        }
        Ok(value)
    }

    /// Record `name(arguments)` as in progress at the current point of
    /// evaluation. Fails when the same instantiation is already in progress
    /// there.
    fn enter(
        &mut self,
        context: &Context,
        name: &Arc<str>,
        arguments: &ArgumentList,
    ) -> Result<(), EvalError> {
        let marker = context.marker();
        let reentered = self.active.iter().any(|(active, active_name, active_arguments)| {
            *active == marker
                && active_name == name
                && same_arguments(active_arguments, arguments)
        });
        if reentered {
            return Err(EvalError::CircularReference(name.to_string()));
        }
        self.active.push((marker, name.clone(), arguments.clone()));
        Ok(())
    }

    fn instantiate(
        &mut self,
        context: &mut Context,
        namespace: &Namespace,
        definition: DefId,
        instantiation: &Instantiation,
    ) -> Result<(Frame, Value), EvalError> {
        context.push(definition, instantiation.arguments.clone(), true)?;
        context.runtime().stats().record_computation();
        let result = match context.peek() {
            Some(frame) => self
                .evaluate_frame(context, namespace, frame.definition)
                .map(|value| (frame, value)),
            None => Err(ContextError::StackUnderflow.into()),
        };
        let popped = context.pop();
        let value = result?;
        popped?;
        Ok(value)
    }

    /// Evaluate the body of the definition on top of the stack.
    fn evaluate_frame(
        &mut self,
        context: &mut Context,
        namespace: &Namespace,
        definition: DefId,
    ) -> Result<Value, EvalError> {
        let definition = namespace.definition(definition);
        match (&definition.kind, &definition.body) {
            (DefinitionKind::Collection { elements }, Body::Empty) => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    items.push(self.evaluate(context, element)?);
                }
                Ok(Value::list(items))
            }
            (_, body) => self.evaluate_body(context, namespace, body),
        }
    }

    fn evaluate_body(
        &mut self,
        context: &mut Context,
        namespace: &Namespace,
        body: &Body,
    ) -> Result<Value, EvalError> {
        match body {
            Body::Empty => Ok(Value::Null),
            Body::Literal(value) => Ok(value.clone()),
            Body::Ref(instantiation) => self.evaluate(context, instantiation),
            Body::Concat(parts) => {
                let mut text = String::new();
                for part in parts {
                    text.push_str(&self.evaluate_body(context, namespace, part)?.to_display_string());
                }
                Ok(Value::text(text))
            }
            Body::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.evaluate_body(context, namespace, item)?);
                }
                Ok(Value::list(values))
            }
            Body::Each { item, over, body } => {
                let collection = self.evaluate_body(context, namespace, over)?;
                let elements = match collection {
                    Value::List(elements) => elements,
                    Value::Null => Arc::new(Vec::new()),
                    _ => return Err(EvalError::NotIterable(item.to_string())),
                };
                let enclosing = context.loop_index();
                let result = self.evaluate_each(context, namespace, item, &elements, body);
                context.restore_loop_index(enclosing);
                result
            }
            Body::Super => {
                let frame = context.peek().ok_or(ContextError::StackUnderflow)?;
                let current = namespace.definition(frame.definition);
                let Some(superdefinition) = current.superdefinition else {
                    return Err(EvalError::NoSuperdefinition(current.full_name.to_string()));
                };
                context.push(superdefinition, frame.arguments, false)?;
                let result = self.evaluate_frame(context, namespace, superdefinition);
                let popped = context.pop();
                let value = result?;
                popped?;
                Ok(value)
            }
            Body::Redirect { status, location, message } => Err(Redirection {
                status: *status,
                location: location.clone(),
                message: message.clone(),
            }
            .into()),
        }
    }

    fn evaluate_each(
        &mut self,
        context: &mut Context,
        namespace: &Namespace,
        item: &Arc<str>,
        elements: &[Value],
        body: &Body,
    ) -> Result<Value, EvalError> {
        let mut output = Vec::with_capacity(elements.len());
        for element in elements {
            context.next_loop_index()?;
            for (name, value) in &self.loop_bindings {
                context.put_value(name, value.clone())?;
            }
            context.put_value(item, element.clone())?;
            self.loop_bindings.push((item.clone(), element.clone()));
            let value = self.evaluate_body(context, namespace, body);
            self.loop_bindings.pop();
            output.push(value?);
        }
        Ok(Value::list(output))
    }

    /// Evaluate an argument in the frame that supplied it.
    fn evaluate_in_caller(
        &mut self,
        context: &mut Context,
        depth: usize,
        argument: &Instantiation,
    ) -> Result<Value, EvalError> {
        let frames = (depth + 1).min(context.size().saturating_sub(1));
        for _ in 0..frames {
            context.unpush()?;
        }
        let result = self.evaluate(context, argument);
        for _ in 0..frames {
            context.repush()?;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use smallvec::smallvec;

    use super::*;
    use crate::definition::KeepStatement;
    use crate::runtime::Runtime;

    fn evaluate(namespace: Namespace, name: &str) -> (Result<Value, EvalError>, u64) {
        let root = namespace.roots().next().unwrap();
        let runtime = Runtime::with_defaults(namespace);
        let mut context = Context::new(runtime.clone());
        context.push(root, ArgumentList::new(), true).unwrap();
        let result = Evaluator::new().evaluate(&mut context, &Instantiation::new(name));
        assert_eq!(context.size(), 1);
        (result, runtime.stats().computations())
    }

    #[test]
    fn parameters_and_lazy_arguments() {
        let mut builder = Namespace::builder();
        let site = builder.site("s");
        builder
            .define(Some(site), "greet")
            .parameters(&["who"])
            .body(Body::Concat(vec![
                Body::Literal(Value::text("hello ")),
                Body::Ref(Instantiation::new("who")),
            ]));
        builder
            .define(Some(site), "name")
            .body(Body::Literal(Value::text("world")));
        builder.define(Some(site), "page").body(Body::Ref(Instantiation::with_arguments(
            "greet",
            smallvec![Instantiation::new("name").into()],
        )));

        let (result, _) = evaluate(builder.build(), "page");
        assert_eq!(result.unwrap(), Value::text("hello world"));
    }

    #[test]
    fn kept_values_are_computed_once() {
        let mut builder = Namespace::builder();
        let site = builder.site("s");
        let page = builder
            .define(Some(site), "page")
            .keep(KeepStatement::new("x").with_alias("y"))
            .body(Body::List(vec![
                Body::Ref(Instantiation::new("x")),
                Body::Ref(Instantiation::new("y")),
                Body::Ref(Instantiation::new("x")),
            ]))
            .id();
        builder
            .define(Some(page), "x")
            .durability(Durability::Dynamic)
            .body(Body::Literal(Value::Int(42)));

        let (result, computations) = evaluate(builder.build(), "page");
        assert_eq!(result.unwrap(), Value::list([Value::Int(42), Value::Int(42), Value::Int(42)]));
        // `page` once and `x` once.
        assert_eq!(computations, 2);
    }

    #[test]
    fn dynamic_values_are_recomputed() {
        let mut builder = Namespace::builder();
        let site = builder.site("s");
        let page = builder
            .define(Some(site), "page")
            .body(Body::List(vec![
                Body::Ref(Instantiation::new("x")),
                Body::Ref(Instantiation::new("x")),
            ]))
            .id();
        builder
            .define(Some(page), "x")
            .durability(Durability::Dynamic)
            .body(Body::Literal(Value::Int(1)));

        let (_, computations) = evaluate(builder.build(), "page");
        assert_eq!(computations, 3);
    }

    #[test]
    fn each_binds_items_per_iteration() {
        let mut builder = Namespace::builder();
        let site = builder.site("s");
        builder.define(Some(site), "page").body(Body::Each {
            item: "n".into(),
            over: Box::new(Body::Literal(Value::list([Value::Int(1), Value::Int(2)]))),
            body: Box::new(Body::Each {
                item: "m".into(),
                over: Box::new(Body::Literal(Value::list([Value::text("a"), Value::text("b")]))),
                body: Box::new(Body::Concat(vec![
                    Body::Ref(Instantiation::new("n")),
                    Body::Ref(Instantiation::new("m")),
                ])),
            }),
        });

        let (result, _) = evaluate(builder.build(), "page");
        assert_eq!(
            result.unwrap(),
            Value::list([
                Value::list([Value::text("1a"), Value::text("1b")]),
                Value::list([Value::text("2a"), Value::text("2b")]),
            ])
        );
    }

    #[test]
    fn kept_children_get_one_slot_per_iteration() {
        let mut builder = Namespace::builder();
        let site = builder.site("s");
        let page = builder
            .define(Some(site), "page")
            .keep(KeepStatement::new("row"))
            .body(Body::Each {
                item: "n".into(),
                over: Box::new(Body::Literal(Value::list([Value::Int(1), Value::Int(2)]))),
                body: Box::new(Body::List(vec![
                    Body::Ref(Instantiation::new("row")),
                    Body::Ref(Instantiation::new("row")),
                ])),
            })
            .id();
        builder.define(Some(page), "row").body(Body::Ref(Instantiation::new("n")));

        let (result, computations) = evaluate(builder.build(), "page");
        assert_eq!(
            result.unwrap(),
            Value::list([
                Value::list([Value::Int(1), Value::Int(1)]),
                Value::list([Value::Int(2), Value::Int(2)]),
            ])
        );
        // `page`, then `row` once per iteration.
        assert_eq!(computations, 3);
    }

    #[test]
    fn super_evaluates_the_superdefinition() {
        let mut builder = Namespace::builder();
        let site = builder.site("s");
        let base = builder
            .define(Some(site), "base")
            .body(Body::Literal(Value::text("base")))
            .id();
        builder
            .define(Some(site), "derived")
            .extends(base)
            .body(Body::Concat(vec![Body::Super, Body::Literal(Value::text("+"))]));
        builder.define(Some(site), "orphan").body(Body::Super);
        let namespace = Arc::new(builder.build());

        let runtime = Runtime::new(namespace, Default::default());
        let mut context = Context::new(runtime);
        context.push(site, ArgumentList::new(), true).unwrap();
        let mut evaluator = Evaluator::new();
        let derived = evaluator.evaluate(&mut context, &Instantiation::new("derived"));
        assert_eq!(derived.unwrap(), Value::text("base+"));
        let orphan = evaluator.evaluate(&mut context, &Instantiation::new("orphan"));
        assert_eq!(orphan, Err(EvalError::NoSuperdefinition("s.orphan".into())));
        assert_eq!(context.size(), 1);
    }

    #[test]
    fn redirections_pass_through_unchanged() {
        let mut builder = Namespace::builder();
        let site = builder.site("s");
        builder.define(Some(site), "page").body(Body::Redirect {
            status: 302,
            location: "/login".into(),
            message: "sign in first".into(),
        });

        let (result, _) = evaluate(builder.build(), "page");
        let error = result.unwrap_err();
        assert_eq!(error.redirection(), Some(&Redirection::new(302, "/login", "sign in first")));
        assert!(!error.is_fatal());
    }

    #[test]
    fn nested_calls_of_one_definition_as_arguments() {
        let mut builder = Namespace::builder();
        let site = builder.site("s");
        builder
            .define(Some(site), "bold")
            .parameters(&["t"])
            .body(Body::Concat(vec![
                Body::Literal(Value::text("<b>")),
                Body::Ref(Instantiation::new("t")),
                Body::Literal(Value::text("</b>")),
            ]));
        builder.define(Some(site), "page").body(Body::Ref(Instantiation::with_arguments(
            "bold",
            smallvec![
                Instantiation::with_arguments("bold", smallvec![Value::text("hi").into()]).into()
            ],
        )));

        let (result, _) = evaluate(builder.build(), "page");
        assert_eq!(result.unwrap(), Value::text("<b><b>hi</b></b>"));
    }

    #[test]
    fn an_argument_bound_to_itself_is_circular() {
        let mut builder = Namespace::builder();
        let site = builder.site("s");
        builder.edit(site).parameters(&["t"]);
        let runtime = Runtime::with_defaults(builder.build());
        let mut context = Context::new(runtime);
        context
            .push(site, smallvec![Instantiation::new("t").into()], true)
            .unwrap();

        let result = Evaluator::new().evaluate(&mut context, &Instantiation::new("t"));
        assert_eq!(result, Err(EvalError::CircularReference("t".into())));
        assert_eq!(context.size(), 1);
    }

    #[test]
    fn runaway_recursion_hits_the_depth_limit() {
        let mut builder = Namespace::builder();
        let site = builder.site("s");
        builder.define(Some(site), "forever").body(Body::Ref(Instantiation::new("forever")));
        let config = crate::config::EngineConfig::default().with_max_depth(50);
        let runtime = Runtime::new(Arc::new(builder.build()), config);
        let mut context = Context::new(runtime);
        context.push(site, ArgumentList::new(), true).unwrap();

        let result = Evaluator::new().evaluate(&mut context, &Instantiation::new("forever"));
        let error = result.unwrap_err();
        assert_eq!(error, EvalError::Context(ContextError::DepthExceeded { limit: 50 }));
        assert_eq!(context.size(), 1);
    }

    #[test]
    fn undefined_names_are_recoverable() {
        let mut builder = Namespace::builder();
        let site = builder.site("s");
        builder.define(Some(site), "page").body(Body::Ref(Instantiation::new("missing")));

        let (result, _) = evaluate(builder.build(), "page");
        let error = result.unwrap_err();
        assert_eq!(error, EvalError::Context(ContextError::UndefinedDefinition("missing".into())));
        assert!(!error.is_fatal());
    }
}
