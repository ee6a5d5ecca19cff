//! Shared fixtures for the keepsake integration tests.
//!
//! Every test binary builds the same small `shop` tree so scenarios can
//! refer to definitions by field instead of re-declaring them.

#![allow(dead_code)]

use std::sync::Arc;

use keepsake::{
    Access, ArgumentList, Body, Context, DefId, Durability, EngineConfig, Instantiation,
    KeepStatement, Namespace, Runtime, Value,
};

pub struct Shop {
    pub runtime: Arc<Runtime>,
    pub site: DefId,
    /// Keeps `title as heading` and `x as y`.
    pub page: DefId,
    pub title: DefId,
    pub x: DefId,
    /// Local to `page`.
    pub secret: DefId,
    /// Sibling of `page` without keeps.
    pub other: DefId,
    /// Plain frame for depth and balance tests.
    pub frame: DefId,
    pub menu: DefId,
    pub clock: DefId,
}

pub fn shop_namespace() -> (Namespace, [DefId; 9]) {
    let mut builder = Namespace::builder();
    let site = builder.site("shop");
    let page = builder
        .define(Some(site), "page")
        .keep(KeepStatement::new("title").with_alias("heading"))
        .keep(KeepStatement::new("x").with_alias("y"))
        .body(Body::List(vec![
            Body::Ref(Instantiation::new("title")),
            Body::Ref(Instantiation::new("y")),
            Body::Ref(Instantiation::new("x")),
            Body::Ref(Instantiation::new("heading")),
        ]))
        .id();
    let title = builder
        .define(Some(page), "title")
        .body(Body::Literal(Value::text("Home")))
        .id();
    let x = builder
        .define(Some(page), "x")
        .durability(Durability::Dynamic)
        .body(Body::Literal(Value::Int(42)))
        .id();
    let secret = builder
        .define(Some(page), "secret")
        .access(Access::Local)
        .body(Body::Literal(Value::text("s3cret")))
        .id();
    let other = builder
        .define(Some(site), "other")
        .body(Body::Literal(Value::text("other")))
        .id();
    let frame = builder.define(Some(site), "frame").id();
    let menu = builder
        .define(Some(site), "menu")
        .durability(Durability::Global)
        .body(Body::Literal(Value::text("Menu")))
        .id();
    let clock = builder
        .define(Some(site), "clock")
        .durability(Durability::Cosmic)
        .body(Body::Literal(Value::Int(12)))
        .id();
    (
        builder.build(),
        [site, page, title, x, secret, other, frame, menu, clock],
    )
}

pub fn shop_with(config: EngineConfig) -> Shop {
    let (namespace, [site, page, title, x, secret, other, frame, menu, clock]) = shop_namespace();
    Shop {
        runtime: Runtime::new(Arc::new(namespace), config),
        site,
        page,
        title,
        x,
        secret,
        other,
        frame,
        menu,
        clock,
    }
}

pub fn shop() -> Shop {
    shop_with(EngineConfig::default())
}

impl Shop {
    /// A fresh context with the site frame pushed.
    pub fn context(&self) -> Context {
        let mut context = Context::new(self.runtime.clone());
        context.push(self.site, ArgumentList::new(), true).unwrap();
        context
    }

    /// A fresh context positioned inside `page`.
    pub fn page_context(&self) -> Context {
        let mut context = self.context();
        context.push(self.page, ArgumentList::new(), true).unwrap();
        context
    }
}
