// Property-based tests for stack shape and frame accounting
//
// Runs generated push/pop/unpush/repush sequences against a plain model of
// the stack and checks the context agrees with it after every step.

use std::collections::HashMap;

use keepsake::{ArgumentList, ContextError, DefId, Lookup, Value};
use proptest::prelude::*;

use super::strategies::{Op, arb_ops, key};
use crate::common::{Shop, shop};

fn pushable(shop: &Shop) -> [DefId; 5] {
    [shop.page, shop.other, shop.frame, shop.title, shop.menu]
}

#[derive(Default)]
struct Model {
    /// (definition, frame stamp) from the root up.
    stack: Vec<(DefId, u64)>,
    /// Unpushed frames and the stack shape they must be repushed onto.
    unpushed: Vec<((DefId, u64), Vec<(DefId, u64)>)>,
    values: HashMap<u64, HashMap<String, i64>>,
    next_stamp: u64,
}

impl Model {
    fn push(&mut self, definition: DefId) {
        self.next_stamp += 1;
        self.stack.push((definition, self.next_stamp));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn context_tracks_the_model_stack(ops in arb_ops(64)) {
        let shop = shop();
        let definitions = pushable(&shop);
        let mut context = shop.context();
        let mut model = Model::default();
        model.push(shop.site);

        for op in ops {
            match op {
                Op::Push(index) => {
                    context.push(definitions[index], ArgumentList::new(), true).unwrap();
                    model.push(definitions[index]);
                }
                Op::Pop => {
                    let result = context.pop();
                    match model.stack.pop() {
                        Some(_) => prop_assert!(result.is_ok()),
                        None => prop_assert_eq!(result, Err(ContextError::StackUnderflow)),
                    }
                }
                Op::Put(index, value) => {
                    if let Some((_, stamp)) = model.stack.last() {
                        context.put_value(&key(index), Value::Int(value)).unwrap();
                        model.values.entry(*stamp).or_default().insert(key(index), value);
                    }
                }
                Op::Unpush => {
                    let result = context.unpush();
                    match model.stack.pop() {
                        Some(frame) => {
                            prop_assert!(result.is_ok());
                            model.unpushed.push((frame, model.stack.clone()));
                        }
                        None => prop_assert_eq!(result, Err(ContextError::StackUnderflow)),
                    }
                }
                Op::Repush => match model.unpushed.last() {
                    None => prop_assert_eq!(context.repush(), Err(ContextError::NothingToRepush)),
                    Some((_, shape)) if *shape == model.stack => {
                        context.repush().unwrap();
                        if let Some((frame, _)) = model.unpushed.pop() {
                            model.stack.push(frame);
                        }
                    }
                    // The stack moved on since the unpush.
                    Some(_) => {}
                },
            }

            prop_assert_eq!(context.size(), model.stack.len());
            prop_assert_eq!(context.top_definition(), model.stack.last().map(|(id, _)| *id));
            if let Some((_, stamp)) = model.stack.last() {
                let expected = model.values.get(stamp);
                for index in 0..8 {
                    let found = context.lookup(&Lookup::new(&key(index)).local()).unwrap();
                    let wanted = expected
                        .and_then(|values| values.get(&key(index)))
                        .map(|value| Value::Int(*value));
                    prop_assert_eq!(found, wanted);
                }
            }
        }

        drop(context);
        let stats = shop.runtime.stats().snapshot();
        prop_assert_eq!(stats.frames_freed, stats.frames_allocated);
    }

    #[test]
    fn popping_everything_frees_every_frame(depth in 1usize..120, recycle in any::<bool>()) {
        let shop = crate::common::shop_with(
            keepsake::EngineConfig::default().with_recycling(recycle),
        );
        let mut context = shop.context();
        for _ in 1..depth {
            context.push(shop.frame, ArgumentList::new(), true).unwrap();
        }
        prop_assert_eq!(context.size(), depth);
        for _ in 0..depth {
            context.pop().unwrap();
        }
        prop_assert!(context.is_empty());
        let stats = shop.runtime.stats().snapshot();
        prop_assert_eq!(stats.frames_freed, depth as u64);
        prop_assert_eq!(stats.frames_allocated, depth as u64);
    }
}
