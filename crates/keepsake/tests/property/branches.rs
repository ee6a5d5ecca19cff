// Property-based tests for branch isolation
//
// A context cloned without sharing its keeps must never observe what the
// clone does, whatever the clone does.

use keepsake::{ArgumentList, DefId, Lookup, Value};
use proptest::prelude::*;

use super::strategies::{Op, arb_ops, arb_pushes, key};
use crate::common::{Shop, shop};

fn pushable(shop: &Shop) -> [DefId; 5] {
    [shop.page, shop.other, shop.frame, shop.title, shop.menu]
}

fn local(context: &keepsake::Context, name: &str) -> Option<Value> {
    context.lookup(&Lookup::new(name).local()).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn clones_never_leak_into_the_original(
        pushes in arb_pushes(12),
        ops in arb_ops(48),
    ) {
        let shop = shop();
        let definitions = pushable(&shop);
        let mut context = shop.context();
        for index in &pushes {
            context.push(definitions[*index], ArgumentList::new(), true).unwrap();
        }
        context.put_value("mine", Value::Int(1)).unwrap();
        let chain = context.scope_chain();

        let mut branch = context.clone_context(false);
        prop_assert_eq!(branch.scope_chain(), chain.clone());
        // Frames below the clone point are shared, so once the branch pops
        // past its copied top its writes land in ancestors the original can
        // also reach. Isolation is only claimed for the original's own top
        // frame, which is why the checks below use local lookups.
        for op in ops {
            let result = match op {
                Op::Push(index) => branch.push(definitions[index], ArgumentList::new(), true),
                Op::Pop if !branch.is_empty() => branch.pop(),
                Op::Put(index, value) if !branch.is_empty() => {
                    branch.put_value(&key(index), Value::Int(value))
                }
                Op::Pop | Op::Put(..) | Op::Unpush | Op::Repush => Ok(()),
            };
            if let Err(error) = result {
                prop_assert!(!error.is_fatal(), "branch failed: {}", error);
            }
            if !branch.is_empty() {
                branch.put_value("mine", Value::Int(2)).unwrap();
            }
        }

        prop_assert_eq!(context.scope_chain(), chain);
        prop_assert_eq!(context.size(), pushes.len() + 1);
        prop_assert_eq!(local(&context, "mine"), Some(Value::Int(1)));
        for index in 0..8 {
            prop_assert_eq!(local(&context, &key(index)), None);
        }

        drop(branch);
        drop(context);
        let stats = shop.runtime.stats().snapshot();
        prop_assert_eq!(stats.frames_freed, stats.frames_allocated);
    }

    #[test]
    fn clones_sharing_keeps_see_top_frame_writes(
        pushes in arb_pushes(12),
        index in 0u8..8,
        value in any::<i64>(),
    ) {
        let shop = shop();
        let definitions = pushable(&shop);
        let mut context = shop.context();
        for pushed in &pushes {
            context.push(definitions[*pushed], ArgumentList::new(), true).unwrap();
        }
        let mut branch = context.clone_context(true);
        branch.put_value(&key(index), Value::Int(value)).unwrap();
        prop_assert_eq!(local(&context, &key(index)), Some(Value::Int(value)));
    }
}
