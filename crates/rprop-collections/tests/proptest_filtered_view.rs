//! Property-based tests for filtered views.
//!
//! After any interleaving of structural edits and element writes, a
//! [`FilteredView`] must equal the source filtered by its predicate, in
//! source order, and replaying its emitted changes onto a plain `Vec` must
//! reproduce it.

use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;
use rprop_collections::{CollectionChange, FilteredView, ObservableVec};
use rprop_core::{Notifier, ValueCell};

// ── Model ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Op {
    Push(bool),
    Insert(usize, bool),
    Remove(usize),
    Move(usize, usize),
    Replace(usize, bool),
    Toggle(usize),
    Clear,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => any::<bool>().prop_map(Op::Push),
        2 => (any::<usize>(), any::<bool>()).prop_map(|(i, b)| Op::Insert(i, b)),
        2 => any::<usize>().prop_map(Op::Remove),
        2 => (any::<usize>(), any::<usize>()).prop_map(|(a, b)| Op::Move(a, b)),
        1 => (any::<usize>(), any::<bool>()).prop_map(|(i, b)| Op::Replace(i, b)),
        4 => any::<usize>().prop_map(Op::Toggle),
        1 => Just(Op::Clear),
    ]
}

type Item = (u32, ValueCell<bool>);

fn apply(vec: &ObservableVec<Item>, op: &Op, next_id: &mut u32) {
    let len = vec.len();
    let mut fresh = |flag: bool| {
        *next_id += 1;
        (*next_id, ValueCell::new(flag))
    };
    match *op {
        Op::Push(flag) => vec.push(fresh(flag)),
        Op::Insert(i, flag) => vec.insert(i % (len + 1), fresh(flag)),
        Op::Remove(i) if len > 0 => {
            vec.remove(i % len);
        }
        Op::Move(a, b) if len > 0 => {
            vec.move_item(a % len, b % len);
        }
        Op::Replace(i, flag) if len > 0 => {
            vec.replace(i % len, fresh(flag));
        }
        Op::Toggle(i) if len > 0 => {
            if let Some((_, cell)) = vec.get(i % len) {
                cell.set(!cell.get());
            }
        }
        Op::Clear => vec.clear(),
        _ => {}
    }
}

fn ids(items: &[Item]) -> Vec<u32> {
    items.iter().map(|(id, _)| *id).collect()
}

// ═════════════════════════════════════════════════════════════════════════
// View equals filtered source
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn view_matches_filtered_source(ops in proptest::collection::vec(op(), 0..80)) {
        let vec: ObservableVec<Item> = ObservableVec::new();
        let view = FilteredView::with_watch(
            &vec,
            |(_, flag): &Item| flag.get(),
            |(_, flag): &Item| vec![Box::new(flag.clone()) as Box<dyn Notifier>],
        );

        // Mirror the view by replaying its changes.
        let mirror: Rc<RefCell<Vec<u32>>> = Rc::default();
        let mirror_in = Rc::clone(&mirror);
        let view_in = view.clone();
        let _sub = view.subscribe(move |change| {
            let mut m = mirror_in.borrow_mut();
            match change {
                CollectionChange::Added { index, item } => m.insert(*index, item.0),
                CollectionChange::Removed { index, item } => {
                    assert_eq!(m.remove(*index), item.0);
                }
                CollectionChange::Moved { from, to, item } => {
                    let id = m.remove(*from);
                    assert_eq!(id, item.0);
                    m.insert(*to, id);
                }
                CollectionChange::Replaced { index, new, .. } => m[*index] = new.0,
                CollectionChange::Reset => *m = ids(&view_in.to_vec()),
            }
        });

        let mut next_id = 0;
        for op in &ops {
            apply(&vec, op, &mut next_id);
            let expected: Vec<u32> = vec
                .to_vec()
                .iter()
                .filter(|(_, flag)| flag.get())
                .map(|(id, _)| *id)
                .collect();
            prop_assert_eq!(ids(&view.to_vec()), expected.clone());
            prop_assert_eq!(mirror.borrow().clone(), expected);
        }
    }
}
