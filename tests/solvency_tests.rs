//! Solvency and integrity tests.
//!
//! Random operation sequences against one engine must never break the ledger,
//! item availability or the acyclicity of active obligations.

use proptest::prelude::*;
use swap_core::*;

#[derive(Debug, Clone)]
enum Op {
    Credit { user: usize, amount: i64 },
    Debit { user: usize, amount: i64 },
    List { user: usize, title: usize, condition: Condition },
    Wish { user: usize, item: usize },
    Request { user: usize, item: usize },
    Approve { exchange: usize },
    Reject { exchange: usize },
    Cancel { exchange: usize, by_requester: bool },
    Dispute { exchange: usize },
    Recalculate { item: usize },
}

const USERS: usize = 6;
const TITLES: [(&str, &str); 4] = [
    ("Dune", "Frank Herbert"),
    ("Emma", "Jane Austen"),
    ("Beloved", "Toni Morrison"),
    ("Ulysses", "James Joyce"),
];

fn condition_strategy() -> impl Strategy<Value = Condition> {
    prop_oneof![
        Just(Condition::Excellent),
        Just(Condition::Good),
        Just(Condition::Fair),
        Just(Condition::Poor),
    ]
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..USERS, 1i64..60).prop_map(|(user, amount)| Op::Credit { user, amount }),
        (0..USERS, 1i64..30).prop_map(|(user, amount)| Op::Debit { user, amount }),
        (0..USERS, 0..TITLES.len(), condition_strategy())
            .prop_map(|(user, title, condition)| Op::List { user, title, condition }),
        (0..USERS, 0usize..32).prop_map(|(user, item)| Op::Wish { user, item }),
        (0..USERS, 0usize..32).prop_map(|(user, item)| Op::Request { user, item }),
        (0usize..32).prop_map(|exchange| Op::Approve { exchange }),
        (0usize..32).prop_map(|exchange| Op::Reject { exchange }),
        (0usize..32, any::<bool>()).prop_map(|(exchange, by_requester)| Op::Cancel { exchange, by_requester }),
        (0usize..32).prop_map(|exchange| Op::Dispute { exchange }),
        (0usize..32).prop_map(|item| Op::Recalculate { item }),
    ]
}

fn pick<T: Clone>(list: &[T], idx: usize) -> Option<T> {
    if list.is_empty() {
        None
    } else {
        Some(list[idx % list.len()].clone())
    }
}

fn item_ids(engine: &Engine) -> Vec<ItemId> {
    engine.store().read(|t| t.items().map(|i| i.id).collect()).unwrap()
}

fn exchanges(engine: &Engine) -> Vec<ExchangeRequest> {
    engine.store().read(|t| t.exchanges().cloned().collect()).unwrap()
}

fn apply(engine: &Engine, users: &[UserId], op: &Op) {
    let items = item_ids(engine);
    let all = exchanges(engine);
    let exchange = |idx: usize| pick(&all, idx);

    // every error is a legitimate refusal here; the invariants decide pass/fail
    let _ = match *op {
        Op::Credit { user, amount } => engine
            .credit_points(users[user], Points::new(amount), EntryCategory::Purchased, "top up")
            .map(|_| ()),
        Op::Debit { user, amount } => engine
            .post_entry(users[user], Points::new(-amount), EntryCategory::Refunded, "adjustment", None)
            .map(|_| ()),
        Op::List { user, title, condition } => {
            let (title, author) = TITLES[title];
            engine.list_item(users[user], title, author, condition).map(|_| ())
        }
        Op::Wish { user, item } => match pick(&items, item) {
            Some(item) => engine.add_to_wishlist(users[user], item).map(|_| ()),
            None => Ok(()),
        },
        Op::Request { user, item } => match pick(&items, item) {
            Some(item) => engine.create_exchange(item, users[user], None).map(|_| ()),
            None => Ok(()),
        },
        Op::Approve { exchange: idx } => match exchange(idx) {
            Some(e) => engine.decide_exchange(e.id, e.owner_id, true).map(|_| ()),
            None => Ok(()),
        },
        Op::Reject { exchange: idx } => match exchange(idx) {
            Some(e) => engine.decide_exchange(e.id, e.owner_id, false).map(|_| ()),
            None => Ok(()),
        },
        Op::Cancel { exchange: idx, by_requester } => match exchange(idx) {
            Some(e) => {
                let actor = if by_requester { e.requester_id } else { e.owner_id };
                engine.cancel_exchange(e.id, actor).map(|_| ())
            }
            None => Ok(()),
        },
        Op::Dispute { exchange: idx } => match exchange(idx) {
            Some(e) => engine
                .file_dispute(e.id, e.requester_id, "condition_mismatch", "")
                .map(|_| ()),
            None => Ok(()),
        },
        Op::Recalculate { item } => match pick(&items, item) {
            Some(item) => {
                let owner = engine.item(item).map(|i| i.owner_id);
                owner.and_then(|owner| engine.recalculate(item, owner)).map(|_| ())
            }
            None => Ok(()),
        },
    };
}

fn check_invariants(engine: &Engine, users: &[UserId]) -> Result<(), TestCaseError> {
    // balance == sum of entries, never negative
    for &user in users {
        let balance = engine.balance(user).unwrap();
        let derived: Points = engine
            .store()
            .read(|t| t.ledger().entries_for(user).map(|e| e.amount).sum())
            .unwrap();
        prop_assert_eq!(balance, derived);
        prop_assert!(!balance.is_negative(), "{} went negative", user);
    }
    prop_assert!(engine.verify_ledger().unwrap().is_empty());

    // available iff no active request, and at most one active request per item
    let held: Vec<(bool, usize)> = engine
        .store()
        .read(|t| {
            t.items()
                .map(|i| (i.available, t.active_exchanges_on_item(i.id).count()))
                .collect()
        })
        .unwrap();
    for (available, active) in held {
        prop_assert!(active <= 1);
        prop_assert_eq!(available, active == 0);
    }

    // settlements are zero-sum
    for e in exchanges(engine) {
        let net: Points = engine
            .store()
            .read(|t| t.ledger().entries_for_exchange(e.id).map(|x| x.amount).sum())
            .unwrap();
        prop_assert!(net.is_zero());
    }

    prop_assert!(engine.active_cycles().unwrap().is_empty());
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Ledger, availability and cycle invariants hold after every operation
    #[test]
    fn invariants_hold_under_random_operations(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let engine = Engine::new(MarketplaceConfig::development()).unwrap();
        let users: Vec<UserId> = (0..USERS)
            .map(|i| engine.register_user(&format!("user{i}")).unwrap())
            .collect();

        for op in &ops {
            apply(&engine, &users, op);
            check_invariants(&engine, &users)?;
        }
    }

    /// Completed exchanges move exactly the snapshot cost
    #[test]
    fn settlement_moves_snapshot_cost(funds in 30i64..200, condition in condition_strategy()) {
        let engine = Engine::new(MarketplaceConfig::development()).unwrap();
        let owner = engine.register_user("owner").unwrap();
        let buyer = engine.register_user("buyer").unwrap();
        engine.credit_points(buyer, Points::new(funds), EntryCategory::Purchased, "top up").unwrap();
        let item = engine.list_item(owner, "Dune", "Frank Herbert", condition).unwrap();
        let owner_before = engine.balance(owner).unwrap();

        let request = engine.create_exchange(item.id, buyer, None).unwrap();
        prop_assert_eq!(request.points_cost, item.point_value);
        engine.decide_exchange(request.id, owner, true).unwrap();

        prop_assert_eq!(engine.balance(buyer).unwrap(), Points::new(funds - item.point_value.value()));
        prop_assert_eq!(engine.balance(owner).unwrap(), Points::new(owner_before.value() + item.point_value.value()));
    }
}

/// The documented end-to-end scenarios.
mod scenarios {
    use super::*;

    // no listing reward, so owners start at exactly zero
    fn engine() -> Engine {
        let mut config = MarketplaceConfig::development();
        config.rewards.listing_reward = Points::zero();
        Engine::new(config).unwrap()
    }

    // two copies of the same work in good condition: 12 × 0.8 × (1 + 0.25) = 12
    fn twelve_point_item(engine: &Engine) -> (UserId, Item) {
        let first = engine.register_user("first owner").unwrap();
        let owner = engine.register_user("owner").unwrap();
        engine.list_item(first, "Emma", "Jane Austen", Condition::Good).unwrap();
        let item = engine.list_item(owner, "Emma", "Jane Austen", Condition::Good).unwrap();
        assert_eq!(item.point_value, Points::new(12));
        (owner, item)
    }

    #[test]
    fn excellent_single_copy_values_at_23() {
        let engine = engine();
        let ana = engine.register_user("ana").unwrap();
        let item = engine.list_item(ana, "Dune", "Frank Herbert", Condition::Excellent).unwrap();
        assert_eq!(item.point_value, Points::new(23));
        assert_eq!(engine.valuate(item.id).unwrap().points, Points::new(23));
    }

    #[test]
    fn insufficient_funds_leaves_no_trace() {
        let engine = engine();
        let (_, item) = twelve_point_item(&engine);
        let buyer = engine.register_user("buyer").unwrap();
        engine.credit_points(buyer, Points::new(10), EntryCategory::Purchased, "top up").unwrap();

        let err = engine.create_exchange(item.id, buyer, None).unwrap_err();
        assert_eq!(
            err,
            EngineError::InsufficientFunds {
                user_id: buyer,
                required: Points::new(12),
                available: Points::new(10),
            }
        );
        assert!(engine.item(item.id).unwrap().available);
        assert!(exchanges(&engine).is_empty());
    }

    #[test]
    fn mutual_request_is_circular() {
        let engine = engine();
        let a = engine.register_user("a").unwrap();
        let b = engine.register_user("b").unwrap();
        for user in [a, b] {
            engine.credit_points(user, Points::new(100), EntryCategory::Purchased, "top up").unwrap();
        }
        let item_a = engine.list_item(a, "Dune", "Frank Herbert", Condition::Good).unwrap();
        let item_b = engine.list_item(b, "Emma", "Jane Austen", Condition::Good).unwrap();

        engine.create_exchange(item_b.id, a, None).unwrap();
        let err = engine.create_exchange(item_a.id, b, None).unwrap_err();
        assert_eq!(err, EngineError::CircularExchange { requester: b, owner: a });
        assert_eq!(exchanges(&engine).len(), 1);
        assert!(engine.item(item_a.id).unwrap().available);
    }

    #[test]
    fn three_way_ring_rejected_unrelated_accepted() {
        let engine = engine();
        let users: Vec<UserId> = ["a", "b", "c", "d"]
            .iter()
            .map(|name| {
                let user = engine.register_user(name).unwrap();
                engine.credit_points(user, Points::new(100), EntryCategory::Purchased, "top up").unwrap();
                user
            })
            .collect();
        let (a, b, c) = (users[0], users[1], users[2]);
        let items: Vec<Item> = users
            .iter()
            .zip(["Dune", "Emma", "Beloved", "Ulysses"])
            .map(|(&owner, title)| engine.list_item(owner, title, "Someone", Condition::Fair).unwrap())
            .collect();

        engine.create_exchange(items[1].id, a, None).unwrap(); // a -> b
        engine.create_exchange(items[2].id, b, None).unwrap(); // b -> c

        let err = engine.create_exchange(items[0].id, c, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CircularExchange);
        assert!(engine.create_exchange(items[3].id, c, None).is_ok()); // c -> d
        assert!(engine.active_cycles().unwrap().is_empty());
    }

    #[test]
    fn approval_settles_atomically() {
        let engine = engine();
        let (owner, item) = twelve_point_item(&engine);
        let buyer = engine.register_user("buyer").unwrap();
        engine.credit_points(buyer, Points::new(50), EntryCategory::Purchased, "top up").unwrap();
        assert_eq!(engine.balance(owner).unwrap(), Points::zero());
        let entries_before = engine.store().read(|t| t.ledger().len()).unwrap();

        let request = engine.create_exchange(item.id, buyer, None).unwrap();
        let done = engine.decide_exchange(request.id, owner, true).unwrap();

        assert_eq!(done.status, ExchangeStatus::Completed);
        assert!(done.completed_at.is_some());
        assert_eq!(engine.balance(buyer).unwrap(), Points::new(38));
        assert_eq!(engine.balance(owner).unwrap(), Points::new(12));
        assert_eq!(engine.store().read(|t| t.ledger().len()).unwrap(), entries_before + 2);

        let item = engine.item(item.id).unwrap();
        assert_eq!(item.owner_id, buyer);
        assert!(item.available);

        let actions: Vec<ItemAction> = engine
            .item_history(item.id)
            .unwrap()
            .into_iter()
            .map(|h| h.action)
            .collect();
        assert_eq!(
            actions,
            vec![ItemAction::Listed, ItemAction::ExchangeRequested, ItemAction::OwnershipTransferred]
        );
    }

    #[test]
    fn approval_rechecks_funds() {
        let engine = engine();
        let (owner, item) = twelve_point_item(&engine);
        let buyer = engine.register_user("buyer").unwrap();
        engine.credit_points(buyer, Points::new(20), EntryCategory::Purchased, "top up").unwrap();
        let request = engine.create_exchange(item.id, buyer, None).unwrap();

        // balance drops below the frozen cost while the request is pending
        engine
            .post_entry(buyer, Points::new(-10), EntryCategory::Refunded, "chargeback", None)
            .unwrap();
        let err = engine.decide_exchange(request.id, owner, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
        assert_eq!(
            engine.get_exchange(request.id, owner).unwrap().status,
            ExchangeStatus::Pending
        );
        assert!(!engine.item(item.id).unwrap().available);

        // top up and retry
        engine.credit_points(buyer, Points::new(5), EntryCategory::Purchased, "top up").unwrap();
        let done = engine.decide_exchange(request.id, owner, true).unwrap();
        assert_eq!(done.status, ExchangeStatus::Completed);
        assert_eq!(engine.balance(buyer).unwrap(), Points::new(3));
    }

    #[test]
    fn pending_price_is_frozen() {
        let engine = engine();
        let (owner, item) = twelve_point_item(&engine);
        let buyer = engine.register_user("buyer").unwrap();
        engine.credit_points(buyer, Points::new(50), EntryCategory::Purchased, "top up").unwrap();
        let request = engine.create_exchange(item.id, buyer, None).unwrap();

        let err = engine.recalculate(item.id, owner).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(engine.item(item.id).unwrap().point_value, request.points_cost);
    }
}
