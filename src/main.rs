//! Goods-exchange marketplace simulation.
//!
//! Walks the engine through listing, valuation, exchange settlement, cycle vetoes,
//! disputes, oracle fallback and a concurrent request burst.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use swap_core::*;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    println!("Goods-Exchange Marketplace Simulation");
    println!("Valuation, Cycle Guard, Ledger, Exchange Lifecycle\n");

    scenario_1_listing_and_valuation();
    scenario_2_settlement();
    scenario_3_insufficient_funds();
    scenario_4_cycle_veto();
    scenario_5_release_and_alerts();
    scenario_6_disputes();
    scenario_7_oracle_fallback();
    scenario_8_concurrent_requests();

    println!("\nAll simulations completed successfully.");
}

fn new_engine() -> Engine {
    Engine::new(Environment::Development.config()).unwrap()
}

fn funded_user(engine: &Engine, name: &str, points: i64) -> UserId {
    let user = engine.register_user(name).unwrap();
    engine
        .credit_points(user, Points::new(points), EntryCategory::Purchased, "top up")
        .unwrap();
    user
}

/// Condition, demand and rarity drive the price.
fn scenario_1_listing_and_valuation() {
    println!("Scenario 1: Listing and Valuation\n");

    let engine = new_engine();
    let ana = engine.register_user("ana").unwrap();
    let ben = engine.register_user("ben").unwrap();

    let dune = engine.list_item(ana, "Dune", "Frank Herbert", Condition::Excellent).unwrap();
    println!("  Ana lists Dune (excellent), priced at {}", dune.point_value);
    println!("  Ana's balance after listing reward: {}", engine.balance(ana).unwrap());

    engine.list_item(ben, "Dune", "Frank Herbert", Condition::Excellent).unwrap();
    let second_copy = engine.valuate(dune.id).unwrap();
    println!(
        "  A second copy appears: rarity {} -> price {}",
        second_copy.rarity_score.round_dp(2),
        second_copy.points
    );

    for i in 0..10 {
        let fan = engine.register_user(&format!("fan{i}")).unwrap();
        engine.add_to_wishlist(fan, dune.id).unwrap();
    }
    let revalued = engine.recalculate(dune.id, ana).unwrap();
    println!(
        "  Ten wishlists later Ana recalculates: {} -> {} (demand {})\n",
        revalued.previous,
        revalued.current,
        revalued.valuation.demand_score.round_dp(2)
    );
}

/// Approval debits, credits and transfers in one step.
fn scenario_2_settlement() {
    println!("Scenario 2: Approval and Settlement\n");

    let engine = new_engine();
    let owner = engine.register_user("owner").unwrap();
    let buyer = funded_user(&engine, "buyer", 50);
    let item = engine.list_item(owner, "Emma", "Jane Austen", Condition::Good).unwrap();

    let request = engine.create_exchange(item.id, buyer, Some("Is the cover intact?")).unwrap();
    println!("  Buyer requests Emma for {}, status {}", request.points_cost, request.status);

    let done = engine.decide_exchange(request.id, owner, true).unwrap();
    let item = engine.item(item.id).unwrap();
    println!("  Owner approves, status {}", done.status);
    println!("  Buyer balance: {}", engine.balance(buyer).unwrap());
    println!("  Owner balance: {} (10 listing + sale)", engine.balance(owner).unwrap());
    println!("  Item now owned by {}\n", item.owner_id);
}

/// A request the requester cannot pay for never gets written.
fn scenario_3_insufficient_funds() {
    println!("Scenario 3: Insufficient Funds\n");

    let engine = new_engine();
    let owner = engine.register_user("owner").unwrap();
    let buyer = funded_user(&engine, "buyer", 5);
    let item = engine.list_item(owner, "Emma", "Jane Austen", Condition::Good).unwrap();

    match engine.create_exchange(item.id, buyer, None) {
        Err(e) => println!("  Refused: {e}"),
        Ok(_) => println!("  Unexpectedly accepted"),
    }
    println!("  Item still available: {}\n", engine.item(item.id).unwrap().available);
}

/// Mutual and three-way rings of pending requests are vetoed.
fn scenario_4_cycle_veto() {
    println!("Scenario 4: Cycle Guard\n");

    let engine = new_engine();
    let a = funded_user(&engine, "a", 100);
    let b = funded_user(&engine, "b", 100);
    let c = funded_user(&engine, "c", 100);
    let item_a = engine.list_item(a, "Ulysses", "James Joyce", Condition::Fair).unwrap();
    let item_b = engine.list_item(b, "Beloved", "Toni Morrison", Condition::Fair).unwrap();
    let item_c = engine.list_item(c, "Middlemarch", "George Eliot", Condition::Fair).unwrap();

    engine.create_exchange(item_b.id, a, None).unwrap();
    engine.create_exchange(item_c.id, b, None).unwrap();
    println!("  Pending: a -> b, b -> c");

    match engine.create_exchange(item_a.id, c, None) {
        Err(e) => println!("  c -> a refused: {e}"),
        Ok(_) => println!("  c -> a unexpectedly accepted"),
    }
    println!("  Active cycles: {}\n", engine.active_cycles().unwrap().len());
}

/// Reject and cancel hand the item back and tell the wishlist.
fn scenario_5_release_and_alerts() {
    println!("Scenario 5: Release and Wishlist Alerts\n");

    let alerts = Arc::new(AlertLog::new());
    let engine = new_engine().with_notifier(alerts.clone());
    let owner = engine.register_user("owner").unwrap();
    let buyer = funded_user(&engine, "buyer", 100);
    let fan = engine.register_user("fan").unwrap();
    let item = engine.list_item(owner, "Emma", "Jane Austen", Condition::Good).unwrap();
    engine.add_to_wishlist(fan, item.id).unwrap();

    let first = engine.create_exchange(item.id, buyer, None).unwrap();
    engine.decide_exchange(first.id, owner, false).unwrap();
    let second = engine.create_exchange(item.id, buyer, None).unwrap();
    engine.cancel_exchange(second.id, buyer).unwrap();

    println!("  One rejection, one cancellation");
    println!("  Fan received {} alerts", alerts.alerts_for(fan).len());
    println!("  Buyer balance untouched: {}\n", engine.balance(buyer).unwrap());
}

/// Disputes move a settled exchange to DISPUTED; moderation closes them.
fn scenario_6_disputes() {
    println!("Scenario 6: Disputes\n");

    let engine = new_engine();
    let owner = engine.register_user("owner").unwrap();
    let buyer = funded_user(&engine, "buyer", 50);
    let item = engine.list_item(owner, "Emma", "Jane Austen", Condition::Good).unwrap();
    let request = engine.create_exchange(item.id, buyer, None).unwrap();
    engine.decide_exchange(request.id, owner, true).unwrap();

    let dispute = engine
        .file_dispute(request.id, buyer, "condition_mismatch", "Listed as good, spine is broken")
        .unwrap();
    println!("  Buyer files {}", dispute.id);
    if let Err(e) = engine.file_dispute(request.id, owner, "other", "") {
        println!("  Second dispute refused: {e}");
    }

    engine.close_dispute(dispute.id, DisputeStatus::Resolved).unwrap();
    engine
        .post_entry(buyer, Points::new(5), EntryCategory::Refunded, "partial refund", Some(request.id))
        .unwrap();
    println!("  Resolved with a 5 point refund, buyer balance {}\n", engine.balance(buyer).unwrap());
}

struct SlowCatalog;

impl PricingOracle for SlowCatalog {
    fn name(&self) -> &str {
        "slow-catalog"
    }

    fn suggest_points(&self, _query: &PricingQuery) -> Result<i64, OracleError> {
        thread::sleep(Duration::from_millis(500));
        Ok(40)
    }
}

/// A slow oracle never stalls a listing.
fn scenario_7_oracle_fallback() {
    println!("Scenario 7: Oracle Fallback\n");

    let catalog = StaticOracle::new("catalog").with_price("Dune", "Frank Herbert", 30);
    let engine = Engine::new(MarketplaceConfig::default())
        .unwrap()
        .with_oracle(Arc::new(catalog));
    let ana = engine.register_user("ana").unwrap();
    let dune = engine.list_item(ana, "Dune", "Frank Herbert", Condition::Good).unwrap();
    println!("  Catalog oracle suggests 30, Dune priced at {}", dune.point_value);

    let mut config = MarketplaceConfig::default();
    config.oracle.timeout_ms = 50;
    let engine = Engine::new(config).unwrap().with_oracle(Arc::new(SlowCatalog));
    let ana = engine.register_user("ana").unwrap();
    let item = engine.list_item(ana, "Dune", "Frank Herbert", Condition::Good).unwrap();
    let valuation = engine.valuate(item.id).unwrap();
    println!(
        "  Slow oracle times out, priced at {} from {:?}\n",
        item.point_value, valuation.base_source
    );
}

/// Many threads race for the same items against one engine.
fn scenario_8_concurrent_requests() {
    println!("Scenario 8: Concurrent Requests\n");

    let engine = Arc::new(new_engine());
    let owner = engine.register_user("owner").unwrap();
    let items: Vec<ItemId> = (0..5)
        .map(|i| {
            engine
                .list_item(owner, &format!("Volume {i}"), "Anon", Condition::Fair)
                .unwrap()
                .id
        })
        .collect();

    let buyers: Vec<UserId> = (0..20)
        .map(|i| funded_user(&engine, &format!("buyer{i}"), 100))
        .collect();

    let handles: Vec<_> = buyers
        .into_iter()
        .enumerate()
        .map(|(i, buyer)| {
            let engine = Arc::clone(&engine);
            let item = items[i % items.len()];
            thread::spawn(move || engine.create_exchange(item, buyer, None).is_ok())
        })
        .collect();

    let accepted = handles
        .into_iter()
        .filter_map(|h| h.join().ok())
        .filter(|ok| *ok)
        .count();

    println!("  20 buyers raced for 5 items, {accepted} requests accepted");
    println!("  Ledger divergences: {}", engine.verify_ledger().unwrap().len());
    println!("  Events generated: {}\n", engine.events().len());
}
