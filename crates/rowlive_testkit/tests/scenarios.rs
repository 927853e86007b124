//! End-to-end scenarios over the game store.

use rowlive_core::{
    Collection, Config, CoreError, Direction, Grid, GridSpec, Key, Lifecycle, LinkSpec, Listing,
    Log, LogSpec, Record, Search, TableSpec, Value,
};
use rowlive_store::{row, Identity, StoreGateway};
use rowlive_testkit::TestContext;
use std::sync::Arc;
use std::time::Duration;

fn players(game: &TestContext) -> Collection {
    Collection::load(game, TableSpec::new("players")).unwrap()
}

fn shares(game: &TestContext) -> Collection {
    Collection::load(game, TableSpec::new("shares")).unwrap()
}

// ============================================================================
// Collections
// ============================================================================

#[tokio::test(start_paused = true)]
async fn find_by_name_returns_branch() {
    let game = TestContext::game(Config::default());
    let players = players(&game);

    let found = players.find(&row! { "name" => "Ann" });

    assert!(found.is_branch());
    assert_eq!(found.keys(), vec![Key::from(2)]);
    assert_eq!(players.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn add_is_visible_before_insert_confirms() {
    let game = TestContext::game(Config::default());
    let players = players(&game);

    let cleo = players.add(row! { "name" => "Cleo" }).unwrap();

    assert_eq!(cleo.key(), Key::from(12));
    assert!(players.contains(12));
    assert_eq!(cleo.record().lifecycle(), Lifecycle::Pending);
    assert!(game.inserts("players").is_empty());

    game.settle().await;
    assert_eq!(cleo.record().lifecycle(), Lifecycle::Persisted);
    let inserted = game.inserts("players");
    assert_eq!(inserted.len(), 1);
    assert_eq!(inserted[0]["id"], Value::Integer(12));
    assert_eq!(inserted[0]["money"], Value::Integer(0));
    assert!(matches!(inserted[0]["joined"], Value::Timestamp(_)));
}

#[tokio::test(start_paused = true)]
async fn duplicate_key_issues_no_write() {
    let game = TestContext::game(Config::default());
    let players = players(&game);

    let err = players.add(row! { "id" => 11, "name" => "Bo again" }).unwrap_err();
    assert!(matches!(err, CoreError::DuplicateKey { ref key, .. } if key == "11"));

    game.settle().await;
    assert!(game.store.journal().is_empty());
}

#[tokio::test(start_paused = true)]
async fn branch_mutations_leave_root_untouched() {
    let game = TestContext::game(Config::default());
    let players = players(&game);

    let rich = players.search(&Search::new().term("money", rowlive_core::Comparator::Gt, 10));
    let ann_only = rich.find(&row! { "name" => "Ann" });

    assert_eq!(rich.len(), 2);
    assert_eq!(ann_only.len(), 1);
    assert_eq!(players.len(), 2);
    assert!(matches!(
        ann_only.add(row! { "name" => "Dee" }),
        Err(CoreError::BranchMutation { operation: "add", .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn kill_deletes_row() {
    let game = TestContext::game(Config::default());
    let players = players(&game);

    assert!(players.kill(11).unwrap());
    game.settle().await;

    assert_eq!(game.deletes("players"), vec![Identity::single("id", 11)]);
    assert_eq!(game.store.rows("players").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn sorted_keys_by_money() {
    let game = TestContext::game(Config::default());
    let players = players(&game);

    assert_eq!(
        players.sorted_keys(&[("money", Direction::Desc)]),
        vec![Key::from(2), Key::from(11)]
    );
    assert_eq!(players.sum("money"), 150.0);
}

// ============================================================================
// Records
// ============================================================================

#[tokio::test(start_paused = true)]
async fn burst_of_sets_issues_one_update() {
    let game = TestContext::game(Config::default());
    let players = players(&game);
    let ann = players.get(2).unwrap();

    for money in [1, 2, 3, 4, 5] {
        ann.set("money", money).unwrap();
        assert_eq!(ann.get("money"), Some(Value::Integer(money)));
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    assert!(game.updates("players").is_empty());

    game.settle().await;
    let updates = game.updates("players");
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, Identity::single("id", 2));
    assert_eq!(updates[0].1, row! { "money" => 5 });
    assert_eq!(game.stats().coalesced(), 4);
}

#[tokio::test(start_paused = true)]
async fn sets_separated_by_the_delay_each_write() {
    let game = TestContext::game(Config::default().write_delay(Duration::from_millis(100)));
    let players = players(&game);
    let bo = players.get(11).unwrap();

    bo.set("money", 1).unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    bo.set("money", 2).unwrap();
    game.settle().await;

    assert_eq!(game.updates("players").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn fetched_record_writes_back() {
    let game = TestContext::game(Config::default());
    let bo = Record::fetch(&game, "players", Identity::single("id", 11)).unwrap();

    bo.set("name", "Bob").unwrap();
    game.settle().await;

    let stored = game
        .store
        .read_one("players", &Identity::single("id", 11))
        .unwrap();
    assert_eq!(stored["name"], Value::from("Bob"));
}

// ============================================================================
// Links
// ============================================================================

#[tokio::test(start_paused = true)]
async fn new_share_joins_its_player() {
    let game = TestContext::game(Config::default());
    let players = players(&game);
    let shares = shares(&game);
    players
        .link(&shares, LinkSpec::new("player").attribute("shareholders"))
        .unwrap();

    let ann = players.get(2).unwrap();
    assert_eq!(ann.joined("shareholders").unwrap().len(), 1);

    let share = shares.add(row! { "player" => 2, "owner" => 11 }).unwrap();

    let holders = ann.joined("shareholders").unwrap();
    assert_eq!(holders.len(), 2);
    assert!(holders.contains(share.key()));
    assert!(Arc::ptr_eq(&share.parent("player").unwrap(), &ann));
}

#[tokio::test(start_paused = true)]
async fn two_links_between_the_same_tables() {
    let game = TestContext::game(Config::default());
    let players = players(&game);
    let shares = shares(&game);

    players
        .link(&shares, LinkSpec::new("player").attribute("shareholders"))
        .unwrap();
    players
        .link(&shares, LinkSpec::new("owner").attribute("investments"))
        .unwrap();

    let bo = players.get(11).unwrap();
    assert_eq!(bo.joined("shareholders").unwrap().keys(), vec![Key::from(2)]);
    assert_eq!(bo.joined("investments").unwrap().keys(), vec![Key::from(1)]);

    let first = shares.get(1).unwrap();
    assert_eq!(first.parent("player").unwrap().key(), Key::from(2));
    assert_eq!(first.parent("owner").unwrap().key(), Key::from(11));
}

#[tokio::test(start_paused = true)]
async fn joined_branch_queries_stay_local() {
    let game = TestContext::game(Config::default());
    let players = players(&game);
    let shares = shares(&game);
    players
        .link(&shares, LinkSpec::new("owner").attribute("investments"))
        .unwrap();
    shares
        .add(row! { "player" => 11, "owner" => 2, "amount" => 7 })
        .unwrap();

    let investments = players.get(2).unwrap().joined("investments").unwrap();
    assert_eq!(investments.sum("amount"), 12.0);
    assert_eq!(investments.count(&row! { "player" => 11 }), 2);
    assert_eq!(shares.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn self_linked_table_can_be_mirrored_again() {
    let game = TestContext::game(Config::default());
    let players = players(&game);
    players
        .link(&players, LinkSpec::new("money").attribute("same").no_parent())
        .unwrap();
    drop(players);

    let players = Collection::load(&game, TableSpec::new("players")).unwrap();
    assert_eq!(players.len(), 2);
}

// ============================================================================
// Logs and grids
// ============================================================================

#[tokio::test(start_paused = true)]
async fn click_log_counts_partial_keys() {
    let game = TestContext::game(Config::default());
    let clicks = Log::open(&game, LogSpec::new("clicks", ["publisher", "advertiser"])).unwrap();

    clicks.add(row! { "publisher" => 100, "advertiser" => 200 }).unwrap();
    clicks.add(row! { "publisher" => 100, "advertiser" => 200 }).unwrap();

    assert_eq!(
        clicks
            .count(&[("publisher", Value::from(100)), ("advertiser", Value::from(200))])
            .unwrap(),
        2
    );
    assert_eq!(clicks.count(&[("publisher", Value::from(100))]).unwrap(), 2);

    game.settle().await;
    let stored = game.inserts("clicks");
    assert_eq!(stored.len(), 2);
    assert!(matches!(stored[0]["time"], Value::Timestamp(_)));
}

#[tokio::test(start_paused = true)]
async fn reopened_log_rebuilds_counts() {
    let game = TestContext::game(Config::default());
    let clicks = Log::open(&game, LogSpec::new("clicks", ["publisher", "advertiser"])).unwrap();
    for advertiser in [1, 2, 2] {
        clicks
            .add(row! { "publisher" => 9, "advertiser" => advertiser })
            .unwrap();
    }
    game.settle().await;
    let before = clicks.snapshot();
    drop(clicks);

    let reopened = Log::open(&game, LogSpec::new("clicks", ["publisher", "advertiser"])).unwrap();
    assert_eq!(reopened.snapshot(), before);
    let Listing::Values(values) = reopened
        .list(&[("publisher", Value::from(9))], Some("advertiser"))
        .unwrap()
    else {
        panic!("expected advertiser values");
    };
    assert_eq!(values["2"].total(), 2);
}

#[tokio::test(start_paused = true)]
async fn daily_grid_accumulates() {
    let game = TestContext::game(Config::default());
    let daily = Grid::load(&game, GridSpec::new("daily", ["day", "campaign"])).unwrap();

    let cell = daily
        .add(row! { "day" => "mon", "campaign" => 1, "views" => 5 })
        .unwrap();
    daily
        .add(row! { "day" => "mon", "campaign" => 1, "views" => 6 })
        .unwrap();
    assert_eq!(cell.get("views"), Some(Value::Integer(6)));

    game.settle().await;
    let rows = game.store.rows("daily");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["views"], Value::Integer(6));
}

// ============================================================================
// Context lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn async_loading_runs_callbacks() {
    let game = TestContext::game(Config::default().async_loading(true));
    let (tx, rx) = tokio::sync::oneshot::channel();
    let players = Collection::load_with(&game, TableSpec::new("players"), move |outcome| {
        let _ = tx.send(outcome.is_ok());
    })
    .unwrap();

    assert!(rx.await.unwrap());
    assert_eq!(players.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn async_load_failure_reaches_callback() {
    let game = TestContext::game(Config::default().async_loading(true));
    let (tx, rx) = tokio::sync::oneshot::channel();
    Collection::load_with(&game, TableSpec::new("missing"), move |outcome| {
        let _ = tx.send(outcome);
    })
    .unwrap();

    assert!(matches!(rx.await.unwrap(), Err(CoreError::BackingStore(_))));
    assert_eq!(game.take_failures().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn close_flushes_pending_writes() {
    let game = TestContext::game(Config::default());
    let players = players(&game);
    players.get(2).unwrap().set("money", 999).unwrap();

    game.close().await.unwrap();

    assert_eq!(game.updates("players").len(), 1);
    assert_eq!(
        players.get(2).unwrap().set("money", 1),
        Err(CoreError::ContextClosed)
    );
}

#[tokio::test(start_paused = true)]
async fn explicit_flush_writes_immediately() {
    let game = TestContext::game(Config::default());
    let players = players(&game);
    let ann = players.get(2).unwrap();

    ann.set("money", 10).unwrap();
    ann.set("name", "Annie").unwrap();
    ann.record().flush().unwrap();

    let updates = game.updates("players");
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].1, row! { "money" => 10, "name" => "Annie" });
}
