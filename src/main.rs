//! Case Battle Server
//!
//! Runs a demo battle end to end against in-process backends and replays
//! the stored record to prove every draw.

use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::info;
use tracing_subscriber::EnvFilter;

use case_battle::{
    backend::{MemoryLedger, MemoryRecords},
    catalog::{Bot, CaseEntry, CaseItem},
    config::BattleConfig,
    core::{Clock, Money, SystemClock, VirtualClock},
    fairness::{draw::ROLL_MAX, replay_battle},
    network::{auth::StaticIdentity, BroadcastFeed, Dispatcher},
    BattleService, Collaborators, VERSION,
};

fn demo_item(id: i64, name: &str, cents: i64, min_rand: u32, max_rand: u32) -> CaseItem {
    CaseItem {
        id,
        name: name.to_string(),
        price: Money::from_cents(cents),
        min_rand,
        max_rand,
        image: None,
    }
}

fn demo_catalog() -> Vec<CaseEntry> {
    vec![
        CaseEntry {
            id: 1,
            name: "Starter".into(),
            price: Money::from_cents(250),
            image: None,
            items: vec![
                demo_item(11, "Sticker", 50, 0, 699_999),
                demo_item(12, "Knife", 500, 700_000, 969_999),
                demo_item(13, "Gloves", 2500, 970_000, ROLL_MAX),
            ],
        },
        CaseEntry {
            id: 2,
            name: "Budget".into(),
            price: Money::from_cents(100),
            image: None,
            items: vec![
                demo_item(21, "Keychain", 20, 0, 899_999),
                demo_item(22, "Skin", 400, 900_000, ROLL_MAX),
            ],
        },
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Case Battle Server v{}", VERSION);

    let realtime = std::env::var("DEMO_REALTIME").is_ok();
    let (config, clock): (BattleConfig, Arc<dyn Clock>) = if realtime {
        (BattleConfig::from_env(), Arc::new(SystemClock))
    } else {
        (BattleConfig::instant(), Arc::new(VirtualClock::new()))
    };

    let bots = vec![Bot { id: 1, name: "House".into(), avatar: None }];
    let records = Arc::new(MemoryRecords::with_catalog(demo_catalog(), bots));
    let ledger = Arc::new(MemoryLedger::with_balances([(1, Money::from_units(50)), (2, Money::from_units(50))]));
    let identity = StaticIdentity::new(ledger.clone())
        .with_user("alice", 1, "alice")
        .with_user("bob", 2, "bob");
    let feed = Arc::new(BroadcastFeed::new(64));

    let service = BattleService::new(
        config,
        Collaborators {
            battles: records.clone(),
            catalog: records.clone(),
            ledger: ledger.clone(),
            identity: Arc::new(identity),
            feed,
            clock,
        },
    );
    let resumed = service.start().await.context("loading live battles")?;
    info!("{} live battles loaded", resumed);

    let dispatcher = Dispatcher::new(service.clone());

    info!("=== Starting Demo Battle ===");
    let created = dispatcher
        .handle_text(r#"{"type":"newBattle","token":"alice","playerType":"1v1","options":["jackpot"],"cases":[{"1":2},{"2":1}]}"#)
        .await;
    if !created.is_ok() {
        bail!("create failed: {}", created.to_json()?);
    }
    let id = created.data["battle"]["id"]
        .as_i64()
        .context("create response has no battle id")?;
    info!("Battle {} created, commitment {}", id, created.data["battle"]["serverSeedHash"]);

    let joined = dispatcher
        .handle_text(&format!(r#"{{"type":"join","token":"bob","battleId":{id}}}"#))
        .await;
    if !joined.is_ok() {
        bail!("join failed: {}", joined.to_json()?);
    }

    service.tasks().wait_idle().await;

    // Print final results
    info!("=== Battle Results ===");
    let stored = records.stored(id).context("battle record missing")?;
    if let Some(winner) = &stored.summary.winner {
        info!("Winning team {} takes {} ({:?})", winner.team, winner.total, winner.seats);
    }
    for user in [1, 2] {
        info!("User {} balance: {}", user, ledger.balance_of(user).unwrap_or(Money::ZERO));
    }

    // Verify fairness by replaying
    info!("=== Verifying Draws ===");
    let report = replay_battle(&stored).context("replay failed")?;
    info!(
        "FAIRNESS VERIFIED: {} rounds, {} draws match seed {}",
        report.rounds, report.draws, stored.fair.server_seed
    );

    Ok(())
}
