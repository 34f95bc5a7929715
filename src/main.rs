// src/main.rs
use arb_watch::broadcast::{BroadcastSink, VenueSnapshot};
use arb_watch::config::Config;
use arb_watch::detector::{DetectorSettings, OpportunityDetector};
use arb_watch::domain::errors::AppResult;
use arb_watch::execution::loss_guard::LossProtectionMonitor;
use arb_watch::execution::{ExecutionCoordinator, ExecutionSettings};
use arb_watch::feed::book_store::BookStore;
use arb_watch::feed::poll::spawn_poll_feed;
use arb_watch::feed::rate::RateNormalizer;
use arb_watch::feed::stream::spawn_stream_feed;
use arb_watch::feed::FeedHealth;
use arb_watch::persistence::sqlite::SqliteStore;
use arb_watch::persistence::PersistenceGateway;
use arb_watch::tracker::DiffTracker;
use arb_watch::venue::binance::BinanceFeed;
use arb_watch::venue::nobitex::{NobitexFeed, NobitexGateway};
use arb_watch::venue::wallex::{WallexFeed, WallexGateway};
use arb_watch::venue::{TargetVenue, VenueMappings};

use chrono::Utc;
use std::sync::Arc;
use tokio::signal::ctrl_c;
use tokio::sync::Mutex;
use tokio::time::Duration;

#[tokio::main]
async fn main() -> AppResult<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    config.init_logging()?;

    log::info!("Starting arb_watch v{}", env!("CARGO_PKG_VERSION"));

    // Load the precomputed common-symbol mapping
    let mappings = VenueMappings::load(config.detector.symbol_map_file.as_deref())?;
    let reference_symbols = mappings.reference_symbols();
    log::info!("Watching {} reference symbols", reference_symbols.len());

    // Shared state: reference books and the cross-rate snapshot
    let reference_books = Arc::new(BookStore::new("binance"));
    let rate = Arc::new(RateNormalizer::new(config.detector.default_usdt_rate));

    // Ranking persistence
    let store: Arc<dyn PersistenceGateway> =
        Arc::new(SqliteStore::open(&config.persistence.sqlite_path)?);

    // Outbound snapshots; the push transport subscribes here
    let sink = BroadcastSink::new(100);
    spawn_snapshot_logger(&sink);

    // Reference venue feed: REST snapshot first so the detector has prices
    // before the streams catch up, then one stream per symbol batch
    let binance = Arc::new(BinanceFeed::new(
        &config.venues.binance_ws_url,
        &config.venues.binance_api_url,
    ));
    let initial = binance.initial_books(&reference_symbols).await;
    log::info!("binance: loaded {} initial books", initial.len());
    reference_books.replace_all(initial);

    let binance_health = Arc::new(FeedHealth::new());
    spawn_stream_feed(
        binance.clone(),
        reference_symbols.clone(),
        reference_books.clone(),
        binance_health,
    );

    // Target venue: wallex (stream mode, also sources the cross rate)
    let wallex_books = Arc::new(BookStore::new("wallex"));
    let wallex_health = Arc::new(FeedHealth::new());
    let wallex_feed = Arc::new(WallexFeed::new(&config.venues.wallex_ws_url, rate.clone()));
    spawn_stream_feed(
        wallex_feed,
        mappings.wallex.venue_symbols(),
        wallex_books.clone(),
        wallex_health.clone(),
    );
    let wallex = Arc::new(TargetVenue {
        name: "wallex".to_string(),
        mapping: mappings.wallex.clone(),
        books: wallex_books,
        gateway: Arc::new(WallexGateway::new(
            &config.venues.wallex_api_url,
            &config.venues.wallex_api_key,
        )),
        health: wallex_health,
    });

    // Target venue: nobitex (poll mode)
    let nobitex_books = Arc::new(BookStore::new("nobitex"));
    let nobitex_health = Arc::new(FeedHealth::new());
    let nobitex_feed = Arc::new(NobitexFeed::new(
        &config.venues.nobitex_api_url,
        mappings.nobitex.venue_symbols(),
    ));
    let _nobitex_poll = spawn_poll_feed(
        nobitex_feed,
        nobitex_books.clone(),
        nobitex_health.clone(),
        Duration::from_secs(config.detector.cycle_secs),
    );
    let nobitex = Arc::new(TargetVenue {
        name: "nobitex".to_string(),
        mapping: mappings.nobitex.clone(),
        books: nobitex_books,
        gateway: Arc::new(NobitexGateway::new(
            &config.venues.nobitex_api_url,
            &config.venues.nobitex_api_token,
        )),
        health: nobitex_health,
    });

    // Detection pipeline, shared across target venues
    let detector = Arc::new(OpportunityDetector::new(
        reference_books,
        rate.clone(),
        DetectorSettings {
            min_execution_percent: config.detector.min_execution_percent,
            min_notional_tmn: config.detector.min_notional_tmn,
            snapshot_len: config.detector.snapshot_len,
        },
    ));

    let monitor = Arc::new(LossProtectionMonitor::new(Duration::from_secs(
        config.execution.loss_poll_secs,
    )));
    let coordinator = Arc::new(ExecutionCoordinator::new(
        ExecutionSettings {
            max_loss_percent: config.execution.max_loss_percent,
            min_sell_notional_tmn: config.execution.min_sell_notional_tmn,
            fill_poll_attempts: config.execution.fill_poll_attempts,
            fill_poll_interval: Duration::from_millis(config.execution.fill_poll_interval_ms),
        },
        rate,
        monitor.clone(),
    ));

    if config.execution.auto_execute {
        log::info!("Auto-execution is enabled");
    } else {
        log::info!("Auto-execution is disabled; opportunities are tracked only");
    }

    // One independent cycle scheduler per target venue
    for venue in [wallex, nobitex] {
        spawn_venue_cycles(
            detector.clone(),
            venue,
            store.clone(),
            sink.clone(),
            coordinator.clone(),
            config.execution.auto_execute,
            Duration::from_secs(config.detector.cycle_secs),
        )
        .await;
    }

    // Wait for shutdown signal
    log::info!("Watcher is running. Press Ctrl+C to stop.");
    ctrl_c().await.expect("Failed to listen for control-c event");

    log::info!("Shutting down...");
    monitor.stop_all();

    log::info!("Shutdown complete. Goodbye!");
    Ok(())
}

/// Start the detection cycle loop for one target venue. Cycles are spawned
/// off the tick so a stalled cycle never delays the next one; the tracker
/// mutex keeps each update a single logical step.
async fn spawn_venue_cycles(
    detector: Arc<OpportunityDetector>,
    venue: Arc<TargetVenue>,
    store: Arc<dyn PersistenceGateway>,
    sink: BroadcastSink,
    coordinator: Arc<ExecutionCoordinator>,
    auto_execute: bool,
    period: Duration,
) {
    // Restore rankings persisted by earlier runs
    let tracker = match store.load(&venue.name).await {
        Ok(records) => {
            log::info!("{}: restored {} tracked records", venue.name, records.len());
            DiffTracker::from_records(&venue.name, records)
        }
        Err(e) => {
            log::warn!("{}: could not restore rankings: {}", venue.name, e);
            DiffTracker::new(&venue.name)
        }
    };
    let tracker = Arc::new(Mutex::new(tracker));

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            let detector = detector.clone();
            let venue = venue.clone();
            let store = store.clone();
            let sink = sink.clone();
            let coordinator = coordinator.clone();
            let tracker = tracker.clone();

            tokio::spawn(async move {
                run_cycle(
                    detector,
                    venue,
                    store,
                    sink,
                    coordinator,
                    tracker,
                    auto_execute,
                )
                .await;
            });
        }
    });
}

/// One detection cycle for one target venue.
async fn run_cycle(
    detector: Arc<OpportunityDetector>,
    venue: Arc<TargetVenue>,
    store: Arc<dyn PersistenceGateway>,
    sink: BroadcastSink,
    coordinator: Arc<ExecutionCoordinator>,
    tracker: Arc<Mutex<DiffTracker>>,
    auto_execute: bool,
) {
    if !venue.is_connected() {
        log::debug!(
            "{}: feed disconnected, comparing against last known books",
            venue.name
        );
    }

    let output = detector.detect(&venue);

    if let Some(best) = output.snapshot.first() {
        log::debug!("{}: best gap this cycle: {}", venue.name, best.description);
    }

    // fold + sweep + persist + publish as one logical step per cycle
    {
        let mut tracker = tracker.lock().await;
        tracker.apply_rows(&output.all_rows, Utc::now());

        if let Err(e) = store.save(&venue.name, &tracker.records()).await {
            log::error!("{}: failed to persist rankings: {}", venue.name, e);
        }

        sink.publish(VenueSnapshot {
            venue: venue.name.clone(),
            generated_at: Utc::now(),
            latest: output.snapshot,
            rankings: tracker.all_rankings(),
        });
    }

    if !auto_execute {
        return;
    }

    // execution runs off the cycle task; the per-symbol guard inside the
    // coordinator keeps concurrent cycles from doubling up
    for row in output.candidates {
        let coordinator = coordinator.clone();
        let venue = venue.clone();
        tokio::spawn(async move {
            match coordinator.execute(&venue, &row).await {
                Ok(Some(position)) => {
                    log::info!(
                        "{}: executed {} ({}%), watching position {}",
                        venue.name,
                        row.symbol,
                        row.percent_diff,
                        position.key()
                    );
                }
                Ok(None) => {
                    log::debug!("{}: {} not executed", venue.name, row.symbol);
                }
                Err(e) => {
                    log::error!("{}: execution of {} failed: {}", venue.name, row.symbol, e);
                }
            }
        });
    }
}

/// Stand-in subscriber for the external push layer: reports each snapshot.
fn spawn_snapshot_logger(sink: &BroadcastSink) {
    let mut rx = sink.subscribe();
    tokio::spawn(async move {
        while let Ok(snapshot) = rx.recv().await {
            log::info!(
                "{}: {} live opportunities, rankings {:?}",
                snapshot.venue,
                snapshot.latest.len(),
                snapshot
                    .rankings
                    .iter()
                    .map(|(bucket, records)| (bucket.as_str(), records.len()))
                    .collect::<Vec<_>>()
            );
        }
    });
}
