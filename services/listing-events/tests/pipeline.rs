//! End-to-end pipeline tests: ingest, poll, acknowledge, archive.

use chrono::{NaiveDate, TimeZone, Utc};
use listing_events::clock::FixedCalendar;
use listing_events::config::PipelineConfig;
use listing_events::event::LogKind;
use listing_events::listing::{CardListing, CardListingOrder, CardListingPrice};
use listing_events::sink::{ListingDataSink, LocalArchiveStorage};
use listing_events::store::{ListingEventStore, PURPOSE_DOMAIN};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use types::ids::CardExternalId;
use types::numeric::NaturalNumber;
use types::season::SeasonYear;
use uuid::Uuid;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn season() -> SeasonYear {
    SeasonYear::new(2024).unwrap()
}

fn card(n: u128) -> CardExternalId {
    CardExternalId::from_uuid(Uuid::from_u128(n))
}

fn price(day: u32, buy: u32, sell: u32) -> CardListingPrice {
    CardListingPrice {
        date: NaiveDate::from_ymd_opt(2024, 4, day).unwrap(),
        best_buy_price: NaturalNumber::new(buy),
        best_sell_price: NaturalNumber::new(sell),
    }
}

fn order(day: u32, hour: u32, amount: u32) -> CardListingOrder {
    CardListingOrder {
        placed_at: Utc.with_ymd_and_hms(2024, 4, day, hour, 0, 0).unwrap(),
        price: NaturalNumber::new(amount),
        sequence_number: 0,
    }
}

fn listing(
    card: CardExternalId,
    prices: Vec<CardListingPrice>,
    orders: Vec<CardListingOrder>,
) -> CardListing {
    CardListing {
        listing_name: "Ace Starter".to_string(),
        best_buy_price: NaturalNumber::new(10),
        best_sell_price: NaturalNumber::new(20),
        card_external_id: card,
        historical_prices: prices,
        recent_orders: orders,
    }
}

/// Two price observations are ingested, polled grouped under the card
/// in order, and re-ingesting them appends nothing new.
#[test]
fn test_ingest_poll_acknowledge_end_to_end() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let store = ListingEventStore::open(tmp.path(), PipelineConfig::default());
    let cancel = CancellationToken::new();

    let observation = listing(
        card(1),
        vec![price(1, 10, 20), price(2, 12, 22)],
        Vec::new(),
    );
    let summary = store
        .append_new_prices_and_orders(season(), &observation, &cancel)
        .unwrap();
    assert_eq!(summary.prices_appended, 2);

    let polled = store
        .poll_new_prices(season(), PURPOSE_DOMAIN, store.config().poll_batch_size, &cancel)
        .unwrap();
    let rows = polled.prices.get(&card(1)).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(2024, 4, 1).unwrap());
    assert_eq!(rows[0].best_buy_price, NaturalNumber::new(10));
    assert_eq!(rows[1].date, NaiveDate::from_ymd_opt(2024, 4, 2).unwrap());
    assert_eq!(rows[1].best_sell_price, NaturalNumber::new(22));

    store
        .acknowledge_prices(season(), PURPOSE_DOMAIN, &polled.checkpoint)
        .unwrap();

    // Re-ingesting the same observation appends zero events
    let again = store
        .append_new_prices_and_orders(season(), &observation, &cancel)
        .unwrap();
    assert_eq!(again.prices_appended, 0);

    let after = store
        .poll_new_prices(season(), PURPOSE_DOMAIN, 100, &cancel)
        .unwrap();
    assert!(after.prices.is_empty());
}

/// A crash before acknowledgement redelivers the batch; nothing is
/// lost across partial polls.
#[test]
fn test_at_least_once_redelivery_without_loss() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let store = ListingEventStore::open(tmp.path(), PipelineConfig::default());
    let cancel = CancellationToken::new();

    store
        .append_new_prices_and_orders(
            season(),
            &listing(card(1), (1..=6).map(|d| price(d, d + 10, d + 20)).collect(), Vec::new()),
            &cancel,
        )
        .unwrap();

    // Partial poll, never acknowledged (simulated crash)
    let lost = store
        .poll_new_prices(season(), PURPOSE_DOMAIN, 4, &cancel)
        .unwrap();
    assert_eq!(lost.prices.get(&card(1)).map(Vec::len), Some(4));

    // Replaying from the last acknowledged checkpoint sees everything
    let mut seen = 0;
    loop {
        let polled = store
            .poll_new_prices(season(), PURPOSE_DOMAIN, 4, &cancel)
            .unwrap();
        let count: usize = polled.prices.values().map(Vec::len).sum();
        if count == 0 {
            break;
        }
        seen += count;
        store
            .acknowledge(season(), LogKind::Prices, PURPOSE_DOMAIN, &polled.checkpoint)
            .unwrap();
    }
    assert_eq!(seen, 6);
}

/// The store's state survives reopening: cursors hold, the dedup index
/// still rejects seen keys, and ids keep increasing.
#[test]
fn test_pipeline_state_survives_restart() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let observation = listing(card(1), vec![price(1, 10, 20)], vec![order(1, 9, 50)]);

    {
        let store = ListingEventStore::open(tmp.path(), PipelineConfig::default());
        store
            .append_new_prices_and_orders(season(), &observation, &cancel)
            .unwrap();
        let polled = store
            .poll_new_prices(season(), PURPOSE_DOMAIN, 100, &cancel)
            .unwrap();
        store
            .acknowledge(season(), LogKind::Prices, PURPOSE_DOMAIN, &polled.checkpoint)
            .unwrap();
    }

    let reopened = ListingEventStore::open(tmp.path(), PipelineConfig::default());
    // Duplicate observation is still rejected after restart
    let summary = reopened
        .append_new_prices_and_orders(season(), &observation, &cancel)
        .unwrap();
    assert_eq!(summary.prices_appended, 0);
    assert_eq!(summary.orders_appended, 0);

    // The domain cursor did not rewind
    let polled = reopened
        .poll_new_prices(season(), PURPOSE_DOMAIN, 100, &cancel)
        .unwrap();
    assert!(polled.prices.is_empty());

    // The projection is still readable
    let peeked = reopened.peek_listing(season(), &card(1)).unwrap().unwrap();
    assert_eq!(peeked, observation);
}

/// Full flow through the archive sink: ingest orders across a closed
/// and an open day, archive, and verify the domain poller is untouched.
#[test]
fn test_archive_sink_and_domain_poller_coexist() {
    init_tracing();
    let store_dir = TempDir::new().unwrap();
    let archive_dir = TempDir::new().unwrap();
    let store = ListingEventStore::open(store_dir.path(), PipelineConfig::default());
    let cancel = CancellationToken::new();

    store
        .append_new_prices_and_orders(
            season(),
            &listing(
                card(1),
                Vec::new(),
                vec![order(9, 10, 150), order(9, 15, 155), order(11, 8, 160)],
            ),
            &cancel,
        )
        .unwrap();

    let today = NaiveDate::from_ymd_opt(2024, 4, 11).unwrap();
    let sink = ListingDataSink::new(
        LocalArchiveStorage::new(archive_dir.path()),
        FixedCalendar(today),
    );
    let summary = sink
        .archive_batch(&store, season(), 1000, &cancel)
        .unwrap();
    assert_eq!(summary.rows_archived, 2);
    assert_eq!(summary.days_deferred, 1);

    // The archive sink's cursor movement is invisible to the domain
    // poller, which still sees all three orders.
    let polled = store
        .poll_new_orders(season(), PURPOSE_DOMAIN, 100, &cancel)
        .unwrap();
    assert_eq!(polled.orders.get(&card(1)).map(Vec::len), Some(3));
}

/// A closed day whose events arrived out of business order is archived
/// once; an ordinary rerun writes nothing more.
#[test]
fn test_archive_rerun_after_late_arrival_is_idempotent() {
    init_tracing();
    let store_dir = TempDir::new().unwrap();
    let archive_dir = TempDir::new().unwrap();
    let store = ListingEventStore::open(store_dir.path(), PipelineConfig::default());
    let cancel = CancellationToken::new();

    // The 15:00 order arrives first; the 08:00 order only shows up in
    // the next fetch and is appended with a higher arrival id.
    store
        .append_new_prices_and_orders(
            season(),
            &listing(card(1), Vec::new(), vec![order(9, 15, 170)]),
            &cancel,
        )
        .unwrap();
    store
        .append_new_prices_and_orders(
            season(),
            &listing(card(1), Vec::new(), vec![order(9, 8, 130)]),
            &cancel,
        )
        .unwrap();

    let today = NaiveDate::from_ymd_opt(2024, 4, 11).unwrap();
    let sink = ListingDataSink::new(
        LocalArchiveStorage::new(archive_dir.path()),
        FixedCalendar(today),
    );
    let first = sink.archive_batch(&store, season(), 1000, &cancel).unwrap();
    assert_eq!(first.files_written, 1);
    assert_eq!(first.rows_archived, 2);

    let second = sink.archive_batch(&store, season(), 1000, &cancel).unwrap();
    assert_eq!(second.files_written, 0);
    assert_eq!(second.rows_archived, 0);
}
