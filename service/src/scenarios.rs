//! End-to-end flows through the service with in-memory stores.

use std::sync::Arc;

use chrono::Duration;
use remit_common::{
    Clock, Currency, CurrencyPair, ManualClock, PaymentMethod, RemitError, TransferStatus, UserId,
};
use remit_fx::{MemoryRateStore, MockRateSource};
use remit_ledger::MemoryTransferStore;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::ServiceConfig;
use crate::directory::fixtures::{mexican_recipient, philippine_recipient};
use crate::directory::{Caller, MemoryRecipientDirectory};
use crate::service::{CreateTransferRequest, QuoteRequest, RemittanceService, ServiceComponents};

struct World {
    service: Arc<RemittanceService>,
    source: Arc<MockRateSource>,
    directory: Arc<MemoryRecipientDirectory>,
    clock: Arc<ManualClock>,
}

fn world() -> World {
    let source = Arc::new(MockRateSource::new("mock"));
    source.set_rate(CurrencyPair::new(Currency::usd(), Currency::mxn()), dec!(17.15));
    source.set_rate(CurrencyPair::new(Currency::usd(), Currency::php()), dec!(55.89));
    let directory = Arc::new(MemoryRecipientDirectory::new());
    let clock = Arc::new(ManualClock::starting_now());

    let service = RemittanceService::new(
        ServiceConfig::default(),
        ServiceComponents {
            source: source.clone(),
            rate_store: Arc::new(MemoryRateStore::new()),
            transfer_store: Arc::new(MemoryTransferStore::new()),
            directory: directory.clone(),
            clock: clock.clone(),
        },
    )
    .unwrap();

    World {
        service: Arc::new(service),
        source,
        directory,
        clock,
    }
}

fn usd_quote(amount: Decimal, to: Currency) -> QuoteRequest {
    QuoteRequest {
        send_amount: amount,
        send_currency: Some(Currency::usd()),
        receive_currency: to,
    }
}

#[tokio::test]
async fn hundred_dollars_to_mexico() {
    let w = world();
    let caller = Caller::verified(UserId::new());
    let recipient = mexican_recipient(caller.user_id);
    let recipient_id = recipient.id;
    w.directory.upsert(recipient);

    let quote = w
        .service
        .quote(&caller, usd_quote(dec!(100), Currency::mxn()))
        .await
        .unwrap();
    assert_eq!(quote.exchange_rate, dec!(17.15));
    assert_eq!(quote.receive_amount, dec!(1715.00));
    assert_eq!(quote.fee, dec!(2.99));
    assert_eq!(quote.total_amount, dec!(102.99));
    assert!(!quote.rate_stale);

    let transfer = w
        .service
        .create_transfer(
            &caller,
            CreateTransferRequest {
                quote_id: quote.id,
                recipient_id,
                send_amount: dec!(100),
                receive_currency: Currency::mxn(),
                payment_method: PaymentMethod::BankTransfer,
                notes: Some("Rent".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(transfer.receive_amount, dec!(1715.00));
    assert_eq!(transfer.total_amount, dec!(102.99));
    assert_eq!(transfer.estimated_delivery, w.clock.now() + Duration::days(3));
}

#[tokio::test]
async fn minimum_fee_to_philippines() {
    let w = world();
    let caller = Caller::verified(UserId::new());
    let recipient = philippine_recipient(caller.user_id);
    let recipient_id = recipient.id;
    w.directory.upsert(recipient);

    let quote = w
        .service
        .quote(&caller, usd_quote(dec!(10), Currency::php()))
        .await
        .unwrap();
    assert_eq!(quote.fee, dec!(2.99));
    assert_eq!(quote.total_amount, dec!(12.99));
    assert_eq!(quote.receive_amount, dec!(558.90));

    let transfer = w
        .service
        .create_transfer(
            &caller,
            CreateTransferRequest {
                quote_id: quote.id,
                recipient_id,
                send_amount: dec!(10),
                receive_currency: Currency::php(),
                payment_method: PaymentMethod::Debit,
                notes: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(transfer.fee_amount, dec!(2.99));
    assert_eq!(transfer.estimated_delivery, w.clock.now() + Duration::days(1));
}

#[tokio::test]
async fn tracking_unknown_reference_is_not_found() {
    let w = world();
    assert!(matches!(
        w.service.track_transfer("UNKNOWNREF").await,
        Err(RemitError::NotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cancels_apply_once() {
    let w = world();
    let caller = Caller::verified(UserId::new());
    let recipient = mexican_recipient(caller.user_id);
    let recipient_id = recipient.id;
    w.directory.upsert(recipient);

    let quote = w
        .service
        .quote(&caller, usd_quote(dec!(100), Currency::mxn()))
        .await
        .unwrap();
    let transfer = w
        .service
        .create_transfer(
            &caller,
            CreateTransferRequest {
                quote_id: quote.id,
                recipient_id,
                send_amount: dec!(100),
                receive_currency: Currency::mxn(),
                payment_method: PaymentMethod::Card,
                notes: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(transfer.status, TransferStatus::Processing);

    let first = {
        let service = w.service.clone();
        tokio::spawn(async move { service.cancel_transfer(&caller, transfer.id).await })
    };
    let second = {
        let service = w.service.clone();
        tokio::spawn(async move { service.cancel_transfer(&caller, transfer.id).await })
    };
    let results = [first.await.unwrap(), second.await.unwrap()];

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let refused = results
        .iter()
        .filter(|r| matches!(r, Err(RemitError::NotCancellable { .. })))
        .count();
    assert_eq!(succeeded, 1);
    assert_eq!(refused, 1);

    let details = w.service.get_transfer(&caller, transfer.id).await.unwrap();
    assert_eq!(details.transfer.status, TransferStatus::Cancelled);
    assert_eq!(details.status_history.len(), 2);
    assert_eq!(w.service.metrics().transfers_cancelled, 1);
}

#[tokio::test]
async fn cached_rate_reused_until_ttl() {
    let w = world();
    let caller = Caller::verified(UserId::new());

    w.service
        .quote(&caller, usd_quote(dec!(100), Currency::mxn()))
        .await
        .unwrap();
    w.clock.advance(Duration::minutes(29));
    w.service
        .quote(&caller, usd_quote(dec!(200), Currency::mxn()))
        .await
        .unwrap();
    assert_eq!(w.source.calls(), 1);

    w.clock.advance(Duration::minutes(2));
    w.service
        .quote(&caller, usd_quote(dec!(300), Currency::mxn()))
        .await
        .unwrap();
    assert_eq!(w.source.calls(), 2);
    assert_eq!(w.service.metrics().rates.cache_hits, 1);
}

#[tokio::test]
async fn upstream_outage_serves_stale_quote() {
    let w = world();
    let caller = Caller::verified(UserId::new());

    w.service
        .quote(&caller, usd_quote(dec!(100), Currency::mxn()))
        .await
        .unwrap();
    w.source.set_failing(true);
    w.clock.advance(Duration::minutes(60));

    let quote = w
        .service
        .quote(&caller, usd_quote(dec!(100), Currency::mxn()))
        .await
        .unwrap();
    assert!(quote.rate_stale);
    assert_eq!(quote.exchange_rate, dec!(17.15));

    let rate = w
        .service
        .exchange_rate(Currency::usd(), Currency::mxn())
        .await
        .unwrap();
    assert!(rate.stale);
    assert_eq!(w.service.metrics().rates.stale_served, 2);
}

#[tokio::test]
async fn completed_transfer_is_final() {
    let w = world();
    let caller = Caller::verified(UserId::new());
    let recipient = mexican_recipient(caller.user_id);
    let recipient_id = recipient.id;
    w.directory.upsert(recipient);

    let quote = w
        .service
        .quote(&caller, usd_quote(dec!(100), Currency::mxn()))
        .await
        .unwrap();
    let transfer = w
        .service
        .create_transfer(
            &caller,
            CreateTransferRequest {
                quote_id: quote.id,
                recipient_id,
                send_amount: dec!(100),
                receive_currency: Currency::mxn(),
                payment_method: PaymentMethod::Card,
                notes: None,
            },
        )
        .await
        .unwrap();

    w.service
        .transition(transfer.id, TransferStatus::Completed, None)
        .await
        .unwrap();

    assert!(matches!(
        w.service
            .transition(transfer.id, TransferStatus::Failed, Some("late failure"))
            .await,
        Err(RemitError::IllegalTransition { .. })
    ));
    assert!(matches!(
        w.service.cancel_transfer(&caller, transfer.id).await,
        Err(RemitError::NotCancellable { .. })
    ));
}
