//! Transfer lifecycle: creation, status transitions, cancellation, history.

use std::sync::Arc;

use chrono::Duration;
use remit_common::{
    round_amount, Clock, Currency, PaymentMethod, ReferenceNumber, RemitError, Result,
    StatusHistoryEntry, Transfer, TransferId, TransferStatus, UserId,
};
use remit_fx::Quote;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::locks::RecordLocks;
use crate::recipient::RecipientProfile;
use crate::reference::{ReferenceGenerator, TimestampReferenceGenerator};
use crate::store::{Page, Pagination, TransferFilter, TransferStore};
use crate::tracking::TrackedTransfer;

/// History note written when a transfer is created.
pub const INITIATED_NOTE: &str = "Transfer initiated";

/// History note written when the owner cancels.
pub const CANCELLED_BY_USER_NOTE: &str = "Cancelled by user";

/// Ledger configuration.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Smallest accepted send amount.
    pub min_amount: Decimal,
    /// Largest accepted send amount.
    pub max_amount: Decimal,
    /// Inserts attempted before giving up on reference collisions.
    pub max_reference_attempts: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            min_amount: Decimal::TEN,
            max_amount: Decimal::new(10_000, 0),
            max_reference_attempts: 5,
        }
    }
}

/// Everything needed to commit a quote as a transfer.
#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub user_id: UserId,
    pub recipient: RecipientProfile,
    pub send_amount: Decimal,
    pub receive_currency: Currency,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
    pub quote: Quote,
}

/// A transfer with its full status history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferWithHistory {
    #[serde(flatten)]
    pub transfer: Transfer,
    pub status_history: Vec<StatusHistoryEntry>,
}

/// One page of a user's transfers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferPage {
    pub transfers: Vec<Transfer>,
    pub pagination: Pagination,
}

/// Owns transfer records and the only path by which their status changes.
///
/// Status read, legality check and write for one transfer run under that
/// transfer's lock, and the write itself is a compare-and-set in the store.
pub struct TransferLedger {
    store: Arc<dyn TransferStore>,
    references: Arc<dyn ReferenceGenerator>,
    clock: Arc<dyn Clock>,
    locks: RecordLocks,
    config: LedgerConfig,
}

impl TransferLedger {
    /// Create a ledger with timestamp-based reference numbers.
    pub fn new(store: Arc<dyn TransferStore>, clock: Arc<dyn Clock>, config: LedgerConfig) -> Self {
        Self::with_references(
            store,
            Arc::new(TimestampReferenceGenerator::default()),
            clock,
            config,
        )
    }

    /// Create a ledger with a custom reference generator.
    pub fn with_references(
        store: Arc<dyn TransferStore>,
        references: Arc<dyn ReferenceGenerator>,
        clock: Arc<dyn Clock>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            store,
            references,
            clock,
            locks: RecordLocks::new(),
            config,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Check a send amount against the configured bounds.
    pub fn validate_amount(&self, amount: Decimal) -> Result<()> {
        if amount <= Decimal::ZERO {
            return Err(RemitError::invalid_amount(amount, "must be positive"));
        }
        if amount < self.config.min_amount {
            return Err(RemitError::invalid_amount(
                amount,
                format!("below minimum of {}", self.config.min_amount),
            ));
        }
        if amount > self.config.max_amount {
            return Err(RemitError::invalid_amount(
                amount,
                format!("above maximum of {}", self.config.max_amount),
            ));
        }
        Ok(())
    }

    /// Commit a quote as a new transfer in `processing`.
    #[instrument(skip(self, request), fields(
        user_id = %request.user_id,
        recipient_id = %request.recipient.id,
        quote_id = %request.quote.id
    ))]
    pub async fn create(&self, request: NewTransfer) -> Result<Transfer> {
        self.validate_amount(request.send_amount)?;

        if request.recipient.owner_user_id != request.user_id {
            return Err(RemitError::NotFound(format!("Recipient {}", request.recipient.id)));
        }

        if request.receive_currency != request.recipient.country_currency {
            return Err(RemitError::CurrencyMismatch {
                expected: request.recipient.country_currency.clone(),
                actual: request.receive_currency,
            });
        }

        let now = self.clock.now();
        let quote = &request.quote;

        if quote.is_expired(now) {
            return Err(RemitError::QuoteExpired {
                expired_at: quote.expires_at,
            });
        }
        if quote.receive_currency != request.receive_currency {
            return Err(RemitError::QuoteMismatch(format!(
                "quote is for {}, request is for {}",
                quote.receive_currency, request.receive_currency
            )));
        }
        if quote.send_amount != round_amount(request.send_amount) {
            return Err(RemitError::QuoteMismatch(format!(
                "quote is for {}, request is for {}",
                quote.send_amount, request.send_amount
            )));
        }

        let delivery_method = request.recipient.delivery_method;
        let mut transfer = Transfer {
            id: TransferId::new(),
            reference_number: self.references.generate(now),
            user_id: request.user_id,
            recipient_id: request.recipient.id,
            send_amount: quote.send_amount,
            send_currency: quote.send_currency.clone(),
            receive_amount: quote.receive_amount,
            receive_currency: quote.receive_currency.clone(),
            exchange_rate: quote.exchange_rate,
            fee_amount: quote.fee,
            total_amount: quote.total_amount,
            delivery_method,
            status: TransferStatus::Processing,
            payment_method: request.payment_method,
            estimated_delivery: now + Duration::days(delivery_method.delivery_days()),
            completed_at: None,
            failure_reason: None,
            notes: request.notes.clone(),
            created_at: now,
            updated_at: now,
        };
        let initial = StatusHistoryEntry::new(
            transfer.id,
            TransferStatus::Processing,
            Some(INITIATED_NOTE.to_string()),
            now,
        );

        let mut attempt = 1;
        loop {
            match self.store.insert(&transfer, &initial).await {
                Ok(()) => break,
                Err(RemitError::ReferenceCollision { .. })
                    if attempt < self.config.max_reference_attempts =>
                {
                    warn!(
                        reference = %transfer.reference_number,
                        attempt,
                        "Reference number collision, regenerating"
                    );
                    attempt += 1;
                    transfer.reference_number = self.references.generate(self.clock.now());
                }
                Err(RemitError::ReferenceCollision { .. }) => {
                    return Err(RemitError::ReferenceCollision { attempts: attempt });
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            transfer_id = %transfer.id,
            reference = %transfer.reference_number,
            send_amount = %transfer.send_amount,
            total_amount = %transfer.total_amount,
            "Transfer created"
        );

        Ok(transfer)
    }

    /// Move a transfer to `next`, appending a history entry.
    ///
    /// Fails with `IllegalTransition` and changes nothing when the move is
    /// not in the transition table.
    #[instrument(skip(self, notes), fields(transfer_id = %id, to = %next))]
    pub async fn transition(
        &self,
        id: TransferId,
        next: TransferStatus,
        notes: Option<&str>,
    ) -> Result<Transfer> {
        let guard = self.locks.acquire(id).await;
        let result = async {
            let transfer = self.load(id).await?;
            self.apply_transition(transfer, next, notes).await
        }
        .await;
        drop(guard);
        self.locks.prune(id);
        result
    }

    /// Cancel on behalf of the owner.
    #[instrument(skip(self), fields(transfer_id = %id))]
    pub async fn cancel(&self, id: TransferId, requester: UserId) -> Result<Transfer> {
        let guard = self.locks.acquire(id).await;
        let result = async {
            let transfer = self.load(id).await?;

            if !transfer.is_owned_by(requester) {
                return Err(RemitError::NotFound(format!("Transfer {}", id)));
            }
            if !transfer.status.is_cancellable() {
                return Err(RemitError::NotCancellable {
                    transfer_id: id,
                    status: transfer.status,
                });
            }

            self.apply_transition(
                transfer,
                TransferStatus::Cancelled,
                Some(CANCELLED_BY_USER_NOTE),
            )
            .await
        }
        .await;
        drop(guard);
        self.locks.prune(id);
        result
    }

    /// Status history, oldest first.
    pub async fn get_history(&self, id: TransferId) -> Result<Vec<StatusHistoryEntry>> {
        self.store.history(id).await
    }

    /// A transfer and its history, visible only to its owner.
    pub async fn get(&self, id: TransferId, requester: UserId) -> Result<TransferWithHistory> {
        let transfer = self
            .store
            .get(id)
            .await?
            .filter(|t| t.is_owned_by(requester))
            .ok_or_else(|| RemitError::NotFound(format!("Transfer {}", id)))?;
        let status_history = self.store.history(id).await?;

        Ok(TransferWithHistory {
            transfer,
            status_history,
        })
    }

    /// A user's transfers, newest first.
    pub async fn list(
        &self,
        user: UserId,
        filter: &TransferFilter,
        page: Page,
    ) -> Result<TransferPage> {
        let (transfers, total) = self.store.list_for_user(user, filter, page).await?;
        Ok(TransferPage {
            transfers,
            pagination: Pagination::new(page, total),
        })
    }

    /// Public projection by reference number. No ownership check.
    #[instrument(skip(self))]
    pub async fn track(&self, reference: &str) -> Result<TrackedTransfer> {
        let reference = ReferenceNumber::new(reference);
        let transfer = self
            .store
            .get_by_reference(&reference)
            .await?
            .ok_or_else(|| RemitError::NotFound(format!("Transfer {}", reference)))?;
        let history = self.store.history(transfer.id).await?;

        Ok(TrackedTransfer::new(transfer, &history))
    }

    async fn load(&self, id: TransferId) -> Result<Transfer> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| RemitError::NotFound(format!("Transfer {}", id)))
    }

    /// Apply and persist one transition. Caller holds the record lock.
    async fn apply_transition(
        &self,
        mut transfer: Transfer,
        next: TransferStatus,
        notes: Option<&str>,
    ) -> Result<Transfer> {
        let from = transfer.status;
        let now = self.clock.now();

        transfer.transition_to(next, notes, now)?;
        let entry = StatusHistoryEntry::new(transfer.id, next, notes.map(str::to_string), now);

        if !self.store.update_status(from, &transfer, &entry).await? {
            // Another writer outside this process got there first.
            let current = self.load(transfer.id).await?;
            return Err(RemitError::IllegalTransition {
                from: current.status,
                to: next,
            });
        }

        debug!(transfer_id = %transfer.id, from = %from, to = %next, "Status changed");
        Ok(transfer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransferStore;
    use crate::reference::SequenceReferenceGenerator;
    use remit_common::{CurrencyPair, DeliveryMethod, ManualClock, RecipientId};
    use remit_fx::{FeeSchedule, ResolvedRate};
    use rust_decimal_macros::dec;

    struct Fixture {
        ledger: Arc<TransferLedger>,
        store: Arc<MemoryTransferStore>,
        clock: Arc<ManualClock>,
        user: UserId,
        recipient: RecipientProfile,
    }

    fn fixture_with(references: Arc<dyn ReferenceGenerator>) -> Fixture {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(MemoryTransferStore::new());
        let ledger = Arc::new(TransferLedger::with_references(
            store.clone(),
            references,
            clock.clone(),
            LedgerConfig::default(),
        ));
        let user = UserId::new();
        let recipient = RecipientProfile {
            id: RecipientId::new(),
            owner_user_id: user,
            first_name: "Maria".to_string(),
            last_name: "Lopez".to_string(),
            country_code: "MEX".to_string(),
            country_name: "Mexico".to_string(),
            country_currency: Currency::mxn(),
            delivery_method: DeliveryMethod::BankDeposit,
        };

        Fixture {
            ledger,
            store,
            clock,
            user,
            recipient,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(TimestampReferenceGenerator::default()))
    }

    impl Fixture {
        fn quote(&self, amount: Decimal) -> Quote {
            let rate = ResolvedRate {
                pair: CurrencyPair::new(Currency::usd(), Currency::mxn()),
                rate: dec!(17.15),
                timestamp: self.clock.now(),
                stale: false,
            };
            Quote::with_default_validity(amount, &rate, &FeeSchedule::default(), self.clock.now())
                .unwrap()
        }

        fn request(&self, amount: Decimal) -> NewTransfer {
            NewTransfer {
                user_id: self.user,
                recipient: self.recipient.clone(),
                send_amount: amount,
                receive_currency: Currency::mxn(),
                payment_method: PaymentMethod::Card,
                notes: None,
                quote: self.quote(amount),
            }
        }

        async fn create(&self) -> Transfer {
            self.ledger.create(self.request(dec!(100))).await.unwrap()
        }
    }

    #[tokio::test]
    async fn test_create_starts_processing() {
        let f = fixture();
        let transfer = f.create().await;

        assert_eq!(transfer.status, TransferStatus::Processing);
        assert_eq!(transfer.fee_amount, dec!(2.99));
        assert_eq!(transfer.total_amount, dec!(102.99));
        assert_eq!(transfer.receive_amount, dec!(1715.00));
        assert_eq!(transfer.send_currency, Currency::usd());
        assert_eq!(transfer.estimated_delivery, f.clock.now() + Duration::days(3));
        assert!(transfer.reference_number.as_str().starts_with("RF"));

        let history = f.ledger.get_history(transfer.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, TransferStatus::Processing);
        assert_eq!(history[0].notes.as_deref(), Some(INITIATED_NOTE));
    }

    #[tokio::test]
    async fn test_mobile_wallet_delivers_next_day() {
        let mut f = fixture();
        f.recipient.delivery_method = DeliveryMethod::MobileWallet;

        let transfer = f.create().await;
        assert_eq!(transfer.estimated_delivery, f.clock.now() + Duration::days(1));
    }

    #[tokio::test]
    async fn test_create_rejects_out_of_bounds_amount() {
        let f = fixture();

        for amount in [dec!(0), dec!(-5), dec!(9.99), dec!(10000.01)] {
            let result = f.ledger.create(f.request(amount)).await;
            assert!(
                matches!(result, Err(RemitError::InvalidAmount { .. })),
                "amount {} accepted",
                amount
            );
        }
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_currency_mismatch() {
        let f = fixture();
        let mut request = f.request(dec!(100));
        request.receive_currency = Currency::php();

        assert!(matches!(
            f.ledger.create(request).await,
            Err(RemitError::CurrencyMismatch { expected, actual })
                if expected == Currency::mxn() && actual == Currency::php()
        ));
    }

    #[tokio::test]
    async fn test_create_rejects_expired_quote() {
        let f = fixture();
        let request = f.request(dec!(100));
        f.clock.advance(Duration::minutes(15));

        assert!(matches!(
            f.ledger.create(request).await,
            Err(RemitError::QuoteExpired { .. })
        ));
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_quote_for_other_amount() {
        let f = fixture();
        let mut request = f.request(dec!(100));
        request.send_amount = dec!(200);

        assert!(matches!(
            f.ledger.create(request).await,
            Err(RemitError::QuoteMismatch(_))
        ));
    }

    #[tokio::test]
    async fn test_create_rejects_foreign_recipient() {
        let f = fixture();
        let mut request = f.request(dec!(100));
        request.user_id = UserId::new();

        assert!(matches!(
            f.ledger.create(request).await,
            Err(RemitError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reference_collision_retried() {
        let f = fixture_with(Arc::new(SequenceReferenceGenerator::new([
            "RFAAAA", "RFAAAA", "RFBBBB",
        ])));

        let first = f.create().await;
        let second = f.create().await;

        assert_eq!(first.reference_number.as_str(), "RFAAAA");
        assert_eq!(second.reference_number.as_str(), "RFBBBB");
    }

    #[tokio::test]
    async fn test_reference_collision_gives_up() {
        let f = fixture_with(Arc::new(SequenceReferenceGenerator::new(["RFSAME"])));
        f.create().await;

        assert!(matches!(
            f.ledger.create(f.request(dec!(100))).await,
            Err(RemitError::ReferenceCollision { attempts: 5 })
        ));
        assert_eq!(f.store.len(), 1);
    }

    #[tokio::test]
    async fn test_transition_table_enforced() {
        let f = fixture();
        let transfer = f.create().await;

        let completed = f
            .ledger
            .transition(transfer.id, TransferStatus::Completed, None)
            .await
            .unwrap();
        assert_eq!(completed.completed_at, Some(f.clock.now()));

        for next in TransferStatus::ALL {
            let result = f.ledger.transition(transfer.id, next, None).await;
            assert!(matches!(result, Err(RemitError::IllegalTransition { .. })));
        }

        let history = f.ledger.get_history(transfer.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.last().map(|e| e.status), Some(TransferStatus::Completed));
    }

    #[tokio::test]
    async fn test_pending_to_cancelled_allowed() {
        let f = fixture();
        let mut transfer = f.create().await;
        // Seed a pending record directly; creation never produces one.
        transfer.id = TransferId::new();
        transfer.reference_number = ReferenceNumber::new("RFPENDING");
        transfer.status = TransferStatus::Pending;
        f.store
            .insert(
                &transfer,
                &StatusHistoryEntry::new(transfer.id, TransferStatus::Pending, None, f.clock.now()),
            )
            .await
            .unwrap();

        let cancelled = f
            .ledger
            .transition(transfer.id, TransferStatus::Cancelled, Some("no funds"))
            .await
            .unwrap();
        assert_eq!(cancelled.status, TransferStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_failed_records_reason() {
        let f = fixture();
        let transfer = f.create().await;
        f.clock.advance(Duration::minutes(5));

        let failed = f
            .ledger
            .transition(transfer.id, TransferStatus::Failed, Some("Payout rejected"))
            .await
            .unwrap();

        assert_eq!(failed.failure_reason.as_deref(), Some("Payout rejected"));
        assert_eq!(failed.updated_at, f.clock.now());

        let stored = f.ledger.get(transfer.id, f.user).await.unwrap();
        assert_eq!(stored.transfer, failed);
        assert_eq!(stored.status_history.len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_rules() {
        let f = fixture();
        let transfer = f.create().await;

        assert!(matches!(
            f.ledger.cancel(transfer.id, UserId::new()).await,
            Err(RemitError::NotFound(_))
        ));

        let cancelled = f.ledger.cancel(transfer.id, f.user).await.unwrap();
        assert_eq!(cancelled.status, TransferStatus::Cancelled);

        let history = f.ledger.get_history(transfer.id).await.unwrap();
        assert_eq!(history[1].notes.as_deref(), Some(CANCELLED_BY_USER_NOTE));

        let done = f.create().await;
        f.ledger
            .transition(done.id, TransferStatus::Completed, None)
            .await
            .unwrap();
        assert!(matches!(
            f.ledger.cancel(done.id, f.user).await,
            Err(RemitError::NotCancellable { status: TransferStatus::Completed, .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cancels_one_wins() {
        let f = fixture();
        let transfer = f.create().await;

        let (a, b) = tokio::join!(
            {
                let ledger = f.ledger.clone();
                let user = f.user;
                tokio::spawn(async move { ledger.cancel(transfer.id, user).await })
            },
            {
                let ledger = f.ledger.clone();
                let user = f.user;
                tokio::spawn(async move { ledger.cancel(transfer.id, user).await })
            }
        );
        let results = [a.unwrap(), b.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(RemitError::NotCancellable { .. })))
                .count(),
            1
        );

        let history = f.ledger.get_history(transfer.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].status, TransferStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_get_hides_other_users_transfers() {
        let f = fixture();
        let transfer = f.create().await;

        assert!(f.ledger.get(transfer.id, f.user).await.is_ok());
        assert!(matches!(
            f.ledger.get(transfer.id, UserId::new()).await,
            Err(RemitError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_newest_first_with_filters() {
        let f = fixture();
        let mut created = Vec::new();
        for _ in 0..12 {
            created.push(f.create().await);
            f.clock.advance(Duration::seconds(1));
        }
        f.ledger
            .transition(created[0].id, TransferStatus::Completed, None)
            .await
            .unwrap();

        let first = f
            .ledger
            .list(f.user, &TransferFilter::default(), Page::default())
            .await
            .unwrap();
        assert_eq!(first.transfers.len(), 10);
        assert_eq!(first.transfers[0].id, created[11].id);
        assert_eq!(first.pagination.total_count, 12);
        assert_eq!(first.pagination.total_pages, 2);
        assert!(first.pagination.has_more);

        let second = f
            .ledger
            .list(f.user, &TransferFilter::default(), Page::new(2, 10).unwrap())
            .await
            .unwrap();
        assert_eq!(second.transfers.len(), 2);
        assert!(!second.pagination.has_more);

        let completed = f
            .ledger
            .list(
                f.user,
                &TransferFilter {
                    status: Some(TransferStatus::Completed),
                    recipient_id: None,
                },
                Page::default(),
            )
            .await
            .unwrap();
        assert_eq!(completed.transfers.len(), 1);
        assert_eq!(completed.transfers[0].id, created[0].id);

    }

    #[tokio::test]
    async fn test_track_by_reference() {
        let f = fixture();
        let transfer = f.create().await;
        f.ledger
            .transition(transfer.id, TransferStatus::Completed, Some("Paid out"))
            .await
            .unwrap();

        let lower = transfer.reference_number.as_str().to_lowercase();
        let tracked = f
            .ledger
            .track(&lower)
            .await
            .unwrap()
            .with_recipient(&f.recipient);

        assert_eq!(tracked.reference_number, transfer.reference_number);
        assert_eq!(tracked.status, TransferStatus::Completed);
        assert_eq!(tracked.recipient_first_name.as_deref(), Some("Maria"));
        assert_eq!(tracked.destination_country.as_deref(), Some("Mexico"));
        assert_eq!(tracked.timeline.len(), 2);

        let json = serde_json::to_value(&tracked).unwrap();
        assert!(json.get("recipientId").is_none());
        assert!(json["timeline"][1].get("notes").is_none());
    }

    #[tokio::test]
    async fn test_track_unknown_reference() {
        let f = fixture();
        assert!(matches!(
            f.ledger.track("UNKNOWNREF").await,
            Err(RemitError::NotFound(_))
        ));
    }
}
