//! Registry of issued quotes, each redeemable once by its owner.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use remit_common::{Clock, QuoteId, RemitError, Result, UserId};
use serde::Serialize;
use tracing::debug;

use crate::quote::Quote;

#[derive(Debug, Clone)]
struct BookedQuote {
    quote: Quote,
    owner: UserId,
    redeemed: bool,
}

/// Configuration for the quote book.
#[derive(Debug, Clone)]
pub struct QuoteBookConfig {
    /// Maximum live quotes a single user may hold.
    pub max_per_user: usize,
    /// Sweep every owner's expired quotes once per this many issues.
    pub sweep_every: u64,
}

impl Default for QuoteBookConfig {
    fn default() -> Self {
        Self {
            max_per_user: 100,
            sweep_every: 256,
        }
    }
}

/// Issued quotes awaiting commitment.
pub struct QuoteBook {
    quotes: DashMap<QuoteId, BookedQuote>,
    user_quotes: DashMap<UserId, Vec<QuoteId>>,
    clock: Arc<dyn Clock>,
    config: QuoteBookConfig,
    issued: AtomicU64,
}

impl QuoteBook {
    pub fn new(clock: Arc<dyn Clock>, config: QuoteBookConfig) -> Self {
        Self {
            quotes: DashMap::new(),
            user_quotes: DashMap::new(),
            clock,
            config,
            issued: AtomicU64::new(0),
        }
    }

    /// Register a quote for `owner`.
    ///
    /// Expired quotes of `owner` are dropped first, and every
    /// `sweep_every` issues all owners are swept.
    pub fn issue(&self, quote: Quote, owner: UserId) -> Result<()> {
        let issued = self.issued.fetch_add(1, Ordering::Relaxed) + 1;
        if self.config.sweep_every > 0 && issued % self.config.sweep_every == 0 {
            self.cleanup_expired();
        }

        self.purge_user(owner);
        if self.live_count(owner) >= self.config.max_per_user {
            return Err(RemitError::InvalidRequest {
                message: format!(
                    "User {} already holds {} outstanding quotes",
                    owner, self.config.max_per_user
                ),
                field: None,
            });
        }

        let id = quote.id;
        debug!(quote_id = %id, user_id = %owner, expires_at = %quote.expires_at, "Quote issued");

        self.quotes.insert(
            id,
            BookedQuote {
                quote,
                owner,
                redeemed: false,
            },
        );
        self.user_quotes.entry(owner).or_default().push(id);

        Ok(())
    }

    /// Claim a quote for commitment.
    ///
    /// Succeeds at most once per quote. Unknown quotes and quotes owned by
    /// someone else are both reported as not found.
    pub fn redeem(&self, id: QuoteId, owner: UserId) -> Result<Quote> {
        let now = self.clock.now();
        let mut entry = self
            .quotes
            .get_mut(&id)
            .filter(|e| e.owner == owner)
            .ok_or_else(|| RemitError::NotFound(format!("Quote {}", id)))?;

        if entry.redeemed {
            return Err(RemitError::QuoteMismatch(format!(
                "Quote {} has already been used",
                id
            )));
        }

        if entry.quote.is_expired(now) {
            return Err(RemitError::QuoteExpired {
                expired_at: entry.quote.expires_at,
            });
        }

        entry.redeemed = true;
        debug!(quote_id = %id, "Quote redeemed");

        Ok(entry.quote.clone())
    }

    /// Return a redeemed quote to the book after a rejected commit.
    pub fn release(&self, id: QuoteId) {
        if let Some(mut entry) = self.quotes.get_mut(&id) {
            entry.redeemed = false;
            debug!(quote_id = %id, "Quote released");
        }
    }

    #[cfg(test)]
    fn get(&self, id: QuoteId) -> Option<Quote> {
        self.quotes.get(&id).map(|e| e.quote.clone())
    }

    /// Drop every expired quote. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let expired: Vec<QuoteId> = self
            .quotes
            .iter()
            .filter(|e| e.quote.is_expired(now))
            .map(|e| *e.key())
            .collect();

        let mut removed = 0;
        for id in expired {
            if let Some((_, booked)) = self.quotes.remove(&id) {
                self.forget(booked.owner, &[id]);
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, "Expired quotes cleaned up");
        }
        removed
    }

    /// Get statistics.
    pub fn stats(&self) -> QuoteBookStats {
        let now = self.clock.now();
        let total = self.quotes.len();
        let expired = self.quotes.iter().filter(|e| e.quote.is_expired(now)).count();
        let redeemed = self.quotes.iter().filter(|e| e.redeemed).count();

        QuoteBookStats {
            total_quotes: total,
            expired_quotes: expired,
            redeemed_quotes: redeemed,
        }
    }

    fn live_count(&self, owner: UserId) -> usize {
        let now = self.clock.now();
        self.user_quotes
            .get(&owner)
            .map(|ids| {
                ids.iter()
                    .filter(|id| {
                        self.quotes
                            .get(id)
                            .map(|e| !e.redeemed && !e.quote.is_expired(now))
                            .unwrap_or(false)
                    })
                    .count()
            })
            .unwrap_or(0)
    }

    fn purge_user(&self, owner: UserId) {
        let now = self.clock.now();
        let stale: Vec<QuoteId> = match self.user_quotes.get(&owner) {
            Some(ids) => ids
                .iter()
                .filter(|id| {
                    self.quotes
                        .get(id)
                        .map(|e| e.quote.is_expired(now))
                        .unwrap_or(true)
                })
                .copied()
                .collect(),
            None => return,
        };

        for id in &stale {
            self.quotes.remove(id);
        }
        self.forget(owner, &stale);
    }

    /// Drop `ids` from the owner's index, and the owner once it is empty.
    fn forget(&self, owner: UserId, ids: &[QuoteId]) {
        if let Some(mut owned) = self.user_quotes.get_mut(&owner) {
            owned.retain(|id| !ids.contains(id));
        }
        self.user_quotes.remove_if(&owner, |_, owned| owned.is_empty());
    }
}

/// Quote book statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct QuoteBookStats {
    pub total_quotes: usize,
    pub expired_quotes: usize,
    pub redeemed_quotes: usize,
}
