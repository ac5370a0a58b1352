//! Fee and amount calculation, and the quotes built from it.

use chrono::Duration;
use remit_common::time::constants;
use remit_common::{round_amount, round_rate, Currency, QuoteId, RemitError, Result, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::provider::ResolvedRate;

/// Service fee parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Percentage of the send amount, e.g. `1.5` for 1.5%.
    pub fee_percent: Decimal,
    /// Floor applied when the percentage fee is smaller.
    pub minimum_fee: Decimal,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            fee_percent: Decimal::new(15, 1),
            minimum_fee: Decimal::new(299, 2),
        }
    }
}

/// Output of [`calculate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calculation {
    pub send_amount: Decimal,
    pub fee: Decimal,
    pub total_amount: Decimal,
    pub exchange_rate: Decimal,
    pub receive_amount: Decimal,
}

/// Derive fee, total and receive amounts for a transfer.
///
/// Amounts are rounded to two decimals and the rate to six, half away from
/// zero. The send amount is rounded before anything is derived from it so
/// that `total_amount == send_amount + fee` holds exactly, and the receive
/// amount uses the rounded rate so it can be recomputed from the output.
///
/// Fails with `InvalidAmount` when a product or sum leaves the `Decimal`
/// range.
pub fn calculate(send_amount: Decimal, rate: Decimal, schedule: &FeeSchedule) -> Result<Calculation> {
    let send_amount = round_amount(send_amount);
    let exchange_rate = round_rate(rate);
    let overflow = || RemitError::InvalidAmount {
        amount: send_amount,
        reason: "Amount is too large to convert".to_string(),
    };

    let percentage_fee = send_amount
        .checked_mul(schedule.fee_percent)
        .ok_or_else(overflow)?
        / Decimal::ONE_HUNDRED;
    let fee = round_amount(percentage_fee.max(schedule.minimum_fee));
    let total_amount = send_amount.checked_add(fee).ok_or_else(overflow)?;
    let receive_amount = send_amount.checked_mul(exchange_rate).ok_or_else(overflow)?;

    Ok(Calculation {
        send_amount,
        fee,
        total_amount: round_amount(total_amount),
        exchange_rate,
        receive_amount: round_amount(receive_amount),
    })
}

/// A time-boxed, uncommitted offer for a prospective transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub id: QuoteId,
    pub send_amount: Decimal,
    pub send_currency: Currency,
    pub receive_amount: Decimal,
    pub receive_currency: Currency,
    pub exchange_rate: Decimal,
    pub fee: Decimal,
    pub total_amount: Decimal,
    /// The rate was served from cache past its TTL.
    pub rate_stale: bool,
    pub issued_at: Timestamp,
    pub expires_at: Timestamp,
}

impl Quote {
    /// Build a quote from a resolved rate.
    pub fn new(
        send_amount: Decimal,
        rate: &ResolvedRate,
        schedule: &FeeSchedule,
        issued_at: Timestamp,
        validity: Duration,
    ) -> Result<Self> {
        let calc = calculate(send_amount, rate.rate, schedule)?;

        Ok(Self {
            id: QuoteId::new(),
            send_amount: calc.send_amount,
            send_currency: rate.pair.base.clone(),
            receive_amount: calc.receive_amount,
            receive_currency: rate.pair.target.clone(),
            exchange_rate: calc.exchange_rate,
            fee: calc.fee,
            total_amount: calc.total_amount,
            rate_stale: rate.stale,
            issued_at,
            expires_at: issued_at + validity,
        })
    }

    /// Build a quote with the default 15 minute validity.
    pub fn with_default_validity(
        send_amount: Decimal,
        rate: &ResolvedRate,
        schedule: &FeeSchedule,
        issued_at: Timestamp,
    ) -> Result<Self> {
        Self::new(send_amount, rate, schedule, issued_at, constants::quote_validity())
    }

    /// Whether the quote can no longer be committed at `now`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use remit_common::CurrencyPair;
    use rust_decimal_macros::dec;

    #[test]
    fn test_percentage_fee_above_minimum() {
        let calc = calculate(dec!(1000), dec!(17.15), &FeeSchedule::default()).unwrap();

        assert_eq!(calc.fee, dec!(15.00));
        assert_eq!(calc.total_amount, dec!(1015.00));
        assert_eq!(calc.receive_amount, dec!(17150.00));
        assert_eq!(calc.exchange_rate, dec!(17.15));
    }

    #[test]
    fn test_hundred_dollars_to_pesos() {
        let calc = calculate(dec!(100), dec!(17.15), &FeeSchedule::default()).unwrap();

        // 1.5% of 100 is below the floor.
        assert_eq!(calc.fee, dec!(2.99));
        assert_eq!(calc.total_amount, dec!(102.99));
        assert_eq!(calc.receive_amount, dec!(1715.00));
    }

    #[test]
    fn test_percentage_only_schedule() {
        let schedule = FeeSchedule {
            fee_percent: dec!(1.5),
            minimum_fee: Decimal::ZERO,
        };
        let calc = calculate(dec!(100), dec!(17.15), &schedule).unwrap();

        assert_eq!(calc.fee, dec!(1.50));
        assert_eq!(calc.total_amount, dec!(101.50));
    }

    #[test]
    fn test_minimum_fee_applies() {
        let calc = calculate(dec!(10), dec!(55.89), &FeeSchedule::default()).unwrap();

        assert_eq!(calc.fee, dec!(2.99));
        assert_eq!(calc.total_amount, dec!(12.99));
        assert_eq!(calc.receive_amount, dec!(558.90));
    }

    #[test]
    fn test_rounding_half_away_from_zero() {
        let calc = calculate(dec!(10.005), dec!(1.1234565), &FeeSchedule::default()).unwrap();

        assert_eq!(calc.send_amount, dec!(10.01));
        assert_eq!(calc.exchange_rate, dec!(1.123457));
        assert_eq!(calc.receive_amount, dec!(11.25));
    }

    #[test]
    fn test_quote_expiry() {
        let issued_at = Utc::now();
        let rate = ResolvedRate {
            pair: CurrencyPair::new(Currency::usd(), Currency::mxn()),
            rate: dec!(17.15),
            timestamp: issued_at,
            stale: true,
        };

        let quote =
            Quote::with_default_validity(dec!(100), &rate, &FeeSchedule::default(), issued_at)
                .unwrap();

        assert_eq!(quote.expires_at, issued_at + Duration::minutes(15));
        assert_eq!(quote.send_currency, Currency::usd());
        assert_eq!(quote.receive_currency, Currency::mxn());
        assert!(quote.rate_stale);
        assert!(!quote.is_expired(issued_at + Duration::minutes(14)));
        assert!(quote.is_expired(issued_at + Duration::minutes(15)));
    }

    #[test]
    fn test_overflowing_amount_is_rejected() {
        let huge = Decimal::from_i128_with_scale(10i128.pow(28), 0);

        let err = calculate(huge, dec!(24500), &FeeSchedule::default()).unwrap_err();
        assert!(matches!(err, RemitError::InvalidAmount { .. }));
        assert!(calculate(Decimal::MAX, dec!(1), &FeeSchedule::default()).is_err());
    }

    fn arb_amount() -> impl Strategy<Value = Decimal> {
        (1i64..100_000_000).prop_map(|cents| Decimal::new(cents, 2))
    }

    fn arb_rate() -> impl Strategy<Value = Decimal> {
        (1i64..100_000_000_000).prop_map(|micros| Decimal::new(micros, 6))
    }

    fn arb_schedule() -> impl Strategy<Value = FeeSchedule> {
        ((0i64..1_000), (0i64..10_000)).prop_map(|(bp, min_cents)| FeeSchedule {
            fee_percent: Decimal::new(bp, 2),
            minimum_fee: Decimal::new(min_cents, 2),
        })
    }

    proptest! {
        #[test]
        fn prop_fee_is_max_of_percentage_and_minimum(
            send in arb_amount(),
            rate in arb_rate(),
            schedule in arb_schedule(),
        ) {
            let calc = calculate(send, rate, &schedule).unwrap();
            let expected = round_amount(
                (send * schedule.fee_percent / Decimal::ONE_HUNDRED).max(schedule.minimum_fee),
            );

            prop_assert_eq!(calc.fee, expected);
            prop_assert!(calc.fee >= schedule.minimum_fee);
            prop_assert_eq!(calc.total_amount, calc.send_amount + calc.fee);
        }

        #[test]
        fn prop_calculate_is_deterministic(
            send in arb_amount(),
            rate in arb_rate(),
            schedule in arb_schedule(),
        ) {
            prop_assert_eq!(
                calculate(send, rate, &schedule).unwrap(),
                calculate(send, rate, &schedule).unwrap()
            );
        }

        #[test]
        fn prop_receive_amount_recomputes_from_output(
            send in arb_amount(),
            rate in arb_rate(),
        ) {
            let calc = calculate(send, rate, &FeeSchedule::default()).unwrap();
            prop_assert_eq!(
                round_amount(calc.send_amount * calc.exchange_rate),
                calc.receive_amount
            );
        }
    }
}
