//! Billing engine
//!
//! A deterministic function from (request, pile, tariff table, end time) to
//! an [`Order`]. No clock reads and no hidden state, so replaying the
//! computation over the same terminal request yields an identical fee and
//! duration.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{ChargeRequest, DomainError, DomainResult, Order, Pile, TariffTable};

const SECONDS_PER_HOUR: i64 = 3600;

/// Compute the final order for a request that charged on `pile` until
/// `ended_at`.
///
/// Delivered energy is `power_rate x elapsed`, capped at the requested
/// amount; when the cap applies, the billable window is shortened to the
/// moment the cap was reached. The electricity fee walks hour-aligned
/// blocks so every time-of-use band is priced at its own rate.
pub fn compute_order(
    request: &ChargeRequest,
    pile: &Pile,
    tariffs: &TariffTable,
    ended_at: DateTime<Utc>,
) -> DomainResult<Order> {
    let started_at = request.started_at.ok_or_else(|| {
        DomainError::InvalidState(format!("request {} was never started", request.id))
    })?;
    if pile.power_rate <= Decimal::ZERO {
        return Err(DomainError::Validation(
            "pile power rate must be positive".into(),
        ));
    }

    let elapsed_ms = (ended_at - started_at).num_milliseconds().max(0);
    let elapsed_hours = Decimal::from(elapsed_ms) / Decimal::from(SECONDS_PER_HOUR * 1000);

    let uncapped = pile.power_rate * elapsed_hours;
    let (delivered, billing_end) = if uncapped > request.requested_amount {
        // Bill only up to the moment the requested amount was reached.
        let billable_hours = request.requested_amount / pile.power_rate;
        let billable_ms = billable_hours * Decimal::from(SECONDS_PER_HOUR * 1000);
        let billable_ms: i64 = billable_ms.round().try_into().map_err(|_| {
            DomainError::Validation("charging duration out of range".into())
        })?;
        (
            request.requested_amount,
            started_at + Duration::milliseconds(billable_ms),
        )
    } else {
        (uncapped, ended_at)
    };

    let charge_fee = charge_fee_over(started_at, billing_end, pile.power_rate, tariffs).round_dp(2);
    let delivered = delivered.round_dp(2);
    let service_fee = (delivered * tariffs.service_fee_per_kwh).round_dp(2);

    Ok(Order {
        id: Uuid::new_v4(),
        request_id: request.id,
        user_id: request.user_id,
        pile_id: pile.id,
        started_at,
        ended_at: billing_end,
        delivered_amount: delivered,
        duration_seconds: (billing_end - started_at).num_seconds(),
        charge_fee,
        service_fee,
        total_fee: charge_fee + service_fee,
        created_at: billing_end,
    })
}

/// Electricity fee for a session, walking hour-aligned blocks so each
/// time-of-use band is charged at its own rate.
fn charge_fee_over(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    power_rate: Decimal,
    tariffs: &TariffTable,
) -> Decimal {
    let energy_per_second = power_rate / Decimal::from(SECONDS_PER_HOUR);
    let mut total = Decimal::ZERO;
    let mut current = start;

    while current < end {
        let boundary = next_hour_boundary(current).min(end);
        let block_ms = (boundary - current).num_milliseconds();
        if block_ms > 0 {
            let block_secs = Decimal::from(block_ms) / Decimal::from(1000);
            total += block_secs * energy_per_second * tariffs.rate_at(current);
        }
        current = boundary;
    }

    total
}

fn next_hour_boundary(t: DateTime<Utc>) -> DateTime<Utc> {
    let secs = t.timestamp();
    let next = secs - secs.rem_euclid(SECONDS_PER_HOUR) + SECONDS_PER_HOUR;
    DateTime::<Utc>::from_timestamp(next, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
