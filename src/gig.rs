// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Funding campaigns and their state machine.
//!
//! One campaign per bookable event:
//!
//! ```text
//! draft ──▶ open_for_applications ──▶ accepting_pledges ──▶ funded
//!   │                │                        │         ├─▶ partially_funded
//!   │                │                        │         └─▶ failed
//!   └────────────────┴────────────────────────┴──────────▶ cancelled
//! ```
//!
//! The campaign's pledged total is a cache over its pledge ledger. It is
//! never incremented in place; after every pledge mutation the owner
//! recomputes it from the pledges in `held` or `captured`, inside the same
//! critical section. All display values (percent funded, amount remaining,
//! supporter count) derive from that ledger as well.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Days, NaiveDate, Utc};
use parking_lot::{Mutex, MutexGuard};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::base::{GigId, MinorUnits, PerformerId, PledgeId, SupporterId, VenueId};
use crate::error::FundingError;
use crate::pledge::{Pledge, PledgeStatus};

/// Campaign status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GigStatus {
    /// Created by the venue; parameters may still change.
    Draft,
    /// Performers can apply for the bill.
    OpenForApplications,
    /// Supporters can pledge. The only state resolution acts on.
    AcceptingPledges,
    /// Target reached; pledges captured. Terminal.
    Funded,
    /// Threshold reached and the operator accepted a partial take. Terminal.
    PartiallyFunded,
    /// Target missed; pledges released. Terminal.
    Failed,
    /// Withdrawn by the venue before resolution. Terminal.
    Cancelled,
}

impl GigStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Funded | Self::PartiallyFunded | Self::Failed | Self::Cancelled
        )
    }
}

/// Parameters supplied by the venue when creating a campaign.
#[derive(Debug, Clone)]
pub struct GigConfig {
    pub venue_id: VenueId,
    /// Funding target in minor units. Must be positive.
    pub target: MinorUnits,
    /// ISO 4217 currency code.
    pub currency: String,
    pub event_date: NaiveDate,
    /// The pledge deadline sits this many days before the event date.
    pub deadline_days_before_event: i64,
    /// Allow resolving below target when the threshold is met and an
    /// operator opts in.
    pub allow_partial: bool,
    /// Minimum percent of target for a partial resolution, 0 to 100.
    pub min_percent: u8,
    pub max_performer_slots: u32,
}

impl GigConfig {
    /// Validates the venue's parameters and computes the pledge deadline.
    ///
    /// Rejects non-positive targets, thresholds above 100 and deadlines
    /// closer to the event than `min_lead_days`. Nothing is coerced.
    pub(crate) fn validate(&self, min_lead_days: i64) -> Result<NaiveDate, FundingError> {
        if self.target <= 0 {
            return Err(FundingError::InvalidTarget);
        }
        if self.min_percent > 100 {
            return Err(FundingError::InvalidPercent);
        }
        if self.deadline_days_before_event < min_lead_days {
            return Err(FundingError::InvalidDeadline);
        }
        let deadline = self
            .event_date
            .checked_sub_days(Days::new(self.deadline_days_before_event as u64))
            .ok_or(FundingError::InvalidDeadline)?;
        debug_assert!(deadline < self.event_date);
        Ok(deadline)
    }
}

/// Campaign state guarded by [`FundedGig`]'s mutex.
#[derive(Debug)]
pub struct GigData {
    pub(crate) id: GigId,
    pub(crate) venue_id: VenueId,
    pub(crate) target: MinorUnits,
    /// Cached sum of pledges in `held` or `captured`. Written only by
    /// [`GigData::recompute_pledged`].
    pub(crate) pledged: MinorUnits,
    pub(crate) currency: String,
    pub(crate) event_date: NaiveDate,
    pub(crate) deadline: NaiveDate,
    pub(crate) status: GigStatus,
    pub(crate) allow_partial: bool,
    pub(crate) min_percent: u8,
    pub(crate) max_performer_slots: u32,
    pub(crate) performers: Vec<PerformerId>,
    pub(crate) followers: HashSet<SupporterId>,
    /// Full pledge ledger, retired pledges included.
    pub(crate) pledges: HashMap<PledgeId, Pledge>,
    /// Supporter to their live pledge. Entries for pledges that fail or are
    /// refunded before resolution are dropped so the supporter may pledge
    /// again.
    pub(crate) by_supporter: HashMap<SupporterId, PledgeId>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) resolved_at: Option<DateTime<Utc>>,
}

impl GigData {
    fn new(id: GigId, config: GigConfig, deadline: NaiveDate, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            venue_id: config.venue_id,
            target: config.target,
            pledged: 0,
            currency: config.currency,
            event_date: config.event_date,
            deadline,
            status: GigStatus::Draft,
            allow_partial: config.allow_partial,
            min_percent: config.min_percent,
            max_performer_slots: config.max_performer_slots,
            performers: Vec::new(),
            followers: HashSet::new(),
            pledges: HashMap::new(),
            by_supporter: HashMap::new(),
            created_at,
            resolved_at: None,
        }
    }

    /// Recomputes the cached pledged total from the ledger. Must be called
    /// in the same critical section as any pledge mutation.
    pub(crate) fn recompute_pledged(&mut self) {
        self.pledged = self
            .pledges
            .values()
            .filter(|p| p.status.counts_toward_total())
            .map(|p| p.amount)
            .sum();
        self.assert_invariants();
    }

    /// Whether new pledges are accepted right now.
    pub(crate) fn accepts_pledges(&self, today: NaiveDate) -> bool {
        self.status == GigStatus::AcceptingPledges && !self.deadline_passed(today)
    }

    /// The deadline day itself still accepts pledges; the sweep resolves the
    /// campaign the day after.
    pub(crate) fn deadline_passed(&self, today: NaiveDate) -> bool {
        today > self.deadline
    }

    pub(crate) fn days_until_deadline(&self, today: NaiveDate) -> i64 {
        (self.deadline - today).num_days()
    }

    pub(crate) fn fully_funded(&self) -> bool {
        self.pledged >= self.target
    }

    /// Threshold check in integer math so that e.g. 6,999 of 10,000 at 70%
    /// is rejected while exactly 7,000 passes.
    pub(crate) fn meets_partial_threshold(&self) -> bool {
        (self.pledged as i128) * 100 >= (self.target as i128) * (self.min_percent as i128)
    }

    pub(crate) fn percent_funded(&self) -> Decimal {
        (Decimal::from(self.pledged) * Decimal::ONE_HUNDRED / Decimal::from(self.target)).round_dp(2)
    }

    pub(crate) fn amount_remaining(&self) -> MinorUnits {
        (self.target - self.pledged).max(0)
    }

    /// Distinct supporters with a pledge in `held` or `captured`. One live
    /// pledge per supporter makes the plain count correct.
    pub(crate) fn supporter_count(&self) -> usize {
        self.pledges
            .values()
            .filter(|p| p.status.counts_toward_total())
            .count()
    }

    // -- state transitions -------------------------------------------------

    pub(crate) fn open_for_applications(&mut self) -> Result<(), FundingError> {
        if self.status != GigStatus::Draft {
            return Err(FundingError::WrongStatus);
        }
        self.status = GigStatus::OpenForApplications;
        Ok(())
    }

    /// Adds a performer to the bill. Re-committing the same performer is a
    /// no-op.
    pub(crate) fn commit_performer(&mut self, performer_id: PerformerId) -> Result<(), FundingError> {
        if self.status != GigStatus::OpenForApplications {
            return Err(FundingError::WrongStatus);
        }
        if self.performers.contains(&performer_id) {
            return Ok(());
        }
        if self.performers.len() as u32 >= self.max_performer_slots {
            return Err(FundingError::PerformerSlotsFull);
        }
        self.performers.push(performer_id);
        self.assert_invariants();
        Ok(())
    }

    pub(crate) fn begin_accepting_pledges(&mut self) -> Result<(), FundingError> {
        if self.status != GigStatus::OpenForApplications {
            return Err(FundingError::WrongStatus);
        }
        if self.performers.is_empty() {
            return Err(FundingError::NoPerformers);
        }
        self.status = GigStatus::AcceptingPledges;
        Ok(())
    }

    /// Registers a supporter for deadline reminders. Idempotent.
    pub(crate) fn follow(&mut self, supporter_id: SupporterId) -> Result<(), FundingError> {
        if self.status.is_terminal() {
            return Err(FundingError::AlreadyTerminal);
        }
        self.followers.insert(supporter_id);
        Ok(())
    }

    /// Withdraws the campaign. Allowed from any non-terminal state.
    pub(crate) fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), FundingError> {
        if self.status.is_terminal() {
            return Err(FundingError::AlreadyTerminal);
        }
        self.status = GigStatus::Cancelled;
        self.resolved_at = Some(now);
        self.assert_invariants();
        Ok(())
    }

    /// Drops the supporter's live-pledge entry when their pledge retired
    /// without being captured, so they may pledge again.
    pub(crate) fn retire_supporter_entry(&mut self, pledge_id: PledgeId) {
        if let Some(pledge) = self.pledges.get(&pledge_id) {
            if matches!(pledge.status, PledgeStatus::Failed | PledgeStatus::Refunded) {
                let supporter = pledge.supporter_id;
                if self.by_supporter.get(&supporter) == Some(&pledge_id) {
                    self.by_supporter.remove(&supporter);
                }
            }
        }
    }

    pub(crate) fn summary(&self, today: NaiveDate) -> GigSummary {
        GigSummary {
            gig_id: self.id,
            venue_id: self.venue_id,
            status: self.status,
            target: self.target,
            pledged: self.pledged,
            currency: self.currency.clone(),
            percent_funded: self.percent_funded(),
            amount_remaining: self.amount_remaining(),
            supporter_count: self.supporter_count(),
            performer_count: self.performers.len(),
            event_date: self.event_date,
            deadline: self.deadline,
            days_until_deadline: self.days_until_deadline(today),
        }
    }

    /// Debug-build checks on cross-field consistency.
    pub(crate) fn assert_invariants(&self) {
        debug_assert!(self.target > 0, "target must be positive");
        debug_assert!(self.pledged >= 0, "pledged total cannot be negative");
        debug_assert!(self.deadline < self.event_date, "deadline must precede event");
        debug_assert!(
            self.performers.len() as u32 <= self.max_performer_slots,
            "performer slots overcommitted"
        );
        debug_assert_eq!(
            self.pledged,
            self.pledges
                .values()
                .filter(|p| p.status.counts_toward_total())
                .map(|p| p.amount)
                .sum::<MinorUnits>(),
            "cached total must equal ledger sum"
        );
        debug_assert!(
            !self.status.is_terminal() || self.resolved_at.is_some(),
            "terminal campaigns carry a resolution timestamp"
        );
        debug_assert!(
            self.by_supporter
                .iter()
                .all(|(s, p)| self.pledges.get(p).is_some_and(|pl| pl.supporter_id == *s)),
            "live-pledge index must point at the supporter's own pledge"
        );
    }
}

/// A campaign and its pledge ledger behind one mutex.
///
/// The per-campaign lock is the consistency boundary: status checks, pledge
/// mutations and total recomputation happen under it, while gateway calls
/// are kept outside it.
#[derive(Debug)]
pub struct FundedGig {
    inner: Mutex<GigData>,
}

impl FundedGig {
    pub(crate) fn new(
        id: GigId,
        config: GigConfig,
        deadline: NaiveDate,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            inner: Mutex::new(GigData::new(id, config, deadline, created_at)),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, GigData> {
        self.inner.lock()
    }

    pub fn status(&self) -> GigStatus {
        self.inner.lock().status
    }

    pub fn pledged(&self) -> MinorUnits {
        self.inner.lock().pledged
    }

    /// Snapshot of the derived display values.
    pub fn summary(&self, today: NaiveDate) -> GigSummary {
        self.inner.lock().summary(today)
    }
}

/// Read-only view of a campaign, derived from the ledger at call time.
#[derive(Debug, Clone, Serialize)]
pub struct GigSummary {
    pub gig_id: GigId,
    pub venue_id: VenueId,
    pub status: GigStatus,
    pub target: MinorUnits,
    pub pledged: MinorUnits,
    pub currency: String,
    pub percent_funded: Decimal,
    pub amount_remaining: MinorUnits,
    pub supporter_count: usize,
    pub performer_count: usize,
    pub event_date: NaiveDate,
    pub deadline: NaiveDate,
    pub days_until_deadline: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn make_config() -> GigConfig {
        GigConfig {
            venue_id: VenueId(1),
            target: 10_000,
            currency: "USD".to_owned(),
            event_date: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
            deadline_days_before_event: 7,
            allow_partial: true,
            min_percent: 60,
            max_performer_slots: 2,
        }
    }

    fn make_gig() -> FundedGig {
        let config = make_config();
        let deadline = config.validate(3).unwrap();
        FundedGig::new(GigId(1), config, deadline, Utc::now())
    }

    #[test]
    fn deadline_is_computed_from_event_date() {
        let config = make_config();
        let deadline = config.validate(3).unwrap();
        assert_eq!(deadline, NaiveDate::from_ymd_opt(2026, 9, 24).unwrap());
    }

    #[test]
    fn config_validation_rejects_bad_parameters() {
        let mut config = make_config();
        config.target = 0;
        assert_eq!(config.validate(3), Err(FundingError::InvalidTarget));

        let mut config = make_config();
        config.min_percent = 101;
        assert_eq!(config.validate(3), Err(FundingError::InvalidPercent));

        let mut config = make_config();
        config.deadline_days_before_event = 2;
        assert_eq!(config.validate(3), Err(FundingError::InvalidDeadline));
    }

    #[test]
    fn campaign_walks_the_happy_path() {
        let gig = make_gig();
        let mut data = gig.lock();
        assert_eq!(data.status, GigStatus::Draft);
        data.open_for_applications().unwrap();
        data.commit_performer(PerformerId(10)).unwrap();
        data.begin_accepting_pledges().unwrap();
        assert_eq!(data.status, GigStatus::AcceptingPledges);
    }

    #[test]
    fn pledging_requires_a_performer() {
        let gig = make_gig();
        let mut data = gig.lock();
        data.open_for_applications().unwrap();
        assert_eq!(data.begin_accepting_pledges(), Err(FundingError::NoPerformers));
    }

    #[test]
    fn performer_slots_are_bounded() {
        let gig = make_gig();
        let mut data = gig.lock();
        data.open_for_applications().unwrap();
        data.commit_performer(PerformerId(1)).unwrap();
        data.commit_performer(PerformerId(2)).unwrap();
        assert_eq!(
            data.commit_performer(PerformerId(3)),
            Err(FundingError::PerformerSlotsFull)
        );
        // Re-committing an existing performer does not consume a slot.
        data.commit_performer(PerformerId(1)).unwrap();
        assert_eq!(data.performers.len(), 2);
    }

    #[test]
    fn transitions_out_of_order_are_rejected() {
        let gig = make_gig();
        let mut data = gig.lock();
        assert_eq!(data.begin_accepting_pledges(), Err(FundingError::WrongStatus));
        assert_eq!(data.commit_performer(PerformerId(1)), Err(FundingError::WrongStatus));
        data.open_for_applications().unwrap();
        assert_eq!(data.open_for_applications(), Err(FundingError::WrongStatus));
    }

    #[test]
    fn cancel_is_allowed_until_terminal() {
        let gig = make_gig();
        let mut data = gig.lock();
        data.cancel(Utc::now()).unwrap();
        assert_eq!(data.status, GigStatus::Cancelled);
        assert!(data.resolved_at.is_some());
        assert_eq!(data.cancel(Utc::now()), Err(FundingError::AlreadyTerminal));
        assert_eq!(data.follow(SupporterId(1)), Err(FundingError::AlreadyTerminal));
    }

    #[test]
    fn deadline_day_still_accepts_pledges() {
        let gig = make_gig();
        let mut data = gig.lock();
        data.open_for_applications().unwrap();
        data.commit_performer(PerformerId(1)).unwrap();
        data.begin_accepting_pledges().unwrap();

        let deadline = data.deadline;
        assert!(data.accepts_pledges(deadline));
        assert!(!data.accepts_pledges(deadline + Days::new(1)));
        assert_eq!(data.days_until_deadline(deadline), 0);
    }

    #[test]
    fn partial_threshold_uses_exact_integer_math() {
        let gig = make_gig();
        let mut data = gig.lock();
        data.min_percent = 70;

        data.pledged = 7_000;
        assert!(data.meets_partial_threshold());
        data.pledged = 6_999;
        assert!(!data.meets_partial_threshold());
        data.pledged = 0;

        // A zero threshold is always met.
        data.min_percent = 0;
        assert!(data.meets_partial_threshold());
    }

    #[test]
    fn derived_values_come_from_the_ledger() {
        let gig = make_gig();
        let mut data = gig.lock();
        let now = Utc::now();

        let mut held = Pledge::new(PledgeId(1), SupporterId(1), 2_500, false, None, now);
        held.advance(PledgeStatus::Held, now);
        let pending = Pledge::new(PledgeId(2), SupporterId(2), 9_999, false, None, now);
        let mut failed = Pledge::new(PledgeId(3), SupporterId(3), 1_000, false, None, now);
        failed.advance(PledgeStatus::Failed, now);

        data.pledges.insert(held.id, held);
        data.pledges.insert(pending.id, pending);
        data.pledges.insert(failed.id, failed);
        data.recompute_pledged();

        assert_eq!(data.pledged, 2_500);
        assert_eq!(data.amount_remaining(), 7_500);
        assert_eq!(data.supporter_count(), 1);
        assert_eq!(data.percent_funded(), dec!(25.00));
    }
}
