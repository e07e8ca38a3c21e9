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

//! Crowdfunding engine.
//!
//! The [`Engine`] is the central component. It owns every campaign, routes
//! pledges and webhook events to them, and drives resolution through the
//! payment gateway.
//!
//! # Operations
//!
//! - **Campaign lifecycle**: create, open for performer applications, commit
//!   performers, start accepting pledges, follow, cancel.
//! - **Pledges**: create (places an authorization hold), supporter-initiated
//!   cancellation while still held.
//! - **Settlement**: resolve at deadline or on operator demand, retry stuck
//!   pledges, check tickets in at the door.
//! - **Reconciliation**: apply signed gateway events, deduplicated and
//!   order-tolerant.
//!
//! # Thread Safety
//!
//! Campaigns live in a [`DashMap`] behind [`Arc`]s, so operations on
//! different campaigns proceed in parallel. Within one campaign the
//! [`FundedGig`] mutex is the consistency boundary; gateway round trips
//! never happen while it is held.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::base::{GigId, MinorUnits, PerformerId, PledgeId, SupporterId, VenueId};
use crate::error::FundingError;
use crate::gateway::{GatewayError, HoldRequest, PaymentGateway};
use crate::gig::{FundedGig, GigConfig, GigStatus, GigSummary};
use crate::notify::{NoticeKind, Notification, Notifier, Recipient};
use crate::pledge::{Pledge, PledgeStatus, StatusAdvance};
use crate::resolution::{self, PledgeAction, ResolutionReport, RetryReport};
use crate::webhook::{EventEnvelope, EventLog, GatewayEvent};

/// Engine-wide tunables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Fraction of each captured pledge withheld as the platform fee.
    pub platform_fee_rate: Decimal,
    /// Minimum number of days between the pledge deadline and the event.
    pub min_deadline_lead_days: i64,
    /// How many days before the deadline reminders go out.
    pub reminder_days: [i64; 2],
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            platform_fee_rate: dec!(0.05),
            min_deadline_lead_days: 3,
            reminder_days: [1, 3],
        }
    }
}

/// A supporter's request to pledge on a campaign.
#[derive(Debug, Clone, Deserialize)]
pub struct PledgeRequest {
    pub pledge_id: PledgeId,
    pub supporter_id: SupporterId,
    /// Amount in minor units of the campaign currency.
    pub amount: MinorUnits,
    #[serde(default)]
    pub anonymous: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// The venue's payment-processor account and its capability flags.
#[derive(Debug, Clone, Serialize)]
pub struct PayoutAccount {
    pub account_ref: String,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub updated_at: DateTime<Utc>,
}

impl PayoutAccount {
    /// Captures and campaign publishing require both capabilities.
    pub fn is_capable(&self) -> bool {
        self.charges_enabled && self.payouts_enabled
    }
}

/// What the engine did with a webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventDisposition {
    /// The event changed state.
    Applied,
    /// Recognized, but the state was already at or past it.
    AlreadyApplied,
    /// Replay of an event id seen before.
    Duplicate,
    /// Unknown kind, unknown pledge or venue, or an empty settlement.
    Ignored,
}

/// Result of cancelling a whole campaign.
#[derive(Debug, Clone, Serialize)]
pub struct CancelReport {
    pub gig_id: GigId,
    /// Held pledges whose holds were released.
    pub refunded: usize,
    /// Pending pledges marked failed.
    pub failed_pending: usize,
    /// Holds the gateway refused to release; retriable.
    pub refund_failures: usize,
}

/// Crowdfunding engine that manages campaigns and their pledge ledgers.
///
/// # Invariants
///
/// - Pledge IDs are globally unique across all campaigns and never reused.
/// - A supporter holds at most one live pledge per campaign.
/// - A campaign's cached total is only written by full recomputation from
///   its ledger, in the same critical section as the pledge mutation.
/// - Only one caller can move a campaign out of `accepting_pledges`; the
///   flip happens under the campaign lock before any gateway call.
/// - Webhook event ids are applied at most once.
pub struct Engine {
    config: EngineConfig,
    /// Campaigns indexed by id.
    gigs: DashMap<GigId, Arc<FundedGig>>,
    /// Pledge id to owning campaign, doubling as the global uniqueness
    /// registry.
    pledge_index: DashMap<PledgeId, GigId>,
    /// Venue payout accounts, refreshed by webhook.
    payout_accounts: DashMap<VenueId, PayoutAccount>,
    /// Webhook delivery log for deduplication.
    events: EventLog,
}

impl Engine {
    /// Creates an engine with no campaigns.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            gigs: DashMap::new(),
            pledge_index: DashMap::new(),
            payout_accounts: DashMap::new(),
            events: EventLog::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn gig(&self, gig_id: GigId) -> Result<Arc<FundedGig>, FundingError> {
        self.gigs
            .get(&gig_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(FundingError::GigNotFound)
    }

    fn gig_for_pledge(&self, pledge_id: PledgeId) -> Option<Arc<FundedGig>> {
        let gig_id = *self.pledge_index.get(&pledge_id)?;
        self.gigs.get(&gig_id).map(|entry| Arc::clone(entry.value()))
    }

    // -- campaign lifecycle ------------------------------------------------

    /// Creates a campaign in `draft`.
    ///
    /// # Errors
    ///
    /// - [`FundingError::DuplicateGig`] - Campaign ID already exists.
    /// - [`FundingError::InvalidTarget`] - Target is not positive.
    /// - [`FundingError::InvalidPercent`] - Partial threshold above 100.
    /// - [`FundingError::InvalidDeadline`] - Deadline too close to the event.
    pub fn create_gig(
        &self,
        gig_id: GigId,
        config: GigConfig,
        now: DateTime<Utc>,
    ) -> Result<(), FundingError> {
        let deadline = config.validate(self.config.min_deadline_lead_days)?;
        match self.gigs.entry(gig_id) {
            Entry::Occupied(_) => Err(FundingError::DuplicateGig),
            Entry::Vacant(entry) => {
                info!(gig = %gig_id, venue = %config.venue_id, target = config.target, "campaign created");
                entry.insert(Arc::new(FundedGig::new(gig_id, config, deadline, now)));
                Ok(())
            }
        }
    }

    /// Registers or replaces the venue's payout account.
    pub fn register_payout_account(
        &self,
        venue_id: VenueId,
        account_ref: String,
        charges_enabled: bool,
        payouts_enabled: bool,
        now: DateTime<Utc>,
    ) {
        info!(venue = %venue_id, account = %account_ref, charges_enabled, payouts_enabled, "payout account registered");
        self.payout_accounts.insert(
            venue_id,
            PayoutAccount {
                account_ref,
                charges_enabled,
                payouts_enabled,
                updated_at: now,
            },
        );
    }

    pub fn payout_account(&self, venue_id: VenueId) -> Option<PayoutAccount> {
        self.payout_accounts
            .get(&venue_id)
            .map(|entry| entry.value().clone())
    }

    /// Opens the campaign to performer applications. Requires the venue's
    /// payout account to be fully capable, since the campaign will take
    /// money.
    pub fn open_for_applications(&self, gig_id: GigId) -> Result<(), FundingError> {
        let gig = self.gig(gig_id)?;
        let mut data = gig.lock();
        let capable = self
            .payout_accounts
            .get(&data.venue_id)
            .is_some_and(|account| account.is_capable());
        if !capable {
            return Err(FundingError::PayoutAccountNotReady);
        }
        data.open_for_applications()
    }

    /// Confirms a performer on the bill.
    pub fn commit_performer(
        &self,
        gig_id: GigId,
        performer_id: PerformerId,
    ) -> Result<(), FundingError> {
        let gig = self.gig(gig_id)?;
        gig.lock().commit_performer(performer_id)
    }

    /// Moves the campaign to `accepting_pledges`. Requires at least one
    /// committed performer.
    pub fn begin_accepting_pledges(&self, gig_id: GigId) -> Result<(), FundingError> {
        let gig = self.gig(gig_id)?;
        gig.lock().begin_accepting_pledges()
    }

    /// Adds a supporter to the campaign's reminder audience.
    pub fn follow_gig(&self, gig_id: GigId, supporter_id: SupporterId) -> Result<(), FundingError> {
        let gig = self.gig(gig_id)?;
        gig.lock().follow(supporter_id)
    }

    /// Withdraws a campaign before resolution: held pledges are released,
    /// pending ones marked failed, and the audience notified that nobody
    /// was charged.
    pub fn cancel_gig(
        &self,
        gig_id: GigId,
        now: DateTime<Utc>,
        gateway: &dyn PaymentGateway,
        notifier: &dyn Notifier,
    ) -> Result<CancelReport, FundingError> {
        let gig = self.gig(gig_id)?;
        let (plan, pending_refs, audience, failed_pending) = {
            let mut data = gig.lock();
            data.cancel(now)?;

            let mut audience: Vec<Recipient> = vec![Recipient::VenueOwner(data.venue_id)];
            audience.extend(data.performers.iter().copied().map(Recipient::Performer));
            audience.extend(data.by_supporter.keys().copied().map(Recipient::Supporter));

            // Pending pledges have no confirmed hold; fail them in place and
            // void whatever authorization sits behind them.
            let pending: Vec<PledgeId> = data
                .pledges
                .values()
                .filter(|p| p.status == PledgeStatus::Pending)
                .map(|p| p.id)
                .collect();
            let mut pending_refs = Vec::new();
            for pledge_id in &pending {
                if let Some(pledge) = data.pledges.get_mut(pledge_id) {
                    if let Some(reference) = pledge.external_ref.clone() {
                        pending_refs.push((*pledge_id, reference));
                    }
                    pledge.advance(PledgeStatus::Failed, now);
                }
                data.retire_supporter_entry(*pledge_id);
            }
            data.recompute_pledged();

            let plan = resolution::plan_held_pledges(&data, PledgeAction::Refund);
            (plan, pending_refs, audience, pending.len())
        };

        for (pledge_id, reference) in pending_refs {
            if let Err(error) = gateway.cancel_hold(&reference) {
                warn!(pledge = %pledge_id, %error, "failed to void hold behind a pending pledge");
            }
        }

        let mut stats = resolution::execute_plan(
            &gig,
            plan,
            self.config.platform_fee_rate,
            false,
            now,
            gateway,
        );
        for notice in stats.notices.drain(..) {
            notifier.notify(notice);
        }
        for recipient in audience {
            notifier.notify(Notification {
                recipient,
                kind: NoticeKind::GigCancelled { gig_id },
            });
        }

        info!(gig = %gig_id, refunded = stats.refunded, failed_pending, "campaign cancelled");
        Ok(CancelReport {
            gig_id,
            refunded: stats.refunded,
            failed_pending,
            refund_failures: stats.refund_failures,
        })
    }

    // -- pledges -----------------------------------------------------------

    /// Creates a pledge: reserves the pledge id, places an authorization
    /// hold, then records the pledge as `pending` until the gateway confirms
    /// the hold by webhook.
    ///
    /// The gateway round trip happens with no campaign lock held, so the
    /// acceptance checks run twice: once before paying for the network call
    /// and once before committing the pledge. A hold placed for a pledge
    /// that lost the second check is released again.
    ///
    /// # Errors
    ///
    /// - [`FundingError::InvalidAmount`] - Amount is not positive.
    /// - [`FundingError::GigNotFound`] - No such campaign.
    /// - [`FundingError::PledgingClosed`] - Campaign not accepting or past
    ///   its deadline.
    /// - [`FundingError::DuplicatePledge`] - Supporter already has a live
    ///   pledge here.
    /// - [`FundingError::DuplicatePledgeId`] - Pledge ID already used.
    /// - [`FundingError::PayoutAccountNotReady`] - Venue cannot take money.
    /// - [`FundingError::Gateway`] - The hold was declined or failed.
    pub fn create_pledge(
        &self,
        gig_id: GigId,
        request: PledgeRequest,
        now: DateTime<Utc>,
        gateway: &dyn PaymentGateway,
    ) -> Result<(), FundingError> {
        if request.amount <= 0 {
            return Err(FundingError::InvalidAmount);
        }
        let gig = self.gig(gig_id)?;

        let (venue_id, currency) = {
            let data = gig.lock();
            if !data.accepts_pledges(now.date_naive()) {
                return Err(FundingError::PledgingClosed);
            }
            if data.by_supporter.contains_key(&request.supporter_id) {
                return Err(FundingError::DuplicatePledge);
            }
            (data.venue_id, data.currency.clone())
        };
        let destination_account = self
            .payout_accounts
            .get(&venue_id)
            .filter(|account| account.is_capable())
            .map(|account| account.account_ref.clone())
            .ok_or(FundingError::PayoutAccountNotReady)?;

        // Reserve the id before the hold so a duplicate can never produce
        // two authorizations.
        match self.pledge_index.entry(request.pledge_id) {
            Entry::Occupied(_) => return Err(FundingError::DuplicatePledgeId),
            Entry::Vacant(entry) => {
                entry.insert(gig_id);
            }
        }

        let hold = HoldRequest {
            amount: request.amount,
            currency,
            destination_account,
            gig_id,
            pledge_id: request.pledge_id,
            supporter_id: request.supporter_id,
        };
        let external_ref = match gateway.authorize_hold(&hold) {
            Ok(reference) => reference,
            Err(error) => {
                self.pledge_index.remove(&request.pledge_id);
                return Err(error.into());
            }
        };

        let mut data = gig.lock();
        let stale = if !data.accepts_pledges(now.date_naive()) {
            Some(FundingError::PledgingClosed)
        } else if data.by_supporter.contains_key(&request.supporter_id) {
            Some(FundingError::DuplicatePledge)
        } else {
            None
        };
        if let Some(error) = stale {
            drop(data);
            self.pledge_index.remove(&request.pledge_id);
            if let Err(cancel_error) = gateway.cancel_hold(&external_ref) {
                warn!(pledge = %request.pledge_id, %cancel_error, "failed to release hold for rejected pledge");
            }
            return Err(error);
        }

        let mut pledge = Pledge::new(
            request.pledge_id,
            request.supporter_id,
            request.amount,
            request.anonymous,
            request.message,
            now,
        );
        pledge.external_ref = Some(external_ref);
        data.by_supporter.insert(request.supporter_id, request.pledge_id);
        data.pledges.insert(request.pledge_id, pledge);
        data.recompute_pledged();
        info!(gig = %gig_id, pledge = %request.pledge_id, amount = request.amount, "pledge created");
        Ok(())
    }

    /// Supporter-initiated cancellation. Valid only while the pledge is
    /// `held` and the campaign is still accepting pledges; once resolution
    /// has started the request is stale.
    pub fn cancel_pledge(
        &self,
        pledge_id: PledgeId,
        supporter_id: SupporterId,
        now: DateTime<Utc>,
        gateway: &dyn PaymentGateway,
    ) -> Result<(), FundingError> {
        let gig = self
            .gig_for_pledge(pledge_id)
            .ok_or(FundingError::PledgeNotFound)?;

        let external_ref = {
            let data = gig.lock();
            let pledge = data
                .pledges
                .get(&pledge_id)
                .ok_or(FundingError::PledgeNotFound)?;
            if pledge.supporter_id != supporter_id {
                return Err(FundingError::SupporterMismatch);
            }
            if !data.accepts_pledges(now.date_naive()) || pledge.status != PledgeStatus::Held {
                return Err(FundingError::CancellationWindowClosed);
            }
            pledge
                .external_ref
                .clone()
                .ok_or(FundingError::Gateway(GatewayError::UnknownReference))?
        };

        // Release at the gateway first; the ledger only records refunds that
        // actually happened.
        gateway.cancel_hold(&external_ref)?;

        let mut data = gig.lock();
        if let Some(pledge) = data.pledges.get_mut(&pledge_id) {
            pledge.advance(PledgeStatus::Refunded, now);
        }
        data.retire_supporter_entry(pledge_id);
        data.recompute_pledged();
        info!(gig = %data.id, pledge = %pledge_id, "pledge cancelled by supporter");
        Ok(())
    }

    /// Copy of a pledge record, for status pages.
    pub fn get_pledge(&self, pledge_id: PledgeId) -> Option<Pledge> {
        let gig = self.gig_for_pledge(pledge_id)?;
        let data = gig.lock();
        data.pledges.get(&pledge_id).cloned()
    }

    // -- settlement --------------------------------------------------------

    /// Resolves a campaign to its terminal outcome: recomputes the pledged
    /// total, decides funded / partially funded / failed, writes the terminal
    /// status under the campaign lock, then captures or releases every held
    /// pledge. Idempotent: re-running on a campaign that already left
    /// `accepting_pledges` reports "already processed".
    pub fn resolve(
        &self,
        gig_id: GigId,
        accept_partial: bool,
        now: DateTime<Utc>,
        gateway: &dyn PaymentGateway,
        notifier: &dyn Notifier,
    ) -> Result<ResolutionReport, FundingError> {
        let gig = self.gig(gig_id)?;
        Ok(resolution::run(
            &gig,
            accept_partial,
            self.config.platform_fee_rate,
            now,
            gateway,
            notifier,
        ))
    }

    /// Re-drives held pledges stranded on a terminal campaign by earlier
    /// gateway failures.
    pub fn retry_stuck_pledges(
        &self,
        gig_id: GigId,
        now: DateTime<Utc>,
        gateway: &dyn PaymentGateway,
        notifier: &dyn Notifier,
    ) -> Result<RetryReport, FundingError> {
        let gig = self.gig(gig_id)?;
        resolution::retry_stuck(
            &gig,
            self.config.platform_fee_rate,
            now,
            gateway,
            notifier,
        )
    }

    /// Redeems a ticket at the door by its code.
    pub fn check_in(&self, gig_id: GigId, code: &str) -> Result<PledgeId, FundingError> {
        let gig = self.gig(gig_id)?;
        let mut data = gig.lock();
        for pledge in data.pledges.values_mut() {
            if let Some(ticket) = pledge.ticket.as_mut() {
                if ticket.code == code {
                    ticket.check_in()?;
                    info!(gig = %gig_id, pledge = %pledge.id, "ticket checked in");
                    return Ok(pledge.id);
                }
            }
        }
        Err(FundingError::TicketNotFound)
    }

    // -- webhook reconciliation ----------------------------------------------

    /// Applies one verified gateway event.
    ///
    /// | Kind | Action |
    /// |------|--------|
    /// | `hold_placed` | Pledge `pending → held`, attach reference |
    /// | `payment_settled` | Pledge `pending/held → captured`, collect fee |
    /// | `hold_canceled` | `pending → failed` or `held → refunded` |
    /// | `checkout_completed` | Attach reference if missing |
    /// | `payout_account_updated` | Refresh venue capability flags |
    /// | anything else | Ignored |
    ///
    /// Every action is idempotent: replayed event ids are dropped by the
    /// delivery log, and transitions that would move a pledge backward are
    /// reported as [`EventDisposition::AlreadyApplied`] without mutating
    /// anything. Signature verification happens before this call (see
    /// [`crate::webhook::verify_and_parse`]).
    pub fn apply_event(&self, envelope: EventEnvelope, now: DateTime<Utc>) -> EventDisposition {
        let EventEnvelope { event_id, event } = envelope;
        if !self.events.record(&event_id) {
            info!(event = %event_id, "duplicate webhook delivery ignored");
            return EventDisposition::Duplicate;
        }

        match event {
            GatewayEvent::HoldPlaced {
                pledge_id,
                external_ref,
            } => {
                let Some(gig) = self.gig_for_pledge(pledge_id) else {
                    warn!(event = %event_id, pledge = %pledge_id, "hold confirmation for unknown pledge");
                    return EventDisposition::Ignored;
                };
                let mut data = gig.lock();
                let (advance, attached) = {
                    let Some(pledge) = data.pledges.get_mut(&pledge_id) else {
                        return EventDisposition::Ignored;
                    };
                    let attached = pledge.external_ref.is_none() && external_ref.is_some();
                    if attached {
                        pledge.external_ref = external_ref;
                    }
                    (pledge.advance(PledgeStatus::Held, now), attached)
                };
                if advance == StatusAdvance::Advanced {
                    data.recompute_pledged();
                }
                if advance == StatusAdvance::Advanced || attached {
                    EventDisposition::Applied
                } else {
                    EventDisposition::AlreadyApplied
                }
            }

            GatewayEvent::PaymentSettled {
                pledge_id,
                amount_captured,
            } => {
                if amount_captured <= 0 {
                    info!(event = %event_id, pledge = %pledge_id, "settlement without captured amount ignored");
                    return EventDisposition::Ignored;
                }
                let Some(gig) = self.gig_for_pledge(pledge_id) else {
                    warn!(event = %event_id, pledge = %pledge_id, "settlement for unknown pledge");
                    return EventDisposition::Ignored;
                };
                let mut data = gig.lock();
                let advance = {
                    let Some(pledge) = data.pledges.get_mut(&pledge_id) else {
                        return EventDisposition::Ignored;
                    };
                    if amount_captured != pledge.amount {
                        warn!(
                            pledge = %pledge_id,
                            expected = pledge.amount,
                            actual = amount_captured,
                            "settled amount differs from pledge amount"
                        );
                    }
                    let advance = pledge.advance(PledgeStatus::Captured, now);
                    if advance == StatusAdvance::Advanced && pledge.fee_collected.is_none() {
                        pledge.fee_collected = Some(resolution::platform_fee(
                            self.config.platform_fee_rate,
                            pledge.amount,
                        ));
                    }
                    advance
                };
                match advance {
                    StatusAdvance::Advanced => {
                        // A late settlement on an already successful campaign
                        // still earns its ticket.
                        if matches!(data.status, GigStatus::Funded | GigStatus::PartiallyFunded) {
                            resolution::ensure_ticket(&mut data, pledge_id, now);
                        }
                        data.recompute_pledged();
                        EventDisposition::Applied
                    }
                    StatusAdvance::Same => EventDisposition::AlreadyApplied,
                    StatusAdvance::Rejected => {
                        warn!(pledge = %pledge_id, "settlement for a pledge in a terminal state");
                        EventDisposition::AlreadyApplied
                    }
                }
            }

            GatewayEvent::HoldCanceled { pledge_id } => {
                let Some(gig) = self.gig_for_pledge(pledge_id) else {
                    warn!(event = %event_id, pledge = %pledge_id, "hold cancellation for unknown pledge");
                    return EventDisposition::Ignored;
                };
                let mut data = gig.lock();
                let advance = {
                    let Some(pledge) = data.pledges.get_mut(&pledge_id) else {
                        return EventDisposition::Ignored;
                    };
                    match pledge.status {
                        PledgeStatus::Pending => pledge.advance(PledgeStatus::Failed, now),
                        PledgeStatus::Held => pledge.advance(PledgeStatus::Refunded, now),
                        _ => StatusAdvance::Rejected,
                    }
                };
                if advance == StatusAdvance::Advanced {
                    data.retire_supporter_entry(pledge_id);
                    data.recompute_pledged();
                    EventDisposition::Applied
                } else {
                    EventDisposition::AlreadyApplied
                }
            }

            GatewayEvent::CheckoutCompleted {
                pledge_id,
                external_ref,
            } => {
                let Some(gig) = self.gig_for_pledge(pledge_id) else {
                    warn!(event = %event_id, pledge = %pledge_id, "checkout completion for unknown pledge");
                    return EventDisposition::Ignored;
                };
                let mut data = gig.lock();
                let Some(pledge) = data.pledges.get_mut(&pledge_id) else {
                    return EventDisposition::Ignored;
                };
                if pledge.external_ref.is_none() {
                    pledge.external_ref = Some(external_ref);
                    EventDisposition::Applied
                } else {
                    EventDisposition::AlreadyApplied
                }
            }

            GatewayEvent::PayoutAccountUpdated {
                venue_id,
                charges_enabled,
                payouts_enabled,
            } => match self.payout_accounts.get_mut(&venue_id) {
                Some(mut account) => {
                    account.charges_enabled = charges_enabled;
                    account.payouts_enabled = payouts_enabled;
                    account.updated_at = now;
                    info!(venue = %venue_id, charges_enabled, payouts_enabled, "payout account capabilities updated");
                    EventDisposition::Applied
                }
                None => {
                    warn!(event = %event_id, venue = %venue_id, "capability update for unregistered payout account");
                    EventDisposition::Ignored
                }
            },

            GatewayEvent::Unknown => {
                info!(event = %event_id, "ignoring unknown webhook kind");
                EventDisposition::Ignored
            }
        }
    }

    // -- reads ---------------------------------------------------------------

    /// Retrieves a campaign by ID.
    pub fn get_gig(&self, gig_id: GigId) -> Option<Arc<FundedGig>> {
        self.gigs.get(&gig_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Derived view of one campaign.
    pub fn gig_summary(&self, gig_id: GigId, today: NaiveDate) -> Result<GigSummary, FundingError> {
        Ok(self.gig(gig_id)?.summary(today))
    }

    /// Derived views of every campaign, ordered by id.
    ///
    /// Useful for generating output reports of campaign states.
    pub fn summaries(&self, today: NaiveDate) -> Vec<GigSummary> {
        let mut summaries: Vec<GigSummary> = self
            .gigs
            .iter()
            .map(|entry| entry.value().summary(today))
            .collect();
        summaries.sort_by_key(|s| s.gig_id.0);
        summaries
    }

    /// Snapshot of every campaign, for sweep passes.
    pub fn gigs(&self) -> Vec<Arc<FundedGig>> {
        self.gigs
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Campaigns past their deadline and still accepting pledges, ordered
    /// by id.
    pub fn due_for_resolution(&self, today: NaiveDate) -> Vec<GigId> {
        let mut due: Vec<GigId> = self
            .gigs
            .iter()
            .filter_map(|entry| {
                let data = entry.value().lock();
                (data.status == GigStatus::AcceptingPledges && data.deadline_passed(today))
                    .then_some(data.id)
            })
            .collect();
        due.sort_by_key(|id| id.0);
        due
    }

    /// Total minor units currently pledged across all campaigns still
    /// accepting pledges.
    pub fn open_pledged_total(&self) -> MinorUnits {
        self.gigs
            .iter()
            .map(|entry| {
                let data = entry.value().lock();
                if data.status == GigStatus::AcceptingPledges {
                    data.pledged
                } else {
                    0
                }
            })
            .sum()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
