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

//! Payment gateway abstraction.
//!
//! The engine never talks to a payment processor directly; it goes through
//! [`PaymentGateway`], which covers the three calls the funding model needs:
//! place an authorization hold, capture it, release it. Everything else the
//! processor reports (settlement confirmations, checkout sessions, payout
//! account capability changes) arrives asynchronously as webhook events and
//! is handled by [`crate::webhook`].
//!
//! [`InMemoryGateway`] is the adapter used by the demo binaries and the test
//! suites. It keeps holds in a table and can be scripted to fail specific
//! captures or releases, which is how the stuck-pledge paths are exercised.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use thiserror::Error;

use crate::base::{GigId, MinorUnits, PledgeId, SupporterId};

/// Errors surfaced by a payment gateway adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The processor refused the authorization or the operation
    #[error("authorization declined: {0}")]
    Declined(String),

    /// The processor did not answer in time
    #[error("gateway timed out")]
    Timeout,

    /// The processor is reachable but failing
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    /// No hold exists under the given reference
    #[error("unknown payment reference")]
    UnknownReference,
}

/// Parameters for placing an authorization hold.
#[derive(Debug, Clone)]
pub struct HoldRequest {
    /// Amount to reserve, in minor units.
    pub amount: MinorUnits,
    /// ISO 4217 currency code of the campaign.
    pub currency: String,
    /// Venue payout account the funds will eventually settle to.
    pub destination_account: String,
    pub gig_id: GigId,
    pub pledge_id: PledgeId,
    pub supporter_id: SupporterId,
}

/// The three synchronous calls the funding engine makes against a payment
/// processor.
///
/// Implementations must be safe to call from multiple threads; the engine
/// invokes them outside its campaign locks.
pub trait PaymentGateway: Send + Sync {
    /// Reserves `request.amount` on the supporter's payment method and
    /// returns the processor's reference for the hold.
    fn authorize_hold(&self, request: &HoldRequest) -> Result<String, GatewayError>;

    /// Moves the held money. Capturing an already-captured hold is a no-op.
    fn capture(&self, external_ref: &str) -> Result<(), GatewayError>;

    /// Releases the hold without charging. Releasing an already-released
    /// hold is a no-op; releasing a captured hold fails.
    fn cancel_hold(&self, external_ref: &str) -> Result<(), GatewayError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldState {
    Authorized,
    Captured,
    Canceled,
}

#[derive(Debug)]
struct HoldRecord {
    state: HoldState,
    amount: MinorUnits,
    capture_calls: u32,
}

#[derive(Debug, Default)]
struct GatewayInner {
    next_ref: u64,
    holds: HashMap<String, HoldRecord>,
    declined_supporters: HashSet<SupporterId>,
    failing_captures: HashSet<String>,
    failing_cancels: HashSet<String>,
}

/// In-process gateway with scriptable failures.
#[derive(Debug, Default)]
pub struct InMemoryGateway {
    inner: Mutex<GatewayInner>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `authorize_hold` decline every request from this supporter.
    pub fn decline_supporter(&self, supporter_id: SupporterId) {
        self.inner.lock().declined_supporters.insert(supporter_id);
    }

    /// Makes `capture` fail for this reference until cleared.
    pub fn fail_capture_for(&self, external_ref: &str) {
        self.inner.lock().failing_captures.insert(external_ref.to_owned());
    }

    /// Makes `cancel_hold` fail for this reference until cleared.
    pub fn fail_cancel_for(&self, external_ref: &str) {
        self.inner.lock().failing_cancels.insert(external_ref.to_owned());
    }

    /// Removes every scripted failure, simulating the outage ending.
    pub fn clear_scripted_failures(&self) {
        let mut inner = self.inner.lock();
        inner.failing_captures.clear();
        inner.failing_cancels.clear();
        inner.declined_supporters.clear();
    }

    pub fn hold_state(&self, external_ref: &str) -> Option<HoldState> {
        self.inner.lock().holds.get(external_ref).map(|h| h.state)
    }

    /// Number of times `capture` was invoked for this reference, scripted
    /// failures included.
    pub fn capture_calls(&self, external_ref: &str) -> u32 {
        self.inner
            .lock()
            .holds
            .get(external_ref)
            .map(|h| h.capture_calls)
            .unwrap_or(0)
    }

    /// Sum of amounts currently sitting in captured holds.
    pub fn captured_total(&self) -> MinorUnits {
        self.inner
            .lock()
            .holds
            .values()
            .filter(|h| h.state == HoldState::Captured)
            .map(|h| h.amount)
            .sum()
    }

    /// Sum of amounts still reserved in authorized holds.
    pub fn authorized_total(&self) -> MinorUnits {
        self.inner
            .lock()
            .holds
            .values()
            .filter(|h| h.state == HoldState::Authorized)
            .map(|h| h.amount)
            .sum()
    }
}

impl PaymentGateway for InMemoryGateway {
    fn authorize_hold(&self, request: &HoldRequest) -> Result<String, GatewayError> {
        let mut inner = self.inner.lock();
        if inner.declined_supporters.contains(&request.supporter_id) {
            return Err(GatewayError::Declined("card declined".into()));
        }
        inner.next_ref += 1;
        let external_ref = format!("hold-{}", inner.next_ref);
        inner.holds.insert(
            external_ref.clone(),
            HoldRecord {
                state: HoldState::Authorized,
                amount: request.amount,
                capture_calls: 0,
            },
        );
        Ok(external_ref)
    }

    fn capture(&self, external_ref: &str) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock();
        let failing = inner.failing_captures.contains(external_ref);
        let record = inner
            .holds
            .get_mut(external_ref)
            .ok_or(GatewayError::UnknownReference)?;
        record.capture_calls += 1;
        if failing {
            return Err(GatewayError::Unavailable("scripted capture outage".into()));
        }
        match record.state {
            HoldState::Authorized => {
                record.state = HoldState::Captured;
                Ok(())
            }
            HoldState::Captured => Ok(()),
            HoldState::Canceled => Err(GatewayError::Declined("hold already released".into())),
        }
    }

    fn cancel_hold(&self, external_ref: &str) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock();
        if inner.failing_cancels.contains(external_ref) {
            return Err(GatewayError::Unavailable("scripted release outage".into()));
        }
        let record = inner
            .holds
            .get_mut(external_ref)
            .ok_or(GatewayError::UnknownReference)?;
        match record.state {
            HoldState::Authorized => {
                record.state = HoldState::Canceled;
                Ok(())
            }
            HoldState::Canceled => Ok(()),
            HoldState::Captured => Err(GatewayError::Declined("hold already captured".into())),
        }
    }
}
