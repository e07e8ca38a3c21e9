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

//! Gateway webhook envelopes, signatures and the delivery log.
//!
//! The payment gateway reports asynchronous outcomes as JSON events:
//!
//! ```json
//! { "event_id": "evt-991", "kind": "payment_settled",
//!   "pledge_id": 17, "amount_captured": 2500 }
//! ```
//!
//! Deliveries are at-least-once and unordered, so consumers must treat the
//! `event_id` as the dedup key (see [`EventLog`]) and apply pledge
//! transitions monotonically. Every payload is authenticated with an
//! HMAC-SHA256 hex signature over the raw bytes; unverifiable payloads are
//! rejected before any state is touched.

use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::base::{MinorUnits, PledgeId, VenueId};
use crate::error::FundingError;

/// Everything the gateway can tell us, as an internally tagged JSON enum.
///
/// The set is closed on our side: kinds we do not recognize deserialize to
/// [`GatewayEvent::Unknown`] and are acknowledged without effect, so the
/// gateway does not retry them forever.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// The authorization hold is confirmed on the supporter's card.
    HoldPlaced {
        pledge_id: PledgeId,
        /// Some gateways echo the reference here; kept when we do not have
        /// one yet.
        external_ref: Option<String>,
    },
    /// Held money actually moved.
    PaymentSettled {
        pledge_id: PledgeId,
        amount_captured: MinorUnits,
    },
    /// The hold was voided or expired before capture.
    HoldCanceled { pledge_id: PledgeId },
    /// A hosted checkout finished; carries the authorization reference.
    CheckoutCompleted {
        pledge_id: PledgeId,
        external_ref: String,
    },
    /// The venue's payout account capabilities changed.
    PayoutAccountUpdated {
        venue_id: VenueId,
        charges_enabled: bool,
        payouts_enabled: bool,
    },
    /// Any kind this build does not know about.
    #[serde(other)]
    Unknown,
}

/// A delivered event: unique delivery id plus the event body.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EventEnvelope {
    pub event_id: String,
    #[serde(flatten)]
    pub event: GatewayEvent,
}

// HMAC-SHA256 per RFC 2104. SHA-256 block size is 64 bytes.
const BLOCK_SIZE: usize = 64;

fn hmac_sha256(secret: &[u8], payload: &[u8]) -> [u8; 32] {
    let mut key = [0u8; BLOCK_SIZE];
    if secret.len() > BLOCK_SIZE {
        key[..32].copy_from_slice(&Sha256::digest(secret));
    } else {
        key[..secret.len()].copy_from_slice(secret);
    }

    let mut ipad = [0x36u8; BLOCK_SIZE];
    let mut opad = [0x5cu8; BLOCK_SIZE];
    for i in 0..BLOCK_SIZE {
        ipad[i] ^= key[i];
        opad[i] ^= key[i];
    }

    let mut inner = Sha256::new();
    inner.update(ipad);
    inner.update(payload);
    let inner_digest = inner.finalize();

    let mut outer = Sha256::new();
    outer.update(opad);
    outer.update(inner_digest);
    outer.finalize().into()
}

/// Hex HMAC-SHA256 signature over a raw payload. Used by the webhook
/// endpoint to verify deliveries and by the test harnesses to forge them.
pub fn sign(secret: &str, payload: &[u8]) -> String {
    hmac_sha256(secret.as_bytes(), payload)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

// Comparison time must not depend on where the first mismatch sits.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Checks a hex signature against the payload.
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let expected = sign(secret, payload);
    constant_time_eq(expected.as_bytes(), signature.to_ascii_lowercase().as_bytes())
}

/// Verifies the signature, then parses the envelope. No state is touched on
/// either failure.
pub fn verify_and_parse(
    secret: &str,
    payload: &[u8],
    signature: &str,
) -> Result<EventEnvelope, FundingError> {
    if !verify_signature(secret, payload, signature) {
        return Err(FundingError::InvalidSignature);
    }
    serde_json::from_slice(payload).map_err(|e| FundingError::MalformedEvent(e.to_string()))
}

/// Thread-safe webhook delivery log with duplicate detection.
///
/// Combines a [`DashMap`] for O(1) duplicate checking with a [`SegQueue`]
/// that preserves arrival order for auditing. All operations are lock-free
/// and safe for concurrent access, so racing deliveries of the same
/// `event_id` agree on a single winner.
#[derive(Debug, Default)]
pub struct EventLog {
    seen: DashMap<String, ()>,
    arrivals: SegQueue<String>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a delivery. Returns `true` the first time an `event_id` is
    /// seen and `false` for every replay.
    pub fn record(&self, event_id: &str) -> bool {
        // Entry API gives an atomic check-and-insert under concurrent delivery.
        match self.seen.entry(event_id.to_owned()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(());
                self.arrivals.push(event_id.to_owned());
                true
            }
        }
    }

    pub fn contains(&self, event_id: &str) -> bool {
        self.seen.contains_key(event_id)
    }

    /// Number of distinct deliveries recorded.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
