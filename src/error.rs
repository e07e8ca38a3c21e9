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

//! Error types for the funding engine.
//!
//! Validation and signature errors are reported synchronously to the caller.
//! Gateway errors raised inside a resolution batch are *not* surfaced through
//! this type: the batch logs them per pledge and continues. A second
//! resolution attempt on a terminal campaign is also not an error; the
//! resolution report says "already processed".

use crate::gateway::GatewayError;
use thiserror::Error;

/// Funding engine errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FundingError {
    /// Target amount is zero or negative
    #[error("target amount must be positive")]
    InvalidTarget,

    /// Pledge amount is zero or negative
    #[error("pledge amount must be positive")]
    InvalidAmount,

    /// Deadline does not leave the minimum lead time before the event
    #[error("deadline must precede the event date by the minimum lead time")]
    InvalidDeadline,

    /// Partial-funding threshold outside 0..=100
    #[error("partial funding threshold must be between 0 and 100")]
    InvalidPercent,

    /// Campaign id already in use
    #[error("duplicate campaign ID")]
    DuplicateGig,

    /// Referenced campaign does not exist
    #[error("campaign not found")]
    GigNotFound,

    /// Referenced pledge does not exist
    #[error("pledge not found")]
    PledgeNotFound,

    /// Supporter already has a live pledge on this campaign
    #[error("supporter already has a pledge on this campaign")]
    DuplicatePledge,

    /// Pledge id already in use (globally)
    #[error("duplicate pledge ID")]
    DuplicatePledgeId,

    /// Supporter does not own the referenced pledge
    #[error("supporter does not own this pledge")]
    SupporterMismatch,

    /// The campaign is not in the status the operation requires
    #[error("campaign status does not allow this operation")]
    WrongStatus,

    /// Campaign already reached a terminal status
    #[error("campaign is already in a terminal status")]
    AlreadyTerminal,

    /// Retrying stuck pledges requires a resolved (terminal) campaign
    #[error("campaign has not been resolved yet")]
    NotResolved,

    /// Campaign is not accepting pledges (wrong status or deadline passed)
    #[error("campaign is not accepting pledges")]
    PledgingClosed,

    /// Pledge cancellation is only allowed while the pledge is held and the
    /// campaign is still accepting pledges
    #[error("pledge can no longer be cancelled")]
    CancellationWindowClosed,

    /// The venue's payout account is missing or not capability-verified
    #[error("venue payout account is not ready")]
    PayoutAccountNotReady,

    /// All performer slots are taken
    #[error("no performer slots remaining")]
    PerformerSlotsFull,

    /// Opening the pledge phase requires at least one committed performer
    #[error("no performers committed to the event")]
    NoPerformers,

    /// Webhook signature did not verify
    #[error("invalid webhook signature")]
    InvalidSignature,

    /// Webhook payload could not be parsed
    #[error("malformed webhook event: {0}")]
    MalformedEvent(String),

    /// Ticket lookup failed
    #[error("ticket not found")]
    TicketNotFound,

    /// Ticket was already redeemed
    #[error("ticket already checked in")]
    TicketAlreadyCheckedIn,

    /// Ticket is cancelled and cannot be redeemed
    #[error("ticket is cancelled")]
    TicketCancelled,

    /// Payment gateway call failed (synchronous paths only)
    #[error("gateway: {0}")]
    Gateway(#[from] GatewayError),
}

#[cfg(test)]
mod tests {
    use super::FundingError;
    use crate::gateway::GatewayError;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            FundingError::InvalidTarget.to_string(),
            "target amount must be positive"
        );
        assert_eq!(
            FundingError::InvalidDeadline.to_string(),
            "deadline must precede the event date by the minimum lead time"
        );
        assert_eq!(
            FundingError::DuplicatePledge.to_string(),
            "supporter already has a pledge on this campaign"
        );
        assert_eq!(FundingError::DuplicatePledgeId.to_string(), "duplicate pledge ID");
        assert_eq!(
            FundingError::PledgingClosed.to_string(),
            "campaign is not accepting pledges"
        );
        assert_eq!(
            FundingError::CancellationWindowClosed.to_string(),
            "pledge can no longer be cancelled"
        );
        assert_eq!(
            FundingError::InvalidSignature.to_string(),
            "invalid webhook signature"
        );
    }

    #[test]
    fn gateway_errors_convert() {
        let err: FundingError = GatewayError::Declined("card expired".into()).into();
        assert_eq!(err.to_string(), "gateway: authorization declined: card expired");
    }

    #[test]
    fn errors_are_cloneable() {
        let error = FundingError::PledgingClosed;
        let cloned = error.clone();
        assert_eq!(error, cloned);
    }
}
