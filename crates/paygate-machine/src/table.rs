//! The static transition table
//!
//! Permitted targets per source status. Everything not listed is invalid;
//! terminal sources have no targets at all.

use paygate_types::PaymentStatus;

/// Permitted targets for a source status
pub fn allowed_targets(from: PaymentStatus) -> &'static [PaymentStatus] {
    use PaymentStatus::*;
    match from {
        Init => &[New, Expired],
        New => &[FormShowed, Authorizing, Cancelled, Expired],
        FormShowed => &[Authorizing, Cancelled, Expired],
        Onechoosevision => &[Finishauthorize, AuthFail, Cancelled],
        Finishauthorize => &[Authorizing, AuthFail, Cancelled],
        Authorizing => &[Authorized, AuthFail, Cancelled, Expired],
        Authorized => &[Confirming, Reversing, Cancelled, Expired],
        AuthFail => &[Authorizing, Rejected, Cancelled],
        Confirm => &[Confirming, Cancelled],
        Confirming => &[Confirmed, AuthFail, Cancelled],
        Confirmed => &[Refunding, PartialRefunded],
        Cancel => &[Cancelling],
        Cancelling => &[Cancelled, Reversing],
        Reversing => &[Reversed, Cancelled],
        Refunding => &[Refunded, PartialRefunded, Confirmed],
        PartialRefunded => &[Refunding, Refunded],
        Cancelled | Reversed | Refunded | Rejected | Expired | DeadlineExpired => &[],
    }
}

/// Whether the table permits `from -> to`
pub fn is_transition_allowed(from: PaymentStatus, to: PaymentStatus) -> bool {
    allowed_targets(from).contains(&to)
}
