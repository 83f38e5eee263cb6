//! # Typed Identifiers
//!
//! UUID newtypes for every aggregate in the settlement core. The display
//! form carries a short prefix (`lic:`, `batch:`, …) so identifiers are
//! self-describing in logs and error messages.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create from an existing UUID.
            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Access the underlying UUID.
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

define_id!(
    /// A module publisher — the party earning and receiving payouts.
    PublisherId,
    "pub"
);
define_id!(
    /// A marketplace user — the party holding licenses.
    UserId,
    "user"
);
define_id!(
    /// A marketplace module — the licensed artifact.
    ModuleId,
    "mod"
);
define_id!(
    /// A license grant.
    LicenseId,
    "lic"
);
define_id!(
    /// A per-instance license activation.
    ActivationId,
    "act"
);
define_id!(
    /// An append-only balance transaction row.
    TransactionId,
    "txn"
);
define_id!(
    /// A payout batch.
    BatchId,
    "batch"
);
define_id!(
    /// A per-publisher payout item inside a batch.
    PayoutItemId,
    "item"
);
define_id!(
    /// A manual balance adjustment.
    AdjustmentId,
    "adj"
);
