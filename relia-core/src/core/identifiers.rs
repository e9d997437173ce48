// relia-core/src/core/identifiers.rs
// ============================================================================
// Module: Relia Identifiers
// Description: Opaque identifiers for records, approvals, and signing keys.
// Purpose: Provide strongly typed, serializable IDs with stable string forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Record identifiers are content-addressed digests (`sha256:<hex>`), while
//! approval and key identifiers are allocated strings. All of them are opaque
//! here; derivation rules live with the builders that mint them.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier from its string form.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns true when the identifier is empty.
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

string_id! {
    /// Content-addressed identifier of a context record.
    ContextId
}

string_id! {
    /// Content-addressed identifier of a decision record.
    DecisionId
}

string_id! {
    /// Content-addressed identifier of a signed receipt.
    ReceiptId
}

string_id! {
    /// Digest naming one logical authorize operation across retries.
    IdemKey
}

string_id! {
    /// Allocated identifier of a human approval.
    ApprovalId
}

string_id! {
    /// Identifier of an Ed25519 signing key.
    KeyId
}
