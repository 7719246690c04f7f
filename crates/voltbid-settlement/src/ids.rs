//! Identifier newtypes shared by every component of the settlement core.
//!
//! All identifiers are plain `u64`s on the wire (the outbid queue serializes
//! them as JSON numbers) but are kept as distinct types in code so that an
//! auction id can never be passed where a bid id is expected.

use std::fmt::{
    self,
    Display,
    Formatter,
};

use serde::{
    Deserialize,
    Serialize,
};

macro_rules! id_type {
    ($(#[$docs:meta])* $name:ident) => {
        $(#[$docs])*
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                Display::fmt(&self.0, f)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

id_type!(
    /// The identity of an authenticated user, supplied by the identity collaborator.
    UserId
);
id_type!(
    /// The identity of a catalog item an auction is run for.
    ItemId
);
id_type!(
    /// The identity of an auction.
    AuctionId
);
id_type!(
    /// The identity of a bid. Bids are append-only; ids are never reused.
    BidId
);
id_type!(
    /// The identity of a user's wallet.
    WalletId
);
id_type!(
    /// The identity of a wallet ledger entry.
    TransactionId
);
