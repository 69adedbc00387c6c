//! # Messages
//!
//! Every actor type speaks one [`Protocol`]: a closed enum of message variants, each
//! wrapping a distinct payload struct. Handlers are registered per payload type and
//! looked up by the variant's [`Protocol::Kind`], so dispatch is a hash lookup on a
//! plain enum tag rather than an inspection of runtime types.
//!
//! The [`protocol!`](crate::protocol) macro writes the boilerplate:
//!
//! ```rust
//! use actor_mesh::message::{Protocol, Variant};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! pub struct Ping(pub u32);
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! pub struct Pong(pub u32);
//!
//! actor_mesh::protocol! {
//!     #[derive(Debug, Clone, Serialize, Deserialize)]
//!     pub enum PingProtocol {
//!         Ping(Ping),
//!         Pong(Pong),
//!     }
//! }
//!
//! let message = Ping(3).into_message();
//! assert_eq!(message.kind(), PingProtocolKind::Ping);
//! assert_eq!(<Pong as Variant<PingProtocol>>::kind(), PingProtocolKind::Pong);
//! assert!(Pong::from_message(message).is_err());
//! ```

mod envelope;

pub use envelope::{BincodeSerializer, Body, Envelope, MessageSerializer, OperationHeader, OperationType};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::hash::Hash;

/// A closed set of messages understood by one family of actors.
pub trait Protocol: Serialize + DeserializeOwned + Debug + Send + Sync + 'static {
    /// Payload-free tag identifying each variant.
    type Kind: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

/// A payload type carried by exactly one variant of `P`.
pub trait Variant<P: Protocol>: Sized + Send + 'static {
    fn kind() -> P::Kind;

    /// Unwraps the payload, handing the message back untouched if it is another variant.
    fn from_message(message: P) -> Result<Self, P>;

    fn into_message(self) -> P;
}

/// Declares a protocol enum together with its `…Kind` tag enum and all
/// [`Protocol`]/[`Variant`] impls.
///
/// Each variant must wrap a distinct payload type.
#[macro_export]
macro_rules! protocol {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident($payload:ty)),+ $(,)?
        }
    ) => {
        $crate::__private::paste! {
            $(#[$meta])*
            $vis enum $name {
                $($variant($payload)),+
            }

            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            $vis enum [<$name Kind>] {
                $($variant),+
            }

            impl $crate::message::Protocol for $name {
                type Kind = [<$name Kind>];

                fn kind(&self) -> Self::Kind {
                    match self {
                        $($name::$variant(_) => [<$name Kind>]::$variant),+
                    }
                }
            }

            $(
                impl $crate::message::Variant<$name> for $payload {
                    fn kind() -> [<$name Kind>] {
                        [<$name Kind>]::$variant
                    }

                    fn from_message(message: $name) -> ::std::result::Result<Self, $name> {
                        match message {
                            $name::$variant(payload) => Ok(payload),
                            #[allow(unreachable_patterns)]
                            other => Err(other),
                        }
                    }

                    fn into_message(self) -> $name {
                        $name::$variant(self)
                    }
                }

                impl ::std::convert::From<$payload> for $name {
                    fn from(payload: $payload) -> Self {
                        $name::$variant(payload)
                    }
                }
            )+
        }
    };
}
