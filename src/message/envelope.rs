use crate::actor::ActorKey;
use crate::error::{ErrorCode, Result};
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    Request,
    Reply,
    OneWay,
}

/// Correlation data travelling in front of every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationHeader {
    /// Present on requests and their replies.
    pub request_id: Option<Uuid>,
    pub activity_id: Uuid,
    pub op_type: OperationType,
}

impl OperationHeader {
    pub fn request(request_id: Uuid, activity_id: Uuid) -> Self {
        Self {
            request_id: Some(request_id),
            activity_id,
            op_type: OperationType::Request,
        }
    }

    pub fn reply(request_id: Uuid, activity_id: Uuid) -> Self {
        Self {
            request_id: Some(request_id),
            activity_id,
            op_type: OperationType::Reply,
        }
    }

    pub fn one_way(activity_id: Uuid) -> Self {
        Self {
            request_id: None,
            activity_id,
            op_type: OperationType::OneWay,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Body<P> {
    Message(P),
    /// Contract-level failure sent in place of a reply.
    Error { code: ErrorCode, description: String },
}

/// Unit of transmission between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<P> {
    pub header: OperationHeader,
    /// Actor the message is addressed to; `None` for node-level traffic and replies.
    pub target: Option<ActorKey>,
    pub body: Body<P>,
}

/// Converts envelopes to and from bytes.
pub trait MessageSerializer<P>: Send + Sync {
    fn serialize(&self, envelope: &Envelope<P>) -> Result<Vec<u8>>;

    fn deserialize(&self, bytes: &[u8]) -> Result<Envelope<P>>;

    /// Peeks at the operation type without decoding the body.
    fn try_read_type(&self, bytes: &[u8]) -> Option<OperationType>;
}

/// Fixed-int bincode encoding with a size cap on both directions.
#[derive(Debug, Clone, Copy)]
pub struct BincodeSerializer {
    max_message_size: u64,
}

impl BincodeSerializer {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size: max_message_size as u64,
        }
    }

    fn options(&self) -> impl Options {
        bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .with_limit(self.max_message_size)
            .allow_trailing_bytes()
    }
}

impl Default for BincodeSerializer {
    fn default() -> Self {
        Self::new(1024 * 1024)
    }
}

impl<P: Serialize + DeserializeOwned> MessageSerializer<P> for BincodeSerializer {
    fn serialize(&self, envelope: &Envelope<P>) -> Result<Vec<u8>> {
        Ok(self.options().serialize(envelope)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Envelope<P>> {
        Ok(self.options().deserialize(bytes)?)
    }

    fn try_read_type(&self, bytes: &[u8]) -> Option<OperationType> {
        // The header is the leading field of the encoded envelope.
        self.options()
            .deserialize::<OperationHeader>(bytes)
            .ok()
            .map(|header| header.op_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::NodeId;
    use crate::error::RuntimeError;

    #[test]
    fn reads_type_from_header_prefix() {
        let serializer = BincodeSerializer::default();
        let envelope = Envelope {
            header: OperationHeader::reply(Uuid::new_v4(), Uuid::new_v4()),
            target: Some(ActorKey::new(NodeId(2), 5)),
            body: Body::Message("hello".to_string()),
        };
        let bytes = serializer.serialize(&envelope).unwrap();

        assert_eq!(
            MessageSerializer::<String>::try_read_type(&serializer, &bytes),
            Some(OperationType::Reply)
        );
        let decoded: Envelope<String> = serializer.deserialize(&bytes).unwrap();
        assert_eq!(decoded.header, envelope.header);
        assert!(matches!(decoded.body, Body::Message(ref text) if text == "hello"));
        assert!(MessageSerializer::<String>::try_read_type(&serializer, &[1, 2]).is_none());
    }

    #[test]
    fn enforces_size_limit() {
        let serializer = BincodeSerializer::new(64);
        let envelope = Envelope {
            header: OperationHeader::one_way(Uuid::new_v4()),
            target: None,
            body: Body::Message("x".repeat(256)),
        };

        let err = serializer.serialize(&envelope).unwrap_err();
        assert!(matches!(err, RuntimeError::Serialization(_)));
    }
}
