//! Serialize and deserialize ring RPC messages.
//!
//! Messages follow the KRPC layout: a bencoded dictionary with a transaction id `t`,
//! a type `y` (`q`uery, `r`esponse or `e`rror), the method name `q` and its
//! arguments `a` for queries, and a kind `k` with its values `r` for responses.

mod internal;

use bytes::Bytes;
use serde_bytes::ByteBuf;

use crate::common::{Id, Node};

/// Generic error.
pub const ERROR_GENERIC: i32 = 201;
/// The server failed to handle a well formed request.
pub const ERROR_SERVER: i32 = 202;
/// Malformed packet, invalid arguments or bad token.
pub const ERROR_PROTOCOL: i32 = 203;
/// Method unknown.
pub const ERROR_METHOD_UNKNOWN: i32 = 204;
/// The responding node does not own the requested key.
pub const ERROR_NOT_OWNER: i32 = 301;
/// The responding node detected a broken successor cycle.
pub const ERROR_RING_INCONSISTENCY: i32 = 302;
/// A join candidate's id is already taken.
pub const ERROR_ID_IN_USE: i32 = 303;
/// The responding node could not reach a peer while serving the request.
pub const ERROR_PEER_UNREACHABLE: i32 = 304;
/// The responding node timed out while locating an owner.
pub const ERROR_LOOKUP_TIMEOUT: i32 = 305;
/// The responding node has no ring to route through.
pub const ERROR_NO_OWNER: i32 = 306;

#[derive(Debug, PartialEq, Clone)]
pub struct Message {
    pub transaction_id: u32,

    /// The version of the requester or responder.
    pub version: Option<[u8; 4]>,

    pub message_type: MessageType,
}

#[derive(Debug, PartialEq, Clone)]
pub enum MessageType {
    Request(RequestSpecific),

    Response(ResponseSpecific),

    Error(ErrorSpecific),
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ErrorSpecific {
    pub code: i32,
    pub description: String,
}

impl ErrorSpecific {
    pub fn new(code: i32, description: impl Into<String>) -> Self {
        ErrorSpecific {
            code,
            description: description.into(),
        }
    }
}

/// A stored key and its value, as moved between owners.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Entry {
    pub key: Id,
    pub value: Bytes,
}

impl Entry {
    pub fn new(key: Id, value: Bytes) -> Self {
        Entry { key, value }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum RequestSpecific {
    Ping,
    /// One routing step towards the owner of `target`.
    FindSuccessor { target: Id },

    Lookup { key: Id },
    Store { key: Id, value: Bytes },

    GetSuccessor,
    GetPredecessor,
    GetFinger { index: u8 },

    /// Splice `candidate` into the ring, using the responder as the entry point.
    Join { candidate: Node },
    /// Ask the node with this id to leave the ring.
    Leave { id: Id },

    /// `candidate` believes it is the responder's predecessor.
    Notify { candidate: Node },
    /// Initialize a joining node's links and fingers.
    Attach {
        successor: Node,
        predecessor: Node,
        fingers: Vec<Node>,
    },
    /// Take ownership of migrated entries.
    Handoff { entries: Vec<Entry> },
    SetSuccessor { node: Node },
    /// Stop owning keys and hand back everything needed to splice the responder out.
    Depart,
    /// Undo a [RequestSpecific::Depart] that could not be completed.
    Stay { entries: Vec<Entry> },
    /// Absorb a departing predecessor's entries and adopt its predecessor.
    Absorb {
        departing: Node,
        predecessor: Option<Node>,
        entries: Vec<Entry>,
    },
    UpdateFinger { index: u8, node: Node },
    ReplaceFinger {
        index: u8,
        departing: Id,
        replacement: Node,
    },
    /// Clear the predecessor link if it still points to `id`.
    ForgetPredecessor { id: Id },
}

impl RequestSpecific {
    /// Method name used on the wire and in logs.
    pub fn method(&self) -> &'static str {
        match self {
            RequestSpecific::Ping => "ping",
            RequestSpecific::FindSuccessor { .. } => "find_successor",
            RequestSpecific::Lookup { .. } => "lookup",
            RequestSpecific::Store { .. } => "store",
            RequestSpecific::GetSuccessor => "get_successor",
            RequestSpecific::GetPredecessor => "get_predecessor",
            RequestSpecific::GetFinger { .. } => "get_finger",
            RequestSpecific::Join { .. } => "join",
            RequestSpecific::Leave { .. } => "leave",
            RequestSpecific::Notify { .. } => "notify",
            RequestSpecific::Attach { .. } => "attach",
            RequestSpecific::Handoff { .. } => "handoff",
            RequestSpecific::SetSuccessor { .. } => "set_successor",
            RequestSpecific::Depart => "depart",
            RequestSpecific::Stay { .. } => "stay",
            RequestSpecific::Absorb { .. } => "absorb",
            RequestSpecific::UpdateFinger { .. } => "update_finger",
            RequestSpecific::ReplaceFinger { .. } => "replace_finger",
            RequestSpecific::ForgetPredecessor { .. } => "forget_predecessor",
        }
    }
}

/// Answer to a [RequestSpecific::FindSuccessor].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Step {
    /// The target lies in `(predecessor, owner]`; `predecessor` is the responder.
    Owner { predecessor: Node, owner: Node },
    /// Continue the search at `next`, strictly closer to the target.
    Forward { next: Node },
}

#[derive(Debug, PartialEq, Clone)]
pub enum ResponseSpecific {
    Pong {
        responder_id: Id,
    },
    Step(Step),
    Value {
        value: Bytes,
    },
    NotFound,
    Node {
        node: Option<Node>,
    },
    Accepted {
        accepted: bool,
        entries: Vec<Entry>,
    },
    Departed {
        successor: Node,
        predecessor: Option<Node>,
        entries: Vec<Entry>,
    },
    FingerUpdated {
        references: bool,
        predecessor: Option<Node>,
    },
    Ok,
}

impl ResponseSpecific {
    /// Response kind used on the wire and in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ResponseSpecific::Pong { .. } => "pong",
            ResponseSpecific::Step(Step::Owner { .. }) => "owner",
            ResponseSpecific::Step(Step::Forward { .. }) => "forward",
            ResponseSpecific::Value { .. } => "value",
            ResponseSpecific::NotFound => "not_found",
            ResponseSpecific::Node { .. } => "node",
            ResponseSpecific::Accepted { .. } => "accepted",
            ResponseSpecific::Departed { .. } => "departed",
            ResponseSpecific::FingerUpdated { .. } => "finger_updated",
            ResponseSpecific::Ok => "ok",
        }
    }
}

#[derive(thiserror::Error, Debug)]
/// Errors decoding a [Message] from bytes.
pub enum DecodeError {
    /// Errors related to parsing DHT messages.
    #[error("Failed to parse packet bytes: {0}")]
    BencodeError(#[from] serde_bencode::Error),

    #[error("Invalid compact node: {0:?}")]
    InvalidNode(Vec<u8>),
}

impl Message {
    fn into_serde_message(self) -> internal::DHTMessage {
        internal::DHTMessage {
            transaction_id: self.transaction_id.to_be_bytes(),
            version: self.version,
            variant: match self.message_type {
                MessageType::Request(request) => {
                    internal::DHTMessageVariant::Request(request_to_serde(request))
                }
                MessageType::Response(response) => {
                    internal::DHTMessageVariant::Response(response_to_serde(response))
                }
                MessageType::Error(error) => {
                    internal::DHTMessageVariant::Error(internal::DHTErrorSpecific {
                        error_info: (error.code, error.description),
                    })
                }
            },
        }
    }

    fn from_serde_message(msg: internal::DHTMessage) -> Result<Message, DecodeError> {
        Ok(Message {
            transaction_id: u32::from_be_bytes(msg.transaction_id),
            version: msg.version,
            message_type: match msg.variant {
                internal::DHTMessageVariant::Request(request) => {
                    MessageType::Request(request_from_serde(request)?)
                }
                internal::DHTMessageVariant::Response(response) => {
                    MessageType::Response(response_from_serde(response)?)
                }
                internal::DHTMessageVariant::Error(error) => MessageType::Error(ErrorSpecific {
                    code: error.error_info.0,
                    description: error.error_info.1,
                }),
            },
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_bencode::Error> {
        self.clone().into_serde_message().to_bytes()
    }

    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Message, DecodeError> {
        Message::from_serde_message(internal::DHTMessage::from_bytes(bytes.as_ref())?)
    }
}

fn request_to_serde(request: RequestSpecific) -> internal::DHTRequestSpecific {
    use internal::DHTRequestSpecific as R;

    match request {
        RequestSpecific::Ping => R::Ping {
            arguments: internal::DHTEmptyArguments {},
        },
        RequestSpecific::FindSuccessor { target } => R::FindSuccessor {
            arguments: internal::DHTTargetArguments { target: target.0 },
        },
        RequestSpecific::Lookup { key } => R::Lookup {
            arguments: internal::DHTKeyArguments { key: key.0 },
        },
        RequestSpecific::Store { key, value } => R::Store {
            arguments: internal::DHTStoreArguments {
                key: key.0,
                v: value.to_vec().into(),
            },
        },
        RequestSpecific::GetSuccessor => R::GetSuccessor {
            arguments: internal::DHTEmptyArguments {},
        },
        RequestSpecific::GetPredecessor => R::GetPredecessor {
            arguments: internal::DHTEmptyArguments {},
        },
        RequestSpecific::GetFinger { index } => R::GetFinger {
            arguments: internal::DHTIndexArguments { index },
        },
        RequestSpecific::Join { candidate } => R::Join {
            arguments: node_arguments(&candidate),
        },
        RequestSpecific::Leave { id } => R::Leave {
            arguments: internal::DHTIdArguments { id: id.0 },
        },
        RequestSpecific::Notify { candidate } => R::Notify {
            arguments: node_arguments(&candidate),
        },
        RequestSpecific::Attach {
            successor,
            predecessor,
            fingers,
        } => R::Attach {
            arguments: internal::DHTAttachArguments {
                successor: successor.to_compact().into(),
                predecessor: predecessor.to_compact().into(),
                fingers: fingers
                    .iter()
                    .map(|node| ByteBuf::from(node.to_compact()))
                    .collect(),
            },
        },
        RequestSpecific::Handoff { entries } => R::Handoff {
            arguments: internal::DHTEntriesArguments {
                entries: entries_to_serde(entries),
            },
        },
        RequestSpecific::SetSuccessor { node } => R::SetSuccessor {
            arguments: node_arguments(&node),
        },
        RequestSpecific::Depart => R::Depart {
            arguments: internal::DHTEmptyArguments {},
        },
        RequestSpecific::Stay { entries } => R::Stay {
            arguments: internal::DHTEntriesArguments {
                entries: entries_to_serde(entries),
            },
        },
        RequestSpecific::Absorb {
            departing,
            predecessor,
            entries,
        } => R::Absorb {
            arguments: internal::DHTAbsorbArguments {
                departing: departing.to_compact().into(),
                predecessor: predecessor.map(|node| node.to_compact().into()),
                entries: entries_to_serde(entries),
            },
        },
        RequestSpecific::UpdateFinger { index, node } => R::UpdateFinger {
            arguments: internal::DHTUpdateFingerArguments {
                index,
                node: node.to_compact().into(),
            },
        },
        RequestSpecific::ReplaceFinger {
            index,
            departing,
            replacement,
        } => R::ReplaceFinger {
            arguments: internal::DHTReplaceFingerArguments {
                index,
                departing: departing.0,
                replacement: replacement.to_compact().into(),
            },
        },
        RequestSpecific::ForgetPredecessor { id } => R::ForgetPredecessor {
            arguments: internal::DHTIdArguments { id: id.0 },
        },
    }
}

fn request_from_serde(
    request: internal::DHTRequestSpecific,
) -> Result<RequestSpecific, DecodeError> {
    use internal::DHTRequestSpecific as R;

    Ok(match request {
        R::Ping { .. } => RequestSpecific::Ping,
        R::FindSuccessor { arguments } => RequestSpecific::FindSuccessor {
            target: Id(arguments.target),
        },
        R::Lookup { arguments } => RequestSpecific::Lookup {
            key: Id(arguments.key),
        },
        R::Store { arguments } => RequestSpecific::Store {
            key: Id(arguments.key),
            value: Bytes::from(arguments.v.into_vec()),
        },
        R::GetSuccessor { .. } => RequestSpecific::GetSuccessor,
        R::GetPredecessor { .. } => RequestSpecific::GetPredecessor,
        R::GetFinger { arguments } => RequestSpecific::GetFinger {
            index: arguments.index,
        },
        R::Join { arguments } => RequestSpecific::Join {
            candidate: bytes_to_node(&arguments.node)?,
        },
        R::Leave { arguments } => RequestSpecific::Leave {
            id: Id(arguments.id),
        },
        R::Notify { arguments } => RequestSpecific::Notify {
            candidate: bytes_to_node(&arguments.node)?,
        },
        R::Attach { arguments } => RequestSpecific::Attach {
            successor: bytes_to_node(&arguments.successor)?,
            predecessor: bytes_to_node(&arguments.predecessor)?,
            fingers: arguments
                .fingers
                .iter()
                .map(|bytes| bytes_to_node(bytes))
                .collect::<Result<_, _>>()?,
        },
        R::Handoff { arguments } => RequestSpecific::Handoff {
            entries: entries_from_serde(arguments.entries),
        },
        R::SetSuccessor { arguments } => RequestSpecific::SetSuccessor {
            node: bytes_to_node(&arguments.node)?,
        },
        R::Depart { .. } => RequestSpecific::Depart,
        R::Stay { arguments } => RequestSpecific::Stay {
            entries: entries_from_serde(arguments.entries),
        },
        R::Absorb { arguments } => RequestSpecific::Absorb {
            departing: bytes_to_node(&arguments.departing)?,
            predecessor: optional_node(arguments.predecessor)?,
            entries: entries_from_serde(arguments.entries),
        },
        R::UpdateFinger { arguments } => RequestSpecific::UpdateFinger {
            index: arguments.index,
            node: bytes_to_node(&arguments.node)?,
        },
        R::ReplaceFinger { arguments } => RequestSpecific::ReplaceFinger {
            index: arguments.index,
            departing: Id(arguments.departing),
            replacement: bytes_to_node(&arguments.replacement)?,
        },
        R::ForgetPredecessor { arguments } => RequestSpecific::ForgetPredecessor {
            id: Id(arguments.id),
        },
    })
}

fn response_to_serde(response: ResponseSpecific) -> internal::DHTResponseSpecific {
    use internal::DHTResponseSpecific as R;

    match response {
        ResponseSpecific::Pong { responder_id } => R::Pong {
            arguments: internal::DHTIdArguments { id: responder_id.0 },
        },
        ResponseSpecific::Step(Step::Owner { predecessor, owner }) => R::Owner {
            arguments: internal::DHTOwnerArguments {
                predecessor: predecessor.to_compact().into(),
                owner: owner.to_compact().into(),
            },
        },
        ResponseSpecific::Step(Step::Forward { next }) => R::Forward {
            arguments: node_arguments(&next),
        },
        ResponseSpecific::Value { value } => R::Value {
            arguments: internal::DHTValueArguments {
                v: value.to_vec().into(),
            },
        },
        ResponseSpecific::NotFound => R::NotFound {
            arguments: internal::DHTEmptyArguments {},
        },
        ResponseSpecific::Node { node } => R::Node {
            arguments: internal::DHTOptionalNodeArguments {
                node: node.map(|node| node.to_compact().into()),
            },
        },
        ResponseSpecific::Accepted { accepted, entries } => R::Accepted {
            arguments: internal::DHTAcceptedArguments {
                accepted: accepted as u8,
                entries: entries_to_serde(entries),
            },
        },
        ResponseSpecific::Departed {
            successor,
            predecessor,
            entries,
        } => R::Departed {
            arguments: internal::DHTDepartedArguments {
                successor: successor.to_compact().into(),
                predecessor: predecessor.map(|node| node.to_compact().into()),
                entries: entries_to_serde(entries),
            },
        },
        ResponseSpecific::FingerUpdated {
            references,
            predecessor,
        } => R::FingerUpdated {
            arguments: internal::DHTFingerUpdatedArguments {
                references: references as u8,
                predecessor: predecessor.map(|node| node.to_compact().into()),
            },
        },
        ResponseSpecific::Ok => R::Ok {
            arguments: internal::DHTEmptyArguments {},
        },
    }
}

fn response_from_serde(
    response: internal::DHTResponseSpecific,
) -> Result<ResponseSpecific, DecodeError> {
    use internal::DHTResponseSpecific as R;

    Ok(match response {
        R::Pong { arguments } => ResponseSpecific::Pong {
            responder_id: Id(arguments.id),
        },
        R::Owner { arguments } => ResponseSpecific::Step(Step::Owner {
            predecessor: bytes_to_node(&arguments.predecessor)?,
            owner: bytes_to_node(&arguments.owner)?,
        }),
        R::Forward { arguments } => ResponseSpecific::Step(Step::Forward {
            next: bytes_to_node(&arguments.node)?,
        }),
        R::Value { arguments } => ResponseSpecific::Value {
            value: Bytes::from(arguments.v.into_vec()),
        },
        R::NotFound { .. } => ResponseSpecific::NotFound,
        R::Node { arguments } => ResponseSpecific::Node {
            node: optional_node(arguments.node)?,
        },
        R::Accepted { arguments } => ResponseSpecific::Accepted {
            accepted: arguments.accepted > 0,
            entries: entries_from_serde(arguments.entries),
        },
        R::Departed { arguments } => ResponseSpecific::Departed {
            successor: bytes_to_node(&arguments.successor)?,
            predecessor: optional_node(arguments.predecessor)?,
            entries: entries_from_serde(arguments.entries),
        },
        R::FingerUpdated { arguments } => ResponseSpecific::FingerUpdated {
            references: arguments.references > 0,
            predecessor: optional_node(arguments.predecessor)?,
        },
        R::Ok { .. } => ResponseSpecific::Ok,
    })
}

fn node_arguments(node: &Node) -> internal::DHTNodeArguments {
    internal::DHTNodeArguments {
        node: node.to_compact().into(),
    }
}

fn bytes_to_node(bytes: &[u8]) -> Result<Node, DecodeError> {
    Node::from_compact(bytes).ok_or_else(|| DecodeError::InvalidNode(bytes.to_vec()))
}

fn optional_node(bytes: Option<Box<[u8]>>) -> Result<Option<Node>, DecodeError> {
    bytes.map(|bytes| bytes_to_node(&bytes)).transpose()
}

fn entries_to_serde(entries: Vec<Entry>) -> Vec<internal::DHTEntry> {
    entries
        .into_iter()
        .map(|entry| internal::DHTEntry {
            k: entry.key.0,
            v: entry.value.to_vec().into(),
        })
        .collect()
}

fn entries_from_serde(entries: Vec<internal::DHTEntry>) -> Vec<Entry> {
    entries
        .into_iter()
        .map(|entry| Entry::new(Id(entry.k), Bytes::from(entry.v.into_vec())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u32, port: u16) -> Node {
        Node::new(Id(id), format!("127.0.0.1:{port}").parse().unwrap())
    }

    fn round_trip(message_type: MessageType) {
        let original_msg = Message {
            transaction_id: 258,
            version: Some([67, 76, 0, 1]),
            message_type,
        };

        let bytes = original_msg.to_bytes().unwrap();
        let parsed_msg = Message::from_bytes(bytes).unwrap();

        assert_eq!(parsed_msg, original_msg);
    }

    #[test]
    fn test_ping_request() {
        let msg = Message {
            transaction_id: 1,
            version: None,
            message_type: MessageType::Request(RequestSpecific::Ping),
        };

        let bytes = msg.to_bytes().unwrap();
        assert_eq!(
            String::from_utf8_lossy(&bytes),
            "d1:ade1:q4:ping1:t4:\0\0\0\x011:y1:qe"
        );

        assert_eq!(Message::from_bytes(bytes).unwrap(), msg);
    }

    #[test]
    fn test_store_request() {
        round_trip(MessageType::Request(RequestSpecific::Store {
            key: Id(2_000_000_000),
            value: Bytes::from_static(b"x"),
        }));
    }

    #[test]
    fn test_store_empty_value() {
        round_trip(MessageType::Request(RequestSpecific::Store {
            key: Id(7),
            value: Bytes::new(),
        }));
    }

    #[test]
    fn test_attach_request() {
        round_trip(MessageType::Request(RequestSpecific::Attach {
            successor: node(50_000, 3),
            predecessor: node(0, 1),
            fingers: vec![node(50_000, 3), node(50_000, 3), node(4_000_000_000, 4)],
        }));
    }

    #[test]
    fn test_stay_request() {
        round_trip(MessageType::Request(RequestSpecific::Stay {
            entries: vec![Entry::new(Id(50), Bytes::from_static(b"kept"))],
        }));
    }

    #[test]
    fn test_absorb_request() {
        round_trip(MessageType::Request(RequestSpecific::Absorb {
            departing: node(1000, 2),
            predecessor: None,
            entries: vec![
                Entry::new(Id(999), Bytes::from_static(b"a")),
                Entry::new(Id(1000), Bytes::from_static(b"b")),
            ],
        }));
    }

    #[test]
    fn test_replace_finger_request() {
        round_trip(MessageType::Request(RequestSpecific::ReplaceFinger {
            index: 31,
            departing: Id(1000),
            replacement: node(50_000, 3),
        }));
    }

    #[test]
    fn test_step_responses() {
        round_trip(MessageType::Response(ResponseSpecific::Step(Step::Owner {
            predecessor: node(50_000, 3),
            owner: node(4_000_000_000, 4),
        })));
        round_trip(MessageType::Response(ResponseSpecific::Step(
            Step::Forward {
                next: Node::new(Id(1000), "[::1]:6881".parse().unwrap()),
            },
        )));
    }

    #[test]
    fn test_value_and_not_found_are_distinct() {
        round_trip(MessageType::Response(ResponseSpecific::Value {
            value: Bytes::new(),
        }));
        round_trip(MessageType::Response(ResponseSpecific::NotFound));

        let empty = Message {
            transaction_id: 0,
            version: None,
            message_type: MessageType::Response(ResponseSpecific::Value {
                value: Bytes::new(),
            }),
        };
        let parsed = Message::from_bytes(empty.to_bytes().unwrap()).unwrap();
        assert_ne!(
            parsed.message_type,
            MessageType::Response(ResponseSpecific::NotFound)
        );
    }

    #[test]
    fn test_node_response() {
        round_trip(MessageType::Response(ResponseSpecific::Node { node: None }));
        round_trip(MessageType::Response(ResponseSpecific::Node {
            node: Some(node(1, 1)),
        }));
    }

    #[test]
    fn test_departed_response() {
        round_trip(MessageType::Response(ResponseSpecific::Departed {
            successor: node(50_000, 3),
            predecessor: Some(node(0, 1)),
            entries: vec![Entry::new(Id(500), Bytes::from_static(b"value"))],
        }));
    }

    #[test]
    fn test_finger_updated_response() {
        round_trip(MessageType::Response(ResponseSpecific::FingerUpdated {
            references: true,
            predecessor: Some(node(0, 1)),
        }));
    }

    #[test]
    fn test_error_message() {
        round_trip(MessageType::Error(ErrorSpecific::new(
            ERROR_NOT_OWNER,
            "Not owner",
        )));
    }

    #[test]
    fn test_invalid_node_bytes() {
        let bad = internal::DHTMessage {
            transaction_id: [0, 0, 0, 1],
            version: None,
            variant: internal::DHTMessageVariant::Request(internal::DHTRequestSpecific::Join {
                arguments: internal::DHTNodeArguments {
                    node: vec![1, 2, 3].into(),
                },
            }),
        };

        let bytes = bad.to_bytes().unwrap();

        assert!(matches!(
            Message::from_bytes(bytes),
            Err(DecodeError::InvalidNode(_))
        ));
    }

    #[test]
    fn test_garbage() {
        assert!(matches!(
            Message::from_bytes(b"not bencode"),
            Err(DecodeError::BencodeError(_))
        ));
    }
}
