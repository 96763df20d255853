use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTMessage {
    #[serde(rename = "t", with = "serde_bytes")]
    pub transaction_id: [u8; 4],

    #[serde(default)]
    #[serde(rename = "v", with = "serde_bytes")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<[u8; 4]>,

    #[serde(flatten)]
    pub variant: DHTMessageVariant,
}

impl DHTMessage {
    pub fn from_bytes(bytes: &[u8]) -> Result<DHTMessage, serde_bencode::Error> {
        let obj = serde_bencode::from_bytes(bytes)?;
        Ok(obj)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_bencode::Error> {
        serde_bencode::to_bytes(self)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "y")]
pub enum DHTMessageVariant {
    #[serde(rename = "q")]
    Request(DHTRequestSpecific),

    #[serde(rename = "r")]
    Response(DHTResponseSpecific),

    #[serde(rename = "e")]
    Error(DHTErrorSpecific),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "q")]
pub enum DHTRequestSpecific {
    #[serde(rename = "ping")]
    Ping {
        #[serde(rename = "a")]
        arguments: DHTEmptyArguments,
    },

    #[serde(rename = "find_successor")]
    FindSuccessor {
        #[serde(rename = "a")]
        arguments: DHTTargetArguments,
    },

    #[serde(rename = "lookup")]
    Lookup {
        #[serde(rename = "a")]
        arguments: DHTKeyArguments,
    },

    #[serde(rename = "store")]
    Store {
        #[serde(rename = "a")]
        arguments: DHTStoreArguments,
    },

    #[serde(rename = "get_successor")]
    GetSuccessor {
        #[serde(rename = "a")]
        arguments: DHTEmptyArguments,
    },

    #[serde(rename = "get_predecessor")]
    GetPredecessor {
        #[serde(rename = "a")]
        arguments: DHTEmptyArguments,
    },

    #[serde(rename = "get_finger")]
    GetFinger {
        #[serde(rename = "a")]
        arguments: DHTIndexArguments,
    },

    #[serde(rename = "join")]
    Join {
        #[serde(rename = "a")]
        arguments: DHTNodeArguments,
    },

    #[serde(rename = "leave")]
    Leave {
        #[serde(rename = "a")]
        arguments: DHTIdArguments,
    },

    #[serde(rename = "notify")]
    Notify {
        #[serde(rename = "a")]
        arguments: DHTNodeArguments,
    },

    #[serde(rename = "attach")]
    Attach {
        #[serde(rename = "a")]
        arguments: DHTAttachArguments,
    },

    #[serde(rename = "handoff")]
    Handoff {
        #[serde(rename = "a")]
        arguments: DHTEntriesArguments,
    },

    #[serde(rename = "set_successor")]
    SetSuccessor {
        #[serde(rename = "a")]
        arguments: DHTNodeArguments,
    },

    #[serde(rename = "depart")]
    Depart {
        #[serde(rename = "a")]
        arguments: DHTEmptyArguments,
    },

    #[serde(rename = "stay")]
    Stay {
        #[serde(rename = "a")]
        arguments: DHTEntriesArguments,
    },

    #[serde(rename = "absorb")]
    Absorb {
        #[serde(rename = "a")]
        arguments: DHTAbsorbArguments,
    },

    #[serde(rename = "update_finger")]
    UpdateFinger {
        #[serde(rename = "a")]
        arguments: DHTUpdateFingerArguments,
    },

    #[serde(rename = "replace_finger")]
    ReplaceFinger {
        #[serde(rename = "a")]
        arguments: DHTReplaceFingerArguments,
    },

    #[serde(rename = "forget_predecessor")]
    ForgetPredecessor {
        #[serde(rename = "a")]
        arguments: DHTIdArguments,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "k")]
pub enum DHTResponseSpecific {
    #[serde(rename = "pong")]
    Pong {
        #[serde(rename = "r")]
        arguments: DHTIdArguments,
    },

    #[serde(rename = "owner")]
    Owner {
        #[serde(rename = "r")]
        arguments: DHTOwnerArguments,
    },

    #[serde(rename = "forward")]
    Forward {
        #[serde(rename = "r")]
        arguments: DHTNodeArguments,
    },

    #[serde(rename = "value")]
    Value {
        #[serde(rename = "r")]
        arguments: DHTValueArguments,
    },

    #[serde(rename = "not_found")]
    NotFound {
        #[serde(rename = "r")]
        arguments: DHTEmptyArguments,
    },

    #[serde(rename = "node")]
    Node {
        #[serde(rename = "r")]
        arguments: DHTOptionalNodeArguments,
    },

    #[serde(rename = "accepted")]
    Accepted {
        #[serde(rename = "r")]
        arguments: DHTAcceptedArguments,
    },

    #[serde(rename = "departed")]
    Departed {
        #[serde(rename = "r")]
        arguments: DHTDepartedArguments,
    },

    #[serde(rename = "finger_updated")]
    FingerUpdated {
        #[serde(rename = "r")]
        arguments: DHTFingerUpdatedArguments,
    },

    #[serde(rename = "ok")]
    Ok {
        #[serde(rename = "r")]
        arguments: DHTEmptyArguments,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTErrorSpecific {
    #[serde(rename = "e")]
    pub error_info: (i32, String),
}

// === Shared ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct DHTEmptyArguments {}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTIdArguments {
    pub id: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTNodeArguments {
    #[serde(with = "serde_bytes")]
    pub node: Box<[u8]>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTOptionalNodeArguments {
    #[serde(default)]
    #[serde(with = "serde_bytes")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<Box<[u8]>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTEntry {
    pub k: u32,

    #[serde(with = "serde_bytes")]
    pub v: Box<[u8]>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTEntriesArguments {
    pub entries: Vec<DHTEntry>,
}

// === Routing ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTTargetArguments {
    pub target: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTIndexArguments {
    pub index: u8,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTOwnerArguments {
    #[serde(with = "serde_bytes")]
    pub predecessor: Box<[u8]>,

    #[serde(with = "serde_bytes")]
    pub owner: Box<[u8]>,
}

// === Store ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTKeyArguments {
    pub key: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTStoreArguments {
    pub key: u32,

    #[serde(with = "serde_bytes")]
    pub v: Box<[u8]>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTValueArguments {
    #[serde(with = "serde_bytes")]
    pub v: Box<[u8]>,
}

// === Topology ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTAttachArguments {
    #[serde(with = "serde_bytes")]
    pub successor: Box<[u8]>,

    #[serde(with = "serde_bytes")]
    pub predecessor: Box<[u8]>,

    pub fingers: Vec<ByteBuf>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTAbsorbArguments {
    #[serde(with = "serde_bytes")]
    pub departing: Box<[u8]>,

    #[serde(default)]
    #[serde(with = "serde_bytes")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predecessor: Option<Box<[u8]>>,

    pub entries: Vec<DHTEntry>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTAcceptedArguments {
    pub accepted: u8,

    pub entries: Vec<DHTEntry>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTDepartedArguments {
    #[serde(with = "serde_bytes")]
    pub successor: Box<[u8]>,

    #[serde(default)]
    #[serde(with = "serde_bytes")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predecessor: Option<Box<[u8]>>,

    pub entries: Vec<DHTEntry>,
}

// === Fingers ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTUpdateFingerArguments {
    pub index: u8,

    #[serde(with = "serde_bytes")]
    pub node: Box<[u8]>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTReplaceFingerArguments {
    pub index: u8,

    pub departing: u32,

    #[serde(with = "serde_bytes")]
    pub replacement: Box<[u8]>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTFingerUpdatedArguments {
    pub references: u8,

    #[serde(default)]
    #[serde(with = "serde_bytes")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predecessor: Option<Box<[u8]>>,
}
