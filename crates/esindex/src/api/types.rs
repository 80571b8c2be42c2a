//! Wire types for the mail API and the message records built from them.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::error::{ApiError, Result};

/// Bits of the message `Flags` field that the indexer cares about.
pub mod flags {
    pub const RECEIVED: u64 = 1 << 0;
    pub const SENT: u64 = 1 << 1;
    pub const INTERNAL: u64 = 1 << 2;
    pub const E2E: u64 = 1 << 3;
    pub const REPLIED: u64 = 1 << 5;
    pub const REPLIED_ALL: u64 = 1 << 6;
    pub const FORWARDED: u64 = 1 << 7;
}

/// A sender or recipient address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Address", default)]
    pub address: String,
}

/// Lightweight message metadata returned by the list endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageStub {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "ConversationID", default)]
    pub conversation_id: String,
    /// Epoch seconds.
    #[serde(rename = "Time")]
    pub time: i64,
    #[serde(rename = "Size", default)]
    pub size: u64,
    #[serde(rename = "Flags", default)]
    pub flags: u64,
    #[serde(rename = "LabelIDs", default)]
    pub label_ids: Vec<String>,
    #[serde(rename = "NumAttachments", default)]
    pub num_attachments: u32,
    #[serde(rename = "Subject", default)]
    pub subject: String,
    #[serde(rename = "Sender", default)]
    pub sender: Option<Recipient>,
    #[serde(rename = "ToList", default)]
    pub to_list: Vec<Recipient>,
    #[serde(rename = "CCList", default)]
    pub cc_list: Vec<Recipient>,
    #[serde(rename = "BCCList", default)]
    pub bcc_list: Vec<Recipient>,
    #[serde(rename = "AddressID", default)]
    pub address_id: String,
    #[serde(rename = "Unread", default, deserialize_with = "bool_from_int")]
    pub unread: bool,
    #[serde(rename = "ExpirationTime", default)]
    pub expiration_time: i64,
}

impl MessageStub {
    /// Whether the message was end-to-end encrypted by the sender.
    pub fn is_end_to_end_encrypted(&self) -> bool {
        self.flags & (flags::E2E | flags::INTERNAL) != 0
    }

    pub fn is_replied(&self) -> bool {
        self.flags & flags::REPLIED != 0
    }

    pub fn is_replied_all(&self) -> bool {
        self.flags & flags::REPLIED_ALL != 0
    }

    pub fn is_forwarded(&self) -> bool {
        self.flags & flags::FORWARDED != 0
    }
}

/// Full message record: a stub plus the encrypted body and headers.
///
/// Created from a stub with `details_downloaded == false`; the detail fetch
/// merges the server response into it and flips the flag.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDetail {
    pub stub: MessageStub,
    /// Armored encrypted body.
    pub body: Option<String>,
    pub header: Option<String>,
    pub mime_type: Option<String>,
    pub details_downloaded: bool,
}

impl MessageDetail {
    pub fn id(&self) -> &str {
        &self.stub.id
    }

    /// Merges a fetched detail payload into this record.
    pub fn merge(&mut self, payload: DetailPayload) {
        self.stub = payload.stub;
        self.body = payload.body;
        self.header = payload.header;
        self.mime_type = payload.mime_type;
        self.details_downloaded = true;
    }
}

impl From<MessageStub> for MessageDetail {
    fn from(stub: MessageStub) -> Self {
        Self {
            stub,
            body: None,
            header: None,
            mime_type: None,
            details_downloaded: false,
        }
    }
}

/// The `Message` object of the detail endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DetailPayload {
    #[serde(flatten)]
    pub stub: MessageStub,
    #[serde(rename = "Body", default)]
    pub body: Option<String>,
    #[serde(rename = "Header", default)]
    pub header: Option<String>,
    #[serde(rename = "MIMEType", default)]
    pub mime_type: Option<String>,
}

/// Parameters of one list request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub label_id: String,
    /// Only messages strictly older than this time. `None` means "newest".
    pub end_time: Option<i64>,
    /// Tie-breaker for messages sharing `end_time`.
    pub end_id: Option<String>,
    pub page_size: u32,
}

impl ListQuery {
    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("LabelID", self.label_id.clone()),
            ("PageSize", self.page_size.to_string()),
            ("Sort", "Time".to_string()),
            ("Desc", "1".to_string()),
        ];
        if let Some(end) = self.end_time {
            pairs.push(("End", end.to_string()));
        }
        if let Some(end_id) = &self.end_id {
            pairs.push(("EndID", end_id.clone()));
        }
        pairs
    }
}

/// Server error envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(rename = "Code")]
    pub code: i64,
    #[serde(rename = "Error", default)]
    pub error: String,
}

/// Extracts the message list from a list response.
///
/// A missing `Messages` field or one of the wrong type is a parse failure,
/// never an empty page.
pub fn parse_list_response(value: Value) -> Result<Vec<MessageStub>> {
    let items = match value {
        Value::Object(mut map) => match map.remove("Messages") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(ApiError::UnableToParseResponse(format!(
                    "'Messages' is {}, expected an array",
                    json_kind(&other)
                )))
            }
            None => {
                return Err(ApiError::UnableToParseResponse(
                    "missing 'Messages' field".to_string(),
                ))
            }
        },
        other => {
            return Err(ApiError::UnableToParseResponse(format!(
                "response is {}, expected an object",
                json_kind(&other)
            )))
        }
    };

    let mut stubs = items
        .into_iter()
        .map(|item| {
            serde_json::from_value::<MessageStub>(item)
                .map_err(|e| ApiError::UnableToParseResponse(format!("invalid message: {}", e)))
        })
        .collect::<Result<Vec<_>>>()?;

    // The API already sorts by time; a stable sort keeps its order for equal times.
    stubs.sort_by(|a, b| b.time.cmp(&a.time));
    Ok(stubs)
}

/// Extracts the `Message` object from a detail response.
pub fn parse_detail_response(value: Value) -> Result<DetailPayload> {
    match value {
        Value::Object(mut map) => match map.remove("Message") {
            Some(message @ Value::Object(_)) => serde_json::from_value(message)
                .map_err(|e| ApiError::UnableToParseResponse(format!("invalid message: {}", e))),
            Some(other) => Err(ApiError::UnableToParseResponse(format!(
                "'Message' is {}, expected an object",
                json_kind(&other)
            ))),
            None => Err(ApiError::UnableToParseResponse(
                "missing 'Message' field".to_string(),
            )),
        },
        other => Err(ApiError::UnableToParseResponse(format!(
            "response is {}, expected an object",
            json_kind(&other)
        ))),
    }
}

/// Extracts the total for `label_id` from a message count response.
pub fn parse_count_response(value: &Value, label_id: &str) -> Result<u64> {
    let counts = value
        .get("Counts")
        .and_then(Value::as_array)
        .ok_or_else(|| ApiError::UnableToParseResponse("missing 'Counts' array".to_string()))?;

    Ok(counts
        .iter()
        .find(|c| c.get("LabelID").and_then(Value::as_str) == Some(label_id))
        .and_then(|c| c.get("Total"))
        .and_then(Value::as_u64)
        .unwrap_or(0))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn bool_from_int<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IntOrBool {
        Int(i64),
        Bool(bool),
    }

    Ok(match IntOrBool::deserialize(deserializer)? {
        IntOrBool::Int(i) => i != 0,
        IntOrBool::Bool(b) => b,
    })
}
