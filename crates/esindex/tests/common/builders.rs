//! Builders for test mailboxes.

#![allow(dead_code)]

use esindex::api::MessageStub;
use serde_json::json;

use super::fakes::FakeMessage;

/// Key the fake decryptor accepts in [`StubBuilder::body`].
pub const PRIMARY_KEY: &str = "primary";

/// Builder for a single fake message.
pub struct StubBuilder {
    id: String,
    time: i64,
    subject: String,
    labels: Vec<String>,
    body: Option<String>,
}

impl StubBuilder {
    pub fn new(id: &str, time: i64) -> Self {
        Self {
            id: id.to_string(),
            time,
            subject: format!("Subject {id}"),
            labels: vec!["0".to_string(), "5".to_string()],
            body: Some(format!("enc({PRIMARY_KEY}):Body of {id}")),
        }
    }

    pub fn subject(mut self, subject: &str) -> Self {
        self.subject = subject.to_string();
        self
    }

    pub fn labels(mut self, labels: &[&str]) -> Self {
        self.labels = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Sets the raw (fake-encrypted) body.
    pub fn raw_body(mut self, body: Option<&str>) -> Self {
        self.body = body.map(str::to_string);
        self
    }

    /// A body only a key that does not exist can open.
    pub fn undecryptable(self) -> Self {
        let id = self.id.clone();
        self.raw_body(Some(&format!("enc(missing):Body of {id}")))
    }

    pub fn stub(&self) -> MessageStub {
        serde_json::from_value(json!({
            "ID": self.id,
            "ConversationID": format!("c-{}", self.id),
            "Time": self.time,
            "Size": 1024,
            "LabelIDs": self.labels,
            "Subject": self.subject,
            "Sender": { "Name": "Alice", "Address": "alice@example.com" },
            "ToList": [{ "Name": "Bob", "Address": "bob@example.com" }],
            "Unread": 1
        }))
        .expect("valid stub JSON")
    }

    pub fn build(self) -> FakeMessage {
        FakeMessage {
            stub: self.stub(),
            body: self.body,
        }
    }
}

/// `count` messages `m000, m001, ...` spaced 10 seconds apart, newest at
/// `newest_time`.
pub fn mailbox(count: usize, newest_time: i64) -> Vec<FakeMessage> {
    (0..count)
        .map(|i| StubBuilder::new(&format!("m{i:03}"), newest_time - 10 * i as i64).build())
        .collect()
}
