use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::app::Result;

/// Event kind emitted when an ingestion run stores new items.
pub const NEW_ARTICLES: &str = "new_articles";

/// A notification pushed to every live subscriber.
///
/// Serialized as `{"type": <kind>, "payload": <value>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    kind: String,
    payload: Value,
}

impl Event {
    pub fn new<P: Serialize>(kind: impl Into<String>, payload: P) -> Result<Self> {
        Ok(Self {
            kind: kind.into(),
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Payload of a [`NEW_ARTICLES`] event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewArticles {
    pub source_id: i64,
    pub source_title: String,
    pub count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let event = Event::new(
            NEW_ARTICLES,
            NewArticles {
                source_id: 4,
                source_title: "Example".into(),
                count: 3,
            },
        )
        .unwrap();

        let json: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "new_articles");
        assert_eq!(json["payload"]["source_id"], 4);
        assert_eq!(json["payload"]["source_title"], "Example");
        assert_eq!(json["payload"]["count"], 3);
    }
}
