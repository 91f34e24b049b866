use serde::{Deserialize, Serialize};

/// The change-data-capture operation a [`Message`](crate::Message) carries.
///
/// A message with no operation set is a plain record (e.g. from an HTTP or
/// file poller) rather than a row-level change event; `marshal_json` uses
/// the presence of this field to choose between the CDC envelope and the
/// flattened-data wire shape (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
    Snapshot,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Snapshot => "snapshot",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
