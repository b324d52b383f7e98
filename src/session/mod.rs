//! Branched, append-only session store.
//!
//! A session is a single NDJSON file: one [`SessionEntry`] per line, first
//! line always a `Header`. Entries form a forest keyed by `parent_id`; the
//! in-memory `leaf` cursor selects which branch is live. Appending chains
//! from the current leaf and advances it; `branch` reassigns the leaf
//! without writing anything, so re-appending after a branch grows a
//! sibling path rather than continuing the old one.

pub mod compaction;
pub mod error;

pub use error::SessionError;

use crate::message::{AgentMessage, Message};
use crate::model::{Api, ThinkingLevel};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

pub type Result<T> = std::result::Result<T, SessionError>;

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

/// First line of every session file. `version` must be >= 3 for a file to
/// be accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    pub version: u32,
    pub session_id: String,
    pub cwd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_session: Option<String>,
}

pub const CURRENT_SCHEMA_VERSION: u32 = 3;

/// Discriminated payload of a [`SessionEntry`], tagged by the wire
/// `entryType` field: `header|message|thinkingLevelChange|modelChange|
/// compaction|branchSummary|label|sessionInfo|<anything else>`.
///
/// Serialize/Deserialize are hand-written rather than derived from
/// `#[serde(tag = "entryType")]` because a derived internally-tagged enum
/// has no way to catch an `entryType` it doesn't recognize into a
/// data-bearing variant — it just fails to parse. `Custom` exists
/// precisely so an entry written by a newer build can still be loaded and
/// re-emitted unchanged by an older one: deserialization keeps whatever
/// `entryType` string it found plus every other field under it, and
/// serialization writes that `entryType` and those fields back out
/// untouched.
#[derive(Debug, Clone)]
pub enum EntryKind {
    Header { header: Header },
    Message { message: AgentMessage },
    ThinkingLevelChange { level: ThinkingLevel },
    ModelChange { api: Api, model: String },
    Compaction { summary: String, first_kept_entry_id: String, tokens_before: u64 },
    BranchSummary { summary: String },
    Label { label: String },
    SessionInfo { data: Value },
    /// Unrecognized `entryType`. Preserved verbatim on round-trip and
    /// ignored during context reconstruction.
    Custom { entry_type: String, fields: Value },
}

impl Serialize for EntryKind {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::Error;

        let mut map = serde_json::Map::new();
        match self {
            EntryKind::Header { header } => {
                map.insert("entryType".into(), Value::String("header".into()));
                map.insert("header".into(), serde_json::to_value(header).map_err(S::Error::custom)?);
            }
            EntryKind::Message { message } => {
                map.insert("entryType".into(), Value::String("message".into()));
                map.insert("message".into(), serde_json::to_value(message).map_err(S::Error::custom)?);
            }
            EntryKind::ThinkingLevelChange { level } => {
                map.insert("entryType".into(), Value::String("thinkingLevelChange".into()));
                map.insert("level".into(), serde_json::to_value(level).map_err(S::Error::custom)?);
            }
            EntryKind::ModelChange { api, model } => {
                map.insert("entryType".into(), Value::String("modelChange".into()));
                map.insert("api".into(), serde_json::to_value(api).map_err(S::Error::custom)?);
                map.insert("model".into(), Value::String(model.clone()));
            }
            EntryKind::Compaction { summary, first_kept_entry_id, tokens_before } => {
                map.insert("entryType".into(), Value::String("compaction".into()));
                map.insert("summary".into(), Value::String(summary.clone()));
                map.insert("firstKeptEntryId".into(), Value::String(first_kept_entry_id.clone()));
                map.insert("tokensBefore".into(), Value::from(*tokens_before));
            }
            EntryKind::BranchSummary { summary } => {
                map.insert("entryType".into(), Value::String("branchSummary".into()));
                map.insert("summary".into(), Value::String(summary.clone()));
            }
            EntryKind::Label { label } => {
                map.insert("entryType".into(), Value::String("label".into()));
                map.insert("label".into(), Value::String(label.clone()));
            }
            EntryKind::SessionInfo { data } => {
                map.insert("entryType".into(), Value::String("sessionInfo".into()));
                map.insert("data".into(), data.clone());
            }
            EntryKind::Custom { entry_type, fields } => {
                map.insert("entryType".into(), Value::String(entry_type.clone()));
                if let Some(obj) = fields.as_object() {
                    for (k, v) in obj {
                        map.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        map.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EntryKind {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;

        let value = Value::deserialize(deserializer)?;
        let entry_type = value
            .get("entryType")
            .and_then(Value::as_str)
            .ok_or_else(|| D::Error::custom("missing entryType"))?
            .to_string();

        let field = |name: &str| -> std::result::Result<Value, D::Error> {
            value.get(name).cloned().ok_or_else(|| D::Error::custom(format!("missing field `{name}`")))
        };

        match entry_type.as_str() {
            "header" => Ok(EntryKind::Header {
                header: serde_json::from_value(field("header")?).map_err(D::Error::custom)?,
            }),
            "message" => Ok(EntryKind::Message {
                message: serde_json::from_value(field("message")?).map_err(D::Error::custom)?,
            }),
            "thinkingLevelChange" => Ok(EntryKind::ThinkingLevelChange {
                level: serde_json::from_value(field("level")?).map_err(D::Error::custom)?,
            }),
            "modelChange" => Ok(EntryKind::ModelChange {
                api: serde_json::from_value(field("api")?).map_err(D::Error::custom)?,
                model: serde_json::from_value(field("model")?).map_err(D::Error::custom)?,
            }),
            "compaction" => Ok(EntryKind::Compaction {
                summary: serde_json::from_value(field("summary")?).map_err(D::Error::custom)?,
                first_kept_entry_id: serde_json::from_value(field("firstKeptEntryId")?).map_err(D::Error::custom)?,
                tokens_before: serde_json::from_value(field("tokensBefore")?).map_err(D::Error::custom)?,
            }),
            "branchSummary" => Ok(EntryKind::BranchSummary {
                summary: serde_json::from_value(field("summary")?).map_err(D::Error::custom)?,
            }),
            "label" => Ok(EntryKind::Label {
                label: serde_json::from_value(field("label")?).map_err(D::Error::custom)?,
            }),
            "sessionInfo" => Ok(EntryKind::SessionInfo { data: field("data")? }),
            other => {
                let mut fields = value.as_object().cloned().unwrap_or_default();
                fields.remove("entryType");
                Ok(EntryKind::Custom { entry_type: other.to_string(), fields: Value::Object(fields) })
            }
        }
    }
}

/// One line of the session file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub id: String,
    #[serde(rename = "parentId", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(flatten)]
    pub kind: EntryKind,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Context rebuilt by folding a root-to-leaf walk.
#[derive(Debug, Clone, Default)]
pub struct ReconstructedContext {
    pub messages: Vec<AgentMessage>,
    pub thinking_level: Option<ThinkingLevel>,
    pub model: Option<(Api, String)>,
}

/// A single branched, append-only session backed by an NDJSON file.
pub struct Session {
    path: PathBuf,
    header: Header,
    entries: HashMap<String, SessionEntry>,
    /// On-disk append order, used only to pick a default leaf on load —
    /// the authoritative leaf cursor is `leaf` below, which a host can
    /// move independently via [`Session::branch`].
    order: Vec<String>,
    leaf: String,
}

impl Session {
    /// Create a brand new session file at `path`. Fails if the file
    /// already exists; use [`Session::open`] to resume one.
    pub fn create(path: impl AsRef<Path>, cwd: impl Into<String>, parent_session: Option<String>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let header = Header {
            version: CURRENT_SCHEMA_VERSION,
            session_id: new_id(),
            cwd: cwd.into(),
            parent_session,
        };
        let header_id = new_id();
        let entry = SessionEntry {
            id: header_id.clone(),
            parent_id: None,
            kind: EntryKind::Header { header: header.clone() },
            timestamp: now(),
        };

        let mut file = std::fs::OpenOptions::new().create_new(true).append(true).open(&path)?;
        writeln!(file, "{}", serde_json::to_string(&entry).map_err(|e| SessionError::Decode(e.to_string()))?)?;
        file.flush()?;

        let mut entries = HashMap::new();
        entries.insert(header_id.clone(), entry);

        Ok(Self { path, header, entries, order: vec![header_id.clone()], leaf: header_id })
    }

    /// Reopen an existing session file, tolerating trailing malformed
    /// lines. The leaf defaults to the most recently appended entry.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let contents = std::fs::read_to_string(&path)?;
        let mut lines = contents.lines();

        let first = lines.next().ok_or_else(|| SessionError::Decode("empty session file".into()))?;
        let header_entry: SessionEntry = serde_json::from_str(first).map_err(|e| SessionError::Decode(e.to_string()))?;
        let EntryKind::Header { ref header } = header_entry.kind else {
            return Err(SessionError::Decode("first line is not a Header".into()));
        };
        if header.version < CURRENT_SCHEMA_VERSION {
            return Err(SessionError::Decode(format!("unsupported session schema version {}", header.version)));
        }
        let header = header.clone();

        let mut entries = HashMap::new();
        let mut order = Vec::new();
        order.push(header_entry.id.clone());
        entries.insert(header_entry.id.clone(), header_entry);

        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SessionEntry>(line) {
                Ok(entry) => {
                    order.push(entry.id.clone());
                    entries.insert(entry.id.clone(), entry);
                }
                Err(_) => continue, // malformed/partial trailing line: skip
            }
        }

        let leaf = order.last().cloned().unwrap_or_default();
        Ok(Self { path, header, entries, order, leaf })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn leaf(&self) -> &str {
        &self.leaf
    }

    /// Reassign the leaf cursor without writing anything. Subsequent
    /// appends chain from `to`, growing a new branch.
    pub fn branch(&mut self, to: impl Into<String>) -> Result<()> {
        let to = to.into();
        if !self.entries.contains_key(&to) {
            return Err(SessionError::NotFound(to));
        }
        self.leaf = to;
        Ok(())
    }

    /// Append one entry, chained from the current leaf. Opens the file,
    /// writes one line, flushes and closes — atomic at line granularity.
    pub fn append(&mut self, kind: EntryKind) -> Result<SessionEntry> {
        let entry = SessionEntry {
            id: new_id(),
            parent_id: Some(self.leaf.clone()),
            kind,
            timestamp: now(),
        };

        let mut file = std::fs::OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(&entry).map_err(|e| SessionError::Decode(e.to_string()))?)?;
        file.flush()?;

        self.order.push(entry.id.clone());
        self.entries.insert(entry.id.clone(), entry.clone());
        self.leaf = entry.id.clone();
        Ok(entry)
    }

    pub fn append_message(&mut self, message: Message) -> Result<SessionEntry> {
        self.append(EntryKind::Message { message: AgentMessage::Message(message) })
    }

    /// Rebuild context by walking from the current leaf to the root, then
    /// folding root-to-leaf.
    pub fn context(&self) -> ReconstructedContext {
        self.context_from_leaf(&self.leaf)
    }

    pub fn context_from_leaf(&self, leaf: &str) -> ReconstructedContext {
        let mut chain = Vec::new();
        let mut current = Some(leaf.to_string());
        while let Some(id) = current {
            let Some(entry) = self.entries.get(&id) else { break };
            current = entry.parent_id.clone();
            chain.push(entry);
        }
        chain.reverse();

        let mut ctx = ReconstructedContext::default();
        for entry in chain {
            match &entry.kind {
                EntryKind::Header { .. } | EntryKind::Label { .. } | EntryKind::SessionInfo { .. } | EntryKind::Custom { .. } => {}
                EntryKind::Message { message } => ctx.messages.push(message.clone()),
                EntryKind::ThinkingLevelChange { level } => ctx.thinking_level = Some(*level),
                EntryKind::ModelChange { api, model } => ctx.model = Some((*api, model.clone())),
                EntryKind::Compaction { summary, .. } => {
                    ctx.messages.clear();
                    ctx.messages.push(AgentMessage::Message(Message::user(format!(
                        "Previous conversation summary:\n{summary}"
                    ))));
                }
                EntryKind::BranchSummary { summary } => {
                    ctx.messages.push(AgentMessage::Message(Message::user(format!("Branch summary:\n{summary}"))));
                }
            }
        }
        ctx
    }

    /// All entries from the current leaf back to the header, oldest first.
    /// Used by compaction to find a cut point without needing the full
    /// folded context.
    pub fn entry_chain(&self) -> Vec<&SessionEntry> {
        let mut chain = Vec::new();
        let mut current = Some(self.leaf.clone());
        while let Some(id) = current {
            let Some(entry) = self.entries.get(&id) else { break };
            current = entry.parent_id.clone();
            chain.push(entry);
        }
        chain.reverse();
        chain
    }

    pub fn get(&self, id: &str) -> Option<&SessionEntry> {
        self.entries.get(id)
    }
}
