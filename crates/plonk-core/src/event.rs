//! Repository events as delivered by the firehose.
//!
//! A [`RepoEvent`] is one create/update/delete operation on one record in one
//! user's repository. The stream carries every record type on the network;
//! [`Collection::from_nsid`] is what narrows it down to pastes and comments.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::{COMMENT_NSID, LEGACY_COMMENT_NSID, LEGACY_PASTE_NSID, PASTE_NSID};

/// Write operation carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Record collections this application materializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Paste,
    Comment,
}

impl Collection {
    /// Map an NSID to a known collection, accepting the legacy namespace.
    pub fn from_nsid(nsid: &str) -> Option<Self> {
        match nsid {
            PASTE_NSID | LEGACY_PASTE_NSID => Some(Self::Paste),
            COMMENT_NSID | LEGACY_COMMENT_NSID => Some(Self::Comment),
            _ => None,
        }
    }

    /// The NSID new records are written under.
    pub fn nsid(&self) -> &'static str {
        match self {
            Self::Paste => PASTE_NSID,
            Self::Comment => COMMENT_NSID,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paste => "paste",
            Self::Comment => "comment",
        }
    }
}

impl FromStr for Collection {
    type Err = Error;

    fn from_str(nsid: &str) -> Result<Self> {
        Self::from_nsid(nsid).ok_or_else(|| Error::UnknownCollection(nsid.to_string()))
    }
}

/// One event from the shared event stream.
///
/// `record` is absent on deletes and untrusted on creates/updates until it
/// has been through [`crate::validate_record`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoEvent {
    pub event: Operation,
    pub collection: String,
    pub uri: String,
    pub did: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<serde_json::Value>,
}

impl RepoEvent {
    /// Parse an event from a single JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// The known collection this event targets, if any.
    pub fn known_collection(&self) -> Option<Collection> {
        Collection::from_nsid(&self.collection)
    }
}

/// A parsed `at://<authority>/<collection>/<rkey>` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtUri {
    pub authority: String,
    pub collection: Option<String>,
    pub rkey: Option<String>,
}

impl AtUri {
    pub fn parse(uri: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidUri {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };

        let rest = uri
            .strip_prefix("at://")
            .ok_or_else(|| invalid("missing at:// scheme"))?;

        let mut parts = rest.splitn(3, '/');
        let authority = parts.next().unwrap_or_default();
        if authority.is_empty() {
            return Err(invalid("empty authority"));
        }
        if authority.chars().any(char::is_whitespace) {
            return Err(invalid("whitespace in authority"));
        }

        let collection = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
        let rkey = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
        if rkey.as_deref().is_some_and(|r| r.contains('/')) {
            return Err(invalid("too many path segments"));
        }

        Ok(Self {
            authority: authority.to_string(),
            collection,
            rkey,
        })
    }
}

impl fmt::Display for AtUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at://{}", self.authority)?;
        if let Some(collection) = &self.collection {
            write!(f, "/{}", collection)?;
            if let Some(rkey) = &self.rkey {
                write!(f, "/{}", rkey)?;
            }
        }
        Ok(())
    }
}
