//! Paste and comment record schemas.
//!
//! Records arrive as untyped JSON. Trusting one takes two steps, mirroring the
//! lexicon tooling used by record authors:
//!
//! 1. a cheap shape check on `$type` ([`is_paste_record`], [`is_comment_record`])
//! 2. full field validation ([`validate_paste`], [`validate_comment`])
//!
//! [`validate_record`] runs both for a given collection. Nothing here panics on
//! malformed input; every failure comes back as an [`Error`].

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::event::{AtUri, Collection};
use crate::{COMMENT_NSID, LEGACY_COMMENT_NSID, LEGACY_PASTE_NSID, PASTE_NSID};

/// Longest accepted paste title, in characters.
pub const MAX_TITLE_CHARS: usize = 256;

/// Largest accepted paste body, in bytes.
pub const MAX_CODE_BYTES: usize = 1024 * 1024;

/// Longest short URL a record may carry.
pub const MAX_SHORT_URL_CHARS: usize = 64;

/// A validated `li.plonk.paste` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasteRecord {
    pub code: String,
    pub lang: String,
    pub title: String,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_url: Option<String>,
}

impl PasteRecord {
    /// Serialize with the `$type` tag, ready to be written to a repository.
    pub fn to_value(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.insert("$type".to_string(), Value::String(PASTE_NSID.to_string()));
        }
        value
    }
}

/// Strong reference to a specific version of another record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrongRef {
    pub uri: String,
    pub cid: String,
}

/// A validated `li.plonk.comment` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRecord {
    pub content: String,
    pub created_at: String,
    pub post: StrongRef,
}

impl CommentRecord {
    /// Serialize with the `$type` tag, ready to be written to a repository.
    pub fn to_value(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.insert(
                "$type".to_string(),
                Value::String(COMMENT_NSID.to_string()),
            );
        }
        value
    }
}

/// A record that passed validation, tagged by collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Paste(PasteRecord),
    Comment(CommentRecord),
}

/// Shape check: is this an object tagged as a paste?
pub fn is_paste_record(value: &Value) -> bool {
    type_matches(value, &[PASTE_NSID, LEGACY_PASTE_NSID])
}

/// Shape check: is this an object tagged as a comment?
pub fn is_comment_record(value: &Value) -> bool {
    type_matches(value, &[COMMENT_NSID, LEGACY_COMMENT_NSID])
}

fn type_matches(value: &Value, nsids: &[&str]) -> bool {
    let Some(ty) = value.get("$type").and_then(Value::as_str) else {
        return false;
    };
    let ty = ty.strip_suffix("#main").unwrap_or(ty);
    nsids.contains(&ty)
}

/// Validate a paste payload's fields. Does not check `$type`.
pub fn validate_paste(value: &Value) -> Result<PasteRecord> {
    let obj = as_object(value, PASTE_NSID)?;

    let code = required_str(obj, "code")?;
    if code.len() > MAX_CODE_BYTES {
        return Err(Error::InvalidField {
            field: "code",
            reason: format!("{} bytes exceeds limit of {}", code.len(), MAX_CODE_BYTES),
        });
    }

    let lang = required_str(obj, "lang")?;

    let title = required_str(obj, "title")?;
    let title_chars = title.chars().count();
    if title_chars > MAX_TITLE_CHARS {
        return Err(Error::InvalidField {
            field: "title",
            reason: format!("{} chars exceeds limit of {}", title_chars, MAX_TITLE_CHARS),
        });
    }

    let created_at = required_datetime(obj, "createdAt")?;

    // Other clients may mint ids outside our alphabet. Such a value is
    // dropped so the paste still gets cached under an allocated id.
    let short_url = match obj.get("shortUrl") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => match validate_short_url(s) {
            Ok(()) => Some(s.clone()),
            Err(e) => {
                tracing::debug!("Ignoring shortUrl {:?}: {}", s, e);
                None
            }
        },
        Some(_) => {
            return Err(Error::InvalidField {
                field: "shortUrl",
                reason: "expected a string".to_string(),
            });
        }
    };

    Ok(PasteRecord {
        code: code.to_string(),
        lang: lang.to_string(),
        title: title.to_string(),
        created_at,
        short_url,
    })
}

/// Validate a comment payload's fields. Does not check `$type`.
pub fn validate_comment(value: &Value) -> Result<CommentRecord> {
    let obj = as_object(value, COMMENT_NSID)?;

    let content = required_str(obj, "content")?;
    if content.trim().is_empty() {
        return Err(Error::InvalidField {
            field: "content",
            reason: "must not be empty".to_string(),
        });
    }

    let created_at = required_datetime(obj, "createdAt")?;

    let post = obj.get("post").ok_or(Error::MissingField("post"))?;
    let post = post.as_object().ok_or_else(|| Error::InvalidField {
        field: "post",
        reason: "expected a strong reference object".to_string(),
    })?;
    let uri = required_str(post, "uri")?;
    AtUri::parse(uri).map_err(|e| Error::InvalidField {
        field: "uri",
        reason: e.to_string(),
    })?;
    let cid = required_str(post, "cid")?;
    if cid.is_empty() {
        return Err(Error::InvalidField {
            field: "cid",
            reason: "must not be empty".to_string(),
        });
    }

    Ok(CommentRecord {
        content: content.to_string(),
        created_at,
        post: StrongRef {
            uri: uri.to_string(),
            cid: cid.to_string(),
        },
    })
}

/// Run both the shape check and full validation for `collection`.
pub fn validate_record(collection: Collection, value: &Value) -> Result<Record> {
    match collection {
        Collection::Paste => {
            if !is_paste_record(value) {
                return Err(wrong_type(PASTE_NSID, value));
            }
            validate_paste(value).map(Record::Paste)
        }
        Collection::Comment => {
            if !is_comment_record(value) {
                return Err(wrong_type(COMMENT_NSID, value));
            }
            validate_comment(value).map(Record::Comment)
        }
    }
}

/// Check that `s` only uses the short URL alphabet.
pub fn validate_short_url(s: &str) -> Result<()> {
    if s.is_empty() || s.len() > MAX_SHORT_URL_CHARS {
        return Err(Error::InvalidField {
            field: "shortUrl",
            reason: format!("length must be 1..={}", MAX_SHORT_URL_CHARS),
        });
    }
    if let Some(c) = s
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(Error::InvalidField {
            field: "shortUrl",
            reason: format!("invalid character {:?}", c),
        });
    }
    Ok(())
}

fn wrong_type(expected: &'static str, value: &Value) -> Error {
    let reason = match value.get("$type") {
        Some(Value::String(ty)) => format!("$type is '{}'", ty),
        Some(_) => "$type is not a string".to_string(),
        None if value.is_object() => "missing $type".to_string(),
        None => "not an object".to_string(),
    };
    Error::WrongShape { expected, reason }
}

fn as_object<'a>(value: &'a Value, expected: &'static str) -> Result<&'a Map<String, Value>> {
    value.as_object().ok_or_else(|| Error::WrongShape {
        expected,
        reason: "not an object".to_string(),
    })
}

fn required_str<'a>(obj: &'a Map<String, Value>, field: &'static str) -> Result<&'a str> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(Error::MissingField(field)),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(Error::InvalidField {
            field,
            reason: "expected a string".to_string(),
        }),
    }
}

/// Parse an RFC 3339 field and return it in UTC with millisecond precision,
/// so stored timestamps compare chronologically as plain strings.
fn required_datetime(obj: &Map<String, Value>, field: &'static str) -> Result<String> {
    let raw = required_str(obj, field)?;
    let parsed =
        DateTime::<FixedOffset>::parse_from_rfc3339(raw).map_err(|e| Error::InvalidField {
            field,
            reason: format!("not an RFC 3339 datetime: {}", e),
        })?;
    Ok(parsed
        .with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::Millis, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn paste() -> Value {
        json!({
            "$type": "li.plonk.paste",
            "code": "print(1)",
            "lang": "py",
            "title": "t",
            "createdAt": "2024-01-01T00:00:00Z"
        })
    }

    fn comment() -> Value {
        json!({
            "$type": "li.plonk.comment",
            "content": "nice",
            "createdAt": "2024-01-01T00:00:00.000Z",
            "post": { "uri": "at://did:x/li.plonk.paste/1", "cid": "bafyparent" }
        })
    }

    #[test]
    fn test_valid_paste() {
        let Record::Paste(p) = validate_record(Collection::Paste, &paste()).unwrap() else {
            panic!("expected paste");
        };
        assert_eq!(p.code, "print(1)");
        assert_eq!(p.lang, "py");
        assert_eq!(p.short_url, None);
    }

    #[test]
    fn test_paste_type_variants() {
        let mut v = paste();
        v["$type"] = json!("li.plonk.paste#main");
        assert!(is_paste_record(&v));
        v["$type"] = json!("ovh.plonk.paste");
        assert!(is_paste_record(&v));
        v["$type"] = json!("li.plonk.comment");
        assert!(!is_paste_record(&v));
        assert!(!is_paste_record(&json!("li.plonk.paste")));
    }

    #[test]
    fn test_paste_wrong_tag_rejected() {
        let mut v = paste();
        v["$type"] = json!("app.bsky.feed.post");
        let err = validate_record(Collection::Paste, &v).unwrap_err();
        assert!(matches!(err, Error::WrongShape { .. }));
    }

    #[test]
    fn test_paste_missing_field_rejected() {
        for field in ["code", "lang", "title", "createdAt"] {
            let mut v = paste();
            v.as_object_mut().unwrap().remove(field);
            let err = validate_record(Collection::Paste, &v).unwrap_err();
            assert!(
                matches!(err, Error::MissingField(f) if f == field),
                "field {field}: {err}"
            );
        }
    }

    #[test]
    fn test_paste_wrong_types_rejected() {
        let mut v = paste();
        v["title"] = json!(42);
        assert!(validate_paste(&v).is_err());

        let mut v = paste();
        v["createdAt"] = json!("yesterday");
        assert!(validate_paste(&v).is_err());

        let mut v = paste();
        v["shortUrl"] = json!(7);
        assert!(validate_paste(&v).is_err());
    }

    #[test]
    fn test_foreign_short_url_is_treated_as_absent() {
        for bad in ["a.b", "no spaces", "", "ü"] {
            let mut v = paste();
            v["shortUrl"] = json!(bad);
            let p = validate_paste(&v).unwrap();
            assert_eq!(p.short_url, None, "shortUrl {bad:?}");
        }
        let mut v = paste();
        v["shortUrl"] = json!("x".repeat(MAX_SHORT_URL_CHARS + 1));
        assert_eq!(validate_paste(&v).unwrap().short_url, None);
    }

    #[test]
    fn test_created_at_is_normalized_to_utc_millis() {
        let mut v = paste();
        v["createdAt"] = json!("2024-01-01T01:30:00.123456+01:00");
        assert_eq!(validate_paste(&v).unwrap().created_at, "2024-01-01T00:30:00.123Z");

        let mut v = comment();
        v["createdAt"] = json!("2024-01-01T00:00:00+00:00");
        assert_eq!(validate_comment(&v).unwrap().created_at, "2024-01-01T00:00:00.000Z");
    }

    #[test]
    fn test_paste_with_short_url() {
        let mut v = paste();
        v["shortUrl"] = json!("a_-Z");
        let p = validate_paste(&v).unwrap();
        assert_eq!(p.short_url.as_deref(), Some("a_-Z"));
    }

    #[test]
    fn test_paste_title_limit() {
        let mut v = paste();
        v["title"] = json!("x".repeat(MAX_TITLE_CHARS + 1));
        assert!(validate_paste(&v).is_err());
    }

    #[test]
    fn test_valid_comment() {
        let Record::Comment(c) = validate_record(Collection::Comment, &comment()).unwrap() else {
            panic!("expected comment");
        };
        assert_eq!(c.content, "nice");
        assert_eq!(c.post.cid, "bafyparent");
    }

    #[test]
    fn test_comment_bad_strong_ref() {
        let mut v = comment();
        v["post"] = json!("at://did:x/li.plonk.paste/1");
        assert!(validate_comment(&v).is_err());

        let mut v = comment();
        v["post"]["uri"] = json!("https://example.com");
        assert!(validate_comment(&v).is_err());

        let mut v = comment();
        v["post"]["cid"] = json!("");
        assert!(validate_comment(&v).is_err());
    }

    #[test]
    fn test_to_value_round_trips_through_validation() {
        let record = PasteRecord {
            code: "x".to_string(),
            lang: "txt".to_string(),
            title: "y".to_string(),
            created_at: "2024-05-01T12:00:00.000Z".to_string(),
            short_url: Some("Ab".to_string()),
        };
        let value = record.to_value();
        assert_eq!(value["$type"], "li.plonk.paste");
        assert_eq!(value["shortUrl"], "Ab");
        let Record::Paste(back) = validate_record(Collection::Paste, &value).unwrap() else {
            panic!("expected paste");
        };
        assert_eq!(back, record);
    }

    #[test]
    fn test_non_object_never_panics() {
        for v in [json!(null), json!(1), json!([]), json!("s")] {
            assert!(validate_record(Collection::Paste, &v).is_err());
            assert!(validate_record(Collection::Comment, &v).is_err());
        }
    }
}
