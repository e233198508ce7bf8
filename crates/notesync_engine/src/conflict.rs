//! Conflict resolution between a server copy and a local copy of a note.
//!
//! Last-writer-wins on `updated_at`. When both sides carry the same instant
//! the copies are merged: bodies are kept side by side, tag and collaborator
//! sets are unioned, and the merge is recorded in `metadata`.

use chrono::SecondsFormat;
use notesync_protocol::{changed_fields, Document, Timestamp};
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::fmt;

/// Which side a resolution kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// The server copy was newer.
    Server,
    /// The local copy was newer.
    Local,
    /// Same timestamp; both copies were merged.
    Merge,
}

impl Strategy {
    /// Returns the lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Server => "server",
            Strategy::Local => "local",
            Strategy::Merge => "merge",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`resolve`].
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// The side that was kept.
    pub strategy: Strategy,
    /// The document to persist.
    pub resolved: Document,
    /// Fields where the local copy differs from the server copy.
    pub local_changes: Map<String, Value>,
    /// Fields where the server copy differs from the local copy.
    pub server_changes: Map<String, Value>,
}

/// Reconciles two versions of one note.
///
/// `resolved_at` is stamped into the metadata of merged documents, so the
/// result depends only on the arguments.
pub fn resolve(server: &Document, local: &Document, resolved_at: Timestamp) -> Resolution {
    let (strategy, resolved) = match server.updated_at.cmp(&local.updated_at) {
        Ordering::Greater => (Strategy::Server, server.clone()),
        Ordering::Less => (Strategy::Local, local.clone()),
        Ordering::Equal => (Strategy::Merge, merge(server, local, resolved_at)),
    };

    Resolution {
        strategy,
        resolved,
        local_changes: changed_fields(server, local),
        server_changes: changed_fields(local, server),
    }
}

fn merge(server: &Document, local: &Document, resolved_at: Timestamp) -> Document {
    let mut merged = server.clone();

    if server.content != local.content {
        merged.content = format!(
            "=== Server Version ===\n{}\n\n=== Local Version ===\n{}",
            server.content, local.content
        );
    }
    merged.tags.extend(local.tags.iter().cloned());
    merged
        .collaborators
        .extend(local.collaborators.iter().cloned());

    merged.metadata.insert("hasConflicts".into(), Value::Bool(true));
    merged
        .metadata
        .insert("resolvedAt".into(), Value::String(iso(resolved_at)));
    merged.metadata.insert(
        "conflictDetails".into(),
        json!({
            "serverTimestamp": iso(server.updated_at),
            "localTimestamp": iso(local.updated_at),
        }),
    );
    merged
}

fn iso(ts: Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    fn at(secs: i64) -> Timestamp {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn pair(server_secs: i64, local_secs: i64) -> (Document, Document) {
        let server = Document::new("n1", "Plan", "server body")
            .with_tags(["a", "b"])
            .with_collaborators(["ana"])
            .with_updated_at(at(server_secs));
        let local = Document::new("n1", "Plan (edited)", "local body")
            .with_tags(["b", "c"])
            .with_collaborators(["bo"])
            .with_updated_at(at(local_secs));
        (server, local)
    }

    #[test]
    fn newer_server_wins_verbatim() {
        let (server, local) = pair(200, 100);
        let res = resolve(&server, &local, at(300));
        assert_eq!(res.strategy, Strategy::Server);
        assert_eq!(res.resolved, server);
    }

    #[test]
    fn newer_local_wins_verbatim() {
        let (server, local) = pair(100, 200);
        let res = resolve(&server, &local, at(300));
        assert_eq!(res.strategy, Strategy::Local);
        assert_eq!(res.resolved, local);
    }

    #[test]
    fn equal_timestamps_merge() {
        let (server, local) = pair(100, 100);
        let res = resolve(&server, &local, at(300));
        assert_eq!(res.strategy, Strategy::Merge);

        let merged = &res.resolved;
        assert_eq!(
            merged.content,
            "=== Server Version ===\nserver body\n\n=== Local Version ===\nlocal body"
        );
        assert_eq!(merged.title, "Plan");
        let tags: Vec<&str> = merged.tags.iter().map(String::as_str).collect();
        assert_eq!(tags, vec!["a", "b", "c"]);
        assert_eq!(merged.collaborators.len(), 2);
        assert!(merged.has_conflicts());
        assert_eq!(
            merged.metadata["resolvedAt"],
            Value::String("1970-01-01T00:05:00.000Z".into())
        );
        assert_eq!(
            merged.metadata["conflictDetails"]["serverTimestamp"],
            Value::String("1970-01-01T00:01:40.000Z".into())
        );
    }

    #[test]
    fn identical_bodies_are_not_duplicated() {
        let (server, mut local) = pair(100, 100);
        local.content = server.content.clone();
        let res = resolve(&server, &local, at(300));
        assert_eq!(res.resolved.content, "server body");
    }

    #[test]
    fn change_maps_name_differing_fields() {
        let (server, local) = pair(200, 100);
        let res = resolve(&server, &local, at(300));
        assert_eq!(res.local_changes["title"], Value::String("Plan (edited)".into()));
        assert_eq!(res.server_changes["content"], Value::String("server body".into()));
        assert!(!res.local_changes.contains_key("id"));
    }

    proptest! {
        #[test]
        fn strategy_follows_timestamps(offset_ms in -5_000i64..5_000) {
            let (server, mut local) = pair(1_000, 1_000);
            local.updated_at = server.updated_at + Duration::milliseconds(offset_ms);
            let res = resolve(&server, &local, at(2_000));
            let expected = match offset_ms.cmp(&0) {
                Ordering::Less => Strategy::Server,
                Ordering::Greater => Strategy::Local,
                Ordering::Equal => Strategy::Merge,
            };
            prop_assert_eq!(res.strategy, expected);
            prop_assert_eq!(res.clone(), resolve(&server, &local, at(2_000)));
            prop_assert!(res.resolved.tags.is_superset(&server.tags) || expected == Strategy::Local);
        }
    }
}
