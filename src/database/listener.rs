//! Realtime listeners
//!
//! Continuous listeners over the database event-stream protocol. A
//! listener task holds the connection, mirrors the listened location into
//! a local cache, and synthesizes value or child events from the `put` /
//! `patch` frames the backend sends. Delivery stops the moment the
//! registration's cancellation token trips: the check happens before every
//! delivery, so a cancelled listener detaches instead of delivering.

use crate::database::database::Reference;
use crate::database::query::{order_children, OrderBy, QuerySpec};
use crate::database::snapshot::DataSnapshot;
use crate::error::DatabaseError;
use futures::StreamExt;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Delay between reconnection attempts
const RECONNECT_DELAY: std::time::Duration = std::time::Duration::from_secs(1);

/// Caller-facing event categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The whole value at the location
    Value,
    /// A child appeared
    ChildAdded,
    /// A child's value changed
    ChildChanged,
    /// A child disappeared
    ChildRemoved,
    /// A child's position under the active ordering changed
    ChildMoved,
}

impl EventKind {
    /// Parse the wire name used by the web layer
    pub fn parse(name: &str) -> Result<Self, DatabaseError> {
        match name {
            "value" => Ok(EventKind::Value),
            "child_added" => Ok(EventKind::ChildAdded),
            "child_changed" => Ok(EventKind::ChildChanged),
            "child_removed" => Ok(EventKind::ChildRemoved),
            "child_moved" => Ok(EventKind::ChildMoved),
            other => Err(DatabaseError::InvalidQuery(format!(
                "unknown event type: {other}"
            ))),
        }
    }

    /// Whether this category scopes to individual children
    pub fn is_child(&self) -> bool {
        !matches!(self, EventKind::Value)
    }
}

/// Callback receiving listener deliveries
pub type EventCallback = Box<dyn FnMut(Result<DataSnapshot, DatabaseError>) + Send + 'static>;

/// Handle for detaching a continuous listener
pub struct ListenerRegistration {
    cancel: CancellationToken,
    event: EventKind,
}

impl ListenerRegistration {
    /// Stop the listener; no delivery happens after this returns
    pub fn detach(&self) {
        self.cancel.cancel();
    }

    /// The event category this listener was registered for
    pub fn event(&self) -> EventKind {
        self.event
    }

    /// Whether this listener was detached (or torn down with its context)
    pub fn is_detached(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// A registration with no backing task, for registry tests
    #[cfg(test)]
    pub(crate) fn stub(event: EventKind) -> Self {
        Self {
            cancel: CancellationToken::new(),
            event,
        }
    }

    /// A second handle onto the same cancellation token
    #[cfg(test)]
    pub(crate) fn probe(&self) -> Self {
        Self {
            cancel: self.cancel.clone(),
            event: self.event,
        }
    }
}

/// Attach a continuous listener to a location
///
/// `teardown` is the owning context's cancellation token; the returned
/// registration carries a child token, so both an explicit detach and a
/// context teardown stop delivery. The descriptor is validated before the
/// task spawns.
pub fn attach(
    reference: Reference,
    query: QuerySpec,
    event: EventKind,
    teardown: &CancellationToken,
    callback: EventCallback,
) -> Result<ListenerRegistration, DatabaseError> {
    // Descriptor errors surface before any backend traffic
    let mut params = query.to_params()?;
    params.push(("format".to_string(), "export".to_string()));

    let cancel = teardown.child_token();
    let task = ListenerTask {
        reference,
        order_by: query.order_by.clone(),
        params,
        event,
        cancel: cancel.clone(),
        callback,
        cache: None,
    };
    tokio::spawn(task.run());

    Ok(ListenerRegistration { cancel, event })
}

struct ListenerTask {
    reference: Reference,
    order_by: Option<OrderBy>,
    params: Vec<(String, String)>,
    event: EventKind,
    cancel: CancellationToken,
    callback: EventCallback,
    cache: Option<Value>,
}

impl ListenerTask {
    async fn run(mut self) {
        let database = self.reference.database().clone();
        let url = database.rest_url(self.reference.path());
        let mut online = database.online_watch();
        let mut last_delivered: Option<Value> = None;

        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            // Hold off while the instance is offline
            while !*online.borrow() {
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    changed = online.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }

            let request = database
                .http_client()
                .get(&url)
                .query(&self.params)
                .header("Accept", "text/event-stream");
            let response = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = request.send() => result,
            };

            let response = match response {
                Err(e) => {
                    warn!(url = %url, error = %e, "listen connection failed, retrying");
                    if self.pause_before_reconnect(&mut online).await {
                        return;
                    }
                    continue;
                }
                Ok(response) => response,
            };

            // Terminal backend rejections surface to the caller
            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body: Value = response.json().await.unwrap_or(Value::Null);
                let reason = body
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("listen rejected");
                self.deliver(Err(DatabaseError::from_response(status, reason)));
                return;
            }

            match self
                .consume_stream(response, &mut online, &mut last_delivered)
                .await
            {
                StreamOutcome::Detached | StreamOutcome::Terminal => return,
                StreamOutcome::Disconnected => {
                    if self.pause_before_reconnect(&mut online).await {
                        return;
                    }
                }
            }
        }
    }

    /// Read one connection's worth of frames
    async fn consume_stream(
        &mut self,
        response: reqwest::Response,
        online: &mut tokio::sync::watch::Receiver<bool>,
        last_delivered: &mut Option<Value>,
    ) -> StreamOutcome {
        let mut stream = response.bytes_stream();
        let mut parser = SseParser::default();

        loop {
            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => return StreamOutcome::Detached,
                changed = online.changed() => {
                    // Going offline drops the connection
                    if changed.is_err() || !*online.borrow() {
                        return StreamOutcome::Disconnected;
                    }
                    continue;
                }
                chunk = stream.next() => chunk,
            };

            let chunk = match chunk {
                None => return StreamOutcome::Disconnected,
                Some(Err(e)) => {
                    warn!(error = %e, "listen stream broke, reconnecting");
                    return StreamOutcome::Disconnected;
                }
                Some(Ok(chunk)) => chunk,
            };

            for frame in parser.feed(&chunk) {
                match parse_stream_event(&frame) {
                    Err(e) => {
                        warn!(error = %e, "discarding malformed stream frame");
                    }
                    Ok(StreamEvent::KeepAlive) => {}
                    Ok(StreamEvent::Cancelled(error)) => {
                        self.deliver(Err(error));
                        return StreamOutcome::Terminal;
                    }
                    Ok(StreamEvent::Put { path, data }) => {
                        if self.apply_change(|cache| apply_put(cache, &path, data), last_delivered) {
                            return StreamOutcome::Detached;
                        }
                    }
                    Ok(StreamEvent::Patch { path, data }) => {
                        if self.apply_change(|cache| apply_patch(cache, &path, data), last_delivered)
                        {
                            return StreamOutcome::Detached;
                        }
                    }
                }
            }
        }
    }

    /// Apply a mutation to the cache and emit the resulting events.
    /// Returns true when the listener was detached mid-delivery.
    fn apply_change(
        &mut self,
        mutate: impl FnOnce(&mut Value),
        last_delivered: &mut Option<Value>,
    ) -> bool {
        let old = self.cache.clone();
        let mut updated = self.cache.take().unwrap_or(Value::Null);
        mutate(&mut updated);
        self.cache = Some(updated.clone());

        match self.event {
            EventKind::Value => {
                // Reconnects replay the current value; only changes deliver
                if last_delivered.as_ref() == Some(&updated) {
                    return false;
                }
                *last_delivered = Some(updated.clone());
                let key = self.reference.key().map(str::to_string);
                self.deliver(Ok(DataSnapshot::new(key, updated)))
            }
            _ => {
                let events = diff_children(
                    self.order_by.as_ref(),
                    old.as_ref().unwrap_or(&Value::Null),
                    &updated,
                );
                for child in events {
                    // Exactly one category per registration; the rest are
                    // received and discarded
                    if child.kind != self.event {
                        continue;
                    }
                    if self.deliver(Ok(DataSnapshot::new(Some(child.key), child.value))) {
                        return true;
                    }
                }
                false
            }
        }
    }

    /// Send one result to the caller unless the listener was torn down.
    /// Returns true when delivery was suppressed by cancellation.
    fn deliver(&mut self, result: Result<DataSnapshot, DatabaseError>) -> bool {
        // Teardown check happens before every delivery: detach, don't
        // deliver into a dead context
        if self.cancel.is_cancelled() {
            debug!(path = %self.reference.path(), "listener cancelled, dropping delivery");
            return true;
        }
        (self.callback)(result);
        false
    }

    /// Back off before reconnecting; returns true when cancelled
    async fn pause_before_reconnect(
        &mut self,
        online: &mut tokio::sync::watch::Receiver<bool>,
    ) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => true,
            _ = tokio::time::sleep(RECONNECT_DELAY) => false,
            changed = online.changed() => changed.is_err(),
        }
    }
}

enum StreamOutcome {
    /// Cancellation token tripped
    Detached,
    /// Backend ended the subscription; no reconnect
    Terminal,
    /// Connection dropped; reconnect
    Disconnected,
}

/// One parsed frame of the event-stream protocol
#[derive(Debug, Clone, PartialEq)]
enum StreamEvent {
    Put { path: String, data: Value },
    Patch { path: String, data: Value },
    KeepAlive,
    Cancelled(DatabaseError),
}

fn parse_stream_event(frame: &SseFrame) -> Result<StreamEvent, DatabaseError> {
    match frame.event.as_str() {
        "keep-alive" => Ok(StreamEvent::KeepAlive),
        "cancel" | "auth_revoked" => Ok(StreamEvent::Cancelled(DatabaseError::from_stream_event(
            &frame.event,
        ))),
        "put" | "patch" => {
            let body: Value = serde_json::from_str(&frame.data)
                .map_err(|e| DatabaseError::Internal(format!("malformed frame body: {e}")))?;
            let path = body
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| DatabaseError::Internal("frame body missing path".to_string()))?
                .to_string();
            let data = body.get("data").cloned().unwrap_or(Value::Null);
            if frame.event == "put" {
                Ok(StreamEvent::Put { path, data })
            } else {
                Ok(StreamEvent::Patch { path, data })
            }
        }
        other => Err(DatabaseError::Internal(format!(
            "unknown stream event: {other}"
        ))),
    }
}

/// Incremental parser for `text/event-stream` frames
#[derive(Default)]
struct SseParser {
    buffer: String,
    event: String,
    data: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct SseFrame {
    event: String,
    data: String,
}

impl SseParser {
    fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut frames = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                // Blank line terminates a frame
                if !self.event.is_empty() || !self.data.is_empty() {
                    frames.push(SseFrame {
                        event: std::mem::take(&mut self.event),
                        data: self.data.join("\n"),
                    });
                    self.data.clear();
                }
            } else if let Some(value) = line.strip_prefix("event:") {
                self.event = value.trim_start().to_string();
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data.push(value.trim_start().to_string());
            }
            // Comment and unknown fields are ignored
        }
        frames
    }
}

/// One synthesized child event
#[derive(Debug, Clone, PartialEq)]
struct ChildEvent {
    kind: EventKind,
    key: String,
    value: Value,
}

/// Synthesize child events from two states of the listened location
///
/// Removals come first (in the old order), then additions, then moves,
/// then changes (each in the new order). A move is a child present in both
/// states whose rank among the surviving children changed under the active
/// ordering.
fn diff_children(order_by: Option<&OrderBy>, old: &Value, new: &Value) -> Vec<ChildEvent> {
    let empty = Map::new();
    let old_children = children_of(old).unwrap_or(&empty);
    let new_children = children_of(new).unwrap_or(&empty);

    let old_order: Vec<String> = order_children(order_by, old_children)
        .into_iter()
        .filter(|key| !key.starts_with('.'))
        .collect();
    let new_order: Vec<String> = order_children(order_by, new_children)
        .into_iter()
        .filter(|key| !key.starts_with('.'))
        .collect();

    let mut events = Vec::new();

    for key in &old_order {
        if !new_children.contains_key(key) {
            events.push(ChildEvent {
                kind: EventKind::ChildRemoved,
                key: key.clone(),
                value: old_children[key].clone(),
            });
        }
    }

    for key in &new_order {
        if !old_children.contains_key(key) {
            events.push(ChildEvent {
                kind: EventKind::ChildAdded,
                key: key.clone(),
                value: new_children[key].clone(),
            });
        }
    }

    // Rank survivors in both states to detect moves
    let old_survivors: Vec<&String> = old_order
        .iter()
        .filter(|key| new_children.contains_key(*key))
        .collect();
    let new_survivors: Vec<&String> = new_order
        .iter()
        .filter(|key| old_children.contains_key(*key))
        .collect();
    for (new_rank, key) in new_survivors.iter().enumerate() {
        let old_rank = old_survivors.iter().position(|k| *k == *key);
        if old_rank != Some(new_rank) {
            events.push(ChildEvent {
                kind: EventKind::ChildMoved,
                key: (**key).clone(),
                value: new_children[key.as_str()].clone(),
            });
        }
    }

    for key in &new_order {
        if let Some(old_value) = old_children.get(key) {
            if old_value != &new_children[key] {
                events.push(ChildEvent {
                    kind: EventKind::ChildChanged,
                    key: key.clone(),
                    value: new_children[key].clone(),
                });
            }
        }
    }

    events
}

fn children_of(value: &Value) -> Option<&Map<String, Value>> {
    value.as_object()
}

/// Replace the subtree at `path` with `data`
fn apply_put(cache: &mut Value, path: &str, data: Value) {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        *cache = data;
        return;
    }

    let mut node = cache;
    for segment in &segments[..segments.len() - 1] {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = node
            .as_object_mut()
            .expect("node coerced to object above")
            .entry(segment.to_string())
            .or_insert(Value::Object(Map::new()));
    }

    let leaf = segments[segments.len() - 1];
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    let map = node.as_object_mut().expect("node coerced to object above");
    if data.is_null() {
        map.remove(leaf);
    } else {
        map.insert(leaf.to_string(), data);
    }
}

/// Merge each key of `data` into the subtree at `path`
fn apply_patch(cache: &mut Value, path: &str, data: Value) {
    let Value::Object(entries) = data else {
        // A non-object patch degenerates to a put
        apply_put(cache, path, data);
        return;
    };

    let prefix = path.trim_matches('/');
    for (key, value) in entries {
        let child_path = if prefix.is_empty() {
            key
        } else {
            format!("{prefix}/{key}")
        };
        apply_put(cache, &child_path, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_kind_parsing() {
        assert_eq!(EventKind::parse("value").unwrap(), EventKind::Value);
        assert_eq!(EventKind::parse("child_added").unwrap(), EventKind::ChildAdded);
        assert_eq!(EventKind::parse("child_moved").unwrap(), EventKind::ChildMoved);
        assert!(matches!(
            EventKind::parse("child_renamed"),
            Err(DatabaseError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_sse_parser_reassembles_split_frames() {
        let mut parser = SseParser::default();

        let first = parser.feed(b"event: put\ndata: {\"path\":\"/\",");
        assert!(first.is_empty());

        let second = parser.feed(b"\"data\":1}\n\n");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].event, "put");
        assert_eq!(second[0].data, "{\"path\":\"/\",\"data\":1}");
    }

    #[test]
    fn test_sse_parser_multiple_frames_in_one_chunk() {
        let mut parser = SseParser::default();
        let frames = parser.feed(
            b"event: put\ndata: {\"path\":\"/\",\"data\":1}\n\nevent: keep-alive\ndata: null\n\n",
        );
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].event, "keep-alive");
    }

    #[test]
    fn test_parse_stream_events() {
        let put = parse_stream_event(&SseFrame {
            event: "put".to_string(),
            data: "{\"path\":\"/a\",\"data\":{\"x\":1}}".to_string(),
        })
        .unwrap();
        assert_eq!(
            put,
            StreamEvent::Put {
                path: "/a".to_string(),
                data: json!({"x": 1})
            }
        );

        let cancel = parse_stream_event(&SseFrame {
            event: "cancel".to_string(),
            data: "null".to_string(),
        })
        .unwrap();
        assert_eq!(cancel, StreamEvent::Cancelled(DatabaseError::PermissionDenied));

        let revoked = parse_stream_event(&SseFrame {
            event: "auth_revoked".to_string(),
            data: "null".to_string(),
        })
        .unwrap();
        assert_eq!(revoked, StreamEvent::Cancelled(DatabaseError::AuthRevoked));
    }

    #[test]
    fn test_apply_put_at_root_and_nested() {
        let mut cache = Value::Null;
        apply_put(&mut cache, "/", json!({"a": 1}));
        assert_eq!(cache, json!({"a": 1}));

        apply_put(&mut cache, "/b/c", json!(2));
        assert_eq!(cache, json!({"a": 1, "b": {"c": 2}}));

        apply_put(&mut cache, "/a", Value::Null);
        assert_eq!(cache, json!({"b": {"c": 2}}));
    }

    #[test]
    fn test_apply_patch_merges_children() {
        let mut cache = json!({"a": 1, "b": 2});
        apply_patch(&mut cache, "/", json!({"b": 20, "c": 3}));
        assert_eq!(cache, json!({"a": 1, "b": 20, "c": 3}));
    }

    #[test]
    fn test_diff_initial_population_is_all_added() {
        let events = diff_children(None, &Value::Null, &json!({"a": 1, "b": 2}));
        let kinds: Vec<_> = events.iter().map(|e| (e.kind, e.key.as_str())).collect();
        assert_eq!(
            kinds,
            vec![
                (EventKind::ChildAdded, "a"),
                (EventKind::ChildAdded, "b"),
            ]
        );
    }

    #[test]
    fn test_diff_detects_removal_and_change() {
        let old = json!({"a": 1, "b": 2, "c": 3});
        let new = json!({"a": 10, "c": 3});
        let events = diff_children(None, &old, &new);

        assert!(events.contains(&ChildEvent {
            kind: EventKind::ChildRemoved,
            key: "b".to_string(),
            value: json!(2),
        }));
        assert!(events.contains(&ChildEvent {
            kind: EventKind::ChildChanged,
            key: "a".to_string(),
            value: json!(10),
        }));
        assert!(!events.iter().any(|e| e.kind == EventKind::ChildAdded));
    }

    #[test]
    fn test_diff_detects_move_under_ordering() {
        let order = OrderBy::Child("ts".to_string());
        let old = json!({"a": {"ts": 1}, "b": {"ts": 2}});
        let new = json!({"a": {"ts": 3}, "b": {"ts": 2}});
        let events = diff_children(Some(&order), &old, &new);

        let moved: Vec<&str> = events
            .iter()
            .filter(|e| e.kind == EventKind::ChildMoved)
            .map(|e| e.key.as_str())
            .collect();
        assert_eq!(moved, vec!["b", "a"]);

        // The reordering child also changed value
        assert!(events.contains(&ChildEvent {
            kind: EventKind::ChildChanged,
            key: "a".to_string(),
            value: json!({"ts": 3}),
        }));
    }

    #[test]
    fn test_diff_no_events_when_nothing_changed() {
        let state = json!({"a": 1, "b": 2});
        assert!(diff_children(None, &state, &state).is_empty());
    }

    #[test]
    fn test_metadata_keys_are_not_children() {
        let events = diff_children(None, &Value::Null, &json!({".priority": 1, "a": 2}));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key, "a");
    }
}
