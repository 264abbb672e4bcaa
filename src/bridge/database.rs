//! Database method dispatch
//!
//! Translates data bridge requests into database façade calls. Query
//! descriptors are parsed and validated before any instance is resolved,
//! so malformed descriptors never produce backend traffic. Continuous
//! subscriptions land in the registry under their caller-supplied id;
//! single-shot reads (empty id) resolve once and leave no state behind.

use crate::bridge::message::{
    bool_arg, opt_value_arg, str_arg, value_arg, BridgeRequest, Responder, ResponseSender,
};
use crate::bridge::registry::{ListenerHandle, SubscriptionRegistry};
use crate::database::database::Database;
use crate::database::listener::{attach, EventKind};
use crate::database::query::QuerySpec;
use crate::database::snapshot::DataSnapshot;
use crate::error::{BridgeError, DatabaseError};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Dispatcher for the data façade's method surface
#[derive(Clone)]
pub struct DatabaseBridge {
    inner: Arc<DatabaseBridgeInner>,
}

struct DatabaseBridgeInner {
    tx: ResponseSender,
    teardown: CancellationToken,
    registry: SubscriptionRegistry,
}

impl DatabaseBridge {
    pub(crate) fn new(tx: ResponseSender, teardown: CancellationToken) -> Self {
        Self {
            inner: Arc::new(DatabaseBridgeInner {
                tx,
                teardown,
                registry: SubscriptionRegistry::new(),
            }),
        }
    }

    /// Dispatch one request; the result arrives on the delivery channel
    pub fn dispatch(&self, request: BridgeRequest) {
        let bridge = self.clone();
        tokio::spawn(async move {
            bridge.handle(request).await;
        });
    }

    /// Number of live continuous subscriptions
    pub async fn subscription_count(&self) -> usize {
        self.inner.registry.len().await
    }

    pub(crate) fn registry(&self) -> &SubscriptionRegistry {
        &self.inner.registry
    }

    async fn handle(&self, request: BridgeRequest) {
        debug!(method = %request.method, id = %request.id, "database request");
        let responder = Responder::new(self.inner.tx.clone(), request.id);

        match self.execute(&request.method, &request.args, &responder).await {
            Ok(Some(payload)) => responder.ok(payload),
            Ok(None) => {} // delivery owned by the listener
            Err(error) => responder.error(&error),
        }
    }

    async fn execute(
        &self,
        method: &str,
        args: &[Value],
        responder: &Responder,
    ) -> Result<Option<Value>, BridgeError> {
        match method {
            "on" => self.on(args, responder).await,
            "off" => {
                let _url = str_arg(args, 0, "url")?;
                let _path = str_arg(args, 1, "path")?;
                let uid = str_arg(args, 2, "uid")?;
                self.inner.registry.unsubscribe(&uid).await;
                Ok(Some(Value::Null))
            }
            "set" => {
                let url = str_arg(args, 0, "url")?;
                let path = str_arg(args, 1, "path")?;
                let value = opt_value_arg(args, 2);
                let priority = opt_value_arg(args, 3);

                let database = Database::instance(&url).await?;
                database.reference(&path).set(value, priority).await?;
                Ok(Some(Value::Null))
            }
            "update" => {
                let url = str_arg(args, 0, "url")?;
                let path = str_arg(args, 1, "path")?;
                let Value::Object(updates) = value_arg(args, 2) else {
                    return Err(BridgeError::invalid_arguments("value must be an object"));
                };

                let database = Database::instance(&url).await?;
                database.reference(&path).update(updates).await?;
                Ok(Some(Value::Null))
            }
            "push" => {
                let url = str_arg(args, 0, "url")?;
                let path = str_arg(args, 1, "path")?;
                let value = opt_value_arg(args, 2);

                let database = Database::instance(&url).await?;
                let result = database.reference(&path).push(value).await?;
                Ok(Some(json!({ "key": result.key, "path": result.path })))
            }
            "setOnline" => {
                let url = str_arg(args, 0, "url")?;
                let enabled = bool_arg(args, 1, "enabled")?;

                let database = Database::instance(&url).await?;
                if enabled {
                    database.go_online();
                } else {
                    database.go_offline();
                }
                Ok(Some(Value::Null))
            }
            other => Err(BridgeError::UnknownMethod(other.to_string())),
        }
    }

    /// Attach a listener: single-shot when the subscription id is empty,
    /// continuous otherwise
    async fn on(
        &self,
        args: &[Value],
        responder: &Responder,
    ) -> Result<Option<Value>, BridgeError> {
        let url = str_arg(args, 0, "url")?;
        let path = str_arg(args, 1, "path")?;
        let event = EventKind::parse(&str_arg(args, 2, "eventType")?)?;

        let order_by = opt_value_arg(args, 3);
        let includes = match args.get(4) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(includes)) => includes.clone(),
            Some(_) => {
                return Err(BridgeError::invalid_arguments("includes must be an array"));
            }
        };
        let limit = opt_value_arg(args, 5);
        let uid = str_arg(args, 6, "uid")?;

        // Descriptor validation precedes any backend call
        let spec = QuerySpec::from_parts(order_by.as_ref(), &includes, limit.as_ref())?;

        if uid.is_empty() {
            // Single-shot delivery: resolve once, keep nothing open
            if event.is_child() {
                return Err(BridgeError::invalid_arguments(
                    "child events require a subscription id",
                ));
            }
            let database = Database::instance(&url).await?;
            let snapshot = database.reference(&path).get(&spec).await?;
            return Ok(Some(snapshot.to_value(spec.order_by.as_ref())));
        }

        let database = Database::instance(&url).await?;
        let reference = database.reference(&path);

        let delivery = responder.clone();
        let order_by = spec.order_by.clone();
        let callback = Box::new(move |result: Result<DataSnapshot, DatabaseError>| match result {
            Ok(snapshot) => delivery.ok_streamed(snapshot.to_value(order_by.as_ref())),
            // A backend cancellation ends the subscription; the error
            // closes the channel
            Err(error) => delivery.error(&BridgeError::Database(error)),
        });

        let registration = attach(reference, spec, event, &self.inner.teardown, callback)?;
        self.inner
            .registry
            .subscribe(uid, ListenerHandle::from_registration(registration))
            .await;
        Ok(None)
    }

    /// Detach every subscription this dispatcher owns
    pub async fn teardown(&self) {
        self.inner.registry.teardown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::message::{response_channel, BridgeStatus, ResponseReceiver};
    use std::time::Duration;

    fn bridge() -> (DatabaseBridge, ResponseReceiver) {
        let (tx, rx) = response_channel();
        let bridge = DatabaseBridge::new(tx, CancellationToken::new());
        (bridge, rx)
    }

    async fn recv(rx: &mut ResponseReceiver) -> crate::bridge::message::BridgeResponse {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no response within timeout")
            .expect("channel closed")
    }

    fn on_args(url: &str, event: &str, order_by: Value, includes: Value, uid: &str) -> Vec<Value> {
        vec![
            json!(url),
            json!("rooms/1"),
            json!(event),
            order_by,
            includes,
            Value::Null,
            json!(uid),
        ]
    }

    #[tokio::test]
    async fn test_filters_without_ordering_are_rejected_before_backend() {
        let (bridge, mut rx) = bridge();

        // The URL is unreachable; a validation failure must come back anyway
        bridge.dispatch(BridgeRequest::new(
            "q1",
            "on",
            on_args(
                "https://db-unused.example.test",
                "value",
                Value::Null,
                json!([{ "startAt": 0 }]),
                "",
            ),
        ));

        let response = recv(&mut rx).await;
        assert_eq!(response.status, BridgeStatus::Error);
        assert_eq!(response.payload["code"], "INVALID_QUERY");
    }

    #[tokio::test]
    async fn test_unknown_event_type_is_rejected() {
        let (bridge, mut rx) = bridge();

        bridge.dispatch(BridgeRequest::new(
            "q2",
            "on",
            on_args(
                "https://db-unused.example.test",
                "child_renamed",
                Value::Null,
                json!([]),
                "sub",
            ),
        ));

        let response = recv(&mut rx).await;
        assert_eq!(response.status, BridgeStatus::Error);
        assert_eq!(response.payload["code"], "INVALID_QUERY");
    }

    #[tokio::test]
    async fn test_single_shot_child_listener_is_rejected() {
        let (bridge, mut rx) = bridge();

        bridge.dispatch(BridgeRequest::new(
            "q3",
            "on",
            on_args(
                "https://db-unused.example.test",
                "child_added",
                Value::Null,
                json!([]),
                "",
            ),
        ));

        let response = recv(&mut rx).await;
        assert_eq!(response.status, BridgeStatus::Error);
        assert_eq!(response.payload["code"], "INVALID_ARGUMENTS");
    }

    #[tokio::test]
    async fn test_off_for_unknown_id_resolves_as_noop() {
        let (bridge, mut rx) = bridge();

        bridge.dispatch(BridgeRequest::new(
            "q4",
            "off",
            vec![json!(""), json!("rooms/1"), json!("never-registered")],
        ));

        let response = recv(&mut rx).await;
        assert_eq!(response.status, BridgeStatus::Ok);
    }

    #[tokio::test]
    async fn test_update_requires_an_object() {
        let (bridge, mut rx) = bridge();

        bridge.dispatch(BridgeRequest::new(
            "q5",
            "update",
            vec![
                json!("https://db-unused.example.test"),
                json!("rooms/1"),
                json!("not-a-map"),
            ],
        ));

        let response = recv(&mut rx).await;
        assert_eq!(response.status, BridgeStatus::Error);
        assert_eq!(response.payload["code"], "INVALID_ARGUMENTS");
    }

    #[tokio::test]
    async fn test_push_without_value_resolves_key_and_path() {
        let (bridge, mut rx) = bridge();

        bridge.dispatch(BridgeRequest::new(
            "q6",
            "push",
            vec![
                json!("https://db-push-bridge.example.test"),
                json!("rooms/1"),
                Value::Null,
            ],
        ));

        let response = recv(&mut rx).await;
        assert_eq!(response.status, BridgeStatus::Ok);
        let key = response.payload["key"].as_str().unwrap();
        assert_eq!(key.len(), 20);
        assert_eq!(
            response.payload["path"],
            format!("rooms/1/{key}").as_str()
        );
    }

    #[tokio::test]
    async fn test_set_online_flips_instance_state() {
        let (bridge, mut rx) = bridge();
        let url = "https://db-online-bridge.example.test";

        bridge.dispatch(BridgeRequest::new(
            "q7",
            "setOnline",
            vec![json!(url), json!(false)],
        ));
        assert_eq!(recv(&mut rx).await.status, BridgeStatus::Ok);
        assert!(!Database::instance(url).await.unwrap().is_online());

        bridge.dispatch(BridgeRequest::new(
            "q8",
            "setOnline",
            vec![json!(url), json!(true)],
        ));
        assert_eq!(recv(&mut rx).await.status, BridgeStatus::Ok);
        assert!(Database::instance(url).await.unwrap().is_online());
    }

    #[tokio::test]
    async fn test_continuous_subscription_registers_and_off_detaches() {
        let (bridge, mut rx) = bridge();

        // The instance is unreachable; the listener retries in the
        // background without delivering anything
        bridge.dispatch(BridgeRequest::new(
            "q9",
            "on",
            on_args(
                "https://db-sub-bridge.example.test",
                "child_added",
                json!({ "child": "ts" }),
                json!([{ "startAt": 0 }]),
                "sub1",
            ),
        ));

        // Registration happens asynchronously
        for _ in 0..50 {
            if bridge.registry().contains("sub1").await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(bridge.registry().contains("sub1").await);
        assert_eq!(bridge.subscription_count().await, 1);

        bridge.dispatch(BridgeRequest::new(
            "q10",
            "off",
            vec![json!(""), json!("rooms/1"), json!("sub1")],
        ));
        let response = recv(&mut rx).await;
        assert_eq!(response.request_id, "q10");
        assert_eq!(response.status, BridgeStatus::Ok);
        assert_eq!(bridge.subscription_count().await, 0);
    }

    #[tokio::test]
    async fn test_teardown_empties_the_registry() {
        let (bridge, _rx) = bridge();

        bridge.dispatch(BridgeRequest::new(
            "q11",
            "on",
            on_args(
                "https://db-teardown-bridge.example.test",
                "value",
                Value::Null,
                json!([]),
                "sub-teardown",
            ),
        ));

        for _ in 0..50 {
            if bridge.registry().contains("sub-teardown").await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(bridge.registry().contains("sub-teardown").await);

        bridge.teardown().await;
        assert_eq!(bridge.subscription_count().await, 0);
    }
}
