//! Redis-backed event emitter facade.
//!
//! [`EventEmitter`] looks like an ordinary in-process event emitter, but
//! every non-reserved event crosses a Redis pub/sub broker: `emit`
//! publishes the serialized arguments on a channel named after the event,
//! and `on`/`once` subscribe to that channel so deliveries from any
//! process (including this one) fan back in to the local listeners.
//!
//! ```text
//! emit(event, args) --> codec --> publish connection --> broker
//! broker --> subscribe connection --> dispatch bridge --> codec --> listeners
//! ```
//!
//! Two connections are created lazily, one per direction, the first time
//! they are needed, and live for the emitter's remaining lifetime. A
//! channel is subscribed at most once per emitter: the first listener for
//! an event name triggers the subscribe command, later listeners reuse it.
//! The reserved names [`ERROR_EVENT`], [`NEW_LISTENER_EVENT`] and
//! [`REMOVE_LISTENER_EVENT`] never produce outbound broker traffic.

use std::sync::Arc;

use fred::prelude::*;
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::codec;
use crate::config::EmitterConfig;
use crate::error::EmitterError;
use crate::registry::{ListenerId, LocalRegistry};

/// Event name carrying local error reports.
pub const ERROR_EVENT: &str = "error";

/// Event name dispatched locally before a listener is registered.
pub const NEW_LISTENER_EVENT: &str = "newListener";

/// Event name dispatched locally after a listener is removed.
pub const REMOVE_LISTENER_EVENT: &str = "removeListener";

/// The local-only event names, which never cross the wire.
const RESERVED_EVENTS: [&str; 3] = [ERROR_EVENT, NEW_LISTENER_EVENT, REMOVE_LISTENER_EVENT];

/// Returns `true` for the reserved local-only event names.
pub fn is_reserved(event: &str) -> bool {
    RESERVED_EVENTS.contains(&event)
}

/// State shared by emitter handles and the background tasks.
struct EmitterState {
    config: EmitterConfig,
    registry: LocalRegistry,
    publisher: OnceCell<Client>,
    subscriber: OnceCell<Client>,
}

/// Local event emitter backed by Redis pub/sub fan-out.
///
/// Cloning the emitter is cheap and shares the listener registry and both
/// connections. Emitting a non-reserved event does not invoke local
/// listeners directly; deliveries always come back through the broker, so
/// every subscribed process (this one included) observes the same stream.
///
/// Listener removal never unsubscribes the broker channel: subscription
/// is a one-way, per-event transition, and a later listener for the same
/// event reuses the existing subscription.
#[derive(Clone)]
pub struct EventEmitter {
    state: Arc<EmitterState>,
}

impl EventEmitter {
    /// Create an emitter using the process-wide default configuration.
    pub fn new() -> Self {
        Self::with_config(EmitterConfig::default())
    }

    /// Create an emitter with an explicit configuration.
    pub fn with_config(config: EmitterConfig) -> Self {
        debug!(
            host = config.host,
            port = config.port,
            "created event emitter"
        );
        Self {
            state: Arc::new(EmitterState {
                config,
                registry: LocalRegistry::default(),
                publisher: OnceCell::new(),
                subscriber: OnceCell::new(),
            }),
        }
    }

    /// The configuration this emitter was constructed with.
    pub fn config(&self) -> &EmitterConfig {
        &self.state.config
    }

    /// Register a listener for `event`.
    ///
    /// The first listener for a non-subscribed event issues the broker
    /// subscribe command; when this call returns, the subscription is
    /// acknowledged and deliveries can arrive. A local
    /// [`NEW_LISTENER_EVENT`] is dispatched before the listener is added.
    ///
    /// # Errors
    ///
    /// Returns [`EmitterError::Redis`] if the subscribe connection cannot
    /// be established or the subscribe command fails.
    pub async fn on<F>(&self, event: &str, listener: F) -> Result<ListenerId, EmitterError>
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        debug!(event, "adding listener");
        self.ensure_subscribed(event).await?;
        dispatch_local(&self.state, NEW_LISTENER_EVENT, &[Value::from(event)]);
        Ok(self.state.registry.add(event, false, Arc::new(listener)))
    }

    /// Register a listener for `event` that is invoked at most once.
    ///
    /// Subscription behavior matches [`on`](Self::on); the listener is
    /// removed immediately before its first invocation.
    ///
    /// # Errors
    ///
    /// Returns [`EmitterError::Redis`] if the subscribe connection cannot
    /// be established or the subscribe command fails.
    pub async fn once<F>(&self, event: &str, listener: F) -> Result<ListenerId, EmitterError>
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        debug!(event, "adding one time listener");
        self.ensure_subscribed(event).await?;
        dispatch_local(&self.state, NEW_LISTENER_EVENT, &[Value::from(event)]);
        Ok(self.state.registry.add(event, true, Arc::new(listener)))
    }

    /// Emit `event` with the given arguments.
    ///
    /// Reserved events are dispatched purely locally. Everything else is
    /// serialized and published to the broker channel named after the
    /// event, fire-and-forget: the subscriber-count reply is discarded and
    /// no remote-delivery acknowledgement is surfaced.
    ///
    /// # Errors
    ///
    /// Returns [`EmitterError::Encode`] if the arguments cannot be
    /// serialized, or [`EmitterError::Redis`] if the publish connection
    /// cannot be established or the publish command fails.
    pub async fn emit(&self, event: &str, args: &[Value]) -> Result<(), EmitterError> {
        debug!(event, "emitting event");

        // These events make no sense on the wire; they describe this
        // process only.
        if is_reserved(event) {
            dispatch_local(&self.state, event, args);
            return Ok(());
        }

        let payload = codec::encode(args)?;
        let publisher = self.publisher().await?;
        debug!(event, payload, "publishing event");
        let _: u64 = publisher.publish(event, payload.as_str()).await?;
        Ok(())
    }

    /// Remove one listener. Returns whether it was still registered.
    ///
    /// Dispatches a local [`REMOVE_LISTENER_EVENT`] when a listener was
    /// removed. The broker channel stays subscribed even when the last
    /// listener for an event goes away -- subscription is deliberately a
    /// one-way transition, so remove-then-re-add cycles cause no
    /// subscribe/unsubscribe churn.
    pub fn remove_listener(&self, event: &str, id: ListenerId) -> bool {
        let removed = self.state.registry.remove(event, id);
        if removed {
            debug!(event, "removed listener");
            dispatch_local(&self.state, REMOVE_LISTENER_EVENT, &[Value::from(event)]);
        }
        removed
    }

    /// Remove every listener for `event`, returning how many there were.
    ///
    /// Dispatches one local [`REMOVE_LISTENER_EVENT`] per removed
    /// listener. The broker channel stays subscribed (see
    /// [`remove_listener`](Self::remove_listener)).
    pub fn remove_all_listeners(&self, event: &str) -> usize {
        let removed = self.state.registry.remove_all(event);
        for _ in 0..removed {
            dispatch_local(&self.state, REMOVE_LISTENER_EVENT, &[Value::from(event)]);
        }
        removed
    }

    /// Number of listeners currently registered for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.state.registry.listener_count(event)
    }

    /// Subscribe to `event` if this emitter has no listeners for it yet.
    ///
    /// The zero-to-one listener transition is the subscribe trigger:
    /// callers check in before registering their listener, so only the
    /// first one for each event name reaches the broker. The subscribe
    /// command future resolving is the broker's acknowledgement.
    async fn ensure_subscribed(&self, event: &str) -> Result<(), EmitterError> {
        let subscriber = self.subscriber().await?;
        if self.state.registry.listener_count(event) == 0 {
            debug!(event, "no existing listeners, sending subscribe command");
            subscriber.subscribe(event).await?;
            debug!(event, "subscription acknowledged");
        }
        Ok(())
    }

    /// The publish connection, created on first use.
    async fn publisher(&self) -> Result<&Client, EmitterError> {
        self.state
            .publisher
            .get_or_try_init(|| self.create_client())
            .await
    }

    /// The subscribe connection, created on first use.
    ///
    /// First creation also wires the dispatch bridge that forwards
    /// inbound broker messages to local listeners.
    async fn subscriber(&self) -> Result<&Client, EmitterError> {
        self.state
            .subscriber
            .get_or_try_init(|| async {
                debug!("creating subscriber");
                let client = self.create_client().await?;
                spawn_dispatch_bridge(&self.state, &client);
                Ok(client)
            })
            .await
    }

    /// Connect a new client using this emitter's configuration.
    async fn create_client(&self) -> Result<Client, EmitterError> {
        debug!("creating redis client");
        let client = Builder::from_config(self.state.config.client_config()).build()?;
        client.init().await?;
        spawn_error_watcher(&self.state, &client);
        Ok(client)
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("host", &self.state.config.host)
            .field("port", &self.state.config.port)
            .field("publisher", &self.state.publisher.initialized())
            .field("subscriber", &self.state.subscriber.initialized())
            .finish()
    }
}

/// Dispatch an event to the local listeners only.
///
/// An [`ERROR_EVENT`] with nobody listening is logged instead of dropped
/// silently; it must never panic the caller. Each `once` listener removed
/// by the dispatch announces itself through a nested
/// [`REMOVE_LISTENER_EVENT`] pass, which terminates because the removed
/// entries are already gone when the nested pass runs.
fn dispatch_local(state: &EmitterState, event: &str, args: &[Value]) {
    let outcome = state.registry.dispatch(event, args);
    if event == ERROR_EVENT && outcome.invoked == 0 {
        warn!(?args, "error event with no listeners attached");
    }
    for _ in 0..outcome.removed {
        dispatch_local(state, REMOVE_LISTENER_EVENT, &[Value::from(event)]);
    }
}

/// Forward inbound broker messages to the local listeners.
///
/// The task holds only a weak reference to the emitter state: dropping
/// the last emitter handle drops the subscribe connection, closes the
/// message stream, and ends the task.
fn spawn_dispatch_bridge(state: &Arc<EmitterState>, client: &Client) {
    let mut messages = client.message_rx();
    let weak = Arc::downgrade(state);
    tokio::spawn(async move {
        loop {
            match messages.recv().await {
                Ok(message) => {
                    let Some(state) = weak.upgrade() else { break };
                    let event = message.channel.to_string();
                    let Some(payload) = message.value.as_string() else {
                        // The broker delivered something that is not text;
                        // report it through the decode-failure path.
                        warn!(event, "discarding inbound payload that is not valid UTF-8");
                        dispatch_local(
                            &state,
                            ERROR_EVENT,
                            &[json!({
                                "message":
                                    format!("payload for event {event:?} is not valid UTF-8"),
                                "event": event,
                            })],
                        );
                        continue;
                    };
                    debug!(event, payload, "received message");
                    dispatch_decoded(&state, &event, &payload);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "dispatch bridge lagged behind inbound messages");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("dispatch bridge stopped");
    });
}

/// Forward asynchronous client errors to the local `error` event.
///
/// Connection interruptions and other errors raised outside any command
/// call frame would otherwise be invisible; reify them as local error
/// reports instead.
fn spawn_error_watcher(state: &Arc<EmitterState>, client: &Client) {
    let mut errors = client.error_rx();
    let weak = Arc::downgrade(state);
    tokio::spawn(async move {
        loop {
            match errors.recv().await {
                Ok((error, server)) => {
                    let Some(state) = weak.upgrade() else { break };
                    warn!(error = %error, ?server, "redis client error");
                    dispatch_local(
                        &state,
                        ERROR_EVENT,
                        &[json!({ "message": error.to_string() })],
                    );
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Decode a payload string and re-emit it locally.
///
/// A decode failure is reified as a local [`ERROR_EVENT`] carrying the
/// failure cause, the event name and the raw payload; it never panics and
/// never tears down the subscribe connection.
fn dispatch_decoded(state: &EmitterState, event: &str, payload: &str) {
    match codec::decode(event, payload) {
        Ok(args) => {
            dispatch_local(state, event, &args);
        }
        Err(err) => {
            warn!(event, payload, error = %err, "failed to decode inbound payload");
            dispatch_local(state, ERROR_EVENT, &[decode_report(&err)]);
        }
    }
}

/// Build the argument delivered to `error` listeners for a decode failure.
fn decode_report(err: &EmitterError) -> Value {
    match err {
        EmitterError::Decode { event, payload, .. }
        | EmitterError::PayloadShape { event, payload } => json!({
            "message": err.to_string(),
            "event": event,
            "payload": payload,
        }),
        other => json!({ "message": other.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::PoisonError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn offline_emitter() -> EventEmitter {
        // Port 1 is never a live broker; connection attempts fail fast.
        // Built literally so the process-wide defaults stay untouched.
        EventEmitter::with_config(EmitterConfig {
            host: "localhost".to_owned(),
            port: 1,
            credential: None,
        })
    }

    /// Register a listener without touching the broker, bypassing the
    /// subscription tracker.
    fn add_local_listener(
        emitter: &EventEmitter,
        event: &str,
        once: bool,
    ) -> Arc<Mutex<Vec<Vec<Value>>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        emitter.state.registry.add(
            event,
            once,
            Arc::new(move |args: &[Value]| {
                sink.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(args.to_vec());
            }),
        );
        seen
    }

    fn received(seen: &Arc<Mutex<Vec<Vec<Value>>>>) -> Vec<Vec<Value>> {
        seen.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[test]
    fn reserved_names_are_recognized() {
        assert!(is_reserved("error"));
        assert!(is_reserved("newListener"));
        assert!(is_reserved("removeListener"));
        assert!(!is_reserved("msg"));
        assert!(!is_reserved("bla.msg"));
    }

    #[tokio::test]
    async fn reserved_events_dispatch_locally_without_a_connection() {
        let emitter = offline_emitter();
        let seen = add_local_listener(&emitter, ERROR_EVENT, false);

        let result = emitter
            .emit(ERROR_EVENT, &[json!({ "message": "boom" })])
            .await;
        assert!(result.is_ok(), "reserved emit must not need a broker");
        assert_eq!(received(&seen), vec![vec![json!({ "message": "boom" })]]);

        // No connection was created for a reserved event.
        assert!(!emitter.state.publisher.initialized());
        assert!(!emitter.state.subscriber.initialized());
    }

    #[tokio::test]
    async fn non_reserved_emit_with_unreachable_broker_errors() {
        let emitter = offline_emitter();
        let result = emitter.emit("msg", &[json!("hello")]).await;
        assert!(matches!(result, Err(EmitterError::Redis(_))));
    }

    #[tokio::test]
    async fn listener_registration_with_unreachable_broker_errors() {
        let emitter = offline_emitter();
        let result = emitter.on("msg", |_args: &[Value]| {}).await;
        assert!(matches!(result, Err(EmitterError::Redis(_))));
        // The failed registration left nothing behind.
        assert_eq!(emitter.listener_count("msg"), 0);
    }

    #[test]
    fn inbound_payload_dispatches_to_listeners() {
        let emitter = offline_emitter();
        let seen = add_local_listener(&emitter, "msg", false);

        dispatch_decoded(&emitter.state, "msg", r#"["info","hello"]"#);

        assert_eq!(received(&seen), vec![vec![json!("info"), json!("hello")]]);
    }

    #[test]
    fn inbound_payloads_stay_on_their_own_event() {
        let emitter = offline_emitter();
        let bla = add_local_listener(&emitter, "bla.msg", false);
        let foo = add_local_listener(&emitter, "foo.msg", false);

        dispatch_decoded(&emitter.state, "bla.msg", r#"["bla1",1]"#);
        dispatch_decoded(&emitter.state, "foo.msg", r#"[{"foo":"baz"},2]"#);

        assert_eq!(received(&bla), vec![vec![json!("bla1"), json!(1)]]);
        assert_eq!(received(&foo), vec![vec![json!({"foo":"baz"}), json!(2)]]);
    }

    #[test]
    fn once_listener_sees_one_inbound_delivery() {
        let emitter = offline_emitter();
        let seen = add_local_listener(&emitter, "x", true);

        dispatch_decoded(&emitter.state, "x", "[1]");
        dispatch_decoded(&emitter.state, "x", "[2]");

        assert_eq!(received(&seen), vec![vec![json!(1)]]);
        assert_eq!(emitter.listener_count("x"), 0);
    }

    #[test]
    fn malformed_inbound_payload_becomes_an_error_event() {
        let emitter = offline_emitter();
        let errors = add_local_listener(&emitter, ERROR_EVENT, false);
        let msgs = add_local_listener(&emitter, "garbled", false);

        dispatch_decoded(&emitter.state, "garbled", "{not json");

        let reports = received(&errors);
        assert_eq!(reports.len(), 1);
        let report = reports
            .first()
            .and_then(|args| args.first())
            .cloned()
            .unwrap_or_default();
        assert_eq!(report.get("event"), Some(&json!("garbled")));
        assert_eq!(report.get("payload"), Some(&json!("{not json")));

        // The bad payload never reached the event's own listeners, and the
        // bridge keeps delivering afterwards.
        assert_eq!(received(&msgs).len(), 0);
        dispatch_decoded(&emitter.state, "garbled", r#"["ok"]"#);
        assert_eq!(received(&msgs), vec![vec![json!("ok")]]);
    }

    #[test]
    fn non_array_inbound_payload_becomes_an_error_event() {
        let emitter = offline_emitter();
        let errors = add_local_listener(&emitter, ERROR_EVENT, false);
        let msgs = add_local_listener(&emitter, "msg", false);

        dispatch_decoded(&emitter.state, "msg", r#""just a string""#);

        assert_eq!(received(&errors).len(), 1);
        assert_eq!(received(&msgs).len(), 0);
    }

    #[test]
    fn removing_a_listener_announces_remove_listener() {
        let emitter = offline_emitter();
        let removals = add_local_listener(&emitter, REMOVE_LISTENER_EVENT, false);

        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let id = emitter.state.registry.add(
            "msg",
            false,
            Arc::new(move |_args| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(emitter.remove_listener("msg", id));
        assert!(!emitter.remove_listener("msg", id));

        assert_eq!(received(&removals), vec![vec![json!("msg")]]);
        assert_eq!(emitter.listener_count("msg"), 0);
    }

    #[test]
    fn once_auto_removal_announces_remove_listener() {
        let emitter = offline_emitter();
        let removals = add_local_listener(&emitter, REMOVE_LISTENER_EVENT, false);
        add_local_listener(&emitter, "x", true);

        dispatch_decoded(&emitter.state, "x", "[]");

        assert_eq!(received(&removals), vec![vec![json!("x")]]);
    }

    #[test]
    fn remove_all_listeners_announces_each_removal() {
        let emitter = offline_emitter();
        let removals = add_local_listener(&emitter, REMOVE_LISTENER_EVENT, false);
        add_local_listener(&emitter, "msg", false);
        add_local_listener(&emitter, "msg", false);

        assert_eq!(emitter.remove_all_listeners("msg"), 2);
        assert_eq!(received(&removals).len(), 2);
    }

    #[test]
    fn decode_report_carries_the_cause() {
        let err = codec::decode("msg", "not json").err();
        let report = err.as_ref().map(decode_report).unwrap_or_default();
        assert_eq!(report.get("event"), Some(&json!("msg")));
        assert_eq!(report.get("payload"), Some(&json!("not json")));
        assert!(
            report
                .get("message")
                .and_then(Value::as_str)
                .is_some_and(|m| m.contains("msg")),
            "report should describe the failure"
        );
    }
}
