//! EventHandlerRegistry - event_type → handler 集合（fan-out）
//!
//! # 学習ポイント
//! - HashMap での型消去された trait object の管理
//! - 関数ポインタ（`fn(&str) -> Box<dyn Any>`）による型タグからの復元
//! - 起動時に構築（mutable）、実行時は Arc で共有（immutable）
//!
//! 実行時リフレクションの代わりに、型タグ文字列 → デコード関数の
//! ディスパッチテーブルを登録時に作ります。

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::codec::PayloadCodec;
use super::handler::{DynEventHandler, EventHandler, TypedEventHandler};
use super::message::Event;
use crate::cancel::CancelToken;
use crate::domain::{CourierError, CourierResult, EventTypeId};

type DecodeFn = fn(&PayloadCodec, &str) -> CourierResult<Box<dyn Any + Send + Sync>>;

fn decode_as<E: Event>(
    codec: &PayloadCodec,
    payload: &str,
) -> CourierResult<Box<dyn Any + Send + Sync>> {
    let event: E = codec.decode(payload)?;
    Ok(Box::new(event))
}

struct EventBinding {
    rust_type: TypeId,
    rust_type_name: &'static str,
    decode: DecodeFn,
    handlers: Vec<Arc<dyn DynEventHandler>>,
}

/// RegistryError は registry 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Handler for '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("Event type tag '{tag}' is used by both {existing} and {new}")]
    TypeTagConflict {
        tag: String,
        existing: &'static str,
        new: &'static str,
    },
}

#[derive(Default)]
pub struct EventHandlerRegistry {
    bindings: HashMap<EventTypeId, EventBinding>,
    codec: PayloadCodec,
}

impl EventHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an event type resolvable without attaching a handler.
    ///
    /// Records of a declared type with no handlers complete vacuously.
    pub fn declare<E: Event>(&mut self) -> Result<(), RegistryError> {
        self.binding_mut::<E>().map(|_| ())
    }

    /// Append a handler for `E`. Handlers run in registration order.
    pub fn register<E: Event, H: EventHandler<E> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        let binding = self.binding_mut::<E>()?;
        binding
            .handlers
            .push(Arc::new(TypedEventHandler::<E, H>::new(handler)));
        Ok(())
    }

    fn binding_mut<E: Event>(&mut self) -> Result<&mut EventBinding, RegistryError> {
        let binding = self
            .bindings
            .entry(EventTypeId::of::<E>())
            .or_insert_with(|| EventBinding {
                rust_type: TypeId::of::<E>(),
                rust_type_name: std::any::type_name::<E>(),
                decode: decode_as::<E>,
                handlers: Vec::new(),
            });
        if binding.rust_type != TypeId::of::<E>() {
            return Err(RegistryError::TypeTagConflict {
                tag: E::TYPE.to_string(),
                existing: binding.rust_type_name,
                new: std::any::type_name::<E>(),
            });
        }
        Ok(binding)
    }

    pub fn is_known(&self, event_type: &EventTypeId) -> bool {
        self.bindings.contains_key(event_type)
    }

    pub fn handler_count(&self, event_type: &EventTypeId) -> usize {
        self.bindings
            .get(event_type)
            .map_or(0, |binding| binding.handlers.len())
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .bindings
            .keys()
            .map(|t| t.as_str().to_string())
            .collect();
        types.sort();
        types
    }

    /// Resolve, decode once, then run every handler in order.
    ///
    /// The first failing handler aborts the rest of this attempt.
    /// Returns how many handlers ran.
    pub async fn dispatch(
        &self,
        event_type: &EventTypeId,
        payload: &str,
        cancel: &CancelToken,
    ) -> CourierResult<usize> {
        let binding = self
            .bindings
            .get(event_type)
            .ok_or_else(|| CourierError::UnknownEventType(event_type.clone()))?;

        let event = (binding.decode)(&self.codec, payload)?;

        for handler in &binding.handlers {
            debug!(
                event_type = %event_type,
                handler = handler.handler_name(),
                "Invoking event handler"
            );
            handler
                .handle_dyn(&*event, cancel)
                .await
                .map_err(|e| {
                    CourierError::HandlerFailed(format!("{}: {e}", handler.handler_name()))
                })?;
        }
        Ok(binding.handlers.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct PostCreated {
        post_id: u64,
    }

    impl Event for PostCreated {
        const TYPE: &'static str = "test.post.created.v1";
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Imposter {
        other: String,
    }

    impl Event for Imposter {
        const TYPE: &'static str = "test.post.created.v1";
    }

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler<PostCreated> for Recorder {
        async fn handle(&self, event: &PostCreated, _cancel: &CancelToken) -> CourierResult<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, event.post_id));
            if self.fail {
                return Err(CourierError::handler("nope"));
            }
            Ok(())
        }
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<String>>>, fail: bool) -> Recorder {
        Recorder {
            name,
            log: Arc::clone(log),
            fail,
        }
    }

    #[tokio::test]
    async fn fan_out_runs_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = EventHandlerRegistry::new();
        registry.register::<PostCreated, _>(recorder("a", &log, false)).unwrap();
        registry.register::<PostCreated, _>(recorder("b", &log, false)).unwrap();

        let ran = registry
            .dispatch(
                &EventTypeId::of::<PostCreated>(),
                r#"{"post_id":9}"#,
                &CancelToken::never(),
            )
            .await
            .unwrap();

        assert_eq!(ran, 2);
        assert_eq!(*log.lock().unwrap(), vec!["a:9", "b:9"]);
    }

    #[tokio::test]
    async fn first_failure_stops_remaining_handlers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = EventHandlerRegistry::new();
        registry.register::<PostCreated, _>(recorder("a", &log, true)).unwrap();
        registry.register::<PostCreated, _>(recorder("b", &log, false)).unwrap();

        let err = registry
            .dispatch(
                &EventTypeId::of::<PostCreated>(),
                r#"{"post_id":1}"#,
                &CancelToken::never(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CourierError::HandlerFailed(_)));
        assert_eq!(*log.lock().unwrap(), vec!["a:1"]);
    }

    #[tokio::test]
    async fn unknown_type_is_an_error() {
        let registry = EventHandlerRegistry::new();
        let err = registry
            .dispatch(&EventTypeId::new("nobody.v1"), "{}", &CancelToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::UnknownEventType(_)));
    }

    #[tokio::test]
    async fn declared_type_without_handlers_succeeds() {
        let mut registry = EventHandlerRegistry::new();
        registry.declare::<PostCreated>().unwrap();

        let ran = registry
            .dispatch(
                &EventTypeId::of::<PostCreated>(),
                r#"{"post_id":1}"#,
                &CancelToken::never(),
            )
            .await
            .unwrap();
        assert_eq!(ran, 0);
    }

    #[tokio::test]
    async fn bad_payload_fails_before_any_handler() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = EventHandlerRegistry::new();
        registry.register::<PostCreated, _>(recorder("a", &log, false)).unwrap();

        let err = registry
            .dispatch(
                &EventTypeId::of::<PostCreated>(),
                r#"{"post_id":"x"}"#,
                &CancelToken::never(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::Deserialization(_)));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn conflicting_type_tags_are_rejected() {
        let mut registry = EventHandlerRegistry::new();
        registry.declare::<PostCreated>().unwrap();
        let result = registry.declare::<Imposter>();
        assert!(matches!(result, Err(RegistryError::TypeTagConflict { .. })));
    }

    #[test]
    fn registered_types_are_sorted() {
        let mut registry = EventHandlerRegistry::new();
        registry.declare::<PostCreated>().unwrap();
        assert_eq!(registry.registered_types(), vec![PostCreated::TYPE.to_string()]);
        assert_eq!(registry.handler_count(&EventTypeId::of::<PostCreated>()), 0);
        assert!(registry.is_known(&EventTypeId::of::<PostCreated>()));
    }
}
