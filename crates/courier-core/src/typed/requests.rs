//! RequestRegistry - Command / Query の handler と Validator の登録
//!
//! Command と Query は型ごとに handler がちょうど 1 つ。
//! `TypeId` をキーにして `Arc<dyn CommandHandler<C>>` を `dyn Any` として保持し、
//! 取り出すときに具体型へ downcast します。

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use super::handler::{CommandHandler, QueryHandler, Validator};
use super::message::{Command, Query};
use super::registry::RegistryError;
use crate::domain::ValidationFailure;

type Erased = Box<dyn Any + Send + Sync>;

#[derive(Default)]
pub struct RequestRegistry {
    commands: HashMap<TypeId, Erased>,
    queries: HashMap<TypeId, Erased>,
    validators: HashMap<TypeId, Erased>,
    command_names: Vec<&'static str>,
    query_names: Vec<&'static str>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_command<C: Command, H: CommandHandler<C> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        let key = TypeId::of::<C>();
        if self.commands.contains_key(&key) {
            return Err(RegistryError::AlreadyRegistered(C::NAME.to_string()));
        }
        let handler: Arc<dyn CommandHandler<C>> = Arc::new(handler);
        self.commands.insert(key, Box::new(handler));
        self.command_names.push(C::NAME);
        Ok(())
    }

    pub fn register_query<Q: Query, H: QueryHandler<Q> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        let key = TypeId::of::<Q>();
        if self.queries.contains_key(&key) {
            return Err(RegistryError::AlreadyRegistered(Q::NAME.to_string()));
        }
        let handler: Arc<dyn QueryHandler<Q>> = Arc::new(handler);
        self.queries.insert(key, Box::new(handler));
        self.query_names.push(Q::NAME);
        Ok(())
    }

    /// Validators run in registration order; all of them run every time.
    pub fn register_validator<C: Command, V: Validator<C> + 'static>(&mut self, validator: V) {
        let validator: Arc<dyn Validator<C>> = Arc::new(validator);
        let entry = self
            .validators
            .entry(TypeId::of::<C>())
            .or_insert_with(|| -> Erased { Box::new(Vec::<Arc<dyn Validator<C>>>::new()) });
        if let Some(list) = entry.downcast_mut::<Vec<Arc<dyn Validator<C>>>>() {
            list.push(validator);
        }
    }

    pub fn command_handler<C: Command>(&self) -> Option<Arc<dyn CommandHandler<C>>> {
        self.commands
            .get(&TypeId::of::<C>())
            .and_then(|h| h.downcast_ref::<Arc<dyn CommandHandler<C>>>())
            .cloned()
    }

    pub fn query_handler<Q: Query>(&self) -> Option<Arc<dyn QueryHandler<Q>>> {
        self.queries
            .get(&TypeId::of::<Q>())
            .and_then(|h| h.downcast_ref::<Arc<dyn QueryHandler<Q>>>())
            .cloned()
    }

    pub fn validators<C: Command>(&self) -> &[Arc<dyn Validator<C>>] {
        self.validators
            .get(&TypeId::of::<C>())
            .and_then(|v| v.downcast_ref::<Vec<Arc<dyn Validator<C>>>>())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Run every validator for `C` and aggregate the violations.
    pub async fn validate<C: Command>(&self, command: &C) -> ValidationFailure {
        let mut violations = Vec::new();
        for validator in self.validators::<C>() {
            violations.extend(validator.validate(command).await);
        }
        ValidationFailure::new(violations)
    }

    pub fn command_names(&self) -> &[&'static str] {
        &self.command_names
    }

    pub fn query_names(&self) -> &[&'static str] {
        &self.query_names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::domain::{CourierResult, Violation};
    use async_trait::async_trait;

    struct CreatePost {
        title: String,
    }

    impl Command for CreatePost {
        const NAME: &'static str = "CreatePost";
        type Output = u64;
    }

    struct CountPosts;

    impl Query for CountPosts {
        const NAME: &'static str = "CountPosts";
        type Output = usize;
    }

    struct CreatePostHandler;

    #[async_trait]
    impl CommandHandler<CreatePost> for CreatePostHandler {
        async fn handle(&self, _command: CreatePost, _cancel: &CancelToken) -> CourierResult<u64> {
            Ok(42)
        }
    }

    struct CountPostsHandler;

    #[async_trait]
    impl QueryHandler<CountPosts> for CountPostsHandler {
        async fn handle(&self, _query: CountPosts, _cancel: &CancelToken) -> CourierResult<usize> {
            Ok(3)
        }
    }

    struct NonEmptyTitle;

    #[async_trait]
    impl Validator<CreatePost> for NonEmptyTitle {
        async fn validate(&self, command: &CreatePost) -> Vec<Violation> {
            if command.title.is_empty() {
                vec![Violation::new("title", "must not be empty")]
            } else {
                vec![]
            }
        }
    }

    struct ShortTitle;

    #[async_trait]
    impl Validator<CreatePost> for ShortTitle {
        async fn validate(&self, command: &CreatePost) -> Vec<Violation> {
            if command.title.len() > 5 {
                vec![Violation::new("title", "too long")]
            } else {
                vec![]
            }
        }
    }

    #[tokio::test]
    async fn resolves_registered_handlers() {
        let mut registry = RequestRegistry::new();
        registry.register_command::<CreatePost, _>(CreatePostHandler).unwrap();
        registry.register_query::<CountPosts, _>(CountPostsHandler).unwrap();

        let command = registry.command_handler::<CreatePost>().unwrap();
        let out = command
            .handle(CreatePost { title: "x".into() }, &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(out, 42);

        let query = registry.query_handler::<CountPosts>().unwrap();
        assert_eq!(query.handle(CountPosts, &CancelToken::never()).await.unwrap(), 3);
        assert_eq!(registry.command_names(), &["CreatePost"]);
        assert_eq!(registry.query_names(), &["CountPosts"]);
    }

    #[test]
    fn duplicate_command_handler_is_rejected() {
        let mut registry = RequestRegistry::new();
        registry.register_command::<CreatePost, _>(CreatePostHandler).unwrap();
        let result = registry.register_command::<CreatePost, _>(CreatePostHandler);
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(name)) if name == "CreatePost"));
    }

    #[test]
    fn missing_handler_resolves_to_none() {
        let registry = RequestRegistry::new();
        assert!(registry.command_handler::<CreatePost>().is_none());
        assert!(registry.query_handler::<CountPosts>().is_none());
    }

    #[tokio::test]
    async fn validators_aggregate_violations() {
        let mut registry = RequestRegistry::new();
        registry.register_validator::<CreatePost, _>(NonEmptyTitle);
        registry.register_validator::<CreatePost, _>(ShortTitle);

        let ok = registry.validate(&CreatePost { title: "hey".into() }).await;
        assert!(ok.is_empty());

        let failure = registry
            .validate(&CreatePost {
                title: "much too long".into(),
            })
            .await;
        assert_eq!(failure.violations, vec![Violation::new("title", "too long")]);
    }

    #[tokio::test]
    async fn no_validators_means_no_violations() {
        let registry = RequestRegistry::new();
        assert!(registry.validate(&CreatePost { title: String::new() }).await.is_empty());
    }
}
