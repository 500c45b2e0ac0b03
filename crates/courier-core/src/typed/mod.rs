//! Typed - 型付き Event / Command / Query API
//!
//! このモジュールは型タグの typo を型で排除し、
//! Handler との対応付けを静的に保証します。
//!
//! # 二層構造
//! - **表層（Typed）**: `Event` / `Command` / `Query` trait, `EventHandler<E>` など - 型安全
//! - **内部（Dyn）**: `DynEventHandler` trait - object-safe, type erasure

pub mod codec;
pub mod handler;
pub mod message;
pub mod registry;
pub mod requests;

pub use self::codec::PayloadCodec;
pub use self::handler::{
    CommandHandler, DynEventHandler, EventHandler, QueryHandler, TypedEventHandler, Validator,
};
pub use self::message::{Command, Event, Query};
pub use self::registry::{EventHandlerRegistry, RegistryError};
pub use self::requests::RequestRegistry;
