//! External collaborators of the sagas and their in-memory implementations.

pub mod cache;
pub mod notification;

pub use cache::{InMemoryTopupCache, TopupCache};
pub use notification::{
    InMemoryPublisher, LoggingPublisher, NotificationPublisher, PublishError, PublishedMessage,
};
