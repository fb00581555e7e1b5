//! Transport abstraction.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::EmailResult;
use crate::types::Message;

/// Something that can deliver a [`Message`].
#[async_trait]
pub trait Sender: Send + Sync {
    /// Delivers `message`, returning the transport's error unchanged on
    /// failure.
    async fn send(&self, message: &Message) -> EmailResult<()>;
}

#[async_trait]
impl<S: Sender + ?Sized> Sender for Arc<S> {
    async fn send(&self, message: &Message) -> EmailResult<()> {
        (**self).send(message).await
    }
}

#[async_trait]
impl<S: Sender + ?Sized> Sender for Box<S> {
    async fn send(&self, message: &Message) -> EmailResult<()> {
        (**self).send(message).await
    }
}

#[async_trait]
impl<'a, S: Sender + ?Sized> Sender for &'a S {
    async fn send(&self, message: &Message) -> EmailResult<()> {
        (**self).send(message).await
    }
}
