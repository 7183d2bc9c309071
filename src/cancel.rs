//! Cooperative cancellation for blocking core operations.
//!
//! Adapters create a [`Source`] per in-flight request and pass its [`Token`]
//! into the core; every suspension point selects over [`Token::cancelled`].

use tokio::sync::watch;

/// Hands out [`Token`]s and flips them to cancelled.
pub struct Source {
    sender: watch::Sender<bool>,
}

impl Source {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Source { sender }
    }

    pub fn token(&self) -> Token {
        Token { receiver: Some(self.sender.subscribe()) }
    }

    /// Cancels every token handed out by this source, including tokens
    /// subscribed after the call.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

impl Default for Source {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancellation token observed by blocking core operations.
#[derive(Clone)]
pub struct Token {
    receiver: Option<watch::Receiver<bool>>,
}

impl Token {
    /// A token that never fires. Used for internal work and tests.
    pub fn none() -> Self {
        Token { receiver: None }
    }

    pub fn is_cancelled(&self) -> bool {
        match &self.receiver {
            Some(receiver) => *receiver.borrow(),
            None => false,
        }
    }

    /// Resolves when the owning [`Source`] cancels. Never resolves for
    /// [`Token::none`].
    pub async fn cancelled(&self) {
        match self.receiver.clone() {
            Some(mut receiver) => {
                if *receiver.borrow() {
                    return;
                }
                // The sender dropping without cancelling means the request
                // outlived its source; treat that as cancellation too.
                while receiver.changed().await.is_ok() {
                    if *receiver.borrow() {
                        return;
                    }
                }
            }
            None => std::future::pending().await,
        }
    }
}
