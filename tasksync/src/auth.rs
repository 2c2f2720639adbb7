//! Credential provider contract.

use tokio::sync::watch;

use crate::model::UserId;

/// What a credential watcher sees.
///
/// A `watch` channel only keeps the latest value, so a sign-out followed by
/// a sign-in can be observed as a single change. `sign_outs` counts every
/// sign-out so that watchers can tell a session ended in between.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub user: Option<UserId>,
    pub sign_outs: u64,
}

impl SessionState {
    pub fn signed_in(user: impl Into<UserId>) -> Self {
        Self {
            user: Some(user.into()),
            sign_outs: 0,
        }
    }
}

/// Source of the signed-in identity. The engine only needs the current user
/// and a way to observe transitions.
pub trait CredentialProvider: Send + Sync {
    fn current_user(&self) -> Option<UserId>;

    fn watch(&self) -> watch::Receiver<SessionState>;
}

/// In-process session backed by a `watch` channel.
///
/// Every [`sign_in`](Self::sign_in) is announced to watchers, including a
/// repeat of the current user.
#[derive(Debug, Clone)]
pub struct SessionCredentials {
    tx: watch::Sender<SessionState>,
}

impl SessionCredentials {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionState::default());
        Self { tx }
    }

    pub fn signed_in(user: impl Into<UserId>) -> Self {
        let (tx, _) = watch::channel(SessionState::signed_in(user));
        Self { tx }
    }

    pub fn sign_in(&self, user: impl Into<UserId>) {
        let user = user.into();
        log::debug!("Signed in as {user}");
        self.tx.send_modify(|state| state.user = Some(user));
    }

    pub fn sign_out(&self) {
        let signed_out = self.tx.send_if_modified(|state| {
            if state.user.take().is_none() {
                return false;
            }
            state.sign_outs += 1;
            true
        });
        if signed_out {
            log::debug!("Signed out");
        }
    }
}

impl Default for SessionCredentials {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialProvider for SessionCredentials {
    fn current_user(&self) -> Option<UserId> {
        self.tx.borrow().user.clone()
    }

    fn watch(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transitions_reach_watchers() {
        let session = SessionCredentials::new();
        let mut rx = session.watch();
        assert_eq!(*rx.borrow_and_update(), SessionState::default());

        session.sign_in("alice");
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().user, Some(UserId::from("alice")));
        assert_eq!(session.current_user(), Some(UserId::from("alice")));

        // Re-announcing the same user still wakes watchers.
        session.sign_in("alice");
        rx.changed().await.unwrap();

        session.sign_out();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), SessionState { user: None, sign_outs: 1 });

        // Signing out twice is a single transition.
        session.sign_out();
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_sign_out_survives_coalescing() {
        let session = SessionCredentials::signed_in("alice");
        let mut rx = session.watch();
        rx.borrow_and_update();

        session.sign_out();
        session.sign_in("alice");

        rx.changed().await.unwrap();
        let state = rx.borrow_and_update().clone();
        assert_eq!(state.user, Some(UserId::from("alice")));
        assert_eq!(state.sign_outs, 1);
    }
}
