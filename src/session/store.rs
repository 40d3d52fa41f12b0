use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::session::flow::{WizardSession, WizardStep};

/// One wizard per user per chat, so members of a group never share a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub chat_id: i64,
    pub user_id: i64,
}

impl SessionKey {
    pub fn new(chat_id: i64, user_id: i64) -> Self {
        Self { chat_id, user_id }
    }
}

/// Wizard sessions plus the runs that currently wait on the image provider.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<SessionKey, WizardSession>>>,
    in_flight: Arc<Mutex<HashSet<SessionKey>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` against the session. Sessions left idle are dropped from the map.
    pub fn with_session<R>(&self, key: SessionKey, f: impl FnOnce(&mut WizardSession) -> R) -> R {
        let mut sessions = self.sessions.lock();
        let session = sessions.entry(key).or_default();
        let result = f(session);
        if session.is_idle() {
            sessions.remove(&key);
        }
        result
    }

    pub fn step(&self, key: SessionKey) -> WizardStep {
        self.sessions
            .lock()
            .get(&key)
            .map(WizardSession::step)
            .unwrap_or_default()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_dispatching(&self, key: SessionKey) -> bool {
        self.in_flight.lock().contains(&key)
    }

    pub fn dispatching_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Marks the run as waiting on a generation. Returns `None` if one is already running.
    pub fn begin_dispatch(&self, key: SessionKey) -> Option<DispatchGuard> {
        if !self.in_flight.lock().insert(key) {
            return None;
        }
        Some(DispatchGuard {
            key,
            in_flight: Arc::clone(&self.in_flight),
        })
    }
}

pub struct DispatchGuard {
    key: SessionKey,
    in_flight: Arc<Mutex<HashSet<SessionKey>>>,
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::Style;

    fn key(chat_id: i64) -> SessionKey {
        SessionKey::new(chat_id, 1)
    }

    #[test]
    fn sessions_are_isolated_per_chat() {
        let store = SessionStore::new();
        store.with_session(key(1), |session| session.start());
        store.with_session(key(2), |session| {
            session.start();
            session.skip_photo().unwrap();
        });

        assert_eq!(store.step(key(1)), WizardStep::AwaitingPhoto);
        assert_eq!(store.step(key(2)), WizardStep::AwaitingPrompt);
        assert_eq!(store.step(key(3)), WizardStep::Idle);
        assert_eq!(store.active_sessions(), 2);
    }

    #[test]
    fn group_members_do_not_share_a_session() {
        let store = SessionStore::new();
        let alice = SessionKey::new(-500, 1);
        let bob = SessionKey::new(-500, 2);
        store.with_session(alice, |session| {
            session.start();
            session.skip_photo().unwrap();
            session.submit_prompt("Alice prompt").unwrap();
        });

        let stolen = store.with_session(bob, |session| session.submit_style(Style::Anime));
        assert!(stolen.is_err());
        assert_eq!(store.step(alice), WizardStep::AwaitingStyle);
        assert_eq!(store.step(bob), WizardStep::Idle);
    }

    #[test]
    fn finished_sessions_are_evicted() {
        let store = SessionStore::new();
        store.with_session(key(5), |session| {
            session.start();
            session.skip_photo().unwrap();
            session.submit_prompt("закат над морем").unwrap();
        });

        let ready = store
            .with_session(key(5), |session| session.submit_style(Style::Art))
            .unwrap();
        assert_eq!(ready.prompt, "закат над морем");
        assert_eq!(store.step(key(5)), WizardStep::Idle);
        assert_eq!(store.active_sessions(), 0);
    }

    #[test]
    fn rejected_input_keeps_the_session() {
        let store = SessionStore::new();
        store.with_session(key(9), |session| session.start());
        let result = store.with_session(key(9), |session| session.submit_prompt("текст"));
        assert!(result.is_err());
        assert_eq!(store.step(key(9)), WizardStep::AwaitingPhoto);
    }

    #[test]
    fn only_one_dispatch_per_run() {
        let store = SessionStore::new();
        let guard = store.begin_dispatch(key(4)).unwrap();
        assert!(store.is_dispatching(key(4)));
        assert!(store.begin_dispatch(key(4)).is_none());
        assert!(store.begin_dispatch(key(6)).is_some());

        drop(guard);
        assert!(!store.is_dispatching(key(4)));
        assert!(store.begin_dispatch(key(4)).is_some());
    }
}
