use std::fmt;

use crate::{Action, Environment, EnvironmentError, StateSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::IsVariant)]
pub enum SessionState {
    Spawned,
    Connected,
    Terminated,
}

/// Something a session must release when it ends, typically a child process.
pub trait SessionResource: fmt::Debug + Send {
    /// Releases the resource. Called exactly once per resource.
    fn terminate(&mut self);
}

/// Owned handle to one simulation session.
///
/// Resources are released on [`Session::terminate`] or, at the latest, when the
/// handle is dropped, so a session cannot outlive the rollout that owns it.
#[derive(Debug)]
pub struct Session<C> {
    slot: usize,
    player_name: String,
    resources: Vec<Box<dyn SessionResource>>,
    connection: Option<C>,
    state: SessionState,
}

impl<C> Session<C> {
    #[must_use]
    pub fn new(slot: usize, player_name: impl Into<String>) -> Self {
        Self {
            slot,
            player_name: player_name.into(),
            resources: vec![],
            connection: None,
            state: SessionState::Spawned,
        }
    }

    /// Registers a resource to be released when the session terminates.
    ///
    /// A resource added after termination is released immediately.
    pub fn push_resource<R>(&mut self, resource: R)
    where
        R: SessionResource + 'static,
    {
        let mut resource = Box::new(resource);
        if self.state.is_terminated() {
            resource.terminate();
            return;
        }
        self.resources.push(resource);
    }

    /// Attaches the established connection and marks the session connected.
    pub fn attach(&mut self, connection: C) -> Result<(), EnvironmentError> {
        if self.state.is_terminated() {
            return Err(EnvironmentError::Terminated);
        }
        self.connection = Some(connection);
        self.state = SessionState::Connected;
        Ok(())
    }

    #[must_use]
    pub fn slot(&self) -> usize {
        self.slot
    }

    #[must_use]
    pub fn player_name(&self) -> &str {
        &self.player_name
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn connection_mut(&mut self) -> Result<&mut C, EnvironmentError> {
        match self.state {
            SessionState::Terminated => Err(EnvironmentError::Terminated),
            SessionState::Spawned => Err(EnvironmentError::NotConnected),
            SessionState::Connected => self
                .connection
                .as_mut()
                .ok_or(EnvironmentError::NotConnected),
        }
    }

    /// Closes the connection and releases every resource, newest first.
    ///
    /// Idempotent.
    pub fn terminate(&mut self) {
        if self.state.is_terminated() {
            return;
        }
        self.connection = None;
        while let Some(mut resource) = self.resources.pop() {
            resource.terminate();
        }
        self.state = SessionState::Terminated;
        tracing::debug!(slot = self.slot, player = %self.player_name, "session terminated");
    }
}

impl<C> Drop for Session<C> {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl<C> Environment for Session<C>
where
    C: Environment,
{
    fn get_state(&mut self) -> Result<StateSnapshot, EnvironmentError> {
        self.connection_mut()?.get_state()
    }

    fn send_action(&mut self, action: Action) -> Result<(), EnvironmentError> {
        self.connection_mut()?.send_action(action)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[derive(Debug)]
    struct CountingResource(Arc<AtomicUsize>);

    impl SessionResource for CountingResource {
        fn terminate(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Debug)]
    struct NullConnection;

    impl Environment for NullConnection {
        fn get_state(&mut self) -> Result<StateSnapshot, EnvironmentError> {
            Ok(StateSnapshot::default())
        }

        fn send_action(&mut self, _action: Action) -> Result<(), EnvironmentError> {
            Ok(())
        }
    }

    #[test]
    fn test_drop_terminates_every_resource_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let mut session = Session::<NullConnection>::new(0, "bot-0");
            session.push_resource(CountingResource(Arc::clone(&counter)));
            session.push_resource(CountingResource(Arc::clone(&counter)));
            session.terminate();
            session.terminate();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unconnected_session_rejects_calls() {
        let mut session = Session::<NullConnection>::new(1, "bot-1");
        assert!(session.state().is_spawned());
        assert!(matches!(
            session.get_state(),
            Err(EnvironmentError::NotConnected)
        ));
    }

    #[test]
    fn test_connected_session_delegates_until_terminated() {
        let mut session = Session::new(2, "bot-2");
        session.attach(NullConnection).unwrap();
        assert!(session.state().is_connected());
        assert!(session.get_state().is_ok());
        assert!(session.send_action(Action::IDLE).is_ok());

        session.terminate();
        assert!(matches!(
            session.get_state(),
            Err(EnvironmentError::Terminated)
        ));
        assert!(session.attach(NullConnection).is_err());
    }

    #[test]
    fn test_resource_pushed_after_termination_is_released() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut session = Session::<NullConnection>::new(0, "bot-0");
        session.terminate();
        session.push_resource(CountingResource(Arc::clone(&counter)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
