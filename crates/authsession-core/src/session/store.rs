use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use super::data::{LoginRequest, RefreshRequest, Session, SessionPayload, UserData};
use super::listeners::{ListenerId, ListenerRegistry};
use crate::config::{AuthConfig, Endpoint, SessionOptions};
use crate::error::AuthError;
use crate::http::{HttpRequest, Transport};
use crate::storage::TokenStorage;

/// A refresh in flight. Every concurrent caller awaits a clone of it.
type PendingRefresh = Shared<BoxFuture<'static, bool>>;

#[derive(Debug, Default)]
struct SessionState {
    user_data: Option<UserData>,
    refresh_token: Option<String>,
    access_token: Option<String>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    storage: Arc<dyn TokenStorage>,
    options: RwLock<SessionOptions>,
    state: RwLock<SessionState>,
    // Held for the whole of a transition, listener dispatch included
    transition: Mutex<()>,
    listeners: ListenerRegistry,
    pending_refresh: Mutex<Option<PendingRefresh>>,
    in_use: AtomicBool,
}

/// Owner of the session: the user data, the refresh token (persisted in
/// `TokenStorage`) and the listeners told about every change.
///
/// Cloning yields another handle to the same session.
///
/// Listeners run synchronously inside a transition and must not call
/// `start_session`, `end_session` or `configure`. The session-abort
/// callback runs once the transition is over and has no such restriction.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionStore {
    /// Create a store. The refresh token starts as whatever `storage` holds
    /// under the configured key; user data starts absent.
    pub fn new(
        options: impl Into<SessionOptions>,
        transport: Arc<dyn Transport>,
        storage: Arc<dyn TokenStorage>,
    ) -> Self {
        let mut options = options.into();
        options.config = options.config.normalized();

        let refresh_token = load_token(storage.as_ref(), &options.config.refresh_token_key);
        debug!(
            key = %options.config.refresh_token_key,
            restored = refresh_token.is_some(),
            "Session store created"
        );

        Self {
            inner: Arc::new(Inner {
                transport,
                storage,
                options: RwLock::new(options),
                state: RwLock::new(SessionState {
                    refresh_token,
                    ..SessionState::default()
                }),
                transition: Mutex::new(()),
                listeners: ListenerRegistry::default(),
                pending_refresh: Mutex::new(None),
                in_use: AtomicBool::new(false),
            }),
        }
    }

    /// Replace the configuration. Free until the store is first used;
    /// afterwards only a repeat of the current configuration is accepted.
    /// A new storage key re-reads the persisted refresh token under it.
    pub fn configure(&self, options: impl Into<SessionOptions>) -> Result<(), AuthError> {
        let mut options = options.into();
        options.config = options.config.normalized();

        let _transition = lock(&self.inner.transition);
        let mut current = write(&self.inner.options);

        if self.inner.in_use.load(Ordering::Acquire) {
            if current.config == options.config {
                return Ok(());
            }
            warn!("Rejected configuration change on a session store already in use");
            return Err(AuthError::ConfigLocked);
        }

        let key_changed = current.config.refresh_token_key != options.config.refresh_token_key;
        *current = options;

        if key_changed {
            let key = current.config.refresh_token_key.clone();
            drop(current);
            let refresh_token = load_token(self.inner.storage.as_ref(), &key);
            debug!(key = %key, restored = refresh_token.is_some(), "Storage key changed");
            *write(&self.inner.state) = SessionState {
                refresh_token,
                ..SessionState::default()
            };
        }
        Ok(())
    }

    pub fn config(&self) -> AuthConfig {
        read(&self.inner.options).config.clone()
    }

    pub(crate) fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.inner.transport)
    }

    pub(crate) fn mark_in_use(&self) {
        self.inner.in_use.store(true, Ordering::Release);
    }

    fn storage_key(&self) -> String {
        read(&self.inner.options).config.refresh_token_key.clone()
    }

    pub(crate) fn endpoint(&self, endpoint: Endpoint) -> String {
        read(&self.inner.options).config.endpoint_url(endpoint)
    }

    /// Last known user data. Never touches the network.
    pub fn user_data(&self) -> Option<UserData> {
        read(&self.inner.state).user_data.clone()
    }

    pub fn is_active(&self) -> bool {
        read(&self.inner.state).user_data.is_some()
    }

    pub fn has_refresh_token(&self) -> bool {
        read(&self.inner.state).refresh_token.is_some()
    }

    /// Attach the bearer access token, when the backend issued one.
    pub(crate) fn authorize(&self, request: &mut HttpRequest) -> Result<(), AuthError> {
        let access_token = read(&self.inner.state).access_token.clone();
        if let Some(token) = access_token {
            request.bearer(&token)?;
        }
        Ok(())
    }

    // ===== Transitions =====

    /// Install a new session, persist its refresh token and notify listeners.
    pub fn start_session(&self, user_data: UserData, refresh_token: impl Into<String>) {
        self.begin(Session {
            user_data,
            refresh_token: refresh_token.into(),
            access_token: None,
        });
    }

    fn begin(&self, session: Session) {
        let _transition = lock(&self.inner.transition);
        self.install(session);
    }

    /// Clear the session, drop the persisted refresh token and notify
    /// listeners. The abort callback follows if a session was torn down.
    pub fn end_session(&self) {
        let transition = lock(&self.inner.transition);
        let had_session = self.clear();
        drop(transition);
        if had_session {
            self.notify_abort();
        }
    }

    // Caller holds the transition lock.
    fn install(&self, session: Session) {
        let key = self.storage_key();
        let Session {
            user_data,
            refresh_token,
            access_token,
        } = session;

        {
            let mut state = write(&self.inner.state);
            state.user_data = Some(user_data.clone());
            state.refresh_token = Some(refresh_token.clone());
            state.access_token = access_token;
        }
        if let Err(e) = self.inner.storage.set(&key, &refresh_token) {
            warn!(error = %e, key = %key, "Failed to persist refresh token");
        }

        info!(listeners = self.inner.listeners.len(), "Session started");
        self.inner.listeners.dispatch(Some(&user_data));
    }

    // Caller holds the transition lock. Returns whether a session was torn down.
    fn clear(&self) -> bool {
        let key = self.storage_key();

        let had_session = {
            let mut state = write(&self.inner.state);
            let had_session = state.refresh_token.is_some();
            *state = SessionState::default();
            had_session
        };
        if let Err(e) = self.inner.storage.remove(&key) {
            warn!(error = %e, key = %key, "Failed to remove persisted refresh token");
        }

        if had_session {
            info!(listeners = self.inner.listeners.len(), "Session ended");
        }
        self.inner.listeners.dispatch(None);
        had_session
    }

    fn notify_abort(&self) {
        let on_abort = read(&self.inner.options).on_session_abort.clone();
        if let Some(on_abort) = on_abort {
            on_abort();
        }
    }

    // ===== Backend operations =====

    async fn exchange(&self, request: HttpRequest) -> Result<Session, AuthError> {
        let response = self.inner.transport.send(request).await?;
        if !response.is_success() {
            return Err(AuthError::from_status(response.status(), &response.text()));
        }
        let payload: SessionPayload = response.json()?;
        payload.into_session().ok_or_else(|| {
            AuthError::InvalidResponse("Session payload lacks user data or refresh token".into())
        })
    }

    /// Log in with a username and password. Returns `true` without a
    /// network call when a session is already active. A rejected or
    /// malformed response leaves the state untouched.
    pub async fn login(&self, username: &str, password: &str) -> bool {
        self.mark_in_use();
        if self.is_active() {
            debug!("Session already active, skipping login");
            return true;
        }

        let request = match HttpRequest::post(self.endpoint(Endpoint::Login))
            .json(&LoginRequest { username, password })
        {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Failed to build login request");
                return false;
            }
        };

        match self.exchange(request).await {
            Ok(session) => {
                self.begin(session);
                true
            }
            Err(e) => {
                warn!(error = %e, "Login failed");
                false
            }
        }
    }

    /// Redeem the held refresh token for a new session.
    ///
    /// Concurrent callers share one backend request. Any failure ends the
    /// session. Returns `false` straight away when no refresh token is held.
    /// If the session changes while the request is out, the outcome is
    /// dropped and the result reflects the session as it now stands.
    pub async fn refresh(&self) -> bool {
        self.mark_in_use();
        let pending = {
            let mut slot = lock(&self.inner.pending_refresh);
            match slot.clone() {
                Some(pending) => {
                    debug!("Joining refresh already in flight");
                    pending
                }
                None => {
                    let Some(refresh_token) = read(&self.inner.state).refresh_token.clone() else {
                        debug!("No refresh token held, nothing to refresh");
                        return false;
                    };
                    let pending = self.clone().redeem(refresh_token).boxed().shared();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    async fn redeem(self, refresh_token: String) -> bool {
        let request = HttpRequest::post(self.endpoint(Endpoint::Refresh))
            .json(&RefreshRequest {
                refresh_token: &refresh_token,
            });
        let outcome = match request {
            Ok(request) => self.exchange(request).await,
            Err(e) => Err(e),
        };

        // Settle the shared slot before the transition so that listeners
        // already see a store with no refresh in flight.
        lock(&self.inner.pending_refresh).take();

        // The outcome only applies to the session it was redeemed for.
        // Whatever replaced or ended that session in the meantime wins.
        let transition = lock(&self.inner.transition);
        let current = read(&self.inner.state).refresh_token.clone();
        if current.as_deref() != Some(refresh_token.as_str()) {
            drop(transition);
            debug!(
                succeeded = outcome.is_ok(),
                "Session changed during refresh, discarding outcome"
            );
            return self.is_active();
        }

        match outcome {
            Ok(session) => {
                debug!("Session refreshed");
                self.install(session);
                true
            }
            Err(e) => {
                warn!(error = %e, "Session refresh failed");
                let had_session = self.clear();
                drop(transition);
                if had_session {
                    self.notify_abort();
                }
                false
            }
        }
    }

    /// End the session. The backend is told on a best-effort basis; the
    /// local session is cleared whatever happens to that call, including
    /// cancellation of this future.
    pub async fn logoff(&self) {
        self.mark_in_use();
        if !self.has_refresh_token() {
            debug!("No session to log off");
            return;
        }
        let _cleanup = EndSessionOnDrop(self);

        let mut request = HttpRequest::get(self.endpoint(Endpoint::Logoff));
        if let Err(e) = self.authorize(&mut request) {
            warn!(error = %e, "Sending logoff without bearer token");
        }
        let timeout = read(&self.inner.options).config.logoff_timeout();

        match tokio::time::timeout(timeout, self.inner.transport.send(request)).await {
            Ok(Ok(response)) if response.is_success() => debug!("Backend acknowledged logoff"),
            Ok(Ok(response)) => {
                warn!(status = response.status().as_u16(), "Backend rejected logoff")
            }
            Ok(Err(e)) => warn!(error = %e, "Logoff notification failed"),
            Err(_) => warn!(timeout_secs = timeout.as_secs(), "Logoff notification timed out"),
        }
    }

    /// Current user data, refreshed first when asked to, when the held
    /// data carries an elapsed `exp` hint, or when only a persisted refresh
    /// token is known (a session restored from storage).
    pub async fn get_user_data(&self, force_refresh: bool) -> Option<UserData> {
        self.mark_in_use();
        let needs_refresh = {
            let state = read(&self.inner.state);
            match &state.user_data {
                Some(user_data) => user_data.is_expired(),
                None => state.refresh_token.is_some(),
            }
        };
        if force_refresh || needs_refresh {
            self.refresh().await;
        }
        self.user_data()
    }

    // ===== Listeners =====

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(Option<&UserData>) + Send + Sync + 'static,
    {
        self.inner.listeners.add(Arc::new(listener))
    }

    /// Returns `false` if the listener was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }
}

struct EndSessionOnDrop<'a>(&'a SessionStore);

impl Drop for EndSessionOnDrop<'_> {
    fn drop(&mut self) {
        self.0.end_session();
    }
}

fn load_token(storage: &dyn TokenStorage, key: &str) -> Option<String> {
    match storage.get(key) {
        Ok(token) => token.filter(|t| !t.is_empty()),
        Err(e) => {
            warn!(error = %e, key = %key, "Failed to read persisted refresh token");
            None
        }
    }
}
