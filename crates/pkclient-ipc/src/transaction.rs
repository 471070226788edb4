//! Transaction handle
//!
//! A [`Transaction`] is the caller's side of one operation on the package
//! service. Handles are cheap to clone; all clones share one session.
//!
//! ## Protocols
//!
//! - **Queued**: a factory on [`Daemon`](crate::Daemon) returns a handle
//!   with its request already set. [`Transaction::events`] starts the
//!   session, which obtains a transaction id, binds and dispatches.
//! - **Immediate**: [`Daemon::new_transaction`](crate::Daemon::new_transaction)
//!   returns a handle bound to a fresh transaction id. The caller starts
//!   the event stream and then issues the role through the
//!   [`RoleRequests`] methods of the handle itself.
//!
//! ## Design Notes
//!
//! - Result signals are opt-in through [`Transaction::connect`]. Kinds
//!   connected after the session bound are subscribed on the fly.
//! - Failures after submission are reported on the event stream, never
//!   returned from these methods: an error event, then a failed `Finished`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;

use pkclient_core::domain::{
    ClientError, EventKind, InternalError, Role, Status, TransactionEvent, TransactionFlags,
    TransactionRecord, WireValue,
};
use pkclient_core::ports::MethodCall;

use crate::properties::TransactionProperties;
use crate::request::{RoleRequests, TransactionRequest};
use crate::session::{self, Command, SessionContext, SessionPhase, SessionShared, SessionState};
use crate::{PK_NAME, PK_TRANSACTION_INTERFACE};

/// One operation on the package service
#[derive(Clone)]
pub struct Transaction {
    shared: Arc<SessionShared>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("Transaction")
            .field("tid", &state.tid)
            .field("phase", &state.phase)
            .field("request", &state.request.as_ref().map(TransactionRequest::role))
            .finish()
    }
}

impl Transaction {
    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// A handle whose request is dispatched once a transaction id is known
    pub(crate) fn queued(ctx: SessionContext, request: TransactionRequest) -> Self {
        let state = SessionState {
            request: Some(request),
            ..SessionState::default()
        };
        Self::with_state(ctx, state, None)
    }

    /// A handle for an existing transaction object
    pub(crate) fn attached(ctx: SessionContext, tid: String) -> Self {
        let state = SessionState {
            tid: Some(tid),
            ..SessionState::default()
        };
        Self::with_state(ctx, state, None)
    }

    /// A handle carrying a past transaction from the service's history
    pub(crate) fn historical(ctx: SessionContext, record: TransactionRecord) -> Self {
        let state = SessionState {
            tid: Some(record.tid.clone()),
            ..SessionState::default()
        };
        Self::with_state(ctx, state, Some(record))
    }

    fn with_state(
        ctx: SessionContext,
        state: SessionState,
        record: Option<TransactionRecord>,
    ) -> Self {
        Self {
            shared: Arc::new(SessionShared::new(ctx, state, record)),
        }
    }

    // ------------------------------------------------------------------
    // Session control
    // ------------------------------------------------------------------

    /// Opts in to one kind of result event
    ///
    /// Errors and completion are always delivered and need no opt-in.
    /// Connecting a kind twice has no further effect.
    pub fn connect(&self, kind: EventKind) -> &Self {
        let mut state = self.shared.lock();
        if state.kinds.insert(kind) {
            if let Some(commands) = &state.commands {
                let _ = commands.send(Command::Subscribe(kind));
            }
        }
        self
    }

    /// Opts in to several kinds at once
    pub fn connect_all(&self, kinds: impl IntoIterator<Item = EventKind>) -> &Self {
        for kind in kinds {
            self.connect(kind);
        }
        self
    }

    /// Starts the session and returns its event stream
    ///
    /// The stream ends after the `Finished` event. Must be called from
    /// within a Tokio runtime.
    ///
    /// # Errors
    /// [`ClientError::AlreadySubmitted`] if the stream was already taken.
    pub fn events(&self) -> Result<mpsc::UnboundedReceiver<TransactionEvent>, ClientError> {
        let commands = {
            let mut state = self.shared.lock();
            if state.submitted {
                return Err(ClientError::AlreadySubmitted);
            }
            state.submitted = true;

            let (tx, rx) = mpsc::unbounded_channel();
            state.commands = Some(tx);
            rx
        };

        debug!(tid = ?self.tid(), role = %self.role(), "Submitting transaction");
        Ok(session::spawn(Arc::clone(&self.shared), commands))
    }

    /// Asks the service to cancel the running transaction
    ///
    /// Cancellation is confirmed by the `Finished` event on the stream.
    ///
    /// # Errors
    /// [`ClientError::NoTransaction`] if the handle is not bound to a live
    /// transaction object.
    pub async fn cancel(&self) -> Result<(), ClientError> {
        let tid = self.live_tid()?;
        let call = MethodCall::new(PK_NAME, tid, PK_TRANSACTION_INTERFACE, "Cancel");
        self.shared.ctx.channel.call(call).await?;
        Ok(())
    }

    /// Replaces the hints of this transaction
    ///
    /// Before the session binds, the hints are stored and sent after the
    /// global ones. Once bound, they are sent right away.
    pub async fn set_hints<I, S>(&self, hints: I) -> Result<(), ClientError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let hints: Vec<String> = hints.into_iter().map(Into::into).collect();

        let tid = {
            let mut state = self.shared.lock();
            state.hints = hints.clone();
            match (&state.tid, state.phase.is_bound()) {
                (Some(tid), true) => tid.clone(),
                _ => return Ok(()),
            }
        };

        let call = MethodCall::new(PK_NAME, tid, PK_TRANSACTION_INTERFACE, "SetHints")
            .arg(WireValue::str_list(hints));
        self.shared.ctx.channel.call(call).await?;
        Ok(())
    }

    fn live_tid(&self) -> Result<String, ClientError> {
        let state = self.shared.lock();
        match &state.tid {
            Some(tid) if state.phase.is_bound() => Ok(tid.clone()),
            _ => Err(ClientError::NoTransaction),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Object path of the transaction, once known
    pub fn tid(&self) -> Option<String> {
        self.shared.lock().tid.clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.shared.lock().phase
    }

    /// The request issued on this handle, if any
    pub fn request(&self) -> Option<TransactionRequest> {
        self.shared.lock().request.clone()
    }

    /// Session-specific hints
    pub fn hints(&self) -> Vec<String> {
        self.shared.lock().hints.clone()
    }

    /// Classification of the local failure that ended the session
    pub fn internal_error(&self) -> InternalError {
        self.shared.lock().internal_error
    }

    /// Message of the local failure that ended the session
    pub fn internal_error_message(&self) -> Option<String> {
        self.shared.lock().error_message.clone()
    }

    /// Snapshot of all transaction properties
    pub fn properties(&self) -> TransactionProperties {
        self.shared.properties()
    }

    /// The role, from the request, the service or the history record
    pub fn role(&self) -> Role {
        if let Some(request) = &self.shared.lock().request {
            return request.role();
        }
        let role = self.shared.properties().role;
        match (&self.shared.record, role) {
            (Some(record), Role::Unknown) => record.role,
            _ => role,
        }
    }

    pub fn status(&self) -> Status {
        self.shared.properties().status
    }

    /// 0-100, or 101 when unknown
    pub fn percentage(&self) -> u32 {
        self.shared.properties().percentage
    }

    pub fn allow_cancel(&self) -> bool {
        self.shared.properties().allow_cancel
    }

    /// Whether the process that started the transaction is still running
    pub fn caller_active(&self) -> bool {
        self.shared.properties().caller_active
    }

    pub fn last_package(&self) -> String {
        self.shared.properties().last_package
    }

    pub fn elapsed_time(&self) -> u32 {
        self.shared.properties().elapsed_time
    }

    pub fn remaining_time(&self) -> u32 {
        self.shared.properties().remaining_time
    }

    pub fn speed(&self) -> u32 {
        self.shared.properties().speed
    }

    pub fn download_size_remaining(&self) -> u64 {
        self.shared.properties().download_size_remaining
    }

    pub fn transaction_flags(&self) -> TransactionFlags {
        self.shared.properties().transaction_flags
    }

    pub fn uid(&self) -> u32 {
        match &self.shared.record {
            Some(record) => record.uid,
            None => self.shared.properties().uid,
        }
    }

    // ------------------------------------------------------------------
    // History record
    // ------------------------------------------------------------------

    /// The history record this handle was created from
    pub fn record(&self) -> Option<&TransactionRecord> {
        self.shared.record.as_ref()
    }

    /// When a past transaction ran
    pub fn timespec(&self) -> Option<DateTime<Utc>> {
        self.shared.record.as_ref().and_then(|r| r.timespec)
    }

    pub fn succeeded(&self) -> bool {
        self.shared.record.as_ref().is_some_and(|r| r.succeeded)
    }

    /// Run time of a past transaction in milliseconds
    pub fn duration(&self) -> u32 {
        self.shared.record.as_ref().map_or(0, |r| r.duration)
    }

    pub fn data(&self) -> Option<&str> {
        self.shared.record.as_ref().map(|r| r.data.as_str())
    }

    pub fn cmdline(&self) -> Option<&str> {
        self.shared.record.as_ref().map(|r| r.cmdline.as_str())
    }
}

impl RoleRequests for Transaction {
    type Output = Result<(), ClientError>;

    /// Issues the role on this handle
    ///
    /// If the event stream is already running, the request is dispatched
    /// right away; otherwise it goes out when the session binds.
    ///
    /// # Errors
    /// - [`ClientError::RoleAlreadySet`] if a request was already issued
    /// - [`ClientError::NoTransaction`] if the session already ended
    fn issue(&self, request: TransactionRequest) -> Result<(), ClientError> {
        let mut state = self.shared.lock();

        if let Some(existing) = &state.request {
            return Err(ClientError::RoleAlreadySet(existing.role().to_string()));
        }
        if state.phase.is_terminal() {
            return Err(ClientError::NoTransaction);
        }

        debug!(tid = ?state.tid, role = %request.role(), "Role issued");
        state.request = Some(request);
        if let Some(commands) = &state.commands {
            let _ = commands.send(Command::Dispatch);
        }
        Ok(())
    }
}
