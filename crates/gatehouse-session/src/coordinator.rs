//! The session coordinator: single authority for operations and
//! exclusivity.
//!
//! The coordinator is an actor. It owns the two exclusivity maps
//! (connection → operation, account → operation), admits or rejects new
//! operations, and drives every operation's state machine from the
//! events arriving on its command channel. Because all of that happens
//! on one task, admission check-and-insert is atomic by construction —
//! there is no window in which two operations for the same subject can
//! both pass the check.
//!
//! ## Lifecycle of an operation
//!
//! ```text
//! admit() ──→ insert into map ──→ async hop(s) ──→ final transition
//!    │                                │                    │
//!    │ (subject already busy)         │ (failure)          ▼
//!    ▼                                ▼              retire: remove
//! eject offender                 eject + retire      from map, same
//!                                                    logical step
//! ```
//!
//! Two kinds of ejects, deliberately distinct:
//!
//! - **Admission rejection** ([`Coordinator::eject_connection`]) ejects
//!   the offender but leaves any in-flight operation alone; the
//!   transport's disconnect notification performs the cleanup.
//! - **Operation failure** ([`Coordinator::fail_connection_op`]) ejects
//!   and retires the operation in the same step.
//!
//! Every async result carries the issuing operation's [`OpId`]; handlers
//! that cannot match id + expected state discard the result silently
//! (the operation was killed while the call was in flight).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;

use gatehouse_directory::{
    Account, AccountStore, DirectoryError, Record, RecordStore, unix_now,
};
use gatehouse_identity::IdentityProvider;
use gatehouse_protocol::{
    AccountId, AuthScheme, Channel, Clearance, ClientMessage, CompositeId,
    ConnectionId, Directive, ServerMessage, eject_code,
};

use crate::command::{Command, GatewaySender, Outbound};
use crate::config::CoordinatorConfig;
use crate::error::SessionError;
use crate::operation::{
    AuthenticateOp, AuthenticateState, AvatarIntent, LoginOp, LoginState,
    OpId, Operation, OperationKind,
};
use crate::session::{ConnectionSession, Identity};

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle for delivering events to a running coordinator.
///
/// Cheap to clone — it's an `mpsc::Sender` wrapper. The transport layer
/// holds one and forwards decoded client messages, authorization
/// completions from the provider redirect endpoint, and disconnect
/// notifications.
#[derive(Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl CoordinatorHandle {
    /// Delivers a protocol message from a connection.
    pub fn deliver(
        &self,
        connection_id: ConnectionId,
        message: ClientMessage,
    ) -> Result<(), SessionError> {
        self.commands
            .send(Command::Client { connection_id, message })
            .map_err(|_| SessionError::Closed)
    }

    /// Reports that the external provider completed an authorization.
    /// `session_token` is the `state` parameter echoed by the provider.
    pub fn authorization_granted(
        &self,
        session_token: &str,
        code: &str,
    ) -> Result<(), SessionError> {
        self.commands
            .send(Command::AuthorizationGranted {
                session_token: session_token.to_string(),
                code: code.to_string(),
            })
            .map_err(|_| SessionError::Closed)
    }

    /// Reports that the transport lost a connection.
    pub fn connection_lost(
        &self,
        connection_id: ConnectionId,
    ) -> Result<(), SessionError> {
        self.commands
            .send(Command::ConnectionLost { connection_id })
            .map_err(|_| SessionError::Closed)
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// The session authority actor. See the module docs for the model.
pub struct Coordinator {
    pub(crate) config: CoordinatorConfig,
    pub(crate) accounts: Arc<dyn AccountStore>,
    pub(crate) records: Arc<dyn RecordStore>,
    pub(crate) provider: Option<Arc<dyn IdentityProvider>>,
    pub(crate) gateway: GatewaySender,

    /// Sender side of our own command channel, cloned into spawned hops
    /// so results re-enter the actor.
    pub(crate) commands: mpsc::UnboundedSender<Command>,
    commands_rx: mpsc::UnboundedReceiver<Command>,

    /// Exclusivity map: at most one operation per connection.
    pub(crate) connection_ops: HashMap<ConnectionId, Operation>,
    /// Exclusivity map: at most one operation per account.
    pub(crate) account_ops: HashMap<AccountId, Operation>,

    /// Per-connection session records.
    pub(crate) sessions: HashMap<ConnectionId, ConnectionSession>,
    /// Which connection currently owns each account's channel.
    pub(crate) account_connections: HashMap<AccountId, ConnectionId>,

    /// Pending authorization completions, keyed by session token.
    /// Each entry is resolved and removed exactly once.
    pub(crate) auth_waiters: HashMap<String, ConnectionId>,
}

impl Coordinator {
    /// Creates a coordinator and its handle without spawning it.
    pub(crate) fn new(
        config: CoordinatorConfig,
        accounts: Arc<dyn AccountStore>,
        records: Arc<dyn RecordStore>,
        provider: Option<Arc<dyn IdentityProvider>>,
        gateway: GatewaySender,
    ) -> (Coordinator, CoordinatorHandle) {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let handle = CoordinatorHandle { commands: commands.clone() };
        let coordinator = Coordinator {
            config,
            accounts,
            records,
            provider,
            gateway,
            commands,
            commands_rx,
            connection_ops: HashMap::new(),
            account_ops: HashMap::new(),
            sessions: HashMap::new(),
            account_connections: HashMap::new(),
            auth_waiters: HashMap::new(),
        };
        (coordinator, handle)
    }

    /// Spawns the coordinator task and returns its handle.
    pub fn spawn(
        config: CoordinatorConfig,
        accounts: Arc<dyn AccountStore>,
        records: Arc<dyn RecordStore>,
        provider: Option<Arc<dyn IdentityProvider>>,
        gateway: GatewaySender,
    ) -> CoordinatorHandle {
        let (coordinator, handle) =
            Coordinator::new(config, accounts, records, provider, gateway);
        tokio::spawn(coordinator.run());
        handle
    }

    /// Runs the actor loop until every handle is dropped.
    pub(crate) async fn run(mut self) {
        tracing::info!(scheme = ?self.config.auth_scheme, "session coordinator started");
        while let Some(command) = self.commands_rx.recv().await {
            self.handle(command);
        }
        tracing::info!("session coordinator stopped");
    }

    /// Dispatches one command. All state transitions happen here, on the
    /// actor task — never inside spawned hops.
    pub(crate) fn handle(&mut self, command: Command) {
        match command {
            Command::Client { connection_id, message } => {
                self.handle_client(connection_id, message);
            }
            Command::ConnectionLost { connection_id } => {
                self.on_connection_lost(connection_id);
            }
            Command::AuthorizationGranted { session_token, code } => {
                self.on_authorization_granted(&session_token, code);
            }
            Command::AuthExpired { connection_id, op } => {
                self.on_auth_expired(connection_id, op);
            }
            Command::CodeExchanged { connection_id, op, result } => {
                self.on_code_exchanged(connection_id, op, result);
            }
            Command::IdentityFetched { connection_id, op, result } => {
                self.on_identity_fetched(connection_id, op, result);
            }
            Command::TokenResolved { connection_id, op, result } => {
                self.on_token_resolved(connection_id, op, result);
            }
            Command::AccountCreated { connection_id, op, result } => {
                self.on_account_created(connection_id, op, result);
            }
            Command::MappingStored { connection_id, op, result } => {
                self.on_mapping_stored(connection_id, op, result);
            }
            Command::LoginAccountFetched { connection_id, op, result } => {
                self.on_login_account_fetched(connection_id, op, result);
            }
            Command::AccountFetched { account_id, op, result } => {
                self.on_account_fetched(account_id, op, result);
            }
            Command::AvatarFetched { account_id, op, avatar_id, result } => {
                self.on_avatar_fetched(account_id, op, avatar_id, result);
            }
            Command::AvatarsPersisted { account_id, op, result } => {
                self.on_avatars_persisted(account_id, op, result);
            }
        }
    }

    fn handle_client(&mut self, connection_id: ConnectionId, message: ClientMessage) {
        self.sessions
            .entry(connection_id)
            .or_insert_with(ConnectionSession::new);

        match message {
            ClientMessage::RequestAuthScheme => {
                self.request_auth_scheme(connection_id);
            }
            ClientMessage::Login { play_token } => {
                self.login(connection_id, play_token);
            }
            ClientMessage::RequestAvatarList => {
                self.run_account_operation(connection_id, AvatarIntent::List);
            }
            ClientMessage::RequestRemoveAvatar { avatar_id } => {
                self.run_account_operation(
                    connection_id,
                    AvatarIntent::Remove { avatar_id },
                );
            }
            ClientMessage::RequestPlayAvatar { avatar_id: Some(avatar_id) } => {
                self.run_account_operation(
                    connection_id,
                    AvatarIntent::Activate { avatar_id },
                );
            }
            ClientMessage::RequestPlayAvatar { avatar_id: None } => {
                self.deactivate_avatar(connection_id);
            }
        }
    }

    // -----------------------------------------------------------------
    // Outbound helpers
    // -----------------------------------------------------------------

    /// Sends a protocol reply to one connection. Silently drops if the
    /// gateway is gone (shutdown).
    pub(crate) fn send(&self, connection_id: ConnectionId, message: ServerMessage) {
        let _ = self.gateway.send(Outbound::Message { connection_id, message });
    }

    /// Emits a connection-control directive.
    pub(crate) fn control(&self, directive: Directive) {
        let _ = self.gateway.send(Outbound::Control(directive));
    }

    // -----------------------------------------------------------------
    // Eject / retire
    // -----------------------------------------------------------------

    /// Admission rejection: eject the connection with an audit entry.
    /// Any in-flight operation is left to the disconnect cleanup.
    pub(crate) fn eject_connection(
        &mut self,
        connection_id: ConnectionId,
        code: u16,
        reason: &str,
    ) {
        tracing::warn!(
            target: "audit",
            %connection_id, code, reason,
            "ejecting connection"
        );
        self.control(Directive::Eject {
            connection_id,
            code,
            reason: reason.to_string(),
        });
    }

    /// Admission rejection against an account: ejects whichever
    /// connection currently owns the account's channel.
    pub(crate) fn eject_account(&mut self, account_id: AccountId, code: u16, reason: &str) {
        tracing::warn!(
            target: "audit",
            %account_id, code, reason,
            "ejecting account"
        );
        if let Some(&connection_id) = self.account_connections.get(&account_id) {
            self.control(Directive::Eject {
                connection_id,
                code,
                reason: reason.to_string(),
            });
        }
    }

    /// Operation failure: eject and retire in the same logical step.
    pub(crate) fn fail_connection_op(
        &mut self,
        connection_id: ConnectionId,
        code: u16,
        reason: &str,
    ) {
        self.eject_connection(connection_id, code, reason);
        self.retire_connection_op(connection_id);
    }

    /// Operation failure against an account: eject and retire.
    pub(crate) fn fail_account_op(
        &mut self,
        account_id: AccountId,
        code: u16,
        reason: &str,
    ) {
        self.eject_account(account_id, code, reason);
        self.retire_account_op(account_id);
    }

    /// Removes a connection's operation from the exclusivity map. For an
    /// authenticate operation, also disarms its authorization waiter —
    /// which is what "cancels" a still-scheduled expiry: the timer
    /// command will no longer find a matching operation.
    pub(crate) fn retire_connection_op(
        &mut self,
        connection_id: ConnectionId,
    ) -> Option<Operation> {
        let op = self.connection_ops.remove(&connection_id)?;
        if let OperationKind::Authenticate(auth) = &op.kind {
            self.auth_waiters.remove(&auth.session_token);
        }
        tracing::debug!(%connection_id, operation = op.label(), id = %op.id, "operation retired");
        Some(op)
    }

    /// Removes an account's operation from the exclusivity map.
    pub(crate) fn retire_account_op(&mut self, account_id: AccountId) -> Option<Operation> {
        let op = self.account_ops.remove(&account_id)?;
        tracing::debug!(%account_id, operation = op.label(), id = %op.id, "operation retired");
        Some(op)
    }

    // -----------------------------------------------------------------
    // Disconnect cleanup
    // -----------------------------------------------------------------

    /// Tears down everything tied to a lost connection: compensation
    /// directives fire in arming order, the channel ownership and both
    /// exclusivity maps are cleared, and any authorization waiter is
    /// dropped.
    fn on_connection_lost(&mut self, connection_id: ConnectionId) {
        if let Some(session) = self.sessions.remove(&connection_id) {
            for directive in session.on_disconnect {
                self.control(directive);
            }
            if let Some(account_id) = session.identity.account_id() {
                if self.account_connections.get(&account_id).copied()
                    == Some(connection_id)
                {
                    self.account_connections.remove(&account_id);
                }
            }
        }

        self.retire_connection_op(connection_id);

        let stranded: Vec<AccountId> = self
            .account_ops
            .iter()
            .filter(|(_, op)| {
                matches!(&op.kind, OperationKind::Avatar(av) if av.connection_id == connection_id)
            })
            .map(|(account_id, _)| *account_id)
            .collect();
        for account_id in stranded {
            self.retire_account_op(account_id);
        }

        self.auth_waiters.retain(|_, c| *c != connection_id);
        tracing::info!(%connection_id, "connection cleaned up");
    }

    // -----------------------------------------------------------------
    // Auth scheme negotiation
    // -----------------------------------------------------------------

    fn request_auth_scheme(&mut self, connection_id: ConnectionId) {
        if self.connection_ops.contains_key(&connection_id) {
            self.eject_connection(
                connection_id,
                eject_code::DUPLICATE_OPERATION,
                "An operation is already underway for this connection.",
            );
            return;
        }

        let session_token = generate_session_token();

        match (self.config.auth_scheme, self.provider.clone()) {
            (AuthScheme::ExternalOauth, Some(provider)) => {
                let url = match provider.authorization_url(&session_token) {
                    Ok(url) => url,
                    Err(e) => {
                        tracing::error!(error = %e, "cannot build authorization URL");
                        self.eject_connection(
                            connection_id,
                            eject_code::DEPENDENCY_FAILURE,
                            "The identity provider is unavailable; try again later.",
                        );
                        return;
                    }
                };

                let op = Operation::new(OperationKind::Authenticate(
                    AuthenticateOp::new(session_token.clone()),
                ));
                let op_id = op.id;
                self.connection_ops.insert(connection_id, op);
                self.auth_waiters.insert(session_token.clone(), connection_id);
                self.schedule_auth_expiry(connection_id, op_id);

                tracing::info!(%connection_id, "authorization started");
                self.send(
                    connection_id,
                    ServerMessage::SetAuthScheme {
                        scheme: AuthScheme::ExternalOauth,
                        session_token,
                        authorization_url: Some(url),
                    },
                );
            }
            _ => {
                // No external provider configured: direct-token mode.
                self.send(
                    connection_id,
                    ServerMessage::SetAuthScheme {
                        scheme: AuthScheme::DevToken,
                        session_token,
                        authorization_url: None,
                    },
                );
            }
        }
    }

    /// Arms the authorization expiry. The fired command only acts if the
    /// same operation is still live for the connection.
    fn schedule_auth_expiry(&self, connection_id: ConnectionId, op: OpId) {
        let commands = self.commands.clone();
        let timeout = Duration::from_secs(self.config.auth_timeout_secs);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = commands.send(Command::AuthExpired { connection_id, op });
        });
    }

    fn on_auth_expired(&mut self, connection_id: ConnectionId, op: OpId) {
        match self.connection_ops.get(&connection_id) {
            Some(current)
                if current.id == op
                    && matches!(current.kind, OperationKind::Authenticate(_)) =>
            {
                tracing::warn!(%connection_id, "authorization window elapsed");
                self.fail_connection_op(
                    connection_id,
                    eject_code::TIMED_OUT,
                    "Authorization timed out.",
                );
            }
            // The connection finished (or died) and may be running
            // something unrelated by now — the timer must not touch it.
            _ => tracing::trace!(%connection_id, %op, "expiry for a dead authorization; ignored"),
        }
    }

    // -----------------------------------------------------------------
    // Authenticate operation
    // -----------------------------------------------------------------

    fn on_authorization_granted(&mut self, session_token: &str, code: String) {
        let Some(&connection_id) = self.auth_waiters.get(session_token) else {
            // Wrong or expired token. Not an error: the provider redirect
            // endpoint is reachable by anyone.
            tracing::debug!("authorization completion with unknown session token; ignored");
            return;
        };
        // Resolved exactly once.
        self.auth_waiters.remove(session_token);

        let op_id = match self.connection_ops.get_mut(&connection_id) {
            Some(Operation { id, kind: OperationKind::Authenticate(auth) })
                if auth.state == AuthenticateState::Start =>
            {
                auth.state = AuthenticateState::RetrieveToken;
                Some(*id)
            }
            _ => None,
        };

        match op_id {
            Some(op) => {
                tracing::info!(%connection_id, "authorization completed; exchanging code");
                self.spawn_code_exchange(connection_id, op, code);
            }
            None => {
                tracing::trace!(%connection_id, "authorization completion for a dead operation; ignored");
            }
        }
    }

    fn spawn_code_exchange(&self, connection_id: ConnectionId, op: OpId, code: String) {
        let Some(provider) = self.provider.clone() else { return };
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let result = provider.exchange_code(&code).await;
            let _ = commands.send(Command::CodeExchanged { connection_id, op, result });
        });
    }

    fn on_code_exchanged(
        &mut self,
        connection_id: ConnectionId,
        op: OpId,
        result: Result<String, gatehouse_identity::IdentityError>,
    ) {
        let next = match self.connection_ops.get_mut(&connection_id) {
            Some(Operation { id, kind: OperationKind::Authenticate(auth) })
                if *id == op && auth.state == AuthenticateState::RetrieveToken =>
            {
                if result.is_ok() {
                    auth.state = AuthenticateState::RetrieveInformation;
                }
                Some(result)
            }
            _ => {
                tracing::trace!(%connection_id, %op, "stale code-exchange reply discarded");
                None
            }
        };

        match next {
            Some(Ok(access_token)) => {
                self.spawn_identity_fetch(connection_id, op, access_token);
            }
            Some(Err(e)) => {
                tracing::warn!(%connection_id, error = %e, "code exchange failed");
                self.fail_connection_op(
                    connection_id,
                    eject_code::DEPENDENCY_FAILURE,
                    "The identity provider rejected the authorization; try again later.",
                );
            }
            None => {}
        }
    }

    fn spawn_identity_fetch(
        &self,
        connection_id: ConnectionId,
        op: OpId,
        access_token: String,
    ) {
        let Some(provider) = self.provider.clone() else { return };
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let result = provider.fetch_identity(&access_token).await;
            let _ = commands.send(Command::IdentityFetched { connection_id, op, result });
        });
    }

    fn on_identity_fetched(
        &mut self,
        connection_id: ConnectionId,
        op: OpId,
        result: Result<gatehouse_identity::ExternalIdentity, gatehouse_identity::IdentityError>,
    ) {
        let next = match self.connection_ops.get_mut(&connection_id) {
            Some(Operation { id, kind: OperationKind::Authenticate(auth) })
                if *id == op && auth.state == AuthenticateState::RetrieveInformation =>
            {
                match result {
                    Ok(identity) => {
                        auth.state = AuthenticateState::GotInformation;
                        auth.identity = Some(identity.clone());
                        Some(Ok(identity))
                    }
                    Err(e) => Some(Err(e)),
                }
            }
            _ => {
                tracing::trace!(%connection_id, %op, "stale identity reply discarded");
                None
            }
        };

        match next {
            Some(Ok(identity)) => {
                tracing::info!(
                    %connection_id,
                    external_id = %identity.id,
                    username = %identity.username,
                    "external identity verified"
                );
                // The parked authenticate is consumed by the login start.
                self.start_login_with_token(connection_id, identity.id);
            }
            Some(Err(e)) => {
                tracing::warn!(%connection_id, error = %e, "identity fetch failed");
                self.fail_connection_op(
                    connection_id,
                    eject_code::DEPENDENCY_FAILURE,
                    "Could not retrieve your identity from the provider; try again later.",
                );
            }
            None => {}
        }
    }

    // -----------------------------------------------------------------
    // Login operation
    // -----------------------------------------------------------------

    fn login(&mut self, connection_id: ConnectionId, play_token: String) {
        let anonymous = self
            .sessions
            .get(&connection_id)
            .is_none_or(|s| s.identity.is_anonymous());
        if !anonymous {
            self.eject_connection(
                connection_id,
                eject_code::VIOLATION,
                "This connection is already logged in.",
            );
            return;
        }

        if self.connection_ops.contains_key(&connection_id) {
            self.eject_connection(
                connection_id,
                eject_code::DUPLICATE_OPERATION,
                "A login is already underway for this connection.",
            );
            return;
        }

        if self.config.auth_scheme != AuthScheme::DevToken {
            self.eject_connection(
                connection_id,
                eject_code::WRONG_SCHEME,
                "Direct token login is not enabled.",
            );
            return;
        }

        self.start_login_with_token(connection_id, play_token);
    }

    /// Starts the token → account resolution, consuming a parked
    /// authenticate operation if one is waiting.
    fn start_login_with_token(&mut self, connection_id: ConnectionId, play_token: String) {
        if let Some(op) = self.connection_ops.get(&connection_id) {
            match &op.kind {
                OperationKind::Authenticate(auth)
                    if auth.state == AuthenticateState::GotInformation =>
                {
                    self.retire_connection_op(connection_id);
                }
                // An operation is underway and not login-eligible. The
                // caller is not authorized yet — drop the request.
                _ => {
                    tracing::debug!(
                        %connection_id,
                        operation = op.label(),
                        "login request while an operation is underway; ignored"
                    );
                    return;
                }
            }
        }

        let op = Operation::new(OperationKind::Login(LoginOp::new()));
        let op_id = op.id;
        self.connection_ops.insert(connection_id, op);
        tracing::info!(%connection_id, "login started");
        self.spawn_lookup(connection_id, op_id, play_token);
    }

    fn spawn_lookup(&self, connection_id: ConnectionId, op: OpId, play_token: String) {
        let accounts = Arc::clone(&self.accounts);
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let result = accounts.lookup(&play_token).await;
            let _ = commands.send(Command::TokenResolved { connection_id, op, result });
        });
    }

    fn on_token_resolved(
        &mut self,
        connection_id: ConnectionId,
        op: OpId,
        result: Result<gatehouse_directory::Lookup, DirectoryError>,
    ) {
        enum Next {
            Create(Account),
            Retrieve(AccountId),
            Fail(u16, String),
        }

        let next = match self.connection_ops.get_mut(&connection_id) {
            Some(Operation { id, kind: OperationKind::Login(login) })
                if *id == op && login.state == LoginState::QueryAccountDb =>
            {
                match result {
                    Ok(lookup) => {
                        login.external_id = lookup.external_id;
                        login.access_level = lookup.access_level;
                        match lookup.account_id {
                            Some(account_id) => {
                                login.account_id = Some(account_id);
                                login.state = LoginState::RetrieveAccount;
                                Next::Retrieve(account_id)
                            }
                            None => {
                                login.state = LoginState::CreateAccount;
                                Next::Create(Account::fresh(
                                    &login.external_id,
                                    login.access_level,
                                ))
                            }
                        }
                    }
                    Err(e) => Next::Fail(directory_eject_code(&e), e.to_string()),
                }
            }
            _ => {
                tracing::trace!(%connection_id, %op, "stale lookup reply discarded");
                return;
            }
        };

        match next {
            Next::Create(account) => self.spawn_create_account(connection_id, op, account),
            Next::Retrieve(account_id) => {
                self.spawn_login_account_fetch(connection_id, op, account_id);
            }
            Next::Fail(code, reason) => {
                tracing::warn!(target: "audit", %connection_id, %reason, "token lookup refused");
                self.fail_connection_op(connection_id, code, &reason);
            }
        }
    }

    fn spawn_create_account(&self, connection_id: ConnectionId, op: OpId, account: Account) {
        let records = Arc::clone(&self.records);
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let result = records.create_account(account).await;
            let _ = commands.send(Command::AccountCreated { connection_id, op, result });
        });
    }

    fn on_account_created(
        &mut self,
        connection_id: ConnectionId,
        op: OpId,
        result: Result<AccountId, DirectoryError>,
    ) {
        enum Next {
            StoreMapping(String, AccountId),
            Fail(String),
        }

        let next = match self.connection_ops.get_mut(&connection_id) {
            Some(Operation { id, kind: OperationKind::Login(login) })
                if *id == op && login.state == LoginState::CreateAccount =>
            {
                match result {
                    Ok(account_id) => {
                        login.account_id = Some(account_id);
                        login.state = LoginState::StoreAccountId;
                        Next::StoreMapping(login.external_id.clone(), account_id)
                    }
                    Err(e) => Next::Fail(e.to_string()),
                }
            }
            _ => {
                tracing::trace!(%connection_id, %op, "stale account-create reply discarded");
                return;
            }
        };

        match next {
            Next::StoreMapping(external_id, account_id) => {
                tracing::info!(%connection_id, %account_id, "account created");
                self.spawn_store_mapping(connection_id, op, external_id, account_id);
            }
            Next::Fail(reason) => {
                tracing::error!(
                    target: "audit",
                    %connection_id, %reason,
                    "account creation failed"
                );
                self.fail_connection_op(
                    connection_id,
                    eject_code::DATA_INTEGRITY,
                    "Your account could not be created; please contact support.",
                );
            }
        }
    }

    fn spawn_store_mapping(
        &self,
        connection_id: ConnectionId,
        op: OpId,
        external_id: String,
        account_id: AccountId,
    ) {
        let accounts = Arc::clone(&self.accounts);
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let result = accounts.store_mapping(&external_id, account_id).await;
            let _ = commands.send(Command::MappingStored { connection_id, op, result });
        });
    }

    fn on_mapping_stored(
        &mut self,
        connection_id: ConnectionId,
        op: OpId,
        result: Result<(), DirectoryError>,
    ) {
        let next = match self.connection_ops.get_mut(&connection_id) {
            Some(Operation { id, kind: OperationKind::Login(login) })
                if *id == op && login.state == LoginState::StoreAccountId =>
            {
                match result {
                    Ok(()) => login
                        .account_id
                        .ok_or_else(|| "no account id recorded after creation".to_string()),
                    Err(e) => Err(e.to_string()),
                }
            }
            _ => {
                tracing::trace!(%connection_id, %op, "stale mapping reply discarded");
                return;
            }
        };

        match next {
            Ok(account_id) => self.set_account(connection_id, account_id),
            Err(reason) => {
                // Without the mapping the fresh account is unreachable on
                // the next login. Manual repair territory.
                tracing::error!(
                    target: "audit",
                    %connection_id, %reason,
                    "identity mapping could not be stored"
                );
                self.fail_connection_op(
                    connection_id,
                    eject_code::DATA_INTEGRITY,
                    "Your account was created but could not be linked; please contact support.",
                );
            }
        }
    }

    fn spawn_login_account_fetch(
        &self,
        connection_id: ConnectionId,
        op: OpId,
        account_id: AccountId,
    ) {
        let records = Arc::clone(&self.records);
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let result = records.fetch_account(account_id).await;
            let _ = commands.send(Command::LoginAccountFetched { connection_id, op, result });
        });
    }

    fn on_login_account_fetched(
        &mut self,
        connection_id: ConnectionId,
        op: OpId,
        result: Result<Record, DirectoryError>,
    ) {
        enum Next {
            SetAccount(AccountId),
            Fail(u16, String),
        }

        let next = match self.connection_ops.get_mut(&connection_id) {
            Some(Operation { id, kind: OperationKind::Login(login) })
                if *id == op && login.state == LoginState::RetrieveAccount =>
            {
                let account_id = login.account_id;
                match (result, account_id) {
                    (Ok(Record::Account(_)), Some(account_id)) => {
                        Next::SetAccount(account_id)
                    }
                    (Ok(record), _) => Next::Fail(
                        eject_code::DATA_INTEGRITY,
                        format!(
                            "Your account object was not found in the database (found a {} record).",
                            record.kind()
                        ),
                    ),
                    (Err(e), _) => {
                        Next::Fail(directory_eject_code(&e), e.to_string())
                    }
                }
            }
            _ => {
                tracing::trace!(%connection_id, %op, "stale account fetch discarded");
                return;
            }
        };

        match next {
            Next::SetAccount(account_id) => self.set_account(connection_id, account_id),
            Next::Fail(code, reason) => {
                tracing::error!(target: "audit", %connection_id, %reason, "account retrieval failed");
                self.fail_connection_op(connection_id, code, &reason);
            }
        }
    }

    /// Completes a login: channel ownership, identity, sandbox lift,
    /// last-login stamp, reply — in that order.
    fn set_account(&mut self, connection_id: ConnectionId, account_id: AccountId) {
        // (1) Boot any other connection holding this account's channel.
        if let Some(&other) = self.account_connections.get(&account_id) {
            if other != connection_id {
                tracing::warn!(
                    target: "audit",
                    %account_id, evicted = %other, winner = %connection_id,
                    "account logged in elsewhere"
                );
                self.control(Directive::Eject {
                    connection_id: other,
                    code: eject_code::LOGGED_IN_ELSEWHERE,
                    reason: "This account has been logged in elsewhere.".to_string(),
                });
            }
        }

        // (2) Bind this connection to the account's channel.
        self.control(Directive::BindChannel {
            connection_id,
            channel: Channel::for_account(account_id),
        });

        // (3) Account-level identity, (4) lift the pre-login sandbox.
        self.control(Directive::SetIdentity {
            connection_id,
            identity: CompositeId::account_only(account_id),
        });
        self.control(Directive::ElevateState {
            connection_id,
            clearance: Clearance::Established,
        });

        // (5) Stamp last login off the control path.
        self.spawn_stamp_last_login(account_id);

        if let Some(session) = self.sessions.get_mut(&connection_id) {
            session.identity = Identity::Account(account_id);
        }
        self.account_connections.insert(account_id, connection_id);

        self.send(connection_id, ServerMessage::AcceptLogin);
        self.retire_connection_op(connection_id);
        tracing::info!(%connection_id, %account_id, "login accepted");
    }

    fn spawn_stamp_last_login(&self, account_id: AccountId) {
        let records = Arc::clone(&self.records);
        tokio::spawn(async move {
            if let Err(e) = records.stamp_last_login(account_id, unix_now()).await {
                tracing::warn!(%account_id, error = %e, "failed to stamp last login");
            }
        });
    }
}

/// Maps a directory failure to an eject reason code.
pub(crate) fn directory_eject_code(err: &DirectoryError) -> u16 {
    match err {
        DirectoryError::TokenRejected(_) => eject_code::VIOLATION,
        DirectoryError::NotFound(_) | DirectoryError::PreconditionFailed(_) => {
            eject_code::DATA_INTEGRITY
        }
        DirectoryError::Unavailable(_) => eject_code::DEPENDENCY_FAILURE,
    }
}

/// Generates a random 32-character hex session token (128 bits).
///
/// The token keys the authorization waiter map and rides to the provider
/// as the `state` parameter, so it must be unguessable.
fn generate_session_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Unit tests for admission, exclusivity, and stale-callback
    //! handling, driving the actor's `handle()` directly so the maps can
    //! be inspected between steps. Full end-to-end flows live in
    //! `tests/operations.rs`.

    use super::*;
    use gatehouse_directory::{MemoryAccountStore, MemoryRecordStore};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn conn(id: u64) -> ConnectionId {
        ConnectionId(id)
    }

    fn coordinator_with(
        config: CoordinatorConfig,
        provider: Option<Arc<dyn IdentityProvider>>,
    ) -> (Coordinator, UnboundedReceiver<Outbound>) {
        let (gateway, outbound) = mpsc::unbounded_channel();
        let (coordinator, _handle) = Coordinator::new(
            config,
            Arc::new(MemoryAccountStore::new()),
            Arc::new(MemoryRecordStore::new()),
            provider,
            gateway,
        );
        (coordinator, outbound)
    }

    fn devtoken_coordinator() -> (Coordinator, UnboundedReceiver<Outbound>) {
        coordinator_with(CoordinatorConfig::default(), None)
    }

    fn client(connection_id: ConnectionId, message: ClientMessage) -> Command {
        Command::Client { connection_id, message }
    }

    fn login_msg(token: &str) -> ClientMessage {
        ClientMessage::Login { play_token: token.into() }
    }

    /// Drains the outbound channel, returning everything emitted so far.
    fn drain(outbound: &mut UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(item) = outbound.try_recv() {
            out.push(item);
        }
        out
    }

    fn eject_codes(emitted: &[Outbound]) -> Vec<u16> {
        emitted
            .iter()
            .filter_map(|o| match o {
                Outbound::Control(Directive::Eject { code, .. }) => Some(*code),
                _ => None,
            })
            .collect()
    }

    // =====================================================================
    // Auth scheme negotiation
    // =====================================================================

    #[tokio::test]
    async fn test_request_auth_scheme_devtoken_replies_without_operation() {
        let (mut c, mut outbound) = devtoken_coordinator();

        c.handle(client(conn(1), ClientMessage::RequestAuthScheme));

        let emitted = drain(&mut outbound);
        assert!(matches!(
            &emitted[..],
            [Outbound::Message {
                message: ServerMessage::SetAuthScheme {
                    scheme: AuthScheme::DevToken,
                    authorization_url: None,
                    ..
                },
                ..
            }]
        ));
        // Direct-token mode never creates an authenticate operation.
        assert!(c.connection_ops.is_empty());
        assert!(c.auth_waiters.is_empty());
    }

    #[tokio::test]
    async fn test_request_auth_scheme_tokens_are_unique_per_request() {
        let (mut c, mut outbound) = devtoken_coordinator();

        c.handle(client(conn(1), ClientMessage::RequestAuthScheme));
        c.handle(client(conn(2), ClientMessage::RequestAuthScheme));

        let tokens: Vec<String> = drain(&mut outbound)
            .into_iter()
            .filter_map(|o| match o {
                Outbound::Message {
                    message: ServerMessage::SetAuthScheme { session_token, .. },
                    ..
                } => Some(session_token),
                _ => None,
            })
            .collect();
        assert_eq!(tokens.len(), 2);
        assert_ne!(tokens[0], tokens[1]);
        assert_eq!(tokens[0].len(), 32);
    }

    // =====================================================================
    // Login admission
    // =====================================================================

    #[tokio::test]
    async fn test_login_duplicate_operation_ejects_connection() {
        let (mut c, mut outbound) = devtoken_coordinator();

        c.handle(client(conn(1), login_msg("alice")));
        assert_eq!(c.connection_ops.len(), 1);

        c.handle(client(conn(1), login_msg("alice")));

        let emitted = drain(&mut outbound);
        assert_eq!(eject_codes(&emitted), vec![eject_code::DUPLICATE_OPERATION]);
        // The first operation is untouched — cleanup belongs to the
        // disconnect notification, not the admission rejection.
        assert_eq!(c.connection_ops.len(), 1);
    }

    #[tokio::test]
    async fn test_login_under_oauth_scheme_is_ejected() {
        let config = CoordinatorConfig {
            auth_scheme: AuthScheme::ExternalOauth,
            ..CoordinatorConfig::default()
        };
        let (mut c, mut outbound) = coordinator_with(config, None);

        c.handle(client(conn(1), login_msg("alice")));

        let emitted = drain(&mut outbound);
        assert_eq!(eject_codes(&emitted), vec![eject_code::WRONG_SCHEME]);
        assert!(c.connection_ops.is_empty());
    }

    #[tokio::test]
    async fn test_account_operation_while_anonymous_is_ejected() {
        let (mut c, mut outbound) = devtoken_coordinator();

        c.handle(client(conn(1), ClientMessage::RequestAvatarList));

        let emitted = drain(&mut outbound);
        assert_eq!(eject_codes(&emitted), vec![eject_code::VIOLATION]);
        assert!(c.account_ops.is_empty());
    }

    // =====================================================================
    // Stale callbacks
    // =====================================================================

    #[tokio::test]
    async fn test_stale_lookup_reply_is_discarded() {
        let (mut c, mut outbound) = devtoken_coordinator();
        c.handle(client(conn(1), login_msg("alice")));
        drain(&mut outbound);

        // A reply carrying a different operation id must not act.
        c.handle(Command::TokenResolved {
            connection_id: conn(1),
            op: OpId::next(),
            result: Err(DirectoryError::Unavailable("boom".into())),
        });

        assert!(drain(&mut outbound).is_empty());
        assert_eq!(c.connection_ops.len(), 1, "live operation must survive");
    }

    #[tokio::test]
    async fn test_lookup_reply_for_unknown_connection_is_discarded() {
        let (mut c, mut outbound) = devtoken_coordinator();

        c.handle(Command::TokenResolved {
            connection_id: conn(99),
            op: OpId::next(),
            result: Err(DirectoryError::Unavailable("boom".into())),
        });

        assert!(drain(&mut outbound).is_empty());
    }

    #[tokio::test]
    async fn test_auth_expiry_for_dead_operation_is_ignored() {
        let (mut c, mut outbound) = devtoken_coordinator();
        // A login (not authenticate) operation is underway; an old
        // expiry for this connection id must not kill it.
        c.handle(client(conn(1), login_msg("alice")));
        drain(&mut outbound);

        c.handle(Command::AuthExpired { connection_id: conn(1), op: OpId::next() });

        assert!(drain(&mut outbound).is_empty());
        assert_eq!(c.connection_ops.len(), 1);
    }

    // =====================================================================
    // start_login_with_token interplay with a parked authenticate
    // =====================================================================

    #[tokio::test]
    async fn test_login_with_token_during_active_authenticate_is_ignored() {
        let (mut c, mut outbound) = devtoken_coordinator();
        c.sessions.insert(conn(1), ConnectionSession::new());
        c.connection_ops.insert(
            conn(1),
            Operation::new(OperationKind::Authenticate(AuthenticateOp::new(
                "tok".into(),
            ))),
        );

        c.start_login_with_token(conn(1), "alice".into());

        // The authenticate is still mid-exchange, not parked: the caller
        // is not authorized yet, so the request is dropped silently.
        assert!(drain(&mut outbound).is_empty());
        assert!(matches!(
            c.connection_ops.get(&conn(1)),
            Some(Operation { kind: OperationKind::Authenticate(_), .. })
        ));
    }

    #[tokio::test]
    async fn test_login_with_token_consumes_parked_authenticate() {
        let (mut c, _outbound) = devtoken_coordinator();
        c.sessions.insert(conn(1), ConnectionSession::new());
        let mut auth = AuthenticateOp::new("tok".into());
        auth.state = AuthenticateState::GotInformation;
        c.auth_waiters.insert("tok".into(), conn(1));
        c.connection_ops
            .insert(conn(1), Operation::new(OperationKind::Authenticate(auth)));

        c.start_login_with_token(conn(1), "ext-1".into());

        // The parked authenticate was retired (waiter disarmed) and
        // replaced by a login operation in the same map slot.
        assert!(c.auth_waiters.is_empty());
        assert!(matches!(
            c.connection_ops.get(&conn(1)),
            Some(Operation { kind: OperationKind::Login(_), .. })
        ));
    }

    // =====================================================================
    // Disconnect cleanup
    // =====================================================================

    #[tokio::test]
    async fn test_connection_lost_clears_operation_and_session() {
        let (mut c, mut outbound) = devtoken_coordinator();
        c.handle(client(conn(1), login_msg("alice")));
        assert_eq!(c.connection_ops.len(), 1);
        drain(&mut outbound);

        c.handle(Command::ConnectionLost { connection_id: conn(1) });

        assert!(c.connection_ops.is_empty());
        assert!(c.sessions.is_empty());
        assert!(c.auth_waiters.is_empty());
    }

    #[tokio::test]
    async fn test_connection_lost_flushes_compensation_directives() {
        let (mut c, mut outbound) = devtoken_coordinator();
        c.handle(client(conn(1), ClientMessage::RequestAuthScheme));
        drain(&mut outbound);
        let session = c.sessions.get_mut(&conn(1)).unwrap();
        session.on_disconnect.push(Directive::UnloadObject {
            avatar_id: gatehouse_protocol::AvatarId(7),
        });
        session.on_disconnect.push(Directive::AnnounceOffline {
            avatar_id: gatehouse_protocol::AvatarId(7),
        });

        c.handle(Command::ConnectionLost { connection_id: conn(1) });

        let emitted = drain(&mut outbound);
        assert_eq!(
            emitted,
            vec![
                Outbound::Control(Directive::UnloadObject {
                    avatar_id: gatehouse_protocol::AvatarId(7),
                }),
                Outbound::Control(Directive::AnnounceOffline {
                    avatar_id: gatehouse_protocol::AvatarId(7),
                }),
            ]
        );
    }

    // =====================================================================
    // Session tokens
    // =====================================================================

    #[test]
    fn test_generate_session_token_is_32_hex_chars() {
        let token = generate_session_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
