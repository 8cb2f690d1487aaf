//! Avatar operations: list, remove, activate, deactivate.
//!
//! All four target an account rather than a connection: admission goes
//! through the account exclusivity map, and the shared first step loads
//! the account record and sanitizes its slot list. From there the
//! intents diverge:
//!
//! ```text
//! RetrieveAccount ──→ QueryAvatars ──(fan-in)──→ reply AvatarList
//!        │                  ↑
//!        ├──→ ProcessRemove ┘            (refresh after removal)
//!        │
//!        └──→ GetTargetAvatar ──→ activation directives
//! ```
//!
//! Deactivation never suspends — it is validated and executed in one
//! step, so it never occupies the exclusivity map.

use std::sync::Arc;

use gatehouse_directory::{DirectoryError, Record, RemovedAvatar, unix_now};
use gatehouse_protocol::{
    AccountId, AvatarEntry, AvatarId, Channel, CompositeId, ConnectionId,
    Directive, ServerMessage, eject_code,
};

use crate::command::Command;
use crate::coordinator::{Coordinator, directory_eject_code};
use crate::operation::{
    AvatarIntent, AvatarOp, AvatarState, OpId, Operation, OperationKind,
};
use crate::session::Identity;

impl Coordinator {
    // -----------------------------------------------------------------
    // Admission
    // -----------------------------------------------------------------

    /// Admits an account-targeted operation for the account bound to the
    /// calling connection.
    pub(crate) fn run_account_operation(
        &mut self,
        connection_id: ConnectionId,
        intent: AvatarIntent,
    ) {
        let identity = self
            .sessions
            .get(&connection_id)
            .map(|s| s.identity)
            .unwrap_or(Identity::Anonymous);

        let Some(account_id) = identity.account_id() else {
            self.eject_connection(
                connection_id,
                eject_code::VIOLATION,
                "Not logged in.",
            );
            return;
        };

        if self.account_ops.contains_key(&account_id) {
            self.eject_account(
                account_id,
                eject_code::DUPLICATE_OPERATION,
                "An operation is already underway for this account.",
            );
            return;
        }

        // Switching avatars without deactivating first is a violation,
        // not a convenience.
        if matches!(intent, AvatarIntent::Activate { .. })
            && matches!(identity, Identity::Avatar { .. })
        {
            self.eject_connection(
                connection_id,
                eject_code::VIOLATION,
                "An avatar is already active on this connection.",
            );
            return;
        }

        let op = Operation::new(OperationKind::Avatar(AvatarOp::new(
            connection_id,
            intent,
        )));
        let op_id = op.id;
        self.account_ops.insert(account_id, op);
        self.spawn_account_fetch(account_id, op_id);
    }

    fn spawn_account_fetch(&self, account_id: AccountId, op: OpId) {
        let records = Arc::clone(&self.records);
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let result = records.fetch_account(account_id).await;
            let _ = commands.send(Command::AccountFetched { account_id, op, result });
        });
    }

    // -----------------------------------------------------------------
    // Shared first step: account loaded
    // -----------------------------------------------------------------

    pub(crate) fn on_account_fetched(
        &mut self,
        account_id: AccountId,
        op: OpId,
        result: Result<Record, DirectoryError>,
    ) {
        enum Next {
            List,
            Remove(AvatarId),
            Activate(AvatarId),
            Fail(u16, String),
        }

        let next = match self.account_ops.get_mut(&account_id) {
            Some(Operation { id, kind: OperationKind::Avatar(av) })
                if *id == op && av.state == AvatarState::RetrieveAccount =>
            {
                match result {
                    Ok(Record::Account(account)) => {
                        av.slots = account.sanitized_slots();
                        av.account = Some(account);
                        match av.intent {
                            AvatarIntent::List => Next::List,
                            AvatarIntent::Remove { avatar_id } => {
                                Next::Remove(avatar_id)
                            }
                            AvatarIntent::Activate { avatar_id } => {
                                Next::Activate(avatar_id)
                            }
                        }
                    }
                    Ok(record) => Next::Fail(
                        eject_code::DATA_INTEGRITY,
                        format!(
                            "Account {account_id} was not found in the database (found a {} record).",
                            record.kind()
                        ),
                    ),
                    Err(e) => Next::Fail(directory_eject_code(&e), e.to_string()),
                }
            }
            _ => {
                tracing::trace!(%account_id, %op, "stale account fetch discarded");
                return;
            }
        };

        match next {
            Next::List => self.enter_query_avatars(account_id, op),
            Next::Remove(avatar_id) => self.process_remove(account_id, op, avatar_id),
            Next::Activate(avatar_id) => {
                self.fetch_activation_target(account_id, op, avatar_id);
            }
            Next::Fail(code, reason) => {
                tracing::error!(target: "audit", %account_id, %reason, "account fetch failed");
                self.fail_account_op(account_id, code, &reason);
            }
        }
    }

    // -----------------------------------------------------------------
    // ListAvatars
    // -----------------------------------------------------------------

    /// Starts the list fan-in: one fetch per occupied slot, tracked by
    /// the pending set. An account with no avatars replies immediately.
    fn enter_query_avatars(&mut self, account_id: AccountId, op: OpId) {
        let to_fetch = match self.account_ops.get_mut(&account_id) {
            Some(Operation { id, kind: OperationKind::Avatar(av) }) if *id == op => {
                av.state = AvatarState::QueryAvatars;
                av.fetched.clear();
                av.pending = av
                    .slots
                    .iter()
                    .copied()
                    .filter(|slot| !slot.is_empty())
                    .collect();
                av.pending.iter().copied().collect::<Vec<_>>()
            }
            _ => return,
        };

        if to_fetch.is_empty() {
            self.send_avatar_list(account_id, op);
            return;
        }
        for avatar_id in to_fetch {
            self.spawn_avatar_fetch(account_id, op, avatar_id);
        }
    }

    fn spawn_avatar_fetch(&self, account_id: AccountId, op: OpId, avatar_id: AvatarId) {
        let records = Arc::clone(&self.records);
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let result = records.fetch_avatar(avatar_id).await;
            let _ = commands.send(Command::AvatarFetched {
                account_id,
                op,
                avatar_id,
                result,
            });
        });
    }

    pub(crate) fn on_avatar_fetched(
        &mut self,
        account_id: AccountId,
        op: OpId,
        avatar_id: AvatarId,
        result: Result<Record, DirectoryError>,
    ) {
        enum Next {
            ListDone,
            Activate(gatehouse_directory::Avatar),
            Fail(u16, String),
            MoreToCome,
        }

        let next = match self.account_ops.get_mut(&account_id) {
            Some(Operation { id, kind: OperationKind::Avatar(av) }) if *id == op => {
                match av.state {
                    AvatarState::QueryAvatars => {
                        if !av.pending.remove(&avatar_id) {
                            tracing::trace!(%account_id, %avatar_id, "unsolicited avatar fetch discarded");
                            return;
                        }
                        match result {
                            Ok(Record::Avatar(avatar)) => {
                                av.fetched.push(avatar);
                                if av.pending.is_empty() {
                                    Next::ListDone
                                } else {
                                    Next::MoreToCome
                                }
                            }
                            Ok(record) => Next::Fail(
                                eject_code::DATA_INTEGRITY,
                                format!(
                                    "Avatar {avatar_id} was not found in the database (found a {} record).",
                                    record.kind()
                                ),
                            ),
                            Err(e) => {
                                Next::Fail(directory_eject_code(&e), e.to_string())
                            }
                        }
                    }
                    AvatarState::GetTargetAvatar => match result {
                        Ok(Record::Avatar(avatar)) => {
                            if avatar.account_id == account_id {
                                Next::Activate(avatar)
                            } else {
                                Next::Fail(
                                    eject_code::DATA_INTEGRITY,
                                    format!(
                                        "Avatar {avatar_id} belongs to another account."
                                    ),
                                )
                            }
                        }
                        Ok(record) => Next::Fail(
                            eject_code::DATA_INTEGRITY,
                            format!(
                                "Avatar {avatar_id} was not found in the database (found a {} record).",
                                record.kind()
                            ),
                        ),
                        Err(e) => Next::Fail(directory_eject_code(&e), e.to_string()),
                    },
                    _ => {
                        tracing::trace!(%account_id, %op, "stale avatar fetch discarded");
                        return;
                    }
                }
            }
            _ => {
                tracing::trace!(%account_id, %op, "stale avatar fetch discarded");
                return;
            }
        };

        match next {
            Next::ListDone => self.send_avatar_list(account_id, op),
            Next::Activate(avatar) => self.activate_avatar(account_id, op, avatar),
            Next::Fail(code, reason) => {
                tracing::error!(target: "audit", %account_id, %reason, "avatar fetch failed");
                self.fail_account_op(account_id, code, &reason);
            }
            Next::MoreToCome => {}
        }
    }

    /// Compiles and sends the avatar list, then retires the operation.
    fn send_avatar_list(&mut self, account_id: AccountId, op: OpId) {
        let compiled = match self.account_ops.get(&account_id) {
            Some(Operation { id, kind: OperationKind::Avatar(av) }) if *id == op => {
                let mut entries = Vec::with_capacity(av.fetched.len());
                for (slot, slot_id) in av.slots.iter().enumerate() {
                    if slot_id.is_empty() {
                        continue;
                    }
                    if let Some(avatar) =
                        av.fetched.iter().find(|a| a.avatar_id == *slot_id)
                    {
                        let (name, review) = avatar.display_name();
                        entries.push(AvatarEntry {
                            avatar_id: avatar.avatar_id,
                            slot: slot as u8,
                            name,
                            review,
                        });
                    }
                }
                Some((av.connection_id, entries))
            }
            _ => None,
        };

        let Some((connection_id, entries)) = compiled else { return };
        tracing::debug!(%account_id, avatars = entries.len(), "avatar list compiled");
        self.send(connection_id, ServerMessage::AvatarList { entries });
        self.retire_account_op(account_id);
    }

    // -----------------------------------------------------------------
    // RemoveAvatar
    // -----------------------------------------------------------------

    /// Validates membership, then persists the zeroed slot with an
    /// optimistic precondition on the previously stored slot list.
    fn process_remove(&mut self, account_id: AccountId, op: OpId, avatar_id: AvatarId) {
        enum Next {
            Persist {
                expected: Vec<AvatarId>,
                new_slots: Vec<AvatarId>,
                removed: Vec<RemovedAvatar>,
            },
            NotOnAccount,
        }

        let next = match self.account_ops.get_mut(&account_id) {
            Some(Operation { id, kind: OperationKind::Avatar(av) })
                if *id == op && av.state == AvatarState::RetrieveAccount =>
            {
                if !av.slots.contains(&avatar_id) {
                    Next::NotOnAccount
                } else {
                    av.state = AvatarState::ProcessRemove;
                    let account = av.account.as_ref();
                    // Precondition on the slot list exactly as stored,
                    // before sanitization.
                    let expected = account
                        .map(|a| a.avatar_slots.clone())
                        .unwrap_or_default();
                    let mut removed = account
                        .map(|a| a.removed_avatars.clone())
                        .unwrap_or_default();
                    removed.push(RemovedAvatar { avatar_id, removed_at: unix_now() });
                    let new_slots: Vec<AvatarId> = av
                        .slots
                        .iter()
                        .map(|s| if *s == avatar_id { AvatarId::EMPTY } else { *s })
                        .collect();
                    Next::Persist { expected, new_slots, removed }
                }
            }
            _ => return,
        };

        match next {
            Next::Persist { expected, new_slots, removed } => {
                tracing::info!(
                    target: "audit",
                    %account_id, %avatar_id,
                    restorable_until = unix_now() + self.config.removal_grace_secs,
                    "avatar removal requested"
                );
                // Best-effort heads-up before the write; presence/estate
                // can tolerate hearing about a removal that then fails.
                self.control(Directive::AnnounceRemoved { avatar_id });
                self.spawn_update_avatars(account_id, op, expected, new_slots, removed);
            }
            Next::NotOnAccount => {
                self.fail_account_op(
                    account_id,
                    eject_code::VIOLATION,
                    "Tried to remove an avatar not on the account!",
                );
            }
        }
    }

    fn spawn_update_avatars(
        &self,
        account_id: AccountId,
        op: OpId,
        expected: Vec<AvatarId>,
        new_slots: Vec<AvatarId>,
        removed: Vec<RemovedAvatar>,
    ) {
        let records = Arc::clone(&self.records);
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let result = records
                .update_avatars(account_id, &expected, &new_slots, &removed)
                .await;
            let _ = commands.send(Command::AvatarsPersisted { account_id, op, result });
        });
    }

    pub(crate) fn on_avatars_persisted(
        &mut self,
        account_id: AccountId,
        op: OpId,
        result: Result<(), DirectoryError>,
    ) {
        enum Next {
            Refresh,
            Fail(u16, String),
        }

        let next = match self.account_ops.get_mut(&account_id) {
            Some(Operation { id, kind: OperationKind::Avatar(av) })
                if *id == op && av.state == AvatarState::ProcessRemove =>
            {
                match (result, av.intent) {
                    (Ok(()), AvatarIntent::Remove { avatar_id }) => {
                        // Bring the in-memory view in line with what was
                        // just persisted, then refresh the client's list.
                        for slot in av.slots.iter_mut() {
                            if *slot == avatar_id {
                                *slot = AvatarId::EMPTY;
                            }
                        }
                        if let Some(account) = av.account.as_mut() {
                            account.avatar_slots = av.slots.clone();
                            account.removed_avatars.push(RemovedAvatar {
                                avatar_id,
                                removed_at: unix_now(),
                            });
                        }
                        Next::Refresh
                    }
                    (Ok(()), _) => Next::Refresh,
                    (Err(e @ DirectoryError::PreconditionFailed(_)), _) => Next::Fail(
                        eject_code::DATA_INTEGRITY,
                        format!("Account {account_id} changed during avatar removal: {e}"),
                    ),
                    (Err(e), _) => Next::Fail(directory_eject_code(&e), e.to_string()),
                }
            }
            _ => {
                tracing::trace!(%account_id, %op, "stale avatar update discarded");
                return;
            }
        };

        match next {
            Next::Refresh => self.enter_query_avatars(account_id, op),
            Next::Fail(code, reason) => {
                tracing::error!(target: "audit", %account_id, %reason, "avatar removal failed");
                self.fail_account_op(account_id, code, &reason);
            }
        }
    }

    // -----------------------------------------------------------------
    // ActivateAvatar
    // -----------------------------------------------------------------

    /// Validates membership and fetches the activation target.
    fn fetch_activation_target(
        &mut self,
        account_id: AccountId,
        op: OpId,
        avatar_id: AvatarId,
    ) {
        let admitted = match self.account_ops.get_mut(&account_id) {
            Some(Operation { id, kind: OperationKind::Avatar(av) })
                if *id == op && av.state == AvatarState::RetrieveAccount =>
            {
                if av.slots.contains(&avatar_id) {
                    av.state = AvatarState::GetTargetAvatar;
                    true
                } else {
                    false
                }
            }
            _ => return,
        };

        if admitted {
            self.spawn_avatar_fetch(account_id, op, avatar_id);
        } else {
            self.fail_account_op(
                account_id,
                eject_code::VIOLATION,
                "Tried to play an avatar not on the account!",
            );
        }
    }

    /// Runs the activation sequence and retires the operation.
    fn activate_avatar(
        &mut self,
        account_id: AccountId,
        op: OpId,
        avatar: gatehouse_directory::Avatar,
    ) {
        let context = match self.account_ops.get(&account_id) {
            Some(Operation { id, kind: OperationKind::Avatar(av) }) if *id == op => {
                let (days, rank) = av
                    .account
                    .as_ref()
                    .map(|a| (a.age_days(unix_now()), a.access_level.rank()))
                    .unwrap_or((0, gatehouse_directory::AccessLevel::User.rank()));
                Some((av.connection_id, days, rank))
            }
            _ => None,
        };
        let Some((connection_id, days, rank)) = context else { return };

        let avatar_id = avatar.avatar_id;

        // Arm the force-unload compensation before anything is visible,
        // so a connection drop mid-activation still tears down cleanly.
        if let Some(session) = self.sessions.get_mut(&connection_id) {
            session.on_disconnect.push(Directive::UnloadObject { avatar_id });
        }

        self.send(connection_id, ServerMessage::AccountDays { days });

        self.control(Directive::ActivateObject { avatar_id, access_level: rank });
        self.control(Directive::BindChannel {
            connection_id,
            channel: Channel::for_avatar(avatar_id),
        });
        self.control(Directive::AddSessionObject { connection_id, avatar_id });
        self.control(Directive::SetIdentity {
            connection_id,
            identity: CompositeId::with_avatar(account_id, avatar_id),
        });
        self.control(Directive::GrantOwnership { avatar_id, connection_id });
        self.control(Directive::AnnounceOnline { avatar_id });

        if let Some(session) = self.sessions.get_mut(&connection_id) {
            session.on_disconnect.push(Directive::AnnounceOffline { avatar_id });
            session.identity = Identity::Avatar { account_id, avatar_id };
        }

        self.retire_account_op(account_id);
        tracing::info!(%connection_id, %account_id, %avatar_id, "avatar activated");
    }

    // -----------------------------------------------------------------
    // DeactivateAvatar
    // -----------------------------------------------------------------

    /// Deactivates the connection's active avatar. Deselecting when no
    /// avatar is active is benign and ignored.
    pub(crate) fn deactivate_avatar(&mut self, connection_id: ConnectionId) {
        let identity = self
            .sessions
            .get(&connection_id)
            .map(|s| s.identity)
            .unwrap_or(Identity::Anonymous);

        let (account_id, avatar_id) = match identity {
            Identity::Anonymous => {
                self.eject_connection(
                    connection_id,
                    eject_code::VIOLATION,
                    "Not logged in.",
                );
                return;
            }
            Identity::Account(_) => {
                tracing::debug!(%connection_id, "deselect with no active avatar; ignored");
                return;
            }
            Identity::Avatar { account_id, avatar_id } => (account_id, avatar_id),
        };

        if self.account_ops.contains_key(&account_id) {
            self.eject_account(
                account_id,
                eject_code::DUPLICATE_OPERATION,
                "An operation is already underway for this account.",
            );
            return;
        }

        self.control(Directive::AnnounceOffline { avatar_id });

        // The orderly teardown replaces the compensation actions.
        if let Some(session) = self.sessions.get_mut(&connection_id) {
            session.on_disconnect.retain(|d| {
                !matches!(
                    d,
                    Directive::UnloadObject { avatar_id: a }
                    | Directive::AnnounceOffline { avatar_id: a }
                        if *a == avatar_id
                )
            });
            session.identity = Identity::Account(account_id);
        }

        self.control(Directive::UnbindChannel {
            connection_id,
            channel: Channel::for_avatar(avatar_id),
        });
        self.control(Directive::SetIdentity {
            connection_id,
            identity: CompositeId::account_only(account_id),
        });
        self.control(Directive::RemoveSessionObject { connection_id, avatar_id });
        self.control(Directive::UnloadObject { avatar_id });

        tracing::info!(%connection_id, %account_id, %avatar_id, "avatar deactivated");
    }
}
