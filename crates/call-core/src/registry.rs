//! # Call Registry
//!
//! Two tables keyed by Call-ID: the in-flight transaction of each call and the
//! established dialog. The registry is the single source of truth about what
//! is in progress; every decision of the dispatcher, composer, initiator and
//! reactor is taken against it.
//!
//! ## Locking
//!
//! ```text
//! lock(call_id)  ──►  per Call-ID async guard   (held across awaits)
//!                        │
//!                        └──►  admission lock   (sync, never held across an await)
//! ```
//!
//! Check-then-write sequences for one call run while its [`CallGuard`] is
//! held. Admission, promotion and establishment additionally take the
//! system-wide admission lock because the single-call policy looks at every
//! call, not just one. Always take the Call-ID guard first.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, trace};

use crate::dialog::Dialog;
use crate::message::{CallId, Method, Request};
use crate::transaction::{Transaction, TransactionKey};

/// Outcome of [`CallRegistry::admit_invite`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The transaction was registered; go ahead and answer
    Admitted,
    /// An INVITE is already pending for this Call-ID (491)
    Pending,
    /// A dialog is established or another call is being set up (486)
    Busy,
}

/// Exclusive access to one Call-ID, released on drop
#[derive(Debug)]
pub struct CallGuard {
    call_id: CallId,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<CallId, Arc<Mutex<()>>>>,
}

impl CallGuard {
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Nobody else holds or waits on this lock once only the map's Arc is left
        self.locks
            .remove_if(&self.call_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Call-ID keyed transaction and dialog tables
#[derive(Debug, Default)]
pub struct CallRegistry {
    transactions: DashMap<CallId, Transaction>,
    dialogs: DashMap<CallId, Dialog>,
    call_locks: Arc<DashMap<CallId, Arc<Mutex<()>>>>,
    admission: parking_lot::Mutex<()>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `call_id`
    pub async fn lock(&self, call_id: &CallId) -> CallGuard {
        let lock = {
            let entry = self
                .call_locks
                .entry(call_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())));
            Arc::clone(entry.value())
        };
        let guard = lock.lock_owned().await;
        trace!("Acquired call lock for {}", call_id);
        CallGuard {
            call_id: call_id.clone(),
            guard: Some(guard),
            locks: Arc::clone(&self.call_locks),
        }
    }

    /// Check and register an inbound INVITE in one step.
    ///
    /// Serialized with every other admission, promotion and establishment, so
    /// two INVITEs with different Call-IDs can never both be admitted.
    pub fn admit_invite(&self, call_id: &CallId, transaction: Transaction) -> Admission {
        let _admission = self.admission.lock();

        if self.search(call_id, &Method::Invite).is_some() {
            return Admission::Pending;
        }
        if !self.dialogs.is_empty() || self.has_pending_invite() {
            return Admission::Busy;
        }

        debug!("Admitted INVITE {} for call {}", transaction.id, call_id);
        self.transactions.insert(call_id.clone(), transaction);
        Admission::Admitted
    }

    /// Register a locally originated INVITE unless another call is in progress
    pub fn admit_outbound_invite(&self, call_id: &CallId, transaction: Transaction) -> bool {
        let _admission = self.admission.lock();

        if !self.dialogs.is_empty() || self.has_pending_invite() {
            return false;
        }
        self.transactions.insert(call_id.clone(), transaction);
        true
    }

    /// Replace the INVITE transaction entry of `call_id` by its dialog
    pub fn promote(&self, call_id: &CallId, dialog: Dialog) {
        let _admission = self.admission.lock();
        self.transactions.remove(call_id);
        self.dialogs.insert(call_id.clone(), dialog);
        debug!("Promoted call {} to an established dialog", call_id);
    }

    /// Register the dialog of an answered outbound INVITE
    pub fn establish(&self, call_id: &CallId, dialog: Dialog) {
        let _admission = self.admission.lock();
        self.dialogs.insert(call_id.clone(), dialog);
        debug!("Registered dialog for call {}", call_id);
    }

    /// Insert or replace the transaction entry
    pub fn put_transaction(&self, call_id: &CallId, transaction: Transaction) -> Option<Transaction> {
        self.transactions.insert(call_id.clone(), transaction)
    }

    /// Insert the transaction entry only if the slot is free
    pub fn register_transaction(&self, call_id: &CallId, transaction: Transaction) -> bool {
        match self.transactions.entry(call_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(transaction);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Remove both entries for `call_id`
    pub fn remove(&self, call_id: &CallId) {
        let transaction = self.transactions.remove(call_id);
        let dialog = self.dialogs.remove(call_id);
        debug!(
            "Removed call {} (transaction: {}, dialog: {})",
            call_id,
            transaction.is_some(),
            dialog.is_some()
        );
    }

    pub fn remove_transaction(&self, call_id: &CallId) -> Option<Transaction> {
        self.transactions.remove(call_id).map(|(_, transaction)| transaction)
    }

    /// Remove the transaction entry only if it belongs to `key`
    pub fn remove_transaction_if(&self, call_id: &CallId, key: &TransactionKey) -> bool {
        self.transactions
            .remove_if(call_id, |_, transaction| &transaction.id == key)
            .is_some()
    }

    /// Whether a dialog is established for `call_id`
    pub fn find_dialog(&self, call_id: &CallId) -> bool {
        self.dialogs.contains_key(call_id)
    }

    pub fn dialog(&self, call_id: &CallId) -> Option<Dialog> {
        self.dialogs.get(call_id).map(|dialog| dialog.clone())
    }

    pub fn transaction(&self, call_id: &CallId) -> Option<Transaction> {
        self.transactions.get(call_id).map(|transaction| transaction.clone())
    }

    /// The registered request for `call_id`, only if its method is `method`
    pub fn search(&self, call_id: &CallId, method: &Method) -> Option<Request> {
        self.transactions
            .get(call_id)
            .filter(|transaction| transaction.method() == method)
            .map(|transaction| transaction.request.clone())
    }

    /// The registered INVITE transaction for `call_id`, either role
    pub fn pending_invite(&self, call_id: &CallId) -> Option<Transaction> {
        self.transactions
            .get(call_id)
            .filter(|transaction| transaction.method().is_invite())
            .map(|transaction| transaction.clone())
    }

    /// Any dialog established, system-wide
    pub fn has_dialog(&self) -> bool {
        !self.dialogs.is_empty()
    }

    /// Any INVITE transaction registered, system-wide
    pub fn has_pending_invite(&self) -> bool {
        self.transactions
            .iter()
            .any(|entry| entry.value().method().is_invite())
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn dialog_count(&self) -> usize {
        self.dialogs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty() && self.dialogs.is_empty()
    }

    /// Number of Call-IDs with a live lock entry
    pub fn active_locks(&self) -> usize {
        self.call_locks.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dialog::{DialogId, DialogState};
    use crate::message::{CSeq, NameAddr, Tag, TransportProtocol, Uri, Via};
    use crate::transaction::TransactionState;

    fn request(call_id: &str, method: Method) -> Request {
        let uri = Uri::new(Some("bob".into()), "127.0.0.1", Some(5060));
        Request {
            method: method.clone(),
            uri: uri.clone(),
            call_id: CallId::new(call_id),
            cseq: CSeq::new(1, method),
            from: NameAddr::new(Uri::new(Some("alice".into()), "127.0.0.1", Some(5070)))
                .with_tag(Tag::new("a1")),
            to: NameAddr::new(uri),
            via: vec![Via::new(TransportProtocol::Udp, "127.0.0.1", 5070)
                .with_branch(format!("z9hG4bK-{}", call_id))],
            max_forwards: 70,
            contact: None,
            body: None,
        }
    }

    fn server_txn(call_id: &str, method: Method, branch: &str) -> Transaction {
        let key = TransactionKey::new(branch, method.clone(), true);
        Transaction::new(key, request(call_id, method), TransactionState::Proceeding)
    }

    fn dialog(call_id: &str) -> Dialog {
        let uri = Uri::new(Some("bob".into()), "127.0.0.1", Some(5060));
        Dialog {
            id: DialogId::new(),
            call_id: CallId::new(call_id),
            state: DialogState::Confirmed,
            local_tag: Some(Tag::new("l")),
            remote_tag: Some(Tag::new("r")),
            local_uri: uri.clone(),
            remote_uri: uri.clone(),
            remote_target: uri,
            local_cseq: 1,
            is_initiator: false,
        }
    }

    #[test]
    fn test_empty_registry_lookups() {
        let registry = CallRegistry::new();
        let id = CallId::new("nothing");
        assert!(!registry.find_dialog(&id));
        assert!(registry.search(&id, &Method::Invite).is_none());
        assert!(registry.remove_transaction(&id).is_none());
        registry.remove(&id);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_search_matches_method() {
        let registry = CallRegistry::new();
        let id = CallId::new("c1");
        registry.put_transaction(&id, server_txn("c1", Method::Bye, "b1"));
        assert!(registry.search(&id, &Method::Invite).is_none());
        let found = registry.search(&id, &Method::Bye).unwrap();
        assert_eq!(found.method, Method::Bye);
    }

    #[test]
    fn test_admission_outcomes() {
        let registry = CallRegistry::new();
        let c1 = CallId::new("c1");
        let c2 = CallId::new("c2");

        assert_eq!(
            registry.admit_invite(&c1, server_txn("c1", Method::Invite, "b1")),
            Admission::Admitted
        );
        assert_eq!(
            registry.admit_invite(&c1, server_txn("c1", Method::Invite, "b2")),
            Admission::Pending
        );
        assert_eq!(
            registry.admit_invite(&c2, server_txn("c2", Method::Invite, "b3")),
            Admission::Busy
        );
        // first entry untouched
        assert_eq!(registry.transaction(&c1).unwrap().id.branch, "b1");

        registry.promote(&c1, dialog("c1"));
        assert!(registry.transaction(&c1).is_none());
        assert!(registry.find_dialog(&c1));
        assert_eq!(
            registry.admit_invite(&c2, server_txn("c2", Method::Invite, "b4")),
            Admission::Busy
        );
        assert!(!registry.admit_outbound_invite(&c2, server_txn("c2", Method::Invite, "b5")));
    }

    #[test]
    fn test_register_transaction_keeps_existing() {
        let registry = CallRegistry::new();
        let id = CallId::new("c1");
        assert!(registry.register_transaction(&id, server_txn("c1", Method::Bye, "b1")));
        assert!(!registry.register_transaction(&id, server_txn("c1", Method::Bye, "b2")));
        assert_eq!(registry.transaction(&id).unwrap().id.branch, "b1");
    }

    #[test]
    fn test_remove_transaction_if_checks_key() {
        let registry = CallRegistry::new();
        let id = CallId::new("c1");
        let txn = server_txn("c1", Method::Invite, "b1");
        let other = server_txn("c1", Method::Invite, "b2");
        registry.put_transaction(&id, txn.clone());

        assert!(!registry.remove_transaction_if(&id, &other.id));
        assert_eq!(registry.transaction_count(), 1);
        assert!(registry.remove_transaction_if(&id, &txn.id));
        assert_eq!(registry.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_call_lock_serializes_and_prunes() {
        let registry = Arc::new(CallRegistry::new());
        let id = CallId::new("c1");

        let guard = registry.lock(&id).await;
        assert_eq!(guard.call_id(), &id);

        let contender = {
            let registry = Arc::clone(&registry);
            let id = id.clone();
            tokio::spawn(async move {
                let _guard = registry.lock(&id).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
        assert_eq!(registry.active_locks(), 0);
    }

    #[tokio::test]
    async fn test_locks_for_different_calls_are_independent() {
        let registry = CallRegistry::new();
        let _a = registry.lock(&CallId::new("a")).await;
        let _b = registry.lock(&CallId::new("b")).await;
        assert_eq!(registry.active_locks(), 2);
    }
}
