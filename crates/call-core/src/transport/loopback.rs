//! In-memory transport stack
//!
//! [`LoopbackStack`] implements [`TransportStack`] without sockets. Every
//! message it sends is recorded for inspection. When two stacks are linked
//! with [`LoopbackStack::link`], requests and responses are handed to the
//! peer and surface there as [`StackEvent`]s, which is enough to run two
//! call agents against each other in one process.
//!
//! There are no timers; timeouts are injected with [`LoopbackStack::inject`].
//! Any primitive can be made to fail once with [`LoopbackStack::fail_next`].

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Notify, mpsc};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::TransportStack;
use super::events::{RequestEvent, ResponseEvent, StackEvent};
use crate::dialog::{Dialog, DialogId, DialogState};
use crate::error::{StackError, StackResult};
use crate::message::{
    CSeq, CallId, Method, NameAddr, Request, RequestParams, Response, StatusCode, Tag,
    TransportProtocol, Via,
};
use crate::transaction::{Transaction, TransactionKey, TransactionState};

/// Default capacity of the event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Magic cookie every RFC 3261 branch starts with
const BRANCH_PREFIX: &str = "z9hG4bK";

/// Max-Forwards on requests the stack builds itself (ACK, in-dialog requests)
const STACK_MAX_FORWARDS: u8 = 70;

/// A stack primitive, for fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    BuildRequest,
    BuildResponse,
    OpenClientTransaction,
    OpenServerTransaction,
    OpenDialog,
    CreateRequest,
    CreateCancel,
    SendRequest,
    SendResponse,
    SendInDialog,
    SendAck,
    Terminate,
}

impl Primitive {
    fn failure(&self) -> StackError {
        let reason = format!("injected failure in {:?}", self);
        match self {
            Primitive::BuildRequest | Primitive::BuildResponse => StackError::Build(reason),
            Primitive::OpenClientTransaction
            | Primitive::OpenServerTransaction
            | Primitive::CreateCancel
            | Primitive::Terminate => StackError::Transaction(reason),
            Primitive::OpenDialog | Primitive::CreateRequest => StackError::Dialog(reason),
            Primitive::SendRequest
            | Primitive::SendResponse
            | Primitive::SendInDialog
            | Primitive::SendAck => StackError::Send(reason),
        }
    }
}

/// A message the stack put on the (virtual) wire
#[derive(Debug, Clone, PartialEq)]
pub enum SentMessage {
    Request(Request),
    Response(Response),
    Ack { call_id: CallId, cseq: u32 },
}

/// In-memory [`TransportStack`]
pub struct LoopbackStack {
    local_addr: SocketAddr,
    transport: TransportProtocol,
    events: mpsc::Sender<StackEvent>,
    peer: RwLock<Option<Weak<LoopbackStack>>>,
    client_transactions: DashMap<TransactionKey, Transaction>,
    server_transactions: DashMap<TransactionKey, Transaction>,
    dialogs: DashMap<CallId, Dialog>,
    /// Our To-tag per inbound call
    local_tags: DashMap<CallId, Tag>,
    sent: Mutex<Vec<SentMessage>>,
    sent_notify: Notify,
    faults: Mutex<Vec<Primitive>>,
}

impl fmt::Debug for LoopbackStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackStack")
            .field("local_addr", &self.local_addr)
            .field("transport", &self.transport)
            .field("dialogs", &self.dialogs.len())
            .field("sent", &self.sent.lock().len())
            .finish()
    }
}

impl LoopbackStack {
    /// Create a stack and the receiver of its events
    pub fn new(local_addr: SocketAddr) -> (Arc<Self>, mpsc::Receiver<StackEvent>) {
        Self::with_capacity(local_addr, TransportProtocol::Udp, DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(
        local_addr: SocketAddr,
        transport: TransportProtocol,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<StackEvent>) {
        let (events, rx) = mpsc::channel(capacity);
        let stack = Arc::new(Self {
            local_addr,
            transport,
            events,
            peer: RwLock::new(None),
            client_transactions: DashMap::new(),
            server_transactions: DashMap::new(),
            dialogs: DashMap::new(),
            local_tags: DashMap::new(),
            sent: Mutex::new(Vec::new()),
            sent_notify: Notify::new(),
            faults: Mutex::new(Vec::new()),
        });
        (stack, rx)
    }

    /// Connect two stacks so that whatever one sends the other receives
    pub fn link(a: &Arc<Self>, b: &Arc<Self>) {
        *a.peer.write() = Some(Arc::downgrade(b));
        *b.peer.write() = Some(Arc::downgrade(a));
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Make the next call of `primitive` fail
    pub fn fail_next(&self, primitive: Primitive) {
        self.faults.lock().push(primitive);
    }

    /// Queue an event as if the stack had observed it
    pub async fn inject(&self, event: StackEvent) -> StackResult<()> {
        self.events.send(event).await.map_err(|_| StackError::Closed)
    }

    /// Everything sent so far, oldest first
    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    pub fn sent_requests(&self) -> Vec<Request> {
        self.sent
            .lock()
            .iter()
            .filter_map(|message| match message {
                SentMessage::Request(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn sent_responses(&self) -> Vec<Response> {
        self.sent
            .lock()
            .iter()
            .filter_map(|message| match message {
                SentMessage::Response(response) => Some(response.clone()),
                _ => None,
            })
            .collect()
    }

    /// Status codes of the sent responses, oldest first
    pub fn sent_statuses(&self) -> Vec<u16> {
        self.sent_responses()
            .iter()
            .map(|response| response.status.as_u16())
            .collect()
    }

    /// CSeq numbers of the sent ACKs
    pub fn acks(&self) -> Vec<u32> {
        self.sent
            .lock()
            .iter()
            .filter_map(|message| match message {
                SentMessage::Ack { cseq, .. } => Some(*cseq),
                _ => None,
            })
            .collect()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    /// Wait until at least `count` messages have been sent
    pub async fn wait_for_sent(&self, count: usize, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let notified = self.sent_notify.notified();
            if self.sent.lock().len() >= count {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.sent.lock().len() >= count;
            }
        }
    }

    /// The stack's own view of the dialog for `call_id`
    pub fn dialog(&self, call_id: &CallId) -> Option<Dialog> {
        self.dialogs.get(call_id).map(|dialog| dialog.value().clone())
    }

    pub fn client_transaction(&self, key: &TransactionKey) -> Option<Transaction> {
        self.client_transactions.get(key).map(|txn| txn.value().clone())
    }

    pub fn server_transaction(&self, key: &TransactionKey) -> Option<Transaction> {
        self.server_transactions.get(key).map(|txn| txn.value().clone())
    }

    /// Accept a request from the network: match or create its server
    /// transaction and dialog, then queue a [`StackEvent::Request`]
    pub fn receive_request(&self, request: Request) -> StackResult<()> {
        trace!("Loopback {} received {} for {}", self.local_addr, request.method, request.call_id);
        let dialog = self.dialog(&request.call_id);

        let event = if request.method == Method::Ack {
            if let Some(mut dialog) = self.dialogs.get_mut(&request.call_id) {
                dialog.state = DialogState::Confirmed;
            }
            RequestEvent {
                request,
                server_transaction: None,
                dialog,
            }
        } else {
            let transaction = self.server_transaction_for(&request);
            RequestEvent {
                request,
                server_transaction: Some(transaction),
                dialog,
            }
        };
        self.emit(StackEvent::Request(event))
    }

    /// Accept a response from the network and match it to a client transaction.
    /// Responses for unknown transactions are dropped.
    pub fn receive_response(&self, response: Response) -> StackResult<()> {
        let Some(branch) = response.top_branch() else {
            debug!("Dropping response {} without branch", response.status);
            return Ok(());
        };
        let key = TransactionKey::new(branch, response.cseq.method.clone(), false);

        let client_transaction = match self.client_transactions.get_mut(&key) {
            Some(mut entry) => {
                let next = next_state(&key.method, response.status);
                entry.state = next;
                entry.value().clone()
            }
            None => {
                debug!("Dropping stray response {} for {}", response.status, key);
                return Ok(());
            }
        };

        let call_id = response.call_id.clone();
        let dialog = if key.method.is_invite() {
            self.update_dialog_from_response(&response)
        } else {
            self.dialog(&call_id)
        };

        self.emit(StackEvent::Response(ResponseEvent {
            response: response.clone(),
            client_transaction,
            dialog,
        }))?;

        if key.method == Method::Bye && response.status.is_success() {
            self.close_dialog(&call_id);
        }
        Ok(())
    }

    fn update_dialog_from_response(&self, response: &Response) -> Option<Dialog> {
        let call_id = &response.call_id;
        if response.status.is_final() && !response.status.is_success() {
            return self.dialogs.remove(call_id).map(|(_, mut dialog)| {
                dialog.state = DialogState::Terminated;
                dialog
            });
        }

        let mut dialog = self.dialogs.get_mut(call_id)?;
        if let Some(tag) = &response.to.tag {
            dialog.remote_tag = Some(tag.clone());
        }
        if let Some(contact) = &response.contact {
            dialog.remote_target = contact.clone();
        }
        if response.status.is_success() {
            dialog.state = DialogState::Confirmed;
        } else if dialog.state == DialogState::Initial && dialog.remote_tag.is_some() {
            dialog.state = DialogState::Early;
        }
        Some(dialog.value().clone())
    }

    fn close_dialog(&self, call_id: &CallId) {
        if let Some((_, mut dialog)) = self.dialogs.remove(call_id) {
            dialog.state = DialogState::Terminated;
            self.notice(StackEvent::DialogTerminated(dialog));
        }
        self.local_tags.remove(call_id);
    }

    fn server_transaction_for(&self, request: &Request) -> Transaction {
        let branch = request
            .top_branch()
            .map(str::to_string)
            .unwrap_or_else(new_branch);
        let key = TransactionKey::new(branch, request.method.clone(), true);
        self.server_transactions
            .entry(key.clone())
            .or_insert_with(|| {
                let state = if request.method.is_invite() {
                    TransactionState::Proceeding
                } else {
                    TransactionState::Trying
                };
                Transaction::new(key, request.clone(), state)
            })
            .value()
            .clone()
    }

    fn check_fault(&self, primitive: Primitive) -> StackResult<()> {
        let mut faults = self.faults.lock();
        if let Some(pos) = faults.iter().position(|armed| *armed == primitive) {
            faults.remove(pos);
            return Err(primitive.failure());
        }
        Ok(())
    }

    fn record(&self, message: SentMessage) {
        self.sent.lock().push(message);
        self.sent_notify.notify_waiters();
    }

    fn emit(&self, event: StackEvent) -> StackResult<()> {
        self.events.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                StackError::Send(format!("event queue of {} is full", self.local_addr))
            }
            mpsc::error::TrySendError::Closed(_) => StackError::Closed,
        })
    }

    /// Queue a local notice; losing one is not an error for the sender
    fn notice(&self, event: StackEvent) {
        let kind = event.kind();
        if let Err(e) = self.emit(event) {
            warn!("Dropping {} notice: {}", kind, e);
        }
    }

    fn peer(&self) -> StackResult<Option<Arc<LoopbackStack>>> {
        match &*self.peer.read() {
            None => Ok(None),
            Some(weak) => weak
                .upgrade()
                .map(Some)
                .ok_or_else(|| StackError::Send("peer stack is gone".to_string())),
        }
    }

    fn forward_request(&self, request: Request) -> StackResult<()> {
        match self.peer()? {
            Some(peer) => peer.receive_request(request),
            None => Ok(()),
        }
    }

    fn forward_response(&self, response: Response) -> StackResult<()> {
        match self.peer()? {
            Some(peer) => peer.receive_response(response),
            None => Ok(()),
        }
    }

    fn local_via(&self) -> Via {
        Via::new(
            self.transport,
            self.local_addr.ip().to_string(),
            self.local_addr.port(),
        )
    }

    fn in_dialog_request(&self, dialog: &Dialog, method: Method, seq: u32) -> Request {
        Request {
            method: method.clone(),
            uri: dialog.remote_target.clone(),
            call_id: dialog.call_id.clone(),
            cseq: CSeq::new(seq, method),
            from: NameAddr {
                uri: dialog.local_uri.clone(),
                tag: dialog.local_tag.clone(),
            },
            to: NameAddr {
                uri: dialog.remote_uri.clone(),
                tag: dialog.remote_tag.clone(),
            },
            via: vec![self.local_via().with_branch(new_branch())],
            max_forwards: STACK_MAX_FORWARDS,
            contact: None,
            body: None,
        }
    }

    fn dispatch_request(&self, transaction: &Transaction) -> StackResult<()> {
        let key = &transaction.id;
        if let Some(mut entry) = self.client_transactions.get_mut(key) {
            if entry.state == TransactionState::Terminated {
                return Err(StackError::Terminated(key.to_string()));
            }
            entry.state = if key.method.is_invite() {
                TransactionState::Calling
            } else {
                TransactionState::Trying
            };
        }

        debug!("Loopback {} sending {} for {}", self.local_addr, key.method, transaction.call_id());
        self.record(SentMessage::Request(transaction.request.clone()));
        self.forward_request(transaction.request.clone())
    }
}

/// State a transaction moves to after `status` is sent or received
fn next_state(method: &Method, status: StatusCode) -> TransactionState {
    if status.is_provisional() {
        TransactionState::Proceeding
    } else if method.is_invite() && status.is_success() {
        TransactionState::Terminated
    } else {
        TransactionState::Completed
    }
}

fn new_branch() -> String {
    format!("{}{}", BRANCH_PREFIX, Uuid::new_v4().simple())
}

#[async_trait]
impl TransportStack for LoopbackStack {
    fn new_call_id(&self) -> CallId {
        CallId::new(format!("{}@{}", Uuid::new_v4(), self.local_addr.ip()))
    }

    async fn build_request(&self, params: RequestParams) -> StackResult<Request> {
        self.check_fault(Primitive::BuildRequest)?;
        Ok(Request::from(params))
    }

    async fn build_response(&self, status: StatusCode, request: &Request) -> StackResult<Response> {
        self.check_fault(Primitive::BuildResponse)?;
        let mut response = Response::from_request(status, request);
        if status != StatusCode::Trying && response.to.tag.is_none() {
            let tag = self
                .local_tags
                .entry(request.call_id.clone())
                .or_insert_with(Tag::random)
                .value()
                .clone();
            response.to.tag = Some(tag);
        }
        Ok(response)
    }

    async fn open_client_transaction(&self, mut request: Request) -> StackResult<Transaction> {
        self.check_fault(Primitive::OpenClientTransaction)?;
        let branch = new_branch();
        match request.via.first_mut() {
            Some(via) => via.branch = Some(branch.clone()),
            None => request.via.push(self.local_via().with_branch(branch.clone())),
        }

        let key = TransactionKey::new(branch, request.method.clone(), false);
        let transaction = Transaction::new(key.clone(), request, TransactionState::Initial);
        self.client_transactions.insert(key, transaction.clone());
        Ok(transaction)
    }

    async fn open_server_transaction(&self, request: &Request) -> StackResult<Transaction> {
        self.check_fault(Primitive::OpenServerTransaction)?;
        Ok(self.server_transaction_for(request))
    }

    async fn open_dialog(&self, transaction: &Transaction) -> StackResult<Dialog> {
        self.check_fault(Primitive::OpenDialog)?;
        if !transaction.method().is_invite() {
            return Err(StackError::Dialog(format!(
                "{} does not create dialogs",
                transaction.method()
            )));
        }

        let request = &transaction.request;
        let call_id = request.call_id.clone();
        let dialog = if transaction.is_server() {
            let local_tag = self
                .local_tags
                .entry(call_id.clone())
                .or_insert_with(Tag::random)
                .value()
                .clone();
            Dialog {
                id: DialogId::new(),
                call_id: call_id.clone(),
                state: DialogState::Initial,
                local_tag: Some(local_tag),
                remote_tag: request.from.tag.clone(),
                local_uri: request.to.uri.clone(),
                remote_uri: request.from.uri.clone(),
                remote_target: request
                    .contact
                    .clone()
                    .unwrap_or_else(|| request.from.uri.clone()),
                local_cseq: 0,
                is_initiator: false,
            }
        } else {
            Dialog {
                id: DialogId::new(),
                call_id: call_id.clone(),
                state: DialogState::Initial,
                local_tag: request.from.tag.clone(),
                remote_tag: None,
                local_uri: request.from.uri.clone(),
                remote_uri: request.to.uri.clone(),
                remote_target: request.uri.clone(),
                local_cseq: request.cseq.seq,
                is_initiator: true,
            }
        };

        Ok(self
            .dialogs
            .entry(call_id)
            .or_insert(dialog)
            .value()
            .clone())
    }

    async fn create_request(&self, dialog: &Dialog, method: Method) -> StackResult<Request> {
        self.check_fault(Primitive::CreateRequest)?;
        let stored = {
            let mut entry = self.dialogs.get_mut(&dialog.call_id).ok_or_else(|| {
                StackError::Dialog(format!("no dialog for call {}", dialog.call_id))
            })?;
            entry.local_cseq += 1;
            entry.value().clone()
        };
        let seq = stored.local_cseq;
        Ok(self.in_dialog_request(&stored, method, seq))
    }

    async fn create_cancel(&self, transaction: &Transaction) -> StackResult<Transaction> {
        self.check_fault(Primitive::CreateCancel)?;
        if transaction.is_server() || !transaction.method().is_invite() {
            return Err(StackError::Transaction(format!(
                "cannot cancel {}",
                transaction.id
            )));
        }

        // Same Request-URI, Call-ID, From, To, CSeq number and top Via as the INVITE
        let invite = &transaction.request;
        let request = Request {
            method: Method::Cancel,
            uri: invite.uri.clone(),
            call_id: invite.call_id.clone(),
            cseq: CSeq::new(invite.cseq.seq, Method::Cancel),
            from: invite.from.clone(),
            to: invite.to.clone(),
            via: invite.via.iter().take(1).cloned().collect(),
            max_forwards: invite.max_forwards,
            contact: None,
            body: None,
        };

        let key = TransactionKey::new(transaction.id.branch.clone(), Method::Cancel, false);
        let cancel = Transaction::new(key.clone(), request, TransactionState::Initial);
        self.client_transactions.insert(key, cancel.clone());
        Ok(cancel)
    }

    async fn send_request(&self, transaction: &Transaction) -> StackResult<()> {
        self.check_fault(Primitive::SendRequest)?;
        self.dispatch_request(transaction)
    }

    async fn send_response(&self, transaction: &Transaction, response: Response) -> StackResult<()> {
        self.check_fault(Primitive::SendResponse)?;
        let key = &transaction.id;
        // a 487 for a cancelled INVITE may go out on either side
        let table = if transaction.is_server() {
            &self.server_transactions
        } else {
            &self.client_transactions
        };
        if let Some(mut entry) = table.get_mut(key) {
            if entry.state == TransactionState::Terminated {
                return Err(StackError::Terminated(key.to_string()));
            }
            entry.state = next_state(&key.method, response.status);
        }

        debug!(
            "Loopback {} sending {} for {} {}",
            self.local_addr, response.status, key.method, response.call_id
        );
        let call_id = response.call_id.clone();
        let status = response.status;
        self.record(SentMessage::Response(response.clone()));

        if status.is_success() {
            if key.method.is_invite() {
                if let Some(mut dialog) = self.dialogs.get_mut(&call_id) {
                    dialog.state = DialogState::Confirmed;
                }
            } else if key.method == Method::Bye {
                self.close_dialog(&call_id);
            }
        } else if status.is_final() && key.method.is_invite() {
            self.dialogs.remove(&call_id);
        }

        self.forward_response(response)
    }

    async fn send_in_dialog(&self, dialog: &Dialog, transaction: &Transaction) -> StackResult<()> {
        self.check_fault(Primitive::SendInDialog)?;
        if !self.dialogs.contains_key(&dialog.call_id) {
            return Err(StackError::Dialog(format!(
                "no dialog for call {}",
                dialog.call_id
            )));
        }
        self.dispatch_request(transaction)
    }

    async fn send_ack(&self, dialog: &Dialog, cseq: u32) -> StackResult<()> {
        self.check_fault(Primitive::SendAck)?;
        let stored = {
            match self.dialogs.get_mut(&dialog.call_id) {
                Some(mut entry) => {
                    entry.state = DialogState::Confirmed;
                    entry.value().clone()
                }
                None => dialog.clone(),
            }
        };

        let request = self.in_dialog_request(&stored, Method::Ack, cseq);
        debug!("Loopback {} sending ACK {} for {}", self.local_addr, cseq, stored.call_id);
        self.record(SentMessage::Ack {
            call_id: stored.call_id.clone(),
            cseq,
        });
        self.forward_request(request)
    }

    async fn terminate(&self, transaction: &Transaction) -> StackResult<()> {
        self.check_fault(Primitive::Terminate)?;
        let table = if transaction.is_server() {
            &self.server_transactions
        } else {
            &self.client_transactions
        };
        if let Some(mut entry) = table.get_mut(&transaction.id) {
            entry.state = TransactionState::Terminated;
        }

        let mut snapshot = transaction.clone();
        snapshot.state = TransactionState::Terminated;
        self.notice(StackEvent::TransactionTerminated(snapshot));
        Ok(())
    }
}
