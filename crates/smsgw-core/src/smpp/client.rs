//! Transceiver session: bind, request/response correlation, keepalive and
//! inbound deliver_sm handling.

use super::codec::{PduFrame, SmppCodec};
use super::pdu::{status, BindTransceiver, Pdu, ShortMessage};
use super::receipt::Receipt;
use super::{text, SmppError, Transmitter, SYSTEM_TYPE};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use smsgw_common::config::{Conn, WorkerConfig};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace, warn};

type Pending = Arc<Mutex<HashMap<u32, oneshot::Sender<PduFrame>>>>;
type Sink = SplitSink<Framed<TcpStream, SmppCodec>, PduFrame>;
type Source = SplitStream<Framed<TcpStream, SmppCodec>>;

/// Bound on queued outbound frames
const OUTGOING_CAPACITY: usize = 256;
/// Bound on undelivered inbound notifications
const INBOUND_CAPACITY: usize = 1024;

/// Connection parameters of one session.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub addr: String,
    pub system_id: String,
    pub password: String,
    pub system_type: String,
    pub bind_timeout: Duration,
    pub enquire_link: Duration,
    pub submit_timeout: Option<Duration>,
}

impl ClientOptions {
    pub fn from_conn(conn: &Conn, worker: &WorkerConfig) -> Self {
        Self {
            addr: conn.url.clone(),
            system_id: conn.user.clone(),
            password: conn.passwd.clone(),
            system_type: SYSTEM_TYPE.to_string(),
            bind_timeout: Duration::from_secs(worker.bind_timeout_secs),
            enquire_link: Duration::from_secs(worker.enquire_link_secs.max(1)),
            submit_timeout: worker.submit_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Inbound traffic surfaced to the owner of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Receipt(Receipt),
    /// Mobile originated message
    Message { src: String, dst: String, body: String },
}

/// Sequence number of the bind request; session requests follow it
const BIND_SEQUENCE: u32 = 1;

/// A bound transceiver session.
pub struct SmppClient {
    outgoing: mpsc::Sender<PduFrame>,
    pending: Pending,
    sequence: AtomicU32,
    connected: watch::Receiver<bool>,
    submit_timeout: Option<Duration>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl SmppClient {
    /// Connect and bind as transceiver within the bind timeout.
    ///
    /// Returns the client and the stream of inbound receipts and messages.
    pub async fn connect(
        options: &ClientOptions,
    ) -> Result<(Arc<SmppClient>, mpsc::Receiver<Inbound>), SmppError> {
        let framed = timeout(options.bind_timeout, bind(options))
            .await
            .map_err(|_| SmppError::Bind("timed out waiting for bind_transceiver_resp".into()))??;
        info!(addr = %options.addr, system_id = %options.system_id, "bound as transceiver");

        let (sink, source) = framed.split();
        let (outgoing_tx, outgoing_rx) = mpsc::channel(OUTGOING_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (connected_tx, connected_rx) = watch::channel(true);
        let connected_tx = Arc::new(connected_tx);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        let client = Arc::new(SmppClient {
            outgoing: outgoing_tx.clone(),
            pending: pending.clone(),
            sequence: AtomicU32::new(BIND_SEQUENCE + 1),
            connected: connected_rx,
            submit_timeout: options.submit_timeout,
            tasks: std::sync::Mutex::new(Vec::new()),
        });

        let writer = tokio::spawn(write_loop(sink, outgoing_rx, connected_tx.clone()));
        let reader = tokio::spawn(read_loop(
            source,
            outgoing_tx,
            inbound_tx,
            pending,
            connected_tx,
        ));
        let keepalive = tokio::spawn(keepalive_loop(Arc::downgrade(&client), options.enquire_link));

        if let Ok(mut tasks) = client.tasks.lock() {
            tasks.extend([writer, reader, keepalive]);
        }
        Ok((client, inbound_rx))
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Resolves once the session is lost
    pub async fn disconnected(&self) {
        let mut rx = self.connected.clone();
        let _ = rx.wait_for(|connected| !*connected).await;
    }

    fn next_sequence(&self) -> u32 {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) & 0x7FFF_FFFF;
        if seq == 0 {
            self.sequence.fetch_add(1, Ordering::Relaxed) & 0x7FFF_FFFF
        } else {
            seq
        }
    }

    /// Send a request and wait for the response with the same sequence.
    pub async fn request(&self, pdu: Pdu) -> Result<PduFrame, SmppError> {
        if !self.is_connected() {
            return Err(SmppError::NotConnected);
        }
        let seq = self.next_sequence();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(seq, tx);

        if self.outgoing.send(PduFrame::new(seq, pdu)).await.is_err() {
            self.pending.lock().await.remove(&seq);
            return Err(SmppError::NotConnected);
        }

        let response = match self.submit_timeout {
            Some(limit) => match timeout(limit, rx).await {
                Ok(r) => r,
                Err(_) => {
                    self.pending.lock().await.remove(&seq);
                    return Err(SmppError::Timeout);
                }
            },
            None => rx.await,
        };
        response.map_err(|_| SmppError::NotConnected)
    }

    /// Unbind and stop the session tasks
    pub async fn close(&self) {
        if self.is_connected() {
            match timeout(Duration::from_secs(2), self.request(Pdu::Unbind)).await {
                Ok(Ok(_)) => debug!("unbound"),
                Ok(Err(e)) => debug!(error = %e, "unbind failed"),
                Err(_) => debug!("unbind timed out"),
            }
        }
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        self.pending.lock().await.clear();
    }
}

#[async_trait]
impl Transmitter for SmppClient {
    async fn submit(&self, sm: ShortMessage) -> Result<String, SmppError> {
        let frame = self.request(Pdu::SubmitSm(sm)).await?;
        if frame.status() != status::OK {
            return Err(SmppError::from_status(frame.status()));
        }
        match frame.pdu {
            Pdu::SubmitSmResp { message_id } => Ok(message_id),
            other => Err(SmppError::Protocol(format!(
                "unexpected {:?} for submit_sm",
                other.command()
            ))),
        }
    }
}

async fn bind(options: &ClientOptions) -> Result<Framed<TcpStream, SmppCodec>, SmppError> {
    let stream = TcpStream::connect(&options.addr).await?;
    let mut framed = Framed::new(stream, SmppCodec::new());
    framed
        .send(PduFrame::new(
            BIND_SEQUENCE,
            Pdu::BindTransceiver(BindTransceiver::new(
                &options.system_id,
                &options.password,
                &options.system_type,
            )),
        ))
        .await?;

    while let Some(frame) = framed.next().await {
        let frame = frame?;
        match frame.pdu {
            Pdu::BindTransceiverResp { .. } | Pdu::GenericNack if frame.sequence() == BIND_SEQUENCE => {
                if frame.status() != status::OK {
                    return Err(SmppError::Bind(format!(
                        "command status {:#010x}",
                        frame.status()
                    )));
                }
                return Ok(framed);
            }
            Pdu::EnquireLink => {
                framed
                    .send(PduFrame::new(frame.sequence(), Pdu::EnquireLinkResp))
                    .await?;
            }
            _ => trace!(command = ?frame.command(), "ignoring PDU before bind"),
        }
    }
    Err(SmppError::Bind("connection closed during bind".into()))
}

async fn write_loop(
    mut sink: Sink,
    mut outgoing: mpsc::Receiver<PduFrame>,
    connected: Arc<watch::Sender<bool>>,
) {
    while let Some(frame) = outgoing.recv().await {
        trace!(command = ?frame.command(), seq = frame.sequence(), "sending PDU");
        if let Err(e) = sink.send(frame).await {
            error!(error = %e, "failed to write PDU");
            break;
        }
    }
    let _ = connected.send(false);
}

async fn read_loop(
    mut source: Source,
    outgoing: mpsc::Sender<PduFrame>,
    inbound: mpsc::Sender<Inbound>,
    pending: Pending,
    connected: Arc<watch::Sender<bool>>,
) {
    while let Some(frame) = source.next().await {
        let frame = match frame {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, "decode error");
                break;
            }
        };

        if frame.is_response() {
            match pending.lock().await.remove(&frame.sequence()) {
                Some(tx) => {
                    let _ = tx.send(frame);
                }
                None => debug!(seq = frame.sequence(), "response without pending request"),
            }
            continue;
        }

        let seq = frame.sequence();
        let mut delivered = None;
        let reply = match frame.pdu {
            Pdu::DeliverSm(sm) => {
                delivered = Some(sm);
                PduFrame::response(seq, status::OK, Pdu::DeliverSmResp)
            }
            Pdu::EnquireLink => PduFrame::response(seq, status::OK, Pdu::EnquireLinkResp),
            Pdu::Unbind => {
                info!("peer requested unbind");
                let _ = outgoing
                    .send(PduFrame::response(seq, status::OK, Pdu::UnbindResp))
                    .await;
                break;
            }
            other => {
                warn!(command = ?other.command(), "unsupported PDU from peer");
                PduFrame::response(seq, status::INVALID_COMMAND_ID, Pdu::GenericNack)
            }
        };
        if outgoing.send(reply).await.is_err() {
            break;
        }
        if let Some(sm) = delivered {
            dispatch_deliver(&sm, &inbound).await;
        }
    }

    warn!("SMPP session closed");
    let _ = connected.send(false);
    // dropping the senders fails every waiting request with NotConnected
    pending.lock().await.clear();
}

async fn dispatch_deliver(sm: &ShortMessage, inbound: &mpsc::Sender<Inbound>) {
    let event = match Receipt::from_deliver(sm) {
        Some(receipt) => {
            debug!(resp_id = %receipt.id, state = %receipt.state, "delivery receipt");
            Inbound::Receipt(receipt)
        }
        None => Inbound::Message {
            src: sm.source_addr.clone(),
            dst: sm.destination_addr.clone(),
            body: text::decode(&sm.short_message, sm.data_coding),
        },
    };
    if inbound.send(event).await.is_err() {
        trace!("inbound receiver dropped");
    }
}

async fn keepalive_loop(client: std::sync::Weak<SmppClient>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(client) = client.upgrade() else {
            return;
        };
        if !client.is_connected() {
            return;
        }
        match timeout(period, client.request(Pdu::EnquireLink)).await {
            Ok(Ok(_)) => trace!("enquire_link answered"),
            Ok(Err(e)) => warn!(error = %e, "enquire_link failed"),
            Err(_) => warn!("enquire_link timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smpp::pdu::Command;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use smsgw_common::types::Status;
    use tokio::net::TcpListener;

    fn options(addr: String) -> ClientOptions {
        ClientOptions {
            addr,
            system_id: "user".to_string(),
            password: "secret".to_string(),
            system_type: SYSTEM_TYPE.to_string(),
            bind_timeout: Duration::from_secs(5),
            enquire_link: Duration::from_secs(30),
            submit_timeout: Some(Duration::from_secs(5)),
        }
    }

    /// Accepts one session, binds it, answers submit_sm with SMSC-<n>
    /// and sends one receipt for the first id. Returns every PDU seen.
    async fn fake_smsc(listener: TcpListener, bind_status: u32) -> Vec<PduFrame> {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, SmppCodec::new());
        let mut seen = Vec::new();
        let mut submitted = 0;

        while let Some(Ok(frame)) = framed.next().await {
            seen.push(frame.clone());
            let seq = frame.sequence();
            match frame.pdu {
                Pdu::BindTransceiver(_) => {
                    framed
                        .send(PduFrame::response(
                            seq,
                            bind_status,
                            Pdu::BindTransceiverResp {
                                system_id: "smsc".to_string(),
                            },
                        ))
                        .await
                        .unwrap();
                    if bind_status != status::OK {
                        break;
                    }
                }
                Pdu::SubmitSm(_) => {
                    submitted += 1;
                    let id = format!("SMSC-{}", submitted);
                    framed
                        .send(PduFrame::response(
                            seq,
                            status::OK,
                            Pdu::SubmitSmResp {
                                message_id: id.clone(),
                            },
                        ))
                        .await
                        .unwrap();
                    if submitted == 1 {
                        let receipt = format!("id:{} sub:001 dlvrd:001 stat:DELIVRD err:000", id);
                        let sm = ShortMessage {
                            esm_class: 0x04,
                            short_message: Bytes::from(receipt.into_bytes()),
                            ..Default::default()
                        };
                        framed
                            .send(PduFrame::new(9000, Pdu::DeliverSm(sm)))
                            .await
                            .unwrap();
                    }
                }
                Pdu::DeliverSmResp => {}
                Pdu::Unbind => {
                    framed
                        .send(PduFrame::response(seq, status::OK, Pdu::UnbindResp))
                        .await
                        .unwrap();
                    break;
                }
                _ => {}
            }
        }
        seen
    }

    #[tokio::test]
    async fn test_bind_submit_and_receipt() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(fake_smsc(listener, status::OK));

        let (client, mut inbound) = SmppClient::connect(&options(addr)).await.unwrap();
        assert!(client.is_connected());

        let sm = ShortMessage {
            source_addr: "DEMO".to_string(),
            destination_addr: "923001234567".to_string(),
            data_coding: 0x03,
            short_message: Bytes::from_static(b"Hi"),
            ..Default::default()
        };
        assert_eq!(client.submit(sm.clone()).await.unwrap(), "SMSC-1");

        match inbound.recv().await.unwrap() {
            Inbound::Receipt(r) => {
                assert_eq!(r.id, "SMSC-1");
                assert_eq!(r.status, Some(Status::Delivered));
            }
            other => panic!("expected receipt, got {:?}", other),
        }
        assert_eq!(client.submit(sm).await.unwrap(), "SMSC-2");

        client.close().await;
        let seen = server.await.unwrap();
        let commands: Vec<Command> = seen.iter().map(|f| f.command()).collect();
        assert_eq!(
            commands,
            vec![
                Command::BindTransceiver,
                Command::SubmitSm,
                Command::DeliverSmResp,
                Command::SubmitSm,
                Command::Unbind,
            ]
        );
        let sequences: Vec<u32> = seen
            .iter()
            .filter(|f| f.command() != Command::DeliverSmResp)
            .map(|f| f.sequence())
            .collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);
        match &seen[0].pdu {
            Pdu::BindTransceiver(b) => {
                assert_eq!(b.system_id, "user");
                assert_eq!(b.system_type, "CMT");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bind_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(fake_smsc(listener, status::INVALID_PASSWORD));

        let err = SmppClient::connect(&options(addr)).await.err().unwrap();
        assert!(matches!(err, SmppError::Bind(_)));
    }

    #[tokio::test]
    async fn test_session_loss_fails_pending_requests() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, SmppCodec::new());
            let bind = framed.next().await.unwrap().unwrap();
            framed
                .send(PduFrame::response(
                    bind.sequence(),
                    status::OK,
                    Pdu::BindTransceiverResp {
                        system_id: "smsc".to_string(),
                    },
                ))
                .await
                .unwrap();
            // read the submit and hang up without answering
            let _ = framed.next().await;
        });

        let mut opts = options(addr);
        opts.submit_timeout = None;
        let (client, _inbound) = SmppClient::connect(&opts).await.unwrap();
        let err = client.submit(ShortMessage::default()).await.unwrap_err();
        assert!(matches!(err, SmppError::NotConnected));
        server.await.unwrap();

        client.disconnected().await;
        assert!(!client.is_connected());
        assert!(matches!(
            client.submit(ShortMessage::default()).await,
            Err(SmppError::NotConnected)
        ));
    }
}
