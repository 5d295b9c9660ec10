//! Full runs: ingress, broker, worker and receipt handling against a fake
//! SMSC speaking the real codec over TCP.

use crate::broker::MemoryBroker;
use crate::message::tests::user;
use crate::message::{MessageService, NewMessage};
use crate::smpp::codec::{PduFrame, SmppCodec};
use crate::smpp::pdu::{status, Pdu, ShortMessage};
use crate::worker::{self, WorkerError};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use smsgw_common::types::{now_epoch, Permission, Status};
use smsgw_common::Config;
use smsgw_storage::{Message, MemoryMessageStore, MessageStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::codec::Framed;

const CONFIG: &str = r#"
    [database]
    url = "postgres://localhost/smsgw"

    [worker]
    bind_timeout_secs = 5
    enquire_link_secs = 30

    [[conn_groups]]
    name = "Default"
    default_pfx = "92"

    [[conn_groups.conns]]
    id = "c1"
    url = "{addr}"
    user = "u"
    passwd = "p"
    size = 10
    time = 1
    pfxs = ["92"]
"#;

#[derive(Clone, Copy)]
enum Smsc {
    /// Answer every submit_sm with the id and follow with a DELIVRD receipt
    Deliver(&'static str),
    /// Hang up on the first submit_sm
    HangUp,
}

async fn fake_smsc(listener: TcpListener, mode: Smsc, seen: mpsc::UnboundedSender<ShortMessage>) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut framed = Framed::new(stream, SmppCodec::new());
    while let Some(Ok(frame)) = framed.next().await {
        let seq = frame.sequence();
        match frame.pdu {
            Pdu::BindTransceiver(_) => {
                let resp = Pdu::BindTransceiverResp {
                    system_id: "smsc".to_string(),
                };
                framed.send(PduFrame::response(seq, status::OK, resp)).await.unwrap();
            }
            Pdu::SubmitSm(sm) => {
                let _ = seen.send(sm);
                let Smsc::Deliver(id) = mode else {
                    return;
                };
                let resp = Pdu::SubmitSmResp {
                    message_id: id.to_string(),
                };
                framed.send(PduFrame::response(seq, status::OK, resp)).await.unwrap();
                let receipt = format!(
                    "id:{} sub:001 dlvrd:001 submit date:2403101200 done date:2403101201 stat:DELIVRD err:000 text:Hi",
                    id
                );
                let sm = ShortMessage {
                    esm_class: 0x04,
                    short_message: Bytes::from(receipt.into_bytes()),
                    ..Default::default()
                };
                framed.send(PduFrame::new(7000, Pdu::DeliverSm(sm))).await.unwrap();
            }
            Pdu::EnquireLink => {
                framed
                    .send(PduFrame::response(seq, status::OK, Pdu::EnquireLinkResp))
                    .await
                    .unwrap();
            }
            Pdu::Unbind => {
                framed
                    .send(PduFrame::response(seq, status::OK, Pdu::UnbindResp))
                    .await
                    .unwrap();
                return;
            }
            _ => {}
        }
    }
}

struct Harness {
    config: Arc<Config>,
    store: Arc<MemoryMessageStore>,
    broker: Arc<MemoryBroker>,
    seen: mpsc::UnboundedReceiver<ShortMessage>,
    stop: Option<oneshot::Sender<()>>,
    worker: JoinHandle<Result<(), WorkerError>>,
}

async fn start(mode: Smsc) -> Harness {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (seen_tx, seen) = mpsc::unbounded_channel();
    tokio::spawn(fake_smsc(listener, mode, seen_tx));

    let config = Arc::new(Config::from_toml(&CONFIG.replace("{addr}", &addr)).unwrap());
    let store = Arc::new(MemoryMessageStore::new());
    let broker = Arc::new(MemoryBroker::new());
    let (stop, stopped) = oneshot::channel::<()>();
    let worker = tokio::spawn({
        let config = config.clone();
        let store = store.clone();
        let broker = broker.clone();
        async move {
            let shutdown = async {
                let _ = stopped.await;
            };
            worker::run(&config, "Default", "c1", store, broker, None, shutdown).await
        }
    });

    timeout(Duration::from_secs(5), async {
        while broker.bound("Default-92").await == 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("worker never bound its routing key");

    Harness {
        config,
        store,
        broker,
        seen,
        stop: Some(stop),
        worker,
    }
}

impl Harness {
    async fn submit(&self, dst: &str, msg: &str) -> i64 {
        let service = MessageService::new(self.config.clone(), self.store.clone(), self.broker.clone());
        let req = NewMessage {
            dst: dst.to_string(),
            src: "DEMO".to_string(),
            msg: msg.to_string(),
            ..Default::default()
        };
        service
            .submit(&user(vec![Permission::SendMessage]), req)
            .await
            .unwrap()
    }

    async fn wait_for(&self, id: i64, status: Status) -> Message {
        timeout(Duration::from_secs(5), async {
            loop {
                let m = self.store.get(id).await.unwrap();
                if m.status == status {
                    return m;
                }
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("message {} never reached {:?}", id, status))
    }
}

#[tokio::test]
async fn test_short_latin_send_and_delivery_receipt() {
    let mut h = start(Smsc::Deliver("ABC123")).await;
    let id = h.submit("923001234567", "Hi").await;

    let stored = h.store.get(id).await.unwrap();
    assert_eq!(stored.total, 1);

    let sm = timeout(Duration::from_secs(5), h.seen.recv()).await.unwrap().unwrap();
    assert_eq!(sm.data_coding, 0x03);
    assert_eq!(sm.destination_addr, "923001234567");
    assert_eq!(sm.source_addr, "DEMO");
    assert_eq!(&sm.short_message[..], b"Hi");

    let m = h.wait_for(id, Status::Delivered).await;
    assert_eq!(m.resp_id, "ABC123");
    assert_eq!(m.connection, "c1");
    assert!(m.sent_at > 0);
    assert!((now_epoch() - m.delivered_at).abs() <= 1);

    if let Some(stop) = h.stop.take() {
        stop.send(()).unwrap();
    }
    assert!(h.worker.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_session_loss_stops_worker_without_touching_message() {
    let mut h = start(Smsc::HangUp).await;
    let id = h.submit("923001234567", "Hi").await;

    timeout(Duration::from_secs(5), h.seen.recv()).await.unwrap().unwrap();
    let outcome = timeout(Duration::from_secs(5), &mut h.worker)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, Err(WorkerError::Disconnected)));

    let m = h.store.get(id).await.unwrap();
    assert_eq!(m.status, Status::Queued);
    assert!(m.resp_id.is_empty());
}
