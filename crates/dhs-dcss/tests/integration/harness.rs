//! In-process fake DCSS server and a DHS wired to it.

use std::time::Duration;

use dhs_core::{
    ConnectionHandle, Context, Dhs, DhsBuilder, HandlerError, MessageRegistry, TransportConfig, TransportState,
};
use dhs_dcss::messages::{HtosClientIsHardware, StocSendClientType};
use dhs_dcss::codec::{V1_FRAME_SIZE, V2_HEADER_SIZE};
use dhs_dcss::OperationHandlers;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;

pub const DHS_NAME: &str = "testDHS";
pub const CONNECTION: &str = "dcss";
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

pub type TestContext = Context<(), ()>;

/// Listens on an ephemeral port and plays the DCSS side of one socket.
pub struct FakeDcss {
    listener: TcpListener,
    pub port: u16,
}

#[allow(dead_code)]
impl FakeDcss {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        Self { listener, port }
    }

    pub async fn bind_port(port: u16) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        Self { listener, port }
    }

    pub fn url(&self) -> String {
        format!("dcss://127.0.0.1:{}", self.port)
    }

    pub async fn accept(&self) -> Peer {
        let (sock, _) = tokio::time::timeout(RECV_TIMEOUT, self.listener.accept())
            .await
            .expect("dhs did not connect")
            .unwrap();
        let (reader, writer) = sock.into_split();
        Peer { reader, writer }
    }
}

/// One accepted DHS socket, framed by hand.
pub struct Peer {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

#[allow(dead_code)]
impl Peer {
    pub async fn send_v1(&mut self, text: &str) {
        let mut frame = text.as_bytes().to_vec();
        frame.resize(V1_FRAME_SIZE, 0);
        self.writer.write_all(&frame).await.unwrap();
    }

    pub async fn send_v2(&mut self, text: &str) {
        let body = format!("{text} \0");
        let header = format!("{:>12}{:>13} ", body.len(), 0);
        self.writer.write_all(header.as_bytes()).await.unwrap();
        self.writer.write_all(body.as_bytes()).await.unwrap();
    }

    /// Next frame from the DHS with the version it was framed with.
    pub async fn recv_frame(&mut self) -> (u8, String) {
        tokio::time::timeout(RECV_TIMEOUT, self.read_frame())
            .await
            .expect("no frame from dhs")
    }

    pub async fn recv(&mut self) -> String {
        self.recv_frame().await.1
    }

    async fn read_frame(&mut self) -> (u8, String) {
        let mut header = [0u8; V2_HEADER_SIZE];
        self.reader.read_exact(&mut header).await.unwrap();
        let text = String::from_utf8_lossy(&header).into_owned();
        let mut fields = text.split_whitespace();
        let sizes = fields
            .next()
            .filter(|f| f.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|t| Some((t.parse::<usize>().ok()?, fields.next()?.parse::<usize>().ok()?)));
        match sizes {
            Some((text_len, bin_len)) => {
                let mut body = vec![0u8; text_len + bin_len];
                self.reader.read_exact(&mut body).await.unwrap();
                let text = String::from_utf8_lossy(&body[..text_len]);
                (2, text.trim_end_matches('\0').trim_end().to_string())
            }
            None => {
                let mut rest = vec![0u8; V1_FRAME_SIZE - V2_HEADER_SIZE];
                self.reader.read_exact(&mut rest).await.unwrap();
                let mut frame = header.to_vec();
                frame.extend_from_slice(&rest);
                let text = String::from_utf8_lossy(&frame);
                (1, text.trim_end_matches('\0').to_string())
            }
        }
    }

    /// True once the DHS has closed its end of the socket.
    pub async fn closed(&mut self) -> bool {
        let mut buf = [0u8; 1];
        matches!(
            tokio::time::timeout(RECV_TIMEOUT, self.reader.read(&mut buf)).await,
            Ok(Ok(0)) | Ok(Err(_))
        )
    }
}

/// Poll `cond` until it holds or `timeout` elapses.
pub async fn eventually(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// Start a DHS with the handshake handler and the given operations.
pub fn start_dhs(operations: OperationHandlers<(), ()>) -> Dhs<(), ()> {
    let mut registry = MessageRegistry::new();
    dhs_dcss::register_messages(&mut registry).unwrap();
    DhsBuilder::new(DHS_NAME, ())
        .connection_scheme(dhs_dcss::PROTOCOL, dhs_dcss::scheme(dhs_dcss::message_factory(&registry)))
        .blocking_timeout(Duration::from_millis(100))
        .handlers(|h| {
            h.register(|_: &StocSendClientType, ctx: &TestContext| -> Result<(), HandlerError> {
                ctx.send::<String, _>(CONNECTION, HtosClientIsHardware::new(ctx.name()))?;
                Ok(())
            });
        })
        .hook(std::sync::Arc::new(operations.into_router()))
        .start()
}

/// Create the DCSS connection and wait until it is up.
pub async fn connect(dhs: &Dhs<(), ()>, server: &FakeDcss) -> (std::sync::Arc<dyn ConnectionHandle>, Peer) {
    let conn = dhs
        .context()
        .create_connection(CONNECTION, dhs_dcss::PROTOCOL, &server.url(), TransportConfig::fast())
        .unwrap();
    conn.connect();
    let peer = server.accept().await;
    assert!(
        conn.control()
            .wait_for_state(TransportState::Connected, RECV_TIMEOUT)
            .await
    );
    (conn, peer)
}
