//! Minimal in-process MQTT 3.1.1 broker for driving the bridge over real TCP.
//!
//! It speaks just enough of the protocol for one subscriber: CONNACK, SUBACK with
//! scripted return codes, QoS 0 PUBLISH of a fixed payload, PINGRESP.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
    time::{sleep, Duration},
};

const CONNECT: u8 = 1;
const SUBSCRIBE: u8 = 8;
const PINGREQ: u8 = 12;
const DISCONNECT: u8 = 14;

pub const GRANTED_QOS0: u8 = 0x00;
pub const REJECTED: u8 = 0x80;

#[derive(Clone, Default)]
pub struct BrokerScript {
    /// SUBACK return code per SUBSCRIBE, in arrival order; later ones are granted.
    pub suback_codes: Vec<u8>,
    /// Published on the subscribed topic after every granted SUBSCRIBE.
    pub publish: Option<Vec<u8>>,
    /// Close the first connection shortly after its first publish.
    pub drop_first_connection: bool,
}

pub struct FakeBroker {
    pub port: u16,
    connections: Arc<AtomicUsize>,
    subscribes: Arc<AtomicUsize>,
    accept_task: JoinHandle<()>,
}

impl FakeBroker {
    pub async fn start(script: BrokerScript) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connections = Arc::new(AtomicUsize::new(0));
        let subscribes = Arc::new(AtomicUsize::new(0));

        let accept_task = {
            let connections = connections.clone();
            let subscribes = subscribes.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let index = connections.fetch_add(1, Ordering::SeqCst);
                    let script = script.clone();
                    let subscribes = subscribes.clone();
                    tokio::spawn(async move {
                        let _ = serve_client(stream, index, script, subscribes).await;
                    });
                }
            })
        };

        Self {
            port,
            connections,
            subscribes,
            accept_task,
        }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn subscribes(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }
}

impl Drop for FakeBroker {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve_client(
    mut stream: TcpStream,
    index: usize,
    script: BrokerScript,
    subscribes: Arc<AtomicUsize>,
) -> std::io::Result<()> {
    loop {
        let (packet_type, body) = read_packet(&mut stream).await?;
        match packet_type {
            CONNECT => stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await?,
            SUBSCRIBE => {
                let topic_len = u16::from_be_bytes([body[2], body[3]]) as usize;
                let topic = body[4..4 + topic_len].to_vec();
                let attempt = subscribes.fetch_add(1, Ordering::SeqCst);
                let code = script
                    .suback_codes
                    .get(attempt)
                    .copied()
                    .unwrap_or(GRANTED_QOS0);
                stream
                    .write_all(&[0x90, 0x03, body[0], body[1], code])
                    .await?;

                if code != REJECTED {
                    if let Some(payload) = &script.publish {
                        stream.write_all(&publish_packet(&topic, payload)).await?;
                        if script.drop_first_connection && index == 0 {
                            sleep(Duration::from_millis(50)).await;
                            return Ok(());
                        }
                    }
                }
            }
            PINGREQ => stream.write_all(&[0xD0, 0x00]).await?,
            DISCONNECT => return Ok(()),
            _ => {}
        }
    }
}

async fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
    let header = stream.read_u8().await?;
    let mut remaining = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await?;
        remaining |= ((byte & 0x7F) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0; remaining];
    stream.read_exact(&mut body).await?;
    Ok((header >> 4, body))
}

fn publish_packet(topic: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut remaining = 2 + topic.len() + payload.len();
    let mut packet = vec![0x30];
    loop {
        let mut byte = (remaining % 128) as u8;
        remaining /= 128;
        if remaining > 0 {
            byte |= 0x80;
        }
        packet.push(byte);
        if remaining == 0 {
            break;
        }
    }
    packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    packet.extend_from_slice(topic);
    packet.extend_from_slice(payload);
    packet
}
