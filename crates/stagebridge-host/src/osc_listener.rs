/// OSC ingress. Every datagram is decoded and handed to the relay engine in
/// its own task, so a slow MIDI sequence never delays the next message.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use rosc::{OscMessage, OscPacket};
use tokio::net::UdpSocket;
use tracing::{debug, error, info};

use crate::relay::RelayEngine;

/// Bind the OSC socket. A failure here is fatal to the daemon.
pub async fn bind(addr: SocketAddr) -> anyhow::Result<UdpSocket> {
    let socket = UdpSocket::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind OSC listener on {}: {}", addr, e))?;
    info!(addr = %addr, "OSC listener started");
    Ok(socket)
}

pub async fn run(socket: UdpSocket, engine: Arc<RelayEngine>) -> anyhow::Result<()> {
    let mut buf = [0u8; rosc::decoder::MTU];

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, source)) => match rosc::decoder::decode_udp(&buf[..len]) {
                Ok((_, packet)) => {
                    let messages = flatten(packet);
                    let engine = engine.clone();
                    tokio::spawn(async move {
                        handle_messages(&engine, messages, source.ip()).await;
                    });
                }
                Err(e) => {
                    debug!(from = %source, "Invalid OSC packet: {:?}", e);
                }
            },
            Err(e) => {
                error!("OSC receive error: {}", e);
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}

async fn handle_messages(engine: &RelayEngine, messages: Vec<OscMessage>, sender: IpAddr) {
    for msg in &messages {
        debug!(addr = %msg.addr, from = %sender, args = ?msg.args, "Received OSC message");
        let outcome = engine.handle(msg, sender).await;
        debug!(addr = %msg.addr, outcome = ?outcome, "OSC message handled");
    }
}

/// Unpack nested bundles into their messages, in packet order.
pub fn flatten(packet: OscPacket) -> Vec<OscMessage> {
    match packet {
        OscPacket::Message(msg) => vec![msg],
        OscPacket::Bundle(bundle) => bundle.content.into_iter().flat_map(flatten).collect(),
    }
}
