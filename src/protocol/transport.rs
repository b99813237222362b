//! UDP endpoints for the control protocol.
//!
//! Sending and receiving are independent: each side is bound to its own
//! host/port. The sender never waits; the receiver runs as a background task
//! and hands every decoded message to a callback.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::core_modules::parameters::ParameterCommand;
use crate::error::{Result, TrackingError};
use crate::protocol::control::decode_command;
use crate::protocol::osc::{OscMessage, OscPacket, MAX_PACKET_SIZE};

/// Destination for outbound messages.
pub trait MessageSink: Send {
    fn send(&mut self, message: &OscMessage) -> Result<()>;
}

/// Collects messages in memory. Useful for local control surfaces and tests.
impl MessageSink for Vec<OscMessage> {
    fn send(&mut self, message: &OscMessage) -> Result<()> {
        self.push(message.clone());
        Ok(())
    }
}

/// Non-blocking UDP sender bound to an ephemeral local port.
pub struct OscSender {
    socket: UdpSocket,
    target: SocketAddr,
}

impl OscSender {
    /// Resolves `host:port` and opens a socket able to reach it.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let target = lookup_host((host, port))
            .await
            .map_err(|e| TrackingError::Transport(format!("cannot resolve {}:{}: {}", host, port, e)))?
            .next()
            .ok_or_else(|| TrackingError::Transport(format!("no address for {}:{}", host, port)))?;

        let local: SocketAddr = if target.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| TrackingError::Transport(e.to_string()))?;

        info!("Sending OSC to {}", target);
        Ok(Self { socket, target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl MessageSink for OscSender {
    fn send(&mut self, message: &OscMessage) -> Result<()> {
        let bytes = message.encode();
        trace!("-> {} ({} bytes)", message.address, bytes.len());
        self.socket
            .try_send_to(&bytes, self.target)
            .map_err(|e| TrackingError::Transport(format!("send to {} failed: {}", self.target, e)))?;
        Ok(())
    }
}

/// UDP receiver for inbound control datagrams.
pub struct OscReceiver {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl OscReceiver {
    pub async fn bind(host: &str, port: u16) -> Result<Self> {
        let socket = UdpSocket::bind((host, port))
            .await
            .map_err(|e| TrackingError::Transport(format!("cannot listen on {}:{}: {}", host, port, e)))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| TrackingError::Transport(e.to_string()))?;
        info!("Listening for OSC on {}", local_addr);
        Ok(Self { socket, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts the receive loop. Every message of every well-formed datagram is
    /// passed to `on_message` in arrival order; malformed datagrams are logged
    /// and dropped. The loop ends when the task is aborted.
    pub fn spawn<F>(self, mut on_message: F) -> JoinHandle<()>
    where
        F: FnMut(OscMessage) + Send + 'static,
    {
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_PACKET_SIZE];
            let mut backoff = ReceiveBackoff::default();
            loop {
                match self.socket.recv_from(&mut buf).await {
                    Ok((len, from)) => {
                        backoff.reset();
                        match OscPacket::decode(&buf[..len]) {
                            Ok(packet) => {
                                for message in packet.into_messages() {
                                    debug!("<- {} from {}", message, from);
                                    on_message(message);
                                }
                            }
                            Err(e) => warn!("Dropping datagram from {}: {}", from, e),
                        }
                    }
                    Err(e) => {
                        let delay = backoff.next_delay();
                        if backoff.should_log() {
                            warn!(
                                "UDP receive error ({} in a row, retrying in {:?}): {}",
                                backoff.failures, delay, e
                            );
                        }
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        })
    }
}

/// Pacing for a receive loop whose socket keeps failing: the retry delay
/// doubles up to a ceiling and only every `LOG_EVERY`th failure is logged.
#[derive(Debug, Default)]
struct ReceiveBackoff {
    failures: u32,
}

impl ReceiveBackoff {
    const FIRST_DELAY: Duration = Duration::from_millis(10);
    const MAX_DELAY: Duration = Duration::from_secs(1);
    const LOG_EVERY: u32 = 100;

    fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let shift = (self.failures - 1).min(16);
        Self::FIRST_DELAY
            .saturating_mul(1 << shift)
            .min(Self::MAX_DELAY)
    }

    fn should_log(&self) -> bool {
        self.failures == 1 || self.failures % Self::LOG_EVERY == 0
    }

    fn reset(&mut self) {
        self.failures = 0;
    }
}

/// Starts the control listener: inbound messages under `inbound_prefix` are
/// decoded into commands and pushed onto `commands`, the queue the tick loop
/// drains. Unknown addresses and bad arguments are logged and discarded.
pub fn spawn_receiver(
    receiver: OscReceiver,
    inbound_prefix: &str,
    commands: mpsc::UnboundedSender<ParameterCommand>,
) -> JoinHandle<()> {
    let prefix = inbound_prefix.to_string();
    receiver.spawn(move |message| match decode_command(&prefix, &message) {
        Ok(command) => {
            debug!("Queued {:?}", command);
            // A closed queue means the pipeline is gone; nothing left to do.
            let _ = commands.send(command);
        }
        Err(e) => warn!("Ignoring '{}': {}", message, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[test]
    fn repeated_receive_errors_back_off_and_log_sparingly() {
        let mut backoff = ReceiveBackoff::default();
        let mut delays = Vec::new();
        let mut logged = 0;
        for _ in 0..250 {
            delays.push(backoff.next_delay());
            if backoff.should_log() {
                logged += 1;
            }
        }
        assert_eq!(delays[0], Duration::from_millis(10));
        assert_eq!(delays[1], Duration::from_millis(20));
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*delays.last().unwrap(), Duration::from_secs(1));
        // First failure, then the 100th and 200th.
        assert_eq!(logged, 3);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
        assert!(backoff.should_log());
    }

    #[tokio::test]
    async fn sender_reaches_receiver() {
        let receiver = OscReceiver::bind("127.0.0.1", 0).await.expect("bind receiver");
        let port = receiver.local_addr().port();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = receiver.spawn(move |message| {
            let _ = tx.send(message);
        });

        let mut sender = OscSender::connect("127.0.0.1", port).await.expect("connect sender");
        sender
            .send(&OscMessage::new("/ContourRenderer/NumContours").with_int(2))
            .expect("send");

        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("message within timeout")
            .expect("channel open");
        assert_eq!(received, OscMessage::new("/ContourRenderer/NumContours").with_int(2));
        task.abort();
    }

    #[tokio::test]
    async fn malformed_datagrams_are_skipped() {
        let receiver = OscReceiver::bind("127.0.0.1", 0).await.expect("bind receiver");
        let target = receiver.local_addr();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = receiver.spawn(move |message| {
            let _ = tx.send(message);
        });

        let raw = UdpSocket::bind("127.0.0.1:0").await.expect("bind raw");
        raw.send_to(b"not osc", target).await.expect("send garbage");
        raw.send_to(&OscMessage::new("/ok").encode(), target).await.expect("send message");

        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("message within timeout")
            .expect("channel open");
        assert_eq!(received.address, "/ok");
        task.abort();
    }

    #[tokio::test]
    async fn control_listener_queues_commands_in_order() {
        let receiver = OscReceiver::bind("127.0.0.1", 0).await.expect("bind receiver");
        let port = receiver.local_addr().port();
        let (tx, mut commands) = mpsc::unbounded_channel();
        let task = spawn_receiver(receiver, "/ContourTracking", tx);

        let mut sender = OscSender::connect("127.0.0.1", port).await.expect("connect sender");
        sender
            .send(&OscMessage::new("/ContourTracking/Unknown").with_int(1))
            .expect("send unknown");
        sender
            .send(&OscMessage::new("/ContourTracking/Threshold").with_int(90))
            .expect("send threshold");
        sender
            .send(&OscMessage::new("/ContourTracking/ResetBackground"))
            .expect("send reset");

        let first = tokio::time::timeout(Duration::from_secs(2), commands.recv())
            .await
            .expect("first command")
            .expect("channel open");
        let second = tokio::time::timeout(Duration::from_secs(2), commands.recv())
            .await
            .expect("second command")
            .expect("channel open");
        assert_eq!(first, ParameterCommand::Threshold(90));
        assert_eq!(second, ParameterCommand::ResetBackground);
        task.abort();
    }

    #[test]
    fn vec_sink_records_messages() {
        let mut sink: Vec<OscMessage> = Vec::new();
        sink.send(&OscMessage::new("/a")).expect("send");
        assert_eq!(sink.len(), 1);
    }
}
