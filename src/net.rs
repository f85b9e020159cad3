use std::{net::SocketAddr, sync::Arc};

use tokio_util::sync::{CancellationToken, DropGuard};

use crate::{
    message::{Kind, Message, ProcessId},
    model::{event_channel, EventSender},
    task::BackgroundSpawner,
    transport::{Mailbox, Source, Transport},
};

/// In-process transport; every link is a FIFO channel.
#[derive(Debug)]
pub struct LocalTransport {
    id: ProcessId,
    inboxes: Arc<Vec<EventSender<(ProcessId, Message)>>>,
    mailbox: Mailbox,
}

/// One connected transport per process, indexed by process id.
pub fn local_network(num_process: usize) -> Vec<LocalTransport> {
    let (inboxes, sources): (Vec<_>, Vec<_>) = (0..num_process).map(|_| event_channel()).unzip();
    let inboxes = Arc::new(inboxes);
    sources
        .into_iter()
        .enumerate()
        .map(|(id, source)| LocalTransport {
            id: id as _,
            inboxes: inboxes.clone(),
            mailbox: Mailbox::new(source),
        })
        .collect()
}

#[async_trait::async_trait]
impl Transport for LocalTransport {
    fn id(&self) -> ProcessId {
        self.id
    }

    async fn send(&self, destination: ProcessId, message: Message) -> crate::Result<()> {
        let Some(inbox) = self.inboxes.get(destination as usize) else {
            crate::bail!("unknown destination {destination}")
        };
        // a finished process no longer reads its inbox
        if inbox.is_closed() {
            tracing::trace!("{} -> {destination} dropped: {:?}", self.id, message.kind());
            return Ok(());
        }
        inbox.send((self.id, message))
    }

    async fn receive(&mut self, kind: Kind, source: Source) -> crate::Result<(Message, ProcessId)> {
        self.mailbox.receive(kind, source).await
    }
}

/// Datagram transport over bincode-encoded messages.
///
/// The sender of a datagram is the process whose entry in the address table
/// matches the datagram's source address; the payload has no say in it.
#[derive(Debug)]
pub struct UdpTransport {
    id: ProcessId,
    socket: Arc<tokio::net::UdpSocket>,
    addrs: Arc<Vec<SocketAddr>>,
    mailbox: Mailbox,
    _listening: DropGuard,
}

impl UdpTransport {
    /// `socket` must already be bound to `addrs[id]`. The receiving half runs
    /// on `spawner` until this transport is dropped, which also releases the
    /// socket.
    pub fn new(
        id: ProcessId,
        socket: tokio::net::UdpSocket,
        addrs: Vec<SocketAddr>,
        spawner: &BackgroundSpawner,
    ) -> crate::Result<Self> {
        let local_addr = socket.local_addr()?;
        if addrs.get(id as usize) != Some(&local_addr) {
            crate::bail!("process {id} is bound to {local_addr} which is not its table entry")
        }
        let socket = Arc::new(socket);
        let addrs = Arc::new(addrs);
        let (sender, source) = event_channel();
        let listening = CancellationToken::new();
        spawner.spawn(
            format!("listener of process {id}"),
            listen_loop(socket.clone(), addrs.clone(), sender, listening.clone()),
        );
        Ok(Self {
            id,
            socket,
            addrs,
            mailbox: Mailbox::new(source),
            _listening: listening.drop_guard(),
        })
    }
}

async fn listen_loop(
    socket: Arc<tokio::net::UdpSocket>,
    addrs: Arc<Vec<SocketAddr>>,
    sender: EventSender<(ProcessId, Message)>,
    listening: CancellationToken,
) -> crate::Result<()> {
    let mut buf = vec![0; 65536];
    loop {
        let (len, remote) = tokio::select! {
            received = socket.recv_from(&mut buf) => received?,
            () = listening.cancelled() => return Ok(()),
        };
        let Some(source) = addrs.iter().position(|addr| *addr == remote) else {
            tracing::warn!("discard datagram from unknown address {remote}");
            continue;
        };
        let message = match bincode::deserialize::<Message>(&buf[..len]) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!("discard malformed datagram from process {source}: {err}");
                continue;
            }
        };
        if sender.is_closed() {
            return Ok(());
        }
        sender.send((source as _, message))?
    }
}

#[async_trait::async_trait]
impl Transport for UdpTransport {
    fn id(&self) -> ProcessId {
        self.id
    }

    async fn send(&self, destination: ProcessId, message: Message) -> crate::Result<()> {
        let Some(addr) = self.addrs.get(destination as usize) else {
            crate::bail!("unknown destination {destination}")
        };
        let buf = bincode::serialize(&message)?;
        self.socket.send_to(&buf, addr).await?;
        Ok(())
    }

    async fn receive(&mut self, kind: Kind, source: Source) -> crate::Result<(Message, ProcessId)> {
        self.mailbox.receive(kind, source).await
    }
}

/// Binds one loopback socket per process and connects them into a network.
pub async fn udp_loopback_network(
    num_process: usize,
    spawner: &BackgroundSpawner,
) -> crate::Result<Vec<UdpTransport>> {
    let mut sockets = Vec::with_capacity(num_process);
    for _ in 0..num_process {
        sockets.push(tokio::net::UdpSocket::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?)
    }
    let addrs = sockets
        .iter()
        .map(|socket| socket.local_addr())
        .collect::<Result<Vec<_>, _>>()?;
    sockets
        .into_iter()
        .enumerate()
        .map(|(id, socket)| UdpTransport::new(id as _, socket, addrs.clone(), spawner))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        message::{Operation, Proposal, Request},
        task::BackgroundMonitor,
    };

    #[tokio::test]
    async fn local_stamps_sender() {
        let mut transports = local_network(3);
        let proposal = Proposal {
            view_num: 0,
            op_num: 1,
            op: Operation::Add,
        };
        // declared sender 2, actual sender 1
        transports[1]
            .send(0, proposal.commit(2).into())
            .await
            .unwrap();
        let (message, remote) = transports[0]
            .receive(Kind::Commit, Source::Any)
            .await
            .unwrap();
        assert_eq!(remote, 1);
        assert_eq!(message.vote(), Some((2, proposal)));
    }

    #[tokio::test]
    async fn local_rejects_loopback_broadcast() {
        let transports = local_network(3);
        let request = Request {
            timestamp: 0.,
            op: Operation::Add,
        };
        assert!(transports[1]
            .send_to_all([0, 1, 2].into_iter(), request.into())
            .await
            .is_err());
        assert!(transports[1].send(7, request.into()).await.is_err());
    }

    #[tokio::test]
    async fn udp_resolves_sender_from_address() {
        let monitor = BackgroundMonitor::default();
        let mut transports = udp_loopback_network(3, &monitor.spawner()).await.unwrap();
        let request = Request {
            timestamp: 12.25,
            op: Operation::Sub,
        };
        transports[2].send(1, request.into()).await.unwrap();
        let (message, remote) = transports[1]
            .receive(Kind::Request, Source::Process(2))
            .await
            .unwrap();
        assert_eq!(remote, 2);
        assert_eq!(message, Message::Request(request));
    }

    #[tokio::test]
    async fn udp_drop_releases_socket() {
        let monitor = BackgroundMonitor::default();
        let mut transports = udp_loopback_network(3, &monitor.spawner()).await.unwrap();
        let addr = transports[1].addrs[1];
        drop(transports.remove(1));
        // no datagram arrives, the listener still has to let go of the socket
        let mut rebound = None;
        for _ in 0..50 {
            if let Ok(socket) = tokio::net::UdpSocket::bind(addr).await {
                rebound = Some(socket);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await
        }
        assert!(rebound.is_some());
    }
}
