use std::time::Duration;

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Payload},
};
use log::{debug, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time,
};

use super::Collective;
use crate::{Result, WorkerErr, context::RankEnv};

const CONNECT_ATTEMPTS: usize = 100;
const CONNECT_BACKOFF: Duration = Duration::from_millis(100);

/// One end of a coordinator-peer connection plus its receive buffer.
struct Link<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    rx: OnoReceiver<R>,
    tx: OnoSender<W>,
    buf: Vec<f32>,
}

impl<R, W> Link<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    fn new((rx, tx): (OnoReceiver<R>, OnoSender<W>)) -> Self {
        Self {
            rx,
            tx,
            buf: Vec::new(),
        }
    }
}

enum Role<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Rank 0, holding one link per peer ordered by rank.
    Coordinator(Vec<Link<R, W>>),
    Peer(Link<R, W>),
}

/// A group of processes connected in a star around rank 0.
///
/// Rank 0 sums the contributions of a reduction, averages them and sends the result back, so
/// every rank applies bit-identical values. Broadcasts always originate at rank 0.
pub struct TcpGroup<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    rank: usize,
    world_size: usize,
    role: Role<R, W>,
}

impl TcpGroup<OwnedReadHalf, OwnedWriteHalf> {
    /// Joins the group described by the rank environment: rank 0 listens on the coordinator
    /// address, every other rank dials it.
    pub async fn connect(env: &RankEnv) -> Result<Self> {
        if env.world_size == 1 {
            return Ok(Self {
                rank: 0,
                world_size: 1,
                role: Role::Coordinator(Vec::new()),
            });
        }

        let addr = env.coordinator_addr.as_deref().ok_or_else(|| {
            WorkerErr::Env(format!("no coordinator for a group of {}", env.world_size))
        })?;

        if env.rank == 0 {
            let listener = TcpListener::bind(addr).await?;
            info!("listening at {addr}");
            Self::listen(listener, env.world_size).await
        } else {
            Self::dial(addr, env.rank, env.world_size).await
        }
    }

    /// Accepts the `world_size - 1` peers of the group on `listener`.
    pub async fn listen(listener: TcpListener, world_size: usize) -> Result<Self> {
        let mut channels = Vec::with_capacity(world_size.saturating_sub(1));

        for _ in 1..world_size {
            let (stream, addr) = listener.accept().await?;
            stream.set_nodelay(true)?;
            debug!("peer connected from {addr}");

            let (rx, tx) = stream.into_split();
            channels.push(comms::channel(rx, tx));
        }

        Self::coordinate(channels, world_size).await
    }

    /// Connects to the coordinator at `addr`, retrying while it comes up.
    pub async fn dial(addr: &str, rank: usize, world_size: usize) -> Result<Self> {
        let mut attempt = 0;
        let stream = loop {
            match TcpStream::connect(addr).await {
                Ok(stream) => break stream,
                Err(e) if attempt + 1 < CONNECT_ATTEMPTS => {
                    attempt += 1;
                    debug!(attempt = attempt; "coordinator at {addr} not reachable yet: {e}");
                    time::sleep(CONNECT_BACKOFF).await;
                }
                Err(e) => return Err(e.into()),
            }
        };

        stream.set_nodelay(true)?;
        let (rx, tx) = stream.into_split();
        let (rx, tx) = comms::channel(rx, tx);
        Self::join(rx, tx, rank, world_size).await
    }
}

impl<R, W> TcpGroup<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Runs the coordinator side of the handshake over already established channels.
    ///
    /// # Arguments
    /// * `channels` - One channel per peer, in any order.
    /// * `world_size` - The size of the group, including the coordinator.
    ///
    /// # Returns
    /// The coordinator's group, or an error if a peer announces a different group size, an
    /// out of range rank or a rank that already joined.
    pub async fn coordinate(
        channels: Vec<(OnoReceiver<R>, OnoSender<W>)>,
        world_size: usize,
    ) -> Result<Self> {
        if channels.len() + 1 != world_size {
            return Err(WorkerErr::Collective(format!(
                "a group of {world_size} needs {} peers, got {}",
                world_size.saturating_sub(1),
                channels.len()
            )));
        }

        let mut slots: Vec<Option<Link<R, W>>> = (1..world_size).map(|_| None).collect();

        for channel in channels {
            let mut link = Link::new(channel);

            let (rank, expected) = match link.rx.recv::<Msg>().await? {
                Msg::Control(Command::Join { rank, world_size }) => (rank, world_size),
                other => return Err(unexpected(other)),
            };

            let reason = if expected != world_size {
                Some(format!(
                    "rank {rank} expects a group of {expected}, this one has {world_size}"
                ))
            } else if rank == 0 || rank >= world_size {
                Some(format!("rank {rank} is outside of a group of {world_size}"))
            } else if slots[rank - 1].is_some() {
                Some(format!("rank {rank} joined twice"))
            } else {
                None
            };

            if let Some(reason) = reason {
                let _ = link.tx.send(&Msg::Err(reason.as_str().into())).await;
                return Err(WorkerErr::Collective(reason));
            }

            link.tx
                .send(&Msg::Control(Command::Welcome { world_size }))
                .await?;
            debug!(rank = rank; "peer joined");
            slots[rank - 1] = Some(link);
        }

        let links = slots.into_iter().flatten().collect();
        info!("all {world_size} ranks joined");

        Ok(Self {
            rank: 0,
            world_size,
            role: Role::Coordinator(links),
        })
    }

    /// Runs the peer side of the handshake.
    pub async fn join(
        rx: OnoReceiver<R>,
        tx: OnoSender<W>,
        rank: usize,
        world_size: usize,
    ) -> Result<Self> {
        let mut link = Link::new((rx, tx));
        link.tx
            .send(&Msg::Control(Command::Join { rank, world_size }))
            .await?;

        match link.rx.recv::<Msg>().await? {
            Msg::Control(Command::Welcome { world_size: ws }) if ws == world_size => {}
            Msg::Control(Command::Welcome { world_size: ws }) => {
                return Err(WorkerErr::Collective(format!(
                    "joined a group of {ws}, expected {world_size}"
                )));
            }
            other => return Err(unexpected(other)),
        }

        Ok(Self {
            rank,
            world_size,
            role: Role::Peer(link),
        })
    }

    /// Leaves the group in an orderly way: peers announce their departure and the coordinator
    /// waits until all of them did.
    pub async fn shutdown(self) -> Result<()> {
        match self.role {
            Role::Coordinator(links) => {
                for mut link in links {
                    match link.rx.recv::<Msg>().await {
                        Ok(Msg::Control(Command::Disconnect)) => {}
                        Ok(other) => warn!("expected Disconnect, got {}", other.kind()),
                        Err(e) => warn!("peer left without disconnecting: {e}"),
                    }
                }
            }
            Role::Peer(mut link) => {
                link.tx.send(&Msg::Control(Command::Disconnect)).await?;
                link.tx.shutdown().await?;
            }
        }

        Ok(())
    }
}

/// Turns a message that doesn't fit the current operation into an error.
fn unexpected(msg: Msg<'_>) -> WorkerErr {
    match msg {
        Msg::Err(e) => WorkerErr::Peer(e.into_owned()),
        other => WorkerErr::UnexpectedMessage { got: other.kind() },
    }
}

fn check_len(op: &'static str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(WorkerErr::LengthMismatch { op, got, expected });
    }

    Ok(())
}

/// Tells every peer the round failed so none of them blocks on it, then returns `err`.
async fn abort<R, W>(links: &mut [Link<R, W>], err: WorkerErr) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let reason = err.to_string();
    for link in links.iter_mut() {
        let _ = link.tx.send(&Msg::Err(reason.as_str().into())).await;
    }

    Err(err)
}

impl<R, W> Collective for TcpGroup<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    async fn broadcast(&mut self, buf: &mut [f32], root: usize) -> Result<()> {
        if root != 0 {
            return Err(WorkerErr::Collective(format!(
                "broadcasts originate at rank 0, got root {root}"
            )));
        }

        match &mut self.role {
            Role::Coordinator(links) => {
                let msg = Msg::Data(Payload::Weights(buf));
                for link in links.iter_mut() {
                    link.tx.send(&msg).await?;
                }
            }
            Role::Peer(link) => match link.rx.recv_into(&mut link.buf).await? {
                Msg::Data(Payload::Weights(values)) => {
                    check_len("broadcast", values.len(), buf.len())?;
                    buf.copy_from_slice(values);
                }
                other => return Err(unexpected(other)),
            },
        }

        Ok(())
    }

    async fn all_reduce_mean(&mut self, buf: &mut [f32]) -> Result<()> {
        let n = self.world_size as f32;

        match &mut self.role {
            Role::Coordinator(links) => {
                let mut sum = buf.to_vec();

                for i in 0..links.len() {
                    let link = &mut links[i];
                    let outcome = match link.rx.recv_into(&mut link.buf).await? {
                        Msg::Data(Payload::Contribution(values)) => {
                            check_len("all_reduce_mean", values.len(), sum.len()).map(|_| {
                                sum.iter_mut().zip(values).for_each(|(s, v)| *s += v);
                            })
                        }
                        other => Err(unexpected(other)),
                    };

                    if let Err(e) = outcome {
                        return abort(links, e).await;
                    }
                }

                sum.iter_mut().for_each(|s| *s /= n);

                let msg = Msg::Data(Payload::Reduced(&sum));
                for link in links.iter_mut() {
                    link.tx.send(&msg).await?;
                }

                buf.copy_from_slice(&sum);
            }
            Role::Peer(link) => {
                link.tx
                    .send(&Msg::Data(Payload::Contribution(buf)))
                    .await?;

                match link.rx.recv_into(&mut link.buf).await? {
                    Msg::Data(Payload::Reduced(values)) => {
                        check_len("all_reduce_mean", values.len(), buf.len())?;
                        buf.copy_from_slice(values);
                    }
                    other => return Err(unexpected(other)),
                }
            }
        }

        Ok(())
    }

    async fn barrier(&mut self) -> Result<()> {
        match &mut self.role {
            Role::Coordinator(links) => {
                for link in links.iter_mut() {
                    match link.rx.recv::<Msg>().await? {
                        Msg::Control(Command::Barrier) => {}
                        other => return Err(unexpected(other)),
                    }
                }

                for link in links.iter_mut() {
                    link.tx.send(&Msg::Control(Command::Barrier)).await?;
                }
            }
            Role::Peer(link) => {
                link.tx.send(&Msg::Control(Command::Barrier)).await?;

                match link.rx.recv::<Msg>().await? {
                    Msg::Control(Command::Barrier) => {}
                    other => return Err(unexpected(other)),
                }
            }
        }

        Ok(())
    }
}
