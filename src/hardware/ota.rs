use embassy_net::{
    IpEndpoint, Stack,
    tcp::TcpSocket,
    udp::{PacketMetadata, UdpSocket},
};
use embassy_time::{Duration, Instant, Timer, with_timeout};
use embedded_storage::{ReadStorage, Storage};
use esp_bootloader_esp_idf::{
    ota::OtaImageState,
    ota_updater::OtaUpdater,
    partitions::{self, PARTITION_TABLE_MAX_LEN},
};
use esp_storage::FlashStorage;
use log::{debug, info, warn};

use crate::{
    config::{NETWORK_TIMEOUT_MS, OtaConfig},
    ota::{self, Datagrams, FirmwareSink, ImageStream, Invitation, OtaError, OtaEvent},
    traits::{OtaPort, Watchdog},
};

const UDP_BUFFER_SIZE: usize = 256;
const TCP_BUFFER_SIZE: usize = 2048;
/// How long a loop pass waits for an invitation
const LISTEN: Duration = Duration::from_millis(1);
const NETWORK_TIMEOUT: Duration = Duration::from_millis(NETWORK_TIMEOUT_MS);

/// Socket memory for the update listener, lives in a `static`
pub struct OtaBuffers {
    rx_meta: [PacketMetadata; 4],
    rx: [u8; UDP_BUFFER_SIZE],
    tx_meta: [PacketMetadata; 4],
    tx: [u8; UDP_BUFFER_SIZE],
    tcp_rx: [u8; TCP_BUFFER_SIZE],
    tcp_tx: [u8; TCP_BUFFER_SIZE],
    table: [u8; PARTITION_TABLE_MAX_LEN],
}

impl OtaBuffers {
    pub const fn new() -> Self {
        Self {
            rx_meta: [PacketMetadata::EMPTY; 4],
            rx: [0; UDP_BUFFER_SIZE],
            tx_meta: [PacketMetadata::EMPTY; 4],
            tx: [0; UDP_BUFFER_SIZE],
            tcp_rx: [0; TCP_BUFFER_SIZE],
            tcp_tx: [0; TCP_BUFFER_SIZE],
            table: [0; PARTITION_TABLE_MAX_LEN],
        }
    }
}

impl Default for OtaBuffers {
    fn default() -> Self {
        Self::new()
    }
}

/// espota listener writing images to the inactive app partition
pub struct EspOta {
    stack: Stack<'static>,
    udp: UdpSocket<'static>,
    tcp_rx: &'static mut [u8; TCP_BUFFER_SIZE],
    tcp_tx: &'static mut [u8; TCP_BUFFER_SIZE],
    table: &'static mut [u8; PARTITION_TABLE_MAX_LEN],
    flash: FlashStorage<'static>,
    config: OtaConfig,
}

impl EspOta {
    pub fn new(
        stack: Stack<'static>,
        buffers: &'static mut OtaBuffers,
        flash: FlashStorage<'static>,
        config: OtaConfig,
    ) -> Self {
        let OtaBuffers {
            rx_meta,
            rx,
            tx_meta,
            tx,
            tcp_rx,
            tcp_tx,
            table,
        } = buffers;
        let mut udp = UdpSocket::new(stack, rx_meta, rx, tx_meta, tx);
        if let Err(e) = udp.bind(config.port) {
            warn!("OTA port {} unavailable: {:?}", config.port, e);
        } else {
            info!("OTA ready on {}:{}", config.hostname, config.port);
        }
        Self {
            stack,
            udp,
            tcp_rx,
            tcp_tx,
            table,
            flash,
            config,
        }
    }

    /// Size of the partition the next image goes to
    pub fn capacity(&mut self) -> Option<u32> {
        let mut updater = OtaUpdater::new(&mut self.flash, &mut *self.table).ok()?;
        let (region, _) = updater.next_partition().ok()?;
        u32::try_from(region.capacity()).ok()
    }

    async fn update<W: Watchdog>(
        &mut self,
        invitation: &Invitation,
        peer: IpEndpoint,
        watchdog: &mut W,
    ) -> Result<(), OtaError> {
        let mut updater =
            OtaUpdater::new(&mut self.flash, &mut *self.table).map_err(partition_error)?;
        let mut sink = Partition::new(&mut updater)?;

        let mut reply = Reply {
            socket: &mut self.udp,
            peer,
            watchdog: &mut *watchdog,
        };
        let seed = Instant::now().as_ticks() ^ u64::from(invitation.size);
        ota::accept(&mut reply, invitation, self.config.password, seed, sink.capacity()).await?;

        ota::report(&OtaEvent::Start);
        let mut socket = TcpSocket::new(self.stack, &mut *self.tcp_rx, &mut *self.tcp_tx);
        socket.set_timeout(Some(NETWORK_TIMEOUT));
        watchdog.feed();
        let connect = socket.connect((peer.addr, invitation.port));
        match with_timeout(NETWORK_TIMEOUT, connect).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("connect back to uploader failed: {:?}", e);
                return Err(OtaError::Connect);
            }
            Err(_) => {
                debug!("uploader did not accept within {} ms", NETWORK_TIMEOUT_MS);
                return Err(OtaError::Connect);
            }
        }

        let mut stream = Stream(socket);
        let result = ota::receive(&mut stream, &mut sink, invitation, watchdog).await;
        watchdog.feed();
        let _ = with_timeout(NETWORK_TIMEOUT, stream.0.flush()).await;
        stream.0.close();
        result
    }
}

impl OtaPort for EspOta {
    async fn handle<W: Watchdog>(&mut self, watchdog: &mut W) {
        let mut buf = [0u8; 128];
        let Ok(Ok((len, meta))) = with_timeout(LISTEN, self.udp.recv_from(&mut buf)).await else {
            return;
        };
        let Some(invitation) = Invitation::parse(&buf[..len]) else {
            debug!("ignoring {} byte datagram on the OTA port", len);
            return;
        };

        match self.update(&invitation, meta.endpoint, watchdog).await {
            Ok(()) => {
                ota::report(&OtaEvent::End);
                Timer::after(Duration::from_millis(100)).await;
                esp_hal::system::software_reset();
            }
            Err(e) => ota::report(&OtaEvent::Error(e)),
        }
    }
}

struct Reply<'a, W> {
    socket: &'a mut UdpSocket<'static>,
    peer: IpEndpoint,
    watchdog: &'a mut W,
}

impl<W: Watchdog> Datagrams for Reply<'_, W> {
    async fn send(&mut self, payload: &[u8]) -> Result<(), OtaError> {
        self.watchdog.feed();
        self.socket
            .send_to(payload, self.peer)
            .await
            .map_err(|_| OtaError::Begin)
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Option<usize> {
        self.watchdog.feed();
        let deadline = Instant::now() + NETWORK_TIMEOUT;
        loop {
            let left = deadline.checked_duration_since(Instant::now())?;
            let (len, meta) = with_timeout(left, self.socket.recv_from(buf)).await.ok()?.ok()?;
            if meta.endpoint.addr == self.peer.addr {
                return Some(len);
            }
        }
    }
}

struct Stream<'a>(TcpSocket<'a>);

impl ImageStream for Stream<'_> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, OtaError> {
        self.0.read(buf).await.map_err(|e| {
            debug!("image read failed: {:?}", e);
            OtaError::Receive
        })
    }

    async fn write_all(&mut self, mut data: &[u8]) -> Result<(), OtaError> {
        while !data.is_empty() {
            let written = self.0.write(data).await.map_err(|_| OtaError::Receive)?;
            if written == 0 {
                return Err(OtaError::Receive);
            }
            data = &data[written..];
        }
        Ok(())
    }
}

/// Inactive app slot behind the bootloader's OTA data
struct Partition<'u, 'f> {
    updater: &'u mut OtaUpdater<'f, FlashStorage<'static>>,
    capacity: u32,
}

impl<'u, 'f> Partition<'u, 'f> {
    fn new(updater: &'u mut OtaUpdater<'f, FlashStorage<'static>>) -> Result<Self, OtaError> {
        let (region, _) = updater.next_partition().map_err(partition_error)?;
        let capacity = u32::try_from(region.capacity()).map_err(|_| OtaError::Begin)?;
        Ok(Self { updater, capacity })
    }
}

impl FirmwareSink for Partition<'_, '_> {
    fn capacity(&self) -> u32 {
        self.capacity
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), OtaError> {
        let (mut region, _) = self.updater.next_partition().map_err(partition_error)?;
        region.write(offset, data).map_err(|e| {
            warn!("flash write at {} failed: {:?}", offset, e);
            OtaError::Receive
        })
    }

    fn commit(&mut self) -> Result<(), OtaError> {
        self.updater
            .activate_next_partition()
            .map_err(partition_error)?;
        self.updater
            .set_current_ota_state(OtaImageState::New)
            .map_err(partition_error)
    }
}

fn partition_error(e: partitions::Error) -> OtaError {
    warn!("partition table: {:?}", e);
    OtaError::Begin
}
