use core::net::Ipv4Addr;

use embassy_net::{IpAddress, Stack, dns::DnsQueryType, tcp::TcpSocket};
use embassy_time::{Duration, Instant, with_deadline, with_timeout};
use embedded_io_async_06::{ErrorType, Read, Write};
use heapless::String;
use log::{debug, warn};
use rust_mqtt::{
    client::{
        client::MqttClient,
        client_config::{ClientConfig, MqttVersion},
    },
    packet::v5::{publish_packet::QualityOfService, reason_codes::ReasonCode},
    utils::rng_generator::CountingRng,
};

use crate::{
    config::{MQTT_BUFFER_SIZE, NETWORK_TIMEOUT_MS},
    error::BrokerError,
    traits::{BrokerConnector, BrokerSession, ConnectOptions},
};

const TCP_BUFFER_SIZE: usize = 1024;
const NETWORK_TIMEOUT: Duration = Duration::from_millis(NETWORK_TIMEOUT_MS);
const MAX_PROPERTIES: usize = 5;

type Client<'s> = MqttClient<'s, Transport<'s>, MAX_PROPERTIES, CountingRng>;

/// embedded-io-async view of a connected TCP socket
struct Transport<'s>(TcpSocket<'s>);

impl ErrorType for Transport<'_> {
    type Error = embassy_net::tcp::Error;
}

impl Read for Transport<'_> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.0.read(buf).await
    }
}

impl Write for Transport<'_> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.0.write(buf).await
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.0.flush().await
    }
}

/// Owned copy of the CONNECT strings, the client borrows them for the session
#[derive(Default)]
struct Identity {
    client_id: String<32>,
    username: Option<String<64>>,
    password: Option<String<64>>,
    will_topic: String<64>,
    will_payload: String<16>,
}

impl Identity {
    fn load(&mut self, options: &ConnectOptions<'_>) -> Result<(), BrokerError> {
        fn copy<const N: usize>(value: &str) -> Result<String<N>, BrokerError> {
            String::try_from(value).map_err(|_| {
                warn!("MQTT connect field too long: {}", value);
                BrokerError::Io
            })
        }

        self.client_id = copy(options.client_id)?;
        self.username = options.username.map(copy).transpose()?;
        self.password = options.password.map(copy).transpose()?;
        self.will_topic = copy(options.will.topic)?;
        self.will_payload = copy(options.will.payload)?;
        Ok(())
    }
}

struct Buffers {
    tcp_rx: [u8; TCP_BUFFER_SIZE],
    tcp_tx: [u8; TCP_BUFFER_SIZE],
    mqtt_rx: [u8; MQTT_BUFFER_SIZE],
    mqtt_tx: [u8; MQTT_BUFFER_SIZE],
}

/// Opens MQTT v5 sessions over embassy-net TCP
pub struct MqttHardware {
    stack: Stack<'static>,
    host: &'static str,
    port: u16,
    identity: Identity,
    buffers: Buffers,
}

impl MqttHardware {
    pub fn new(stack: Stack<'static>, host: &'static str, port: u16) -> Self {
        Self {
            stack,
            host,
            port,
            identity: Identity::default(),
            buffers: Buffers {
                tcp_rx: [0; TCP_BUFFER_SIZE],
                tcp_tx: [0; TCP_BUFFER_SIZE],
                mqtt_rx: [0; MQTT_BUFFER_SIZE],
                mqtt_tx: [0; MQTT_BUFFER_SIZE],
            },
        }
    }

    async fn resolve(&self) -> Result<Ipv4Addr, BrokerError> {
        if let Ok(address) = self.host.parse::<Ipv4Addr>() {
            return Ok(address);
        }
        let addresses = self
            .stack
            .dns_query(self.host, DnsQueryType::A)
            .await
            .map_err(|e| {
                debug!("DNS lookup of {} failed: {:?}", self.host, e);
                BrokerError::Dns
            })?;
        let Some(&IpAddress::Ipv4(address)) = addresses.first() else {
            return Err(BrokerError::Dns);
        };
        Ok(address)
    }
}

impl BrokerConnector for MqttHardware {
    type Session<'s> = MqttSession<'s>;

    async fn connect<'s>(
        &'s mut self,
        options: &ConnectOptions<'_>,
    ) -> Result<Self::Session<'s>, BrokerError> {
        let deadline = Instant::now() + NETWORK_TIMEOUT;
        let address = with_deadline(deadline, self.resolve())
            .await
            .map_err(|_| BrokerError::Dns)??;
        self.identity.load(options)?;

        let Self {
            stack,
            port,
            identity,
            buffers,
            ..
        } = self;
        let identity: &'s Identity = identity;

        let mut socket = TcpSocket::new(*stack, &mut buffers.tcp_rx, &mut buffers.tcp_tx);
        socket.set_timeout(Some(NETWORK_TIMEOUT));
        match with_deadline(deadline, socket.connect((address, *port))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("TCP connect to {}:{} failed: {:?}", address, port, e);
                return Err(BrokerError::Tcp);
            }
            Err(_) => {
                debug!("TCP connect to {}:{} timed out", address, port);
                return Err(BrokerError::Tcp);
            }
        }

        let mut config = ClientConfig::new(MqttVersion::MQTTv5, CountingRng(20_000));
        config.add_client_id(&identity.client_id);
        config.keep_alive = options.keep_alive_secs;
        if let Some(username) = &identity.username {
            config.add_username(username);
        }
        if let Some(password) = &identity.password {
            config.add_password(password);
        }
        // rust-mqtt 0.3 has no will QoS setting, the will goes out at QoS 0
        config.add_will(
            &identity.will_topic,
            identity.will_payload.as_bytes(),
            options.will.retain,
        );

        let mut client = Client::new(
            Transport(socket),
            &mut buffers.mqtt_tx,
            MQTT_BUFFER_SIZE,
            &mut buffers.mqtt_rx,
            MQTT_BUFFER_SIZE,
            config,
        );
        // one DNS + TCP + CONNACK budget in total
        match with_deadline(deadline, client.connect_to_broker()).await {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => {
                debug!("CONNECT rejected: {:?}", reason);
                return Err(match reason {
                    ReasonCode::NetworkError => BrokerError::Io,
                    other => BrokerError::Refused(reason_code(&other)),
                });
            }
            Err(_) => {
                debug!("no CONNACK within {} ms", NETWORK_TIMEOUT_MS);
                return Err(BrokerError::Io);
            }
        }

        Ok(MqttSession {
            client,
            healthy: true,
            last_ping: Instant::now(),
            ping_every: Duration::from_secs(u64::from(options.keep_alive_secs.max(2) / 2)),
        })
    }
}

/// Connected client, unhealthy after the first transport error
pub struct MqttSession<'s> {
    client: Client<'s>,
    healthy: bool,
    last_ping: Instant,
    ping_every: Duration,
}

impl BrokerSession for MqttSession<'_> {
    fn is_connected(&self) -> bool {
        self.healthy
    }

    async fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), BrokerError> {
        let send = self
            .client
            .send_message(topic, payload, QualityOfService::QoS0, retain);
        match with_timeout(NETWORK_TIMEOUT, send).await {
            Ok(Ok(())) | Ok(Err(ReasonCode::NoMatchingSubscribers)) => Ok(()),
            Ok(Err(ReasonCode::NetworkError)) | Err(_) => {
                self.healthy = false;
                Err(BrokerError::Disconnected)
            }
            Ok(Err(reason)) => Err(BrokerError::Refused(reason_code(&reason))),
        }
    }

    async fn poll(&mut self) -> Result<(), BrokerError> {
        if self.last_ping.elapsed() < self.ping_every {
            return Ok(());
        }
        self.last_ping = Instant::now();
        match with_timeout(NETWORK_TIMEOUT, self.client.send_ping()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => {
                debug!("PINGREQ failed: {:?}", reason);
                self.healthy = false;
                Err(BrokerError::Disconnected)
            }
            Err(_) => {
                debug!("no PINGRESP within {} ms", NETWORK_TIMEOUT_MS);
                self.healthy = false;
                Err(BrokerError::Disconnected)
            }
        }
    }
}

/// MQTT v5 reason code byte for the values a broker sends on CONNECT or PUBLISH
fn reason_code(reason: &ReasonCode) -> u8 {
    match reason {
        ReasonCode::Success => 0x00,
        ReasonCode::UnspecifiedError => 0x80,
        ReasonCode::MalformedPacket => 0x81,
        ReasonCode::ProtocolError => 0x82,
        ReasonCode::ImplementationSpecificError => 0x83,
        ReasonCode::UnsupportedProtocolVersion => 0x84,
        ReasonCode::ClientIdNotValid => 0x85,
        ReasonCode::BadUserNameOrPassword => 0x86,
        ReasonCode::NotAuthorized => 0x87,
        ReasonCode::ServerUnavailable => 0x88,
        ReasonCode::ServerBusy => 0x89,
        ReasonCode::Banned => 0x8A,
        ReasonCode::TopicNameInvalid => 0x90,
        ReasonCode::PacketTooLarge => 0x95,
        ReasonCode::QuotaExceeded => 0x97,
        ReasonCode::PayloadFormatInvalid => 0x99,
        ReasonCode::RetainNotSupported => 0x9A,
        ReasonCode::QoSNotSupported => 0x9B,
        ReasonCode::UseAnotherServer => 0x9C,
        ReasonCode::ServerMoved => 0x9D,
        ReasonCode::ConnectionRateExceeded => 0x9F,
        _ => 0x80,
    }
}
