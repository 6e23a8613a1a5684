//! Main loop: keep the link and the broker session up, sample on cadence

use log::{debug, info, warn};

use crate::{
    broker,
    config::Config,
    diagnostics,
    logic::Cadence,
    model::{Counters, Payload, Phase},
    network, retry, sensor,
    traits::{Board, BrokerConnector, BrokerSession, Clock, OtaPort, Watchdog, WifiLink},
};

/// Peripherals the node owns
pub struct Parts<B: Board> {
    pub sensor: B::Sensor,
    pub wifi: B::Wifi,
    pub clock: B::Clock,
    pub watchdog: B::Watchdog,
    pub system: B::System,
    pub ota: B::Ota,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Wi-Fi dropped, reassociate before reconnecting
    LinkLost,
    /// Broker session failed a health check
    BrokerLost,
    /// A bounded retry policy ran out of attempts
    GaveUp,
    /// The requested number of loop iterations ran
    Budget,
}

/// Device state for one boot
pub struct Node<B: Board> {
    config: Config,
    parts: Parts<B>,
    counters: Counters,
    cadence: Cadence,
    phase: Phase,
    startup_published: bool,
}

impl<B: Board> Node<B> {
    pub fn new(config: Config, parts: Parts<B>) -> Self {
        Self {
            cadence: Cadence::new(config.publish_delay_ms),
            config,
            parts,
            counters: Counters::default(),
            phase: Phase::Connecting,
            startup_published: false,
        }
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn parts(&self) -> &Parts<B> {
        &self.parts
    }

    pub fn parts_mut(&mut self) -> &mut Parts<B> {
        &mut self.parts
    }

    /// Run forever, reconnecting whatever went down
    pub async fn run<C: BrokerConnector>(&mut self, connector: &mut C) -> ! {
        loop {
            let exit = self.run_session(connector, None).await;
            debug!("session ended: {:?}", exit);
        }
    }

    /// Connect, then operate until a health check fails.
    ///
    /// `iterations` bounds the number of operating loop passes.
    pub async fn run_session<C: BrokerConnector>(
        &mut self,
        connector: &mut C,
        iterations: Option<u32>,
    ) -> Exit {
        self.phase = Phase::Connecting;

        if !self.parts.wifi.is_connected().await
            && network::connect(
                &mut self.parts.wifi,
                &mut self.parts.clock,
                &mut self.parts.watchdog,
                &self.config.wifi,
                &self.config.wifi_retry,
            )
            .await
            .is_err()
        {
            return Exit::GaveUp;
        }

        let topics = self.config.topics();
        let options = broker::connect_options(&self.config.broker, topics);
        let policy = self.config.broker_retry;
        let mut failures = 0u32;
        let mut session = loop {
            self.parts.watchdog.feed();
            info!("Attempting MQTT connection...");
            match connector.connect(&options).await {
                Ok(session) => break session,
                Err(e) => {
                    warn!(
                        "failed, rc={} try again in {} seconds",
                        e,
                        policy.delay_ms / 1_000
                    );
                    failures = failures.saturating_add(1);
                    if !policy.should_retry(failures) {
                        return Exit::GaveUp;
                    }
                    retry::pause(
                        &mut self.parts.clock,
                        &mut self.parts.watchdog,
                        policy.delay_ms,
                    )
                    .await;
                    if !self.parts.wifi.is_connected().await {
                        warn!("WiFi lost while connecting to broker");
                        return Exit::LinkLost;
                    }
                }
            }
        };
        info!("connected");
        self.parts.watchdog.feed();
        broker::announce(&mut session, topics).await;

        if !self.startup_published && self.config.variant.publishes_diagnostics() {
            if let Some(topic) = topics.startup_info {
                self.parts.watchdog.feed();
                diagnostics::publish_startup_info(
                    &mut session,
                    &mut self.counters,
                    topic,
                    &self.parts.system,
                    &self.parts.wifi,
                    self.config.wifi.ssid,
                )
                .await;
            }
            self.startup_published = true;
        }

        self.phase = Phase::Operating;
        let mut passes = 0u32;
        loop {
            if let Some(limit) = iterations {
                if passes >= limit {
                    return Exit::Budget;
                }
                passes += 1;
            }

            self.parts.watchdog.feed();
            if self.config.variant.serves_updates() {
                self.parts.ota.handle(&mut self.parts.watchdog).await;
                self.parts.watchdog.feed();
            }

            if !self.parts.wifi.is_connected().await {
                warn!("WiFi connection lost");
                return Exit::LinkLost;
            }
            if !session.is_connected() {
                warn!("MQTT connection lost");
                return Exit::BrokerLost;
            }
            if let Err(e) = session.poll().await {
                warn!("MQTT keep-alive failed: {}", e);
                return Exit::BrokerLost;
            }

            let now = self.parts.clock.now_ms();
            if self.cadence.poll(now) {
                self.parts.watchdog.feed();
                self.sample_cycle(&mut session, now).await;
            }

            self.parts.clock.idle().await;
        }
    }

    /// Read the sensor once and publish everything for this tick
    async fn sample_cycle<S: BrokerSession>(&mut self, session: &mut S, now: u64) {
        let topics = self.config.topics();
        let reading = sensor::sample(&mut self.parts.sensor, &self.parts.clock).await;
        self.counters.total_readings += 1;

        self.publish(session, topics.now, now.into()).await;
        self.publish(
            session,
            topics.temperature_read_time,
            reading.temperature_read_ms.into(),
        )
        .await;
        self.publish(
            session,
            topics.humidity_read_time,
            reading.humidity_read_ms.into(),
        )
        .await;

        if !reading.is_valid() {
            warn!("Failed to read from DHT sensor!");
            self.publish(session, topics.read_success, Payload::Number(0.0))
                .await;
            self.publish_stats(session).await;
            return;
        }

        self.publish(session, topics.read_success, Payload::Number(1.0))
            .await;
        self.counters.successful_readings += 1;

        self.publish(session, topics.temperature, reading.temperature.into())
            .await;
        self.publish(session, topics.humidity, reading.humidity.into())
            .await;
        self.publish_stats(session).await;
    }

    /// Feeds the watchdog first, a write may block for up to the network timeout
    async fn publish<S: BrokerSession>(
        &mut self,
        session: &mut S,
        topic: &str,
        payload: Payload<'_>,
    ) {
        self.parts.watchdog.feed();
        broker::publish(session, &mut self.counters, topic, payload).await;
    }

    async fn publish_stats<S: BrokerSession>(&mut self, session: &mut S) {
        if !self.config.variant.publishes_diagnostics() {
            return;
        }
        if let Some(topic) = self.config.topics().system_info {
            self.parts.watchdog.feed();
            diagnostics::publish_system_info(
                session,
                &mut self.counters,
                topic,
                &self.parts.system,
            )
            .await;
        }
    }
}
