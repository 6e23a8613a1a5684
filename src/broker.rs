//! Broker session helpers: connect options, status announcement and the
//! fire-and-forget publish used by the main loop.

use core::fmt::Write;

use heapless::String;
use log::{info, warn};

use crate::{
    config::{BrokerConfig, Topics},
    model::{Counters, Payload},
    traits::{BrokerSession, ConnectOptions, LastWill},
};

/// Retained on the status topic while we are online
pub const STATUS_CONNECTED: &str = "connected";
/// Last will, retained on the status topic once the broker notices we are gone
pub const STATUS_DISCONNECTED: &str = "disconnected";

/// Session parameters for this node
pub fn connect_options<'a>(broker: &'a BrokerConfig, topics: &'a Topics) -> ConnectOptions<'a> {
    ConnectOptions {
        client_id: broker.client_id,
        username: broker.username,
        password: broker.password,
        keep_alive_secs: broker.keep_alive_secs,
        will: LastWill {
            topic: topics.status,
            payload: STATUS_DISCONNECTED,
            retain: true,
        },
    }
}

/// Tell subscribers we are online. Not counted as a sent message.
pub async fn announce<S: BrokerSession>(session: &mut S, topics: &Topics) {
    if let Err(e) = session
        .publish(topics.status, STATUS_CONNECTED.as_bytes(), true)
        .await
    {
        warn!("failed to announce on {}: {}", topics.status, e);
    }
}

/// Publish one retained value.
///
/// Failures are logged and dropped. Every attempt counts towards
/// `messages_sent`, successful or not. Nothing is attempted, or counted, on a
/// session that already reports being down.
pub async fn publish<S: BrokerSession>(
    session: &mut S,
    counters: &mut Counters,
    topic: &str,
    payload: Payload<'_>,
) {
    if !session.is_connected() {
        warn!("{}: dropped, broker not connected", topic);
        return;
    }

    let mut number: String<32> = String::new();
    let bytes = match payload {
        Payload::Text(text) => text.as_bytes(),
        Payload::Number(_) => {
            if write!(number, "{}", payload).is_err() {
                warn!("{}: value does not fit", topic);
                return;
            }
            number.as_bytes()
        }
    };

    info!("{}: {}", topic, payload);
    if let Err(e) = session.publish(topic, bytes, true).await {
        warn!("failed to send MQTT message! ({})", e);
    }
    counters.messages_sent += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::FULL_TOPICS, error::BrokerError};
    use embassy_futures::block_on;

    type Sent = (std::string::String, Vec<u8>, bool);

    fn retained(topic: &str, payload: &[u8]) -> Sent {
        (topic.to_owned(), payload.to_vec(), true)
    }

    #[derive(Default)]
    struct Session {
        down: bool,
        fail: bool,
        sent: Vec<Sent>,
    }

    impl BrokerSession for Session {
        fn is_connected(&self) -> bool {
            !self.down
        }

        async fn publish(
            &mut self,
            topic: &str,
            payload: &[u8],
            retain: bool,
        ) -> Result<(), BrokerError> {
            if self.fail {
                return Err(BrokerError::Io);
            }
            self.sent.push((topic.to_owned(), payload.to_vec(), retain));
            Ok(())
        }

        async fn poll(&mut self) -> Result<(), BrokerError> {
            Ok(())
        }
    }

    #[test]
    fn numbers_go_out_retained_with_two_decimals() {
        let mut session = Session::default();
        let mut counters = Counters::default();
        block_on(publish(
            &mut session,
            &mut counters,
            "home/dht11/temperature",
            Payload::from(21.0f32),
        ));
        assert_eq!(session.sent, vec![retained("home/dht11/temperature", b"21.00")]);
        assert_eq!(counters.messages_sent, 1);
    }

    #[test]
    fn failed_publish_still_counts() {
        let mut session = Session {
            fail: true,
            ..Default::default()
        };
        let mut counters = Counters::default();
        block_on(publish(&mut session, &mut counters, "t", Payload::Text("x")));
        assert!(session.sent.is_empty());
        assert_eq!(counters.messages_sent, 1);
    }

    #[test]
    fn nothing_attempted_while_down() {
        let mut session = Session {
            down: true,
            ..Default::default()
        };
        let mut counters = Counters::default();
        block_on(publish(&mut session, &mut counters, "t", Payload::Number(1.0)));
        assert!(session.sent.is_empty());
        assert_eq!(counters.messages_sent, 0);
    }

    #[test]
    fn announcement_is_retained_and_uncounted() {
        let mut session = Session::default();
        block_on(announce(&mut session, &FULL_TOPICS));
        assert_eq!(session.sent, vec![retained("home/dht11/status", b"connected")]);
    }

    #[test]
    fn will_marks_status_disconnected() {
        let broker = BrokerConfig {
            host: "10.0.0.2",
            port: 1883,
            username: Some("node"),
            password: Some("secret"),
            client_id: "esp32dht11",
            keep_alive_secs: 15,
        };
        let options = connect_options(&broker, &FULL_TOPICS);
        assert_eq!(options.client_id, "esp32dht11");
        assert_eq!(options.will.topic, "home/dht11/status");
        assert_eq!(options.will.payload, "disconnected");
        assert!(options.will.retain);
    }
}
