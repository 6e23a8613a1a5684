//! Wi-Fi association loop

use log::{debug, info, warn};

use crate::{
    config::Credentials,
    error::LinkError,
    retry::{RetryPolicy, pause},
    traits::{Clock, Watchdog, WifiLink},
};

/// Associate with the access point and wait for an IPv4 lease.
///
/// Polls the link at the policy's fixed interval. With an unbounded policy
/// this only returns once the link is up.
pub async fn connect<L, C, W>(
    wifi: &mut L,
    clock: &mut C,
    watchdog: &mut W,
    credentials: &Credentials<'_>,
    policy: &RetryPolicy,
) -> Result<(), LinkError>
where
    L: WifiLink,
    C: Clock,
    W: Watchdog,
{
    info!("Connecting to {}", credentials.ssid);

    let mut failures = 0u32;
    while let Err(e) = wifi.begin(credentials).await {
        warn!("WiFi start failed: {}", e);
        failures = failures.saturating_add(1);
        if !policy.should_retry(failures) {
            return Err(e);
        }
        pause(clock, watchdog, policy.delay_ms).await;
    }

    while !wifi.is_connected().await {
        failures = failures.saturating_add(1);
        if !policy.should_retry(failures) {
            warn!("WiFi gave up after {} attempts", failures);
            return Err(LinkError::Association);
        }
        debug!(".");
        pause(clock, watchdog, policy.delay_ms).await;
    }

    info!("WiFi connected");
    match wifi.local_ip() {
        Some(ip) => info!("IP address: {}", ip),
        None => info!("IP address: unknown"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::net::Ipv4Addr;
    use embassy_futures::block_on;

    struct Link {
        begin_failures: u32,
        polls_until_up: u32,
        begins: u32,
        polls: u32,
    }

    impl WifiLink for Link {
        async fn begin(&mut self, _credentials: &Credentials<'_>) -> Result<(), LinkError> {
            self.begins += 1;
            if self.begins <= self.begin_failures {
                Err(LinkError::Start)
            } else {
                Ok(())
            }
        }

        async fn is_connected(&mut self) -> bool {
            self.polls += 1;
            self.polls > self.polls_until_up
        }

        fn local_ip(&self) -> Option<Ipv4Addr> {
            Some(Ipv4Addr::new(192, 168, 1, 50))
        }

        fn bssid(&self) -> Option<[u8; 6]> {
            None
        }
    }

    struct Sleeper(u64);

    impl Clock for Sleeper {
        fn now_ms(&self) -> u64 {
            self.0
        }

        async fn delay_ms(&mut self, ms: u64) {
            self.0 += ms;
        }

        async fn idle(&mut self) {}
    }

    struct Dog(u32);

    impl Watchdog for Dog {
        fn feed(&mut self) {
            self.0 += 1;
        }
    }

    const CREDS: Credentials<'static> = Credentials {
        ssid: "attic",
        password: "hunter2",
    };

    #[test]
    fn polls_at_fixed_interval_until_up() {
        let mut link = Link {
            begin_failures: 0,
            polls_until_up: 4,
            begins: 0,
            polls: 0,
        };
        let mut clock = Sleeper(0);
        let mut dog = Dog(0);
        let result = block_on(connect(
            &mut link,
            &mut clock,
            &mut dog,
            &CREDS,
            &RetryPolicy::forever(500),
        ));
        assert_eq!(result, Ok(()));
        assert_eq!(link.polls, 5);
        assert_eq!(clock.0, 2_000);
        assert!(dog.0 >= 4);
    }

    #[test]
    fn retries_start_failures() {
        let mut link = Link {
            begin_failures: 2,
            polls_until_up: 0,
            begins: 0,
            polls: 0,
        };
        let mut clock = Sleeper(0);
        let result = block_on(connect(
            &mut link,
            &mut clock,
            &mut Dog(0),
            &CREDS,
            &RetryPolicy::forever(500),
        ));
        assert_eq!(result, Ok(()));
        assert_eq!(link.begins, 3);
    }

    #[test]
    fn bounded_policy_gives_up() {
        let mut link = Link {
            begin_failures: 0,
            polls_until_up: u32::MAX,
            begins: 0,
            polls: 0,
        };
        let result = block_on(connect(
            &mut link,
            &mut Sleeper(0),
            &mut Dog(0),
            &CREDS,
            &RetryPolicy::limited(500, 3),
        ));
        assert_eq!(result, Err(LinkError::Association));
        assert_eq!(link.polls, 3);
    }
}
