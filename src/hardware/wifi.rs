use core::net::Ipv4Addr;

use embassy_net::Stack;
use embassy_time::{Duration, Instant};
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiController};
use log::{debug, warn};

use crate::{config::Credentials, error::LinkError, traits::WifiLink};

/// Association attempts that neither succeed nor fail get restarted after this
const REASSOCIATE_AFTER: Duration = Duration::from_secs(10);

/// Station interface plus the IP stack running on it
pub struct EspWifi {
    controller: WifiController<'static>,
    stack: Stack<'static>,
    started: bool,
    last_attempt: Option<Instant>,
}

impl EspWifi {
    pub fn new(controller: WifiController<'static>, stack: Stack<'static>) -> Self {
        Self {
            controller,
            stack,
            started: false,
            last_attempt: None,
        }
    }
}

impl WifiLink for EspWifi {
    async fn begin(&mut self, credentials: &Credentials<'_>) -> Result<(), LinkError> {
        if !self.started {
            let client = ClientConfig::default()
                .with_ssid(credentials.ssid.into())
                .with_password(credentials.password.into());
            self.controller
                .set_config(&ModeConfig::Client(client))
                .map_err(|e| {
                    warn!("wifi set_config failed: {:?}", e);
                    LinkError::Configuration
                })?;
            self.controller.start().map_err(|e| {
                warn!("wifi start failed: {:?}", e);
                LinkError::Start
            })?;
            self.started = true;
            debug!("wifi started in station mode");
        }

        self.last_attempt = Some(Instant::now());
        self.controller.connect().map_err(|e| {
            warn!("wifi connect failed: {:?}", e);
            LinkError::Association
        })
    }

    async fn is_connected(&mut self) -> bool {
        let associated = self.controller.is_connected().unwrap_or(false);
        if !associated
            && let Some(at) = self.last_attempt
            && at.elapsed() > REASSOCIATE_AFTER
        {
            // the driver does not retry on its own
            debug!("wifi reassociating");
            self.last_attempt = Some(Instant::now());
            if let Err(e) = self.controller.connect() {
                warn!("wifi connect failed: {:?}", e);
            }
        }
        associated && self.stack.is_config_up()
    }

    fn local_ip(&self) -> Option<Ipv4Addr> {
        self.stack.config_v4().map(|config| config.address.address())
    }

    fn bssid(&self) -> Option<[u8; 6]> {
        // the radio driver does not expose the associated AP
        None
    }
}
