// biostream — Wi-Fi Link Layer
//
// Brings the station interface up and turns system-loop events into
// `LinkEvent`s for the control loop.  Link-layer reconnection is left to the
// driver; the core only needs to know when the link is usable.

use std::sync::mpsc::Sender;

use anyhow::anyhow;
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::{EspSubscription, EspSystemEventLoop, System};
use esp_idf_svc::netif::IpEvent;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{AuthMethod, ClientConfiguration, Configuration, EspWifi, WifiEvent};

use crate::config::NodeSettings;
use crate::events::LinkEvent;

/// Keeps the driver and its event subscriptions alive.
pub struct Link {
    _wifi: EspWifi<'static>,
    _subscriptions: Vec<EspSubscription<'static, System>>,
}

pub fn start_link(
    modem: Modem,
    sysloop: EspSystemEventLoop,
    nvs: EspDefaultNvsPartition,
    settings: &NodeSettings,
    link_tx: Sender<LinkEvent>,
) -> anyhow::Result<Link> {
    let mut wifi = EspWifi::new(modem, sysloop.clone(), Some(nvs))?;

    let auth_method = if settings.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPA2Personal
    };
    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: settings
            .wifi_ssid
            .try_into()
            .map_err(|_| anyhow!("SSID '{}' too long", settings.wifi_ssid))?,
        password: settings
            .wifi_pass
            .try_into()
            .map_err(|_| anyhow!("Wi-Fi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    let down_tx = link_tx.clone();
    let wifi_sub = sysloop.subscribe::<WifiEvent, _>(move |event| {
        if matches!(event, WifiEvent::StaDisconnected { .. }) {
            let _ = down_tx.send(LinkEvent::Down);
            // SAFETY: plain driver call; the Wi-Fi driver outlives this subscription.
            unsafe {
                esp_idf_sys::esp_wifi_connect();
            }
        }
    })?;

    let ip_sub = sysloop.subscribe::<IpEvent, _>(move |event| {
        if matches!(event, IpEvent::DhcpIpAssigned(_)) {
            let _ = link_tx.send(LinkEvent::Up);
        }
    })?;

    wifi.start()?;
    wifi.connect()?;
    log::info!("Wi-Fi started, joining '{}'", settings.wifi_ssid);

    Ok(Link { _wifi: wifi, _subscriptions: vec![wifi_sub, ip_sub] })
}
