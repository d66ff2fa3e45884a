//! HDHomeRun device emulation.
//!
//! Media servers discover the proxy as an HDHomeRun tuner: a fixed
//! discovery document, a lineup derived from the active channels, and
//! an SSDP-style capability document. Lineup numbers are persisted in
//! `pms.json` so a channel keeps the guide number it was first
//! advertised with.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::warn;

use crate::persist;
use crate::xepg::numbers::parse_channel_number;

use super::AppState;

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct DiscoverResponse {
    pub friendly_name: String,
    pub manufacturer: String,
    pub model_number: String,
    pub firmware_name: String,
    pub firmware_version: String,
    #[serde(rename = "DeviceID")]
    pub device_id: String,
    pub device_auth: String,
    #[serde(rename = "BaseURL")]
    pub base_url: String,
    #[serde(rename = "LineupURL")]
    pub lineup_url: String,
    pub tuner_count: u32,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct LineupEntry {
    pub guide_number: String,
    pub guide_name: String,
    #[serde(rename = "URL")]
    pub url: String,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct LineupStatus {
    pub scan_in_progress: u8,
    pub scan_possible: u8,
    pub source: String,
    pub source_list: Vec<String>,
}

pub async fn discover(State(state): State<AppState>) -> Json<DiscoverResponse> {
    let settings = state.context.settings.read().await;
    let base_url = state.context.system.base_url();
    Json(DiscoverResponse {
        friendly_name: "tvmux".to_string(),
        manufacturer: "Silicondust".to_string(),
        model_number: "HDTC-2US".to_string(),
        firmware_name: "hdhomeruntc_atsc".to_string(),
        firmware_version: "20170930".to_string(),
        device_id: settings.device_id.clone(),
        device_auth: "tvmux".to_string(),
        lineup_url: format!("{base_url}/lineup.json"),
        base_url,
        tuner_count: settings.tuner_count,
    })
}

pub async fn lineup(State(state): State<AppState>) -> Json<Vec<LineupEntry>> {
    let base_url = state.context.system.base_url();
    let mut data = state.context.data.write().await;

    let mut channels: Vec<(String, String, String, String)> = data
        .xepg
        .channels
        .values()
        .filter(|c| c.x_active)
        .map(|c| {
            (
                c.x_id.clone(),
                c.x_channel_number.clone(),
                c.x_name.clone(),
                crate::output::url_id(&c.provider_id, &c.url),
            )
        })
        .collect();
    channels.sort_by(|a, b| {
        let left = parse_channel_number(&a.1).unwrap_or(f64::MAX);
        let right = parse_channel_number(&b.1).unwrap_or(f64::MAX);
        left.partial_cmp(&right).unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut changed = false;
    let mut lineup = Vec::with_capacity(channels.len());
    for (x_id, number, name, url_id) in channels {
        let guide_number = match data.pms_numbers.get(&x_id) {
            Some(number) => number.clone(),
            None => {
                changed = true;
                data.pms_numbers.insert(x_id, number.clone());
                number
            }
        };
        lineup.push(LineupEntry {
            guide_number,
            guide_name: name,
            url: format!("{base_url}/stream/{url_id}"),
        });
    }

    if changed {
        if let Err(e) = persist::write_json_atomic(&state.context.paths.pms_file(), &data.pms_numbers)
        {
            warn!("failed to persist pms.json: {e}");
        }
    }

    Json(lineup)
}

pub async fn lineup_status(State(state): State<AppState>) -> Json<LineupStatus> {
    Json(LineupStatus {
        scan_in_progress: state.context.scan_in_progress() as u8,
        scan_possible: 0,
        source: "Cable".to_string(),
        source_list: vec!["Cable".to_string()],
    })
}

pub async fn device_xml(State(state): State<AppState>) -> Response {
    let settings = state.context.settings.read().await;
    let document = format!(
        r#"<root xmlns="urn:schemas-upnp-org:device-1-0">
<specVersion>
<major>1</major>
<minor>0</minor>
</specVersion>
<URLBase>{base}</URLBase>
<device>
  <deviceType>urn:schemas-upnp-org:device:MediaServer:1</deviceType>
  <friendlyName>tvmux</friendlyName>
  <manufacturer>Silicondust</manufacturer>
  <modelName>HDTC-2US</modelName>
  <modelNumber>HDTC-2US</modelNumber>
  <serialNumber>{device_id}</serialNumber>
  <UDN>uuid:{device_id}</UDN>
</device>
</root>"#,
        base = state.context.system.base_url(),
        device_id = settings.device_id,
    );
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/xml")],
        document,
    )
        .into_response()
}
