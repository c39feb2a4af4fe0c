//! Shared fixtures for integration tests
//!
//! `FakeDevice` is a loopback UDP responder that speaks enough of the Marstek
//! Open API for the transport, aggregator, verifier and bridge tests.

#![allow(dead_code)]
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use essrv::client::UdpClient;
use essrv::config::EssrvConfig;
use essrv::transport::{TransportOptions, UdpTransport};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

/// Mutable device state shared with the responder task
#[derive(Debug)]
pub struct DeviceState {
    pub mode: Mutex<String>,
    pub battery_power: Mutex<f64>,
    pub received: Mutex<Vec<Value>>,
    /// Arrival time of each entry in `received`
    pub arrivals: Mutex<Vec<tokio::time::Instant>>,
    /// Per-method reply delay
    pub delays: Mutex<HashMap<String, Duration>>,
    /// Swallow this many `ES.SetMode` writes without applying them
    pub lost_writes: AtomicU32,
    /// Send every request back before answering
    pub echo: AtomicBool,
    pub silent: AtomicBool,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            mode: Mutex::new("Auto".to_string()),
            battery_power: Mutex::new(0.0),
            received: Mutex::new(Vec::new()),
            arrivals: Mutex::new(Vec::new()),
            delays: Mutex::new(HashMap::new()),
            lost_writes: AtomicU32::new(0),
            echo: AtomicBool::new(false),
            silent: AtomicBool::new(false),
        }
    }
}

impl DeviceState {
    pub fn methods_received(&self) -> Vec<String> {
        self.received
            .lock()
            .iter()
            .filter_map(|r| r["method"].as_str().map(str::to_string))
            .collect()
    }

    pub fn delay(&self, method: &str, delay: Duration) {
        self.delays.lock().insert(method.to_string(), delay);
    }

    fn apply_set_mode(&self, params: &Value) {
        let config = &params["config"];
        let mode = config["mode"].as_str().unwrap_or("Auto").to_string();
        let power = match mode.as_str() {
            "Manual" if config["manual_cfg"]["enable"] == 1 => {
                config["manual_cfg"]["power"].as_f64().unwrap_or(0.0)
            },
            "Passive" => config["passive_cfg"]["power"].as_f64().unwrap_or(0.0),
            _ => 0.0,
        };
        *self.mode.lock() = mode;
        *self.battery_power.lock() = power;
    }

    /// Reply body for a request, or `None` to stay silent
    fn answer(&self, request: &Value, local: SocketAddr) -> Option<Value> {
        let id = request["id"].clone();
        let method = request["method"].as_str()?;
        let bat_power = *self.battery_power.lock();
        let result = match method {
            "Marstek.GetDevice" => json!({
                "device": "VenusE",
                "ver": 153,
                "ble_mac": "aabbccddeeff",
                "wifi_mac": "112233445566",
                "wifi_name": "home",
                "ip": local.ip().to_string(),
            }),
            "ES.GetMode" => json!({
                "id": 0,
                "mode": self.mode.lock().clone(),
                "ongrid_power": -bat_power,
                "bat_soc": 55,
            }),
            "ES.GetStatus" => json!({
                "id": 0,
                "bat_soc": 55,
                "bat_cap": 5120,
                "bat_power": bat_power,
                "pv_power": 0,
                "ongrid_power": -bat_power,
                "offgrid_power": 0,
                "total_pv_energy": 120.5,
                "total_grid_output_energy": 800,
                "total_grid_input_energy": 950,
                "total_load_energy": 0,
            }),
            "EM.GetStatus" => json!({
                "id": 0,
                "ct_state": 1,
                "a_power": 120,
                "b_power": 0,
                "c_power": 0,
                "total_power": 120,
            }),
            "PV.GetStatus" => json!({
                "id": 0,
                "pv_power": 210,
                "pv_voltage": 38.5,
                "pv_current": 5.4,
            }),
            "Wifi.GetStatus" => json!({
                "id": 0,
                "ssid": "home",
                "rssi": -61,
                "sta_ip": local.ip().to_string(),
            }),
            "Bat.GetStatus" => json!({
                "id": 0,
                "soc": 55,
                "bat_temp": 24.5,
                "charg_flag": 1,
                "dischrg_flag": 1,
                "bat_capacity": 2816,
                "rated_capacity": 5120,
            }),
            "ES.SetMode" => {
                if self
                    .lost_writes
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
                {
                    return None;
                }
                self.apply_set_mode(&request["params"]);
                json!({"id": 0, "set_result": true})
            },
            _ => return Some(json!({"id": id, "error": {"code": -32601, "message": "Method not found"}})),
        };
        Some(json!({"id": id, "src": "VenusE-test", "result": result}))
    }
}

/// Loopback device; stops when dropped
pub struct FakeDevice {
    pub addr: SocketAddr,
    pub state: Arc<DeviceState>,
    token: CancellationToken,
}

impl FakeDevice {
    pub async fn start() -> Self {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = socket.local_addr().unwrap();
        let state = Arc::new(DeviceState::default());
        let token = CancellationToken::new();

        tokio::spawn(serve(socket, Arc::clone(&state), token.clone()));
        Self { addr, state, token }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn serve(socket: Arc<UdpSocket>, state: Arc<DeviceState>, token: CancellationToken) {
    let mut buf = vec![0u8; 65536];
    let local = socket.local_addr().unwrap();
    loop {
        let (len, peer) = tokio::select! {
            _ = token.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(r) => r,
                Err(_) => continue,
            },
        };
        let Ok(request) = serde_json::from_slice::<Value>(&buf[..len]) else {
            continue;
        };
        state.received.lock().push(request.clone());
        state.arrivals.lock().push(tokio::time::Instant::now());
        if state.silent.load(Ordering::SeqCst) {
            continue;
        }
        if state.echo.load(Ordering::SeqCst) {
            let _ = socket.send_to(&buf[..len], peer).await;
        }
        let Some(reply) = state.answer(&request, local) else {
            continue;
        };
        let delay = request["method"]
            .as_str()
            .and_then(|m| state.delays.lock().get(m).copied())
            .unwrap_or_default();
        let socket = Arc::clone(&socket);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = socket.send_to(reply.to_string().as_bytes(), peer).await;
        });
    }
}

/// Transport on an ephemeral port with rate limiting off
pub fn test_options() -> TransportOptions {
    TransportOptions {
        local_port: 0,
        min_request_interval: Duration::ZERO,
        ..TransportOptions::default()
    }
}

pub async fn started_transport() -> Arc<UdpTransport> {
    let transport = Arc::new(UdpTransport::new(test_options()));
    transport.setup().await.unwrap();
    transport
}

/// Config for a bridge on loopback with ephemeral ports and no status delay
pub fn test_config(device_port: u16) -> EssrvConfig {
    let mut config = EssrvConfig::default();
    config.api.host = "127.0.0.1".to_string();
    config.api.port = 0;
    config.udp.local_port = 0;
    config.udp.device_port = device_port;
    config.udp.min_request_interval_ms = 0;
    config.status.timeout_secs = 0.5;
    config.status.delay_between_requests_secs = 0.0;
    config
}

pub async fn started_client(device_port: u16) -> Arc<UdpClient> {
    let client = Arc::new(UdpClient::from_config(&test_config(device_port)));
    client.setup().await.unwrap();
    client
}
