use clap::{Args, Parser, Subcommand, ValueEnum};
use std::time::Duration;

use crate::payload::PayloadKind;
use crate::radio::{NbiotConfig, RadioKind};
use crate::socket::Endpoint;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "nbiot-rtt",
    about = "Round-trip experiments over NB-IoT, LTE and WLAN (HTTP, CoAP, MQTT)"
)]
pub struct Cli {
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// Send one raw AT command to the modem
    At(AtOpts),
    /// Bring NB-IoT up, report signal, ping the server, power down
    Attach(AttachOpts),
    /// CoAP GET/POST of a reference payload
    Coap(CoapOpts),
    /// HTTP GET/POST of a reference payload, or a bare TCP handshake
    Http(HttpOpts),
    /// MQTT publish/subscribe of a reference payload over NB-IoT
    Mqtt(MqttOpts),
}

#[derive(Args, Debug, Clone)]
pub struct SerialOpts {
    /// Serial device path
    #[arg(long, default_value = "/dev/ttyUSB0")]
    pub dev: String,
    /// Baud rate
    #[arg(long, default_value_t = 115_200)]
    pub baud: u32,
    /// Enable RTS/CTS
    #[arg(long, default_value_t = false)]
    pub rtscts: bool,
    /// Skip the DTR power-key cycle before bring-up
    #[arg(long, default_value_t = false)]
    pub no_power_cycle: bool,
}

#[derive(Args, Debug, Clone)]
pub struct NbiotOpts {
    /// Access point name of the PDP context
    #[arg(long, default_value = "telenor.iot")]
    pub apn: String,
    /// Expected numeric operator, e.g. 24201
    #[arg(long)]
    pub operator: Option<String>,
    /// Host to resolve after attach
    #[arg(long)]
    pub dns_probe: Option<String>,
    /// Power-key cycles before giving up on the modem
    #[arg(long, default_value_t = 5)]
    pub boot_attempts: u32,
    /// Seconds to wait for the network attach
    #[arg(long, default_value_t = 300)]
    pub attach_timeout: u64,
}

impl NbiotOpts {
    pub fn config(&self, ser: &SerialOpts) -> NbiotConfig {
        NbiotConfig {
            apn: self.apn.clone(),
            operator: self.operator.clone(),
            dns_probe: self.dns_probe.clone(),
            power_cycle: !ser.no_power_cycle,
            boot_attempts: self.boot_attempts.max(1),
            attach_timeout: Duration::from_secs(self.attach_timeout),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServerOpts {
    /// Server IP address
    #[arg(long, default_value = "127.0.0.1")]
    pub server: String,
    /// Host name sent in HTTP requests and used for ping
    #[arg(long, default_value = "localhost")]
    pub host: String,
    #[arg(long, default_value_t = 31415)]
    pub http_port: u16,
    #[arg(long, default_value_t = 31416)]
    pub coap_port: u16,
    #[arg(long, default_value_t = 31417)]
    pub mqtt_port: u16,
    #[arg(long, default_value = "user")]
    pub mqtt_user: String,
    #[arg(long, default_value = "password")]
    pub mqtt_password: String,
}

impl ServerOpts {
    pub fn http(&self) -> Endpoint {
        Endpoint::new(self.server.clone(), self.http_port)
    }

    pub fn coap(&self) -> Endpoint {
        Endpoint::new(self.server.clone(), self.coap_port)
    }

    pub fn mqtt(&self) -> Endpoint {
        Endpoint::new(self.server.clone(), self.mqtt_port)
    }
}

#[derive(Args, Debug, Clone)]
pub struct RepeatOpts {
    /// Number of timed transfers
    #[arg(long, default_value_t = 1)]
    pub repeat: u32,
    /// Seconds to wait before retrying a timed-out transfer
    #[arg(long, default_value_t = 1.0)]
    pub retry_delay: f64,
    /// Give up on a transfer after this many timeouts (default: never)
    #[arg(long)]
    pub max_attempts: Option<u32>,
    /// Seconds between consecutive transfers
    #[arg(long, default_value_t = 1.0)]
    pub pause: f64,
}

impl RepeatOpts {
    pub fn retry_delay(&self) -> Duration {
        seconds(self.retry_delay)
    }

    pub fn pause(&self) -> Duration {
        seconds(self.pause)
    }
}

fn seconds(secs: f64) -> Duration {
    Duration::from_secs_f64(secs.max(0.0))
}

#[derive(Args, Debug, Clone)]
pub struct AtOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    /// Command line, e.g. AT+CSQ
    pub command: String,
    /// Pattern a response line must match (anchored at line start)
    #[arg(long)]
    pub expect: Option<String>,
    /// Capture groups to extract from the matching line
    #[arg(long, num_args = 1..)]
    pub index: Vec<usize>,
    /// Line that completes the response
    #[arg(long, default_value = "OK")]
    pub terminal: String,
    /// Response timeout in seconds
    #[arg(long, default_value_t = 5.0)]
    pub timeout: f64,
    /// After the response, wait for an indication containing this prefix
    #[arg(long)]
    pub listen: Option<String>,
    /// Idle timeout in seconds while listening
    #[arg(long, default_value_t = 30.0)]
    pub listen_timeout: f64,
}

#[derive(Args, Debug, Clone)]
pub struct AttachOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    #[command(flatten)]
    pub nbiot: NbiotOpts,
    #[command(flatten)]
    pub server: ServerOpts,
    /// Echo requests to send
    #[arg(long, default_value_t = 5)]
    pub ping_count: u32,
    /// Seconds to wait for each echo reply
    #[arg(long, default_value_t = 20)]
    pub ping_timeout: u64,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoapMethod {
    Get,
    Post,
}

/// Socket underneath the CoAP engine.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoapVia {
    /// UDP socket of the host (WLAN/LTE)
    Host,
    /// Modem UDP socket profile
    Udp,
    /// Modem CoAP client profile (GET only)
    Coap,
}

#[derive(Args, Debug, Clone)]
pub struct CoapOpts {
    pub method: CoapMethod,
    pub payload: PayloadKind,
    /// Non-confirmable requests
    #[arg(long, default_value_t = false)]
    pub non: bool,
    #[arg(long, value_enum, default_value_t = CoapVia::Host)]
    pub via: CoapVia,
    /// Bearer behind host sockets
    #[arg(long, value_enum, default_value_t = RadioKind::Wlan)]
    pub radio: RadioKind,
    /// Seconds to wait for the response to one block (default: per socket)
    #[arg(long)]
    pub poll_budget: Option<f64>,
    /// Seconds a modem socket command may take (default: per socket)
    #[arg(long)]
    pub socket_timeout: Option<f64>,
    #[command(flatten)]
    pub ser: SerialOpts,
    #[command(flatten)]
    pub nbiot: NbiotOpts,
    #[command(flatten)]
    pub server: ServerOpts,
    #[command(flatten)]
    pub repeat: RepeatOpts,
}

impl CoapOpts {
    pub fn poll_budget(&self) -> Option<Duration> {
        self.poll_budget.map(seconds)
    }

    pub fn socket_timeout(&self) -> Option<Duration> {
        self.socket_timeout.map(seconds)
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Handshake,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVia {
    /// TCP socket of the host (WLAN/LTE)
    Host,
    /// Modem TCP socket profile
    Tcp,
}

#[derive(Args, Debug, Clone)]
pub struct HttpOpts {
    pub method: HttpMethod,
    #[arg(default_value = "short")]
    pub payload: PayloadKind,
    #[arg(long, value_enum, default_value_t = HttpVia::Host)]
    pub via: HttpVia,
    /// Bearer behind host sockets
    #[arg(long, value_enum, default_value_t = RadioKind::Wlan)]
    pub radio: RadioKind,
    /// Seconds to wait for connect and for each received chunk (default: per socket)
    #[arg(long)]
    pub socket_timeout: Option<f64>,
    #[command(flatten)]
    pub ser: SerialOpts,
    #[command(flatten)]
    pub nbiot: NbiotOpts,
    #[command(flatten)]
    pub server: ServerOpts,
    #[command(flatten)]
    pub repeat: RepeatOpts,
}

impl HttpOpts {
    pub fn socket_timeout(&self) -> Option<Duration> {
        self.socket_timeout.map(seconds)
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MqttAction {
    Publish,
    Subscribe,
}

#[derive(Args, Debug, Clone)]
pub struct MqttOpts {
    pub action: MqttAction,
    pub payload: PayloadKind,
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=1))]
    pub qos: u8,
    #[arg(long, default_value = "fipyra")]
    pub client_id: String,
    /// Seconds to wait for a message after subscribing
    #[arg(long, default_value_t = 60.0)]
    pub wait_timeout: f64,
    #[command(flatten)]
    pub ser: SerialOpts,
    #[command(flatten)]
    pub nbiot: NbiotOpts,
    #[command(flatten)]
    pub server: ServerOpts,
    #[command(flatten)]
    pub repeat: RepeatOpts,
}

impl MqttOpts {
    pub fn wait_timeout(&self) -> Duration {
        seconds(self.wait_timeout)
    }
}
