use std::cell::RefCell;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{Radio, RadioError, RadioKind, SignalQuality};
use crate::at::{AtChannel, AtCommand, AtEngine, AtError, POWER_DOWN_MARKER, Response, SharedChannel};
use crate::bench::timed_step;
use crate::port::SerialLink;

const POWER_KEY_LOW: Duration = Duration::from_millis(900);
const BOOT_SETTLE: Duration = Duration::from_secs(2);
const BOOT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const ATTACH_POLL: Duration = Duration::from_secs(2);
const DNS_TIMEOUT: Duration = Duration::from_secs(20);

/// Bring-up settings of the NB-IoT modem.
#[derive(Debug, Clone)]
pub struct NbiotConfig {
    pub apn: String,
    /// Expected network operator (numeric), checked after attach.
    pub operator: Option<String>,
    /// Host resolved once after attach to verify DNS.
    pub dns_probe: Option<String>,
    pub power_cycle: bool,
    pub boot_attempts: u32,
    pub attach_timeout: Duration,
}

impl Default for NbiotConfig {
    fn default() -> Self {
        Self {
            apn: "telenor.iot".to_string(),
            operator: None,
            dns_probe: Some("www.google.no".to_string()),
            power_cycle: true,
            boot_attempts: 5,
            attach_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingReply {
    pub seq: u32,
    pub ttl: u32,
    pub time: Duration,
}

/// SIM7020-family modem driven over AT commands.
pub struct Nbiot {
    engine: Rc<RefCell<AtEngine>>,
    config: NbiotConfig,
    connected: bool,
    address: Option<String>,
}

impl Nbiot {
    pub fn new(link: Box<dyn SerialLink>, config: NbiotConfig) -> Self {
        Self {
            engine: Rc::new(RefCell::new(AtEngine::new(link))),
            config,
            connected: false,
            address: None,
        }
    }

    /// Command channel shared with the profile adapters.
    pub fn channel(&self) -> SharedChannel {
        self.engine.clone()
    }

    /// Local address assigned by the network after attach.
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn execute(&self, cmd: &AtCommand) -> Result<Response, AtError> {
        self.engine.borrow_mut().execute(cmd)
    }

    /// Run a bring-up step that must succeed.
    fn step(&self, cmd: AtCommand) -> Result<Response, RadioError> {
        let resp = self.execute(&cmd)?;
        if !resp.is_success() {
            return Err(RadioError::Rejected(cmd.text().to_string()));
        }
        Ok(resp)
    }

    fn power_cycle(&self) -> Result<(), RadioError> {
        let mut engine = self.engine.borrow_mut();
        engine.set_power_line(false)?;
        thread::sleep(POWER_KEY_LOW);
        engine.set_power_line(true)?;
        thread::sleep(BOOT_SETTLE);
        Ok(())
    }

    fn boot(&self) -> Result<(), RadioError> {
        for attempt in 1..=self.config.boot_attempts {
            if self.config.power_cycle {
                self.power_cycle()?;
            }
            match self.execute(&AtCommand::new("AT").timeout(BOOT_PROBE_TIMEOUT)) {
                Ok(resp) if resp.is_success() => return Ok(()),
                Ok(_) => warn!("boot attempt {}: modem answered ERROR", attempt),
                Err(e) if e.is_timeout() => warn!("boot attempt {}: no answer", attempt),
                Err(e) => return Err(e.into()),
            }
        }
        Err(RadioError::NoModem)
    }

    fn provision(&self) -> Result<(), RadioError> {
        // The APN can only be changed at minimum functionality.
        self.step(AtCommand::new("AT+CFUN=0"))?;
        self.step(AtCommand::new(format!("AT*MCGDEFCONT=\"IP\",\"{}\"", self.config.apn)))?;
        self.step(AtCommand::new("AT+CFUN=1").expect(r"\+CPIN: READY").timeout(Duration::from_secs(10)))?;
        Ok(())
    }

    fn attach(&mut self) -> Result<(), RadioError> {
        let pattern = format!(
            r#"\+CGCONTRDP: .*"{}","([0-9.]+)""#,
            regex::escape(&self.config.apn)
        );
        let deadline = Instant::now() + self.config.attach_timeout;
        loop {
            let cmd = AtCommand::new("AT+CGCONTRDP")
                .expect(pattern.as_str())
                .capture(&[1])
                .timeout(ATTACH_POLL);
            match self.execute(&cmd) {
                Ok(resp) if resp.is_success() => {
                    // Address and subnet mask come as one dotted string.
                    let addr = resp
                        .field(0)
                        .unwrap_or_default()
                        .split('.')
                        .take(4)
                        .collect::<Vec<_>>()
                        .join(".");
                    info!("attached to {}, address {}", self.config.apn, addr);
                    self.address = Some(addr);
                    return Ok(());
                }
                Ok(_) => thread::sleep(ATTACH_POLL),
                Err(e) if e.is_timeout() => {}
                Err(e) => return Err(e.into()),
            }
            if Instant::now() >= deadline {
                return Err(RadioError::AttachTimeout(self.config.attach_timeout));
            }
        }
    }

    fn check_operator(&self) -> Result<(), RadioError> {
        let resp = self.step(AtCommand::new("AT+COPS?").expect(r"\+COPS: (.*)").capture(&[1]))?;
        let cops = resp.field(0).unwrap_or_default();
        info!("operator: {}", cops);
        if let Some(op) = &self.config.operator
            && !cops.contains(&format!("\"{}\"", op))
        {
            return Err(RadioError::Rejected(format!("operator {} (got {})", op, cops)));
        }
        Ok(())
    }

    /// IPv4 address of `host` from the modem's resolver.
    pub fn resolve(&self, host: &str) -> Result<String, RadioError> {
        let cmd = AtCommand::new(format!("AT+CDNSGIP=\"{}\"", host))
            .expect(format!(
                r#"\+CDNSGIP: 1,"{}","([0-9]+\.[0-9]+\.[0-9]+\.[0-9]+)""#,
                regex::escape(host)
            ))
            .capture(&[1])
            .timeout(DNS_TIMEOUT);
        let resp = self.step(cmd)?;
        let ip = resp.field(0).unwrap_or_default().to_string();
        info!("[{}]: {}", host, ip);
        Ok(ip)
    }

    /// ICMP echo through the modem. `timeout` applies to each request.
    pub fn ping(&self, host: &str, count: u32, timeout: Duration) -> Result<Vec<PingReply>, RadioError> {
        let ip = self.resolve(host)?;
        let tenths = (timeout.as_millis() / 100).max(1);
        let cmd = AtCommand::new(format!("AT+CIPPING={},{},32,{}", ip, count, tenths))
            .timeout(timeout * (count + 1));
        let wanted = count as usize;
        let (resp, lines) = self
            .engine
            .borrow_mut()
            .execute_streaming(&cmd, "+CIPPING:", |r| r.len() >= wanted)?;
        if !resp.is_success() {
            return Err(RadioError::Rejected(cmd.text().to_string()));
        }

        let mut replies = Vec::with_capacity(lines.len());
        for fields in &lines {
            let num = |i: usize| fields.get(i).and_then(|f| f.trim().parse::<u32>().ok());
            let (Some(seq), Some(time), Some(ttl)) = (num(0), num(2), num(3)) else {
                debug!("skipping ping reply {:?}", fields);
                continue;
            };
            let reply = PingReply {
                seq,
                ttl,
                time: Duration::from_millis(u64::from(time) * 100),
            };
            info!("32 bytes from {}: icmp_seq={}, ttl={}, time={} ms", ip, seq, ttl, reply.time.as_millis());
            replies.push(reply);
        }
        Ok(replies)
    }
}

impl Radio for Nbiot {
    fn kind(&self) -> RadioKind {
        RadioKind::Nbiot
    }

    fn connect(&mut self) -> Result<(), RadioError> {
        timed_step("NB-IoT boot", || self.boot())?;
        timed_step("NB-IoT provisioning", || self.provision())?;
        timed_step("NB-IoT attach", || self.attach())?;
        self.check_operator()?;
        if let Some(host) = self.config.dns_probe.clone()
            && let Err(e) = self.resolve(&host)
        {
            warn!("dns probe {} failed: {}", host, e);
        }
        if let Some(q) = self.signal_strength()? {
            info!("signal quality: {}", q);
        }
        self.connected = true;
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), RadioError> {
        self.connected = false;
        self.address = None;
        self.step(AtCommand::new("AT+CPOWD=1").terminal(POWER_DOWN_MARKER))?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn signal_strength(&mut self) -> Result<Option<SignalQuality>, RadioError> {
        let cmd = AtCommand::new("AT+CSQ")
            .expect(r"\+CSQ: ([0-9]+),([0-9]+)")
            .capture(&[1, 2]);
        let resp = self.step(cmd)?;
        let raw = |i| resp.field(i).and_then(|f| f.parse::<u8>().ok());
        Ok(match (raw(0), raw(1)) {
            (Some(rssi_raw), Some(ber_raw)) => Some(SignalQuality { rssi_raw, ber_raw }),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::ScriptedLink;

    fn config() -> NbiotConfig {
        NbiotConfig {
            power_cycle: false,
            boot_attempts: 2,
            attach_timeout: Duration::from_secs(3),
            dns_probe: None,
            ..Default::default()
        }
    }

    fn bring_up(link: ScriptedLink) -> ScriptedLink {
        link.reply("AT", &["OK"])
            .reply("AT+CFUN=0", &["OK"])
            .reply("AT*MCGDEFCONT", &["OK"])
            .reply("AT+CFUN=1", &["OK", "+CPIN: READY"])
            .reply(
                "AT+CGCONTRDP",
                &["+CGCONTRDP: 1,5,\"telenor.iot\",\"10.1.2.3.255.255.255.0\"", "OK"],
            )
            .reply("AT+COPS?", &["+COPS: 0,2,\"24201\",9", "OK"])
            .reply("AT+CSQ", &["+CSQ: 20,0", "OK"])
    }

    #[test]
    fn connect_runs_bring_up_sequence() {
        let link = bring_up(ScriptedLink::new());
        let written = link.written();
        let mut nb = Nbiot::new(Box::new(link), config());
        nb.connect().unwrap();

        assert!(nb.is_connected());
        assert_eq!(nb.address(), Some("10.1.2.3"));
        assert_eq!(
            written.borrow().as_slice(),
            [
                "AT",
                "AT+CFUN=0",
                "AT*MCGDEFCONT=\"IP\",\"telenor.iot\"",
                "AT+CFUN=1",
                "AT+CGCONTRDP",
                "AT+COPS?",
                "AT+CSQ",
            ]
        );
    }

    #[test]
    fn attach_polls_until_context_is_listed() {
        let link = ScriptedLink::new()
            .reply("AT", &["OK"])
            .reply("AT+CFUN=0", &["OK"])
            .reply("AT*MCGDEFCONT", &["OK"])
            .reply("AT+CFUN=1", &["+CPIN: READY", "OK"])
            .reply("AT+CGCONTRDP", &["ERROR"])
            .reply(
                "AT+CGCONTRDP",
                &["+CGCONTRDP: 1,5,\"telenor.iot\",\"10.9.8.7.255.255.255.0\"", "OK"],
            )
            .reply("AT+COPS?", &["+COPS: 0,2,\"24201\",9", "OK"])
            .reply("AT+CSQ", &["+CSQ: 20,0", "OK"]);
        let written = link.written();
        let cfg = NbiotConfig {
            attach_timeout: Duration::from_secs(10),
            ..config()
        };
        let mut nb = Nbiot::new(Box::new(link), cfg);
        nb.connect().unwrap();
        let polls = written.borrow().iter().filter(|l| *l == "AT+CGCONTRDP").count();
        assert_eq!(polls, 2);
        assert_eq!(nb.address(), Some("10.9.8.7"));
    }

    #[test]
    fn silent_modem_is_reported() {
        let mut nb = Nbiot::new(Box::new(ScriptedLink::new()), config());
        assert!(matches!(nb.connect(), Err(RadioError::NoModem)));
    }

    #[test]
    fn wrong_operator_is_rejected() {
        let cfg = NbiotConfig {
            operator: Some("24202".to_string()),
            ..config()
        };
        let mut nb = Nbiot::new(Box::new(bring_up(ScriptedLink::new())), cfg);
        assert!(matches!(nb.connect(), Err(RadioError::Rejected(_))));
        assert!(!nb.is_connected());
    }

    #[test]
    fn power_cycle_toggles_the_power_line() {
        let link = ScriptedLink::new().reply("AT", &["OK"]);
        let power = link.power_log();
        let cfg = NbiotConfig {
            power_cycle: true,
            ..config()
        };
        let nb = Nbiot::new(Box::new(link), cfg);
        nb.boot().unwrap();
        assert_eq!(power.borrow().as_slice(), [false, true]);
    }

    #[test]
    fn signal_strength_is_parsed() {
        let link = ScriptedLink::new().reply("AT+CSQ", &["+CSQ: 99,99", "OK"]);
        let mut nb = Nbiot::new(Box::new(link), config());
        let q = nb.signal_strength().unwrap().unwrap();
        assert_eq!(q.rssi_dbm(), None);
    }

    #[test]
    fn resolve_and_ping() {
        let link = ScriptedLink::new()
            .reply(
                "AT+CDNSGIP=\"example.org\"",
                &["OK", "+CDNSGIP: 1,\"example.org\",\"93.184.216.34\""],
            )
            .reply(
                "AT+CIPPING=93.184.216.34,2,32,10",
                &["OK", "+CIPPING: 1,\"93.184.216.34\",7,52", "+CIPPING: 2,\"93.184.216.34\",5,52"],
            );
        let written = link.written();
        let nb = Nbiot::new(Box::new(link), config());
        let replies = nb.ping("example.org", 2, Duration::from_secs(1)).unwrap();
        assert_eq!(written.borrow()[1], "AT+CIPPING=93.184.216.34,2,32,10");
        assert_eq!(
            replies,
            [
                PingReply {
                    seq: 1,
                    ttl: 52,
                    time: Duration::from_millis(700)
                },
                PingReply {
                    seq: 2,
                    ttl: 52,
                    time: Duration::from_millis(500)
                },
            ]
        );
    }

    #[test]
    fn deinit_waits_for_power_down() {
        let link = ScriptedLink::new().reply("AT+CPOWD=1", &["NORMAL POWER DOWN"]);
        let mut nb = Nbiot::new(Box::new(link), config());
        nb.deinit().unwrap();
        assert!(!nb.is_connected());
    }

    #[test]
    fn channel_is_shared_with_adapters() {
        let link = ScriptedLink::new().reply("AT+CSOC=1,1,1", &["+CSOC: 4", "OK"]);
        let nb = Nbiot::new(Box::new(link), config());
        let channel = nb.channel();
        let resp = channel
            .borrow_mut()
            .execute(&AtCommand::new("AT+CSOC=1,1,1").expect(r"\+CSOC: ([0-9]+)").capture(&[1]))
            .unwrap();
        assert_eq!(resp.field(0), Some("4"));
    }
}
