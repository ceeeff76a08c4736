use std::time::Duration;

use tracing::{debug, info};

use super::{
    Endpoint, ProfileKind, ProfileOp, SOCKET_HEX_CEILING, SocketError, create_profile, decode_hex,
    encode_hex, run_profile_command,
};
use crate::at::{AtCommand, DetachedMode, SharedChannel};

const KIND: ProfileKind = ProfileKind::Mqtt;

const COMMAND_TIMEOUT_MS: u32 = 60_000;
const BUFFER_SIZE: u32 = 1024;
const MQTT_VERSION: u32 = 4;
const KEEP_ALIVE_SECS: u32 = 600;
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(30);
const WAIT_MSG_TIMEOUT: Duration = Duration::from_secs(60);

pub type MessageCallback = Box<dyn FnMut(&str, &[u8])>;

/// MQTT client running on the modem's MQTT profile.
pub struct MqttProfile {
    modem: SharedChannel,
    client_id: String,
    endpoint: Endpoint,
    user: String,
    password: String,
    profile: Option<u32>,
    callback: Option<MessageCallback>,
    wait_timeout: Duration,
}

impl MqttProfile {
    pub fn new(
        modem: SharedChannel,
        client_id: impl Into<String>,
        endpoint: Endpoint,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            modem,
            client_id: client_id.into(),
            endpoint,
            user: user.into(),
            password: password.into(),
            profile: None,
            callback: None,
            wait_timeout: WAIT_MSG_TIMEOUT,
        }
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn set_callback(&mut self, callback: impl FnMut(&str, &[u8]) + 'static) {
        self.callback = Some(Box::new(callback));
    }

    #[cfg(test)]
    pub fn is_connected(&self) -> bool {
        self.profile.is_some()
    }

    fn id(&self) -> Result<u32, SocketError> {
        self.profile.ok_or(SocketError::NotConnected(KIND))
    }

    pub fn connect(&mut self) -> Result<(), SocketError> {
        let id = create_profile(
            &self.modem,
            KIND,
            format!(
                "AT+CMQNEW=\"{}\",{},{},{}",
                self.endpoint.host, self.endpoint.port, COMMAND_TIMEOUT_MS, BUFFER_SIZE
            ),
            r"\+CMQNEW: ([0-9]+)",
        )?;
        let cmd = AtCommand::new(format!(
            "AT+CMQCON={},{},\"{}\",{},1,0,\"{}\",\"{}\"",
            id, MQTT_VERSION, self.client_id, KEEP_ALIVE_SECS, self.user, self.password
        ))
        .timeout(PUBLISH_TIMEOUT);
        if let Err(e) = run_profile_command(&self.modem, KIND, ProfileOp::Connect, cmd) {
            // Free the client allocated above.
            let freed = self
                .modem
                .borrow_mut()
                .execute(&AtCommand::new(format!("AT+CMQDISCON={}", id)));
            match freed {
                Ok(resp) if resp.is_success() => {}
                Ok(_) => debug!("mqtt client {} not freed after refused session", id),
                Err(free) => debug!("mqtt client {} not freed: {}", id, free),
            }
            return Err(e);
        }
        info!("mqtt client {} connected to {}", self.client_id, self.endpoint);
        self.profile = Some(id);
        Ok(())
    }

    pub fn publish(&mut self, topic: &str, payload: &[u8], qos: u8, retain: bool) -> Result<(), SocketError> {
        let id = self.id()?;
        let hex = encode_hex(payload);
        if hex.len() > SOCKET_HEX_CEILING {
            return Err(SocketError::TooLarge {
                len: hex.len(),
                max: SOCKET_HEX_CEILING,
            });
        }
        let cmd = AtCommand::new(format!(
            "AT+CMQPUB={},\"{}\",{},{},0,{},\"{}\"",
            id,
            topic,
            qos,
            u8::from(retain),
            hex.len(),
            hex
        ))
        .timeout(PUBLISH_TIMEOUT);
        run_profile_command(&self.modem, KIND, ProfileOp::Publish, cmd)?;
        debug!("published {} bytes to {}", payload.len(), topic);
        Ok(())
    }

    pub fn subscribe(&mut self, topic: &str, qos: u8) -> Result<(), SocketError> {
        let id = self.id()?;
        run_profile_command(
            &self.modem,
            KIND,
            ProfileOp::Subscribe,
            AtCommand::new(format!("AT+CMQSUB={},\"{}\",{}", id, topic, qos)),
        )?;
        Ok(())
    }

    pub fn unsubscribe(&mut self, topic: &str) -> Result<(), SocketError> {
        let id = self.id()?;
        run_profile_command(
            &self.modem,
            KIND,
            ProfileOp::Unsubscribe,
            AtCommand::new(format!("AT+CMQUNSUB={},\"{}\"", id, topic)),
        )?;
        Ok(())
    }

    /// Block until the broker delivers a message on a subscribed topic, hand
    /// it to the callback and return it.
    pub fn wait_msg(&mut self) -> Result<(String, Vec<u8>), SocketError> {
        self.id()?;
        let lines = self
            .modem
            .borrow_mut()
            .read_detached("+CMQPUB", DetachedMode::First, self.wait_timeout)?;
        let fields = lines
            .first()
            .ok_or_else(|| SocketError::Indication("+CMQPUB".to_string()))?;
        let (Some(topic), Some(hex)) = (fields.get(1), fields.get(6)) else {
            return Err(SocketError::Indication(fields.join(",")));
        };
        let payload = decode_hex(hex)?;
        if let Some(cb) = self.callback.as_mut() {
            cb(topic, &payload);
        }
        Ok((topic.clone(), payload))
    }

    pub fn disconnect(&mut self) -> Result<(), SocketError> {
        let Some(id) = self.profile.take() else {
            return Ok(());
        };
        run_profile_command(
            &self.modem,
            KIND,
            ProfileOp::Close,
            AtCommand::new(format!("AT+CMQDISCON={}", id)),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::port::mock::ScriptedLink;
    use crate::socket::testutil::channel;

    fn client(link: ScriptedLink) -> (MqttProfile, Rc<RefCell<Vec<String>>>) {
        let (modem, written) = channel(link);
        let mqtt = MqttProfile::new(modem, "dev-1", Endpoint::new("10.0.0.1", 31417), "user", "secret");
        (mqtt, written)
    }

    fn connected() -> ScriptedLink {
        ScriptedLink::new()
            .reply("AT+CMQNEW=", &["+CMQNEW: 0", "OK"])
            .reply("AT+CMQCON=0", &["OK"])
    }

    #[test]
    fn connect_sends_credentials() {
        let (mut mqtt, written) = client(connected());
        mqtt.connect().unwrap();
        assert!(mqtt.is_connected());
        let log = written.borrow();
        assert_eq!(log[0], "AT+CMQNEW=\"10.0.0.1\",31417,60000,1024");
        assert_eq!(log[1], "AT+CMQCON=0,4,\"dev-1\",600,1,0,\"user\",\"secret\"");
    }

    #[test]
    fn operations_require_connect() {
        let (mut mqtt, written) = client(ScriptedLink::new());
        assert!(matches!(
            mqtt.publish("/short", b"x", 0, false),
            Err(SocketError::NotConnected(ProfileKind::Mqtt))
        ));
        assert!(matches!(mqtt.subscribe("/short", 0), Err(SocketError::NotConnected(_))));
        assert!(matches!(mqtt.unsubscribe("/short"), Err(SocketError::NotConnected(_))));
        assert!(matches!(mqtt.wait_msg(), Err(SocketError::NotConnected(_))));
        assert!(written.borrow().is_empty());
    }

    #[test]
    fn refused_session_frees_client() {
        let (mut mqtt, written) = client(
            ScriptedLink::new()
                .reply("AT+CMQNEW=", &["+CMQNEW: 0", "OK"])
                .reply("AT+CMQCON=0", &["ERROR"])
                .reply("AT+CMQDISCON=0", &["OK"]),
        );
        let err = mqtt.connect().unwrap_err();
        assert!(matches!(err, SocketError::Modem { op: ProfileOp::Connect, .. }));
        assert!(!mqtt.is_connected());
        assert_eq!(written.borrow()[2], "AT+CMQDISCON=0");
    }

    #[test]
    fn failed_cleanup_keeps_connect_error() {
        let (mut mqtt, written) = client(
            ScriptedLink::new()
                .reply("AT+CMQNEW=", &["+CMQNEW: 0", "OK"])
                .reply("AT+CMQCON=0", &["ERROR"])
                .reply("AT+CMQDISCON=0", &["ERROR"]),
        );
        let err = mqtt.connect().unwrap_err();
        assert!(matches!(err, SocketError::Modem { op: ProfileOp::Connect, .. }));
        assert_eq!(written.borrow().len(), 3);
    }

    #[test]
    fn publish_encodes_payload() {
        let (mut mqtt, written) = client(connected().reply("AT+CMQPUB=0", &["OK"]));
        mqtt.connect().unwrap();
        mqtt.publish("/short", b"hey", 1, false).unwrap();
        assert_eq!(written.borrow()[2], "AT+CMQPUB=0,\"/short\",1,0,0,6,\"686579\"");
    }

    #[test]
    fn long_payload_exceeds_command_limit() {
        let (mut mqtt, _) = client(connected());
        mqtt.connect().unwrap();
        let err = mqtt.publish("/long", &[b'a'; 1606], 0, false).unwrap_err();
        assert!(matches!(err, SocketError::TooLarge { len: 3212, .. }));
    }

    #[test]
    fn wait_msg_runs_callback() {
        let (mut mqtt, _) = client(connected().reply(
            "AT+CMQSUB=0",
            &["OK", "+CMQPUB: 0,\"/short\",0,0,0,4,\"6869\""],
        ));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        mqtt.set_callback(move |topic, payload| sink.borrow_mut().push((topic.to_string(), payload.to_vec())));
        mqtt.connect().unwrap();
        mqtt.subscribe("/short", 0).unwrap();

        let (topic, payload) = mqtt.wait_msg().unwrap();
        assert_eq!(topic, "/short");
        assert_eq!(payload, b"hi");
        assert_eq!(seen.borrow().as_slice(), [("/short".to_string(), b"hi".to_vec())]);
    }

    #[test]
    fn wait_msg_times_out() {
        let (mqtt, _) = client(connected());
        let mut mqtt = mqtt.with_wait_timeout(Duration::from_millis(50));
        mqtt.connect().unwrap();
        assert!(mqtt.wait_msg().unwrap_err().is_timeout());
    }

    #[test]
    fn disconnect_releases_client() {
        let (mut mqtt, written) = client(connected().reply("AT+CMQDISCON=0", &["OK"]));
        mqtt.connect().unwrap();
        mqtt.disconnect().unwrap();
        mqtt.disconnect().unwrap();
        assert!(!mqtt.is_connected());
        assert_eq!(written.borrow().len(), 3);
    }
}
