use anyhow::{Context, Result};
use tracing::{info, warn};

use super::{open_nbiot, run_repeated, with_radio};
use crate::bench::timed_step;
use crate::cli::{MqttAction, MqttOpts};
use crate::socket::MqttProfile;

pub fn run(opts: MqttOpts) -> Result<()> {
    info!("mqtt: {:?}", opts);
    let mut radio = open_nbiot(&opts.ser, &opts.nbiot)?;
    with_radio(&mut radio, |radio| {
        let mut client = MqttProfile::new(
            radio.channel(),
            opts.client_id.as_str(),
            opts.server.mqtt(),
            opts.server.mqtt_user.as_str(),
            opts.server.mqtt_password.as_str(),
        )
        .with_wait_timeout(opts.wait_timeout());
        timed_step("MQTT connect", || client.connect()).context("mqtt connect")?;
        let result = exchange(&opts, &mut client);
        if let Err(e) = client.disconnect() {
            warn!("mqtt disconnect: {}", e);
        }
        result
    })
}

fn exchange(opts: &MqttOpts, client: &mut MqttProfile) -> Result<()> {
    let topic = opts.payload.topic();
    let qos = opts.qos;
    match opts.action {
        MqttAction::Publish => {
            let payload = opts.payload.bytes();
            let desc = format!("MQTT Publish: {}, qos: {}", topic, qos);
            run_repeated(&desc, &opts.repeat, || client.publish(&topic, payload, qos, false))?;
        }
        MqttAction::Subscribe => {
            client.set_callback(|topic, payload| info!("{}: {}B received", topic, payload.len()));
            let desc = format!("MQTT Subscription: {}, qos: {}", topic, qos);
            run_repeated(&desc, &opts.repeat, || {
                client.subscribe(&topic, qos)?;
                client.wait_msg()?;
                client.unsubscribe(&topic)
            })?;
        }
    }
    Ok(())
}
