use anyhow::Result;
use tracing::{info, warn};

use super::{host_radio, open_nbiot, run_repeated, with_radio};
use crate::bench::RttStats;
use crate::cli::{CoapMethod, CoapOpts, CoapVia};
use crate::coap::{CoapClient, CoapError, MessageType};
use crate::socket::{CoapProfile, DatagramSocket, HostUdp, UdpProfile};

pub fn run(opts: CoapOpts) -> Result<()> {
    info!("coap: {:?}", opts);
    match opts.via {
        CoapVia::Host => {
            let mut radio = host_radio(opts.radio, &opts.server.host)?;
            with_radio(&mut radio, |_| {
                let mut socket = HostUdp::bind()?;
                transfer(&opts, &mut socket)?;
                Ok(())
            })
        }
        CoapVia::Udp => {
            let mut radio = open_nbiot(&opts.ser, &opts.nbiot)?;
            with_radio(&mut radio, |radio| {
                let mut socket = UdpProfile::new(radio.channel());
                if let Some(timeout) = opts.socket_timeout() {
                    socket = socket.with_timeout(timeout);
                }
                let result = transfer(&opts, &mut socket);
                if let Err(e) = socket.close() {
                    warn!("closing udp profile: {}", e);
                }
                result.map(|_| ())
            })
        }
        CoapVia::Coap => {
            let mut radio = open_nbiot(&opts.ser, &opts.nbiot)?;
            with_radio(&mut radio, |radio| {
                // One client profile serves every repetition.
                let mut socket = CoapProfile::open(radio.channel(), opts.server.coap(), true)?;
                if let Some(timeout) = opts.socket_timeout() {
                    socket = socket.with_timeout(timeout);
                }
                let result = transfer(&opts, &mut socket);
                socket.set_reusable(false);
                if let Err(e) = socket.close() {
                    warn!("closing coap profile: {}", e);
                }
                result.map(|_| ())
            })
        }
    }
}

fn transfer(opts: &CoapOpts, socket: &mut dyn DatagramSocket) -> Result<RttStats> {
    let mtype = if opts.non {
        MessageType::Non
    } else {
        MessageType::Con
    };
    let path = opts.payload.name();
    let mut client = CoapClient::new(socket, opts.server.coap());
    if let Some(budget) = opts.poll_budget() {
        client = client.with_poll_budget(budget);
    }
    match opts.method {
        CoapMethod::Get => {
            let desc = format!("CoAP GET {:?}: {}", mtype, path);
            run_repeated(&desc, &opts.repeat, || -> Result<(), CoapError> {
                let resp = client.get(path, mtype)?;
                info!("{} {}B in {} blocks", resp.code, resp.payload.len(), resp.blocks);
                Ok(())
            })
        }
        CoapMethod::Post => {
            let desc = format!("CoAP POST {:?}: {}", mtype, path);
            let payload = opts.payload.bytes();
            run_repeated(&desc, &opts.repeat, || -> Result<(), CoapError> {
                let resp = client.post(path, payload, mtype)?;
                info!("{} after {} blocks", resp.code, resp.blocks);
                Ok(())
            })
        }
    }
}
