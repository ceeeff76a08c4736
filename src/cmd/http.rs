use anyhow::Result;
use tracing::info;

use super::{host_radio, open_nbiot, run_repeated, with_radio};
use crate::bench::RttStats;
use crate::cli::{HttpMethod, HttpOpts, HttpVia};
use crate::http::{self, HttpError};
use crate::socket::{HostTcp, StreamSocket, TcpProfile};

pub fn run(opts: HttpOpts) -> Result<()> {
    info!("http: {:?}", opts);
    match opts.via {
        HttpVia::Host => {
            let mut radio = host_radio(opts.radio, &opts.server.host)?;
            with_radio(&mut radio, |_| {
                let mut socket = HostTcp::new();
                if let Some(timeout) = opts.socket_timeout() {
                    socket = socket.with_read_timeout(timeout);
                }
                transfer(&opts, &mut socket).map(|_| ())
            })
        }
        HttpVia::Tcp => {
            let mut radio = open_nbiot(&opts.ser, &opts.nbiot)?;
            with_radio(&mut radio, |radio| {
                let mut socket = TcpProfile::new(radio.channel());
                if let Some(timeout) = opts.socket_timeout() {
                    socket = socket.with_timeout(timeout);
                }
                transfer(&opts, &mut socket).map(|_| ())
            })
        }
    }
}

fn transfer(opts: &HttpOpts, socket: &mut dyn StreamSocket) -> Result<RttStats> {
    let server = opts.server.http();
    let host = opts.server.host.as_str();
    let kind = opts.payload;
    match opts.method {
        HttpMethod::Get => run_repeated(&format!("HTTP GET: {}", kind), &opts.repeat, || {
            http::get(socket, &server, host, kind.name()).map(|_| ())
        }),
        HttpMethod::Post => run_repeated(&format!("HTTP POST: {}", kind), &opts.repeat, || {
            http::post(socket, &server, host, kind).map(|_| ())
        }),
        HttpMethod::Handshake => run_repeated("TCP handshake", &opts.repeat, || -> Result<(), HttpError> {
            http::handshake(socket, &server)
        }),
    }
}
