use std::time::Duration;

use anyhow::Result;
use tracing::info;

use crate::at::{AtChannel, AtCommand, AtEngine, DetachedMode, Status};
use crate::cli::AtOpts;
use crate::port::open_port;

pub fn run(opts: AtOpts) -> Result<()> {
    info!("at: {:?}", opts);
    let port = open_port(&opts.ser)?;
    let mut engine = AtEngine::new(Box::new(port));
    for line in exchange(&mut engine, &opts)? {
        println!("{}", line);
    }
    Ok(())
}

fn command(opts: &AtOpts) -> AtCommand {
    let mut cmd = AtCommand::new(opts.command.trim())
        .terminal(opts.terminal.as_str())
        .timeout(Duration::from_secs_f64(opts.timeout.max(0.0)));
    if let Some(pattern) = &opts.expect {
        cmd = cmd.expect(pattern.as_str());
        if !opts.index.is_empty() {
            cmd = cmd.capture(&opts.index);
        }
    }
    cmd
}

/// Run the command (and the optional listen) and render the report lines.
fn exchange(channel: &mut dyn AtChannel, opts: &AtOpts) -> Result<Vec<String>> {
    let resp = channel.execute(&command(opts))?;
    let mut out = vec![match resp.status {
        Status::Success => "OK".to_string(),
        Status::Failure => "ERROR".to_string(),
    }];
    out.extend(resp.captured.iter().enumerate().map(|(i, f)| format!("[{}] {}", i, f)));

    if resp.is_success()
        && let Some(prefix) = &opts.listen
    {
        let timeout = Duration::from_secs_f64(opts.listen_timeout.max(0.0));
        for fields in channel.read_detached(prefix, DetachedMode::First, timeout)? {
            out.push(fields.join(","));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cli::{Cli, Cmd};
    use crate::port::mock::ScriptedLink;

    fn opts(args: &[&str]) -> AtOpts {
        let mut argv = vec!["nbiot-rtt", "at"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().cmd {
            Cmd::At(opts) => opts,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn reports_captured_fields() {
        let link = ScriptedLink::new().reply("AT+CSQ", &["+CSQ: 20,99", "", "OK"]);
        let mut engine = AtEngine::new(Box::new(link));
        let opts = opts(&["AT+CSQ", "--expect", r"\+CSQ: ([0-9]+),([0-9]+)", "--index", "1", "2"]);
        let out = exchange(&mut engine, &opts).unwrap();
        assert_eq!(out, ["OK", "[0] 20", "[1] 99"]);
    }

    #[test]
    fn error_line_is_reported_not_raised() {
        let link = ScriptedLink::new().reply("AT+CSOCL", &["ERROR"]);
        let mut engine = AtEngine::new(Box::new(link));
        let out = exchange(&mut engine, &opts(&["AT+CSOCL=9"])).unwrap();
        assert_eq!(out, ["ERROR"]);
    }

    #[test]
    fn listens_for_an_indication() {
        let link = ScriptedLink::new().reply(
            "AT+CSOSEND",
            &["OK", "+CSONMI: 0,4,\"4F4B\""],
        );
        let mut engine = AtEngine::new(Box::new(link));
        let opts = opts(&["AT+CSOSEND=0,4,4F4B", "--listen", "+CSONMI", "--listen-timeout", "0.5"]);
        let out = exchange(&mut engine, &opts).unwrap();
        assert_eq!(out, ["OK", "+CSONMI:0,4,4F4B"]);
    }
}
