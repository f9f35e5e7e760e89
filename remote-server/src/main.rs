//! `remoted`: the runnable remote endpoint binary. Owns everything outside
//! the protocol core — the event loop, the connector, CLI parsing, config
//! loading and logging — and wires them to `remote_core`, which makes every
//! protocol decision.

mod connector;
mod server;

use clap::{App, Arg};
use flux::config::Config;
use flux::logging;
use remote_core::cipher::Key;
use std::process;

fn main() {
    let log = logging::init();

    let matches = App::new("Remote Tunnel Endpoint")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Decrypts, opens and relays SOCKS5-style tunnel connections from the companion client.")
        .arg(
            Arg::with_name("CONFIG_FILE")
                .help("Path to the TOML config file")
                .required(true),
        )
        .get_matches();

    let config_path = matches.value_of("CONFIG_FILE").unwrap();

    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(err) => {
            logging::error!(log, "failed to load config"; "path" => config_path, "error" => %err);
            process::exit(1);
        }
    };

    logging::info!(log, "starting remote endpoint"; "listen_addr" => &config.listen_addr);

    let key = Key::from_password(&config.password);

    let mut event_loop = match server::EventLoop::bind(&config.listen_addr, key, config.max_frame_size, log.clone()) {
        Ok(event_loop) => event_loop,
        Err(err) => {
            logging::error!(log, "failed to bind listener"; "listen_addr" => &config.listen_addr, "error" => %err);
            process::exit(1);
        }
    };

    if let Err(err) = event_loop.run() {
        logging::error!(log, "event loop exited with error"; "error" => %err);
        process::exit(1);
    }
}
