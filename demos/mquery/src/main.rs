// Simple mquery-style command line, driving `mdnsd::Engine` over a real
// multicast socket. Grounded on original_source/src/mquery.c's msock()
// (socket setup) and its select()-driven main loop (receive, drain
// outbound, repeat), reshaped around the engine's non-blocking step API.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::process;
use std::time::{Duration, Instant};

use log::{info, warn};
use socket2::{Domain, Socket, Type as SockType};

use mdnsd::wire::Type;
use mdnsd::{Engine, EngineConfig, QueryControl};

struct Args {
    name: String,
    qtype: Type,
    wait: Option<Duration>,
}

impl Default for Args {
    fn default() -> Args {
        Args {
            name: "_services._dns-sd._udp.local.".to_string(),
            qtype: Type::PTR,
            wait: None,
        }
    }
}

fn usage(code: i32) -> ! {
    eprintln!("usage: mquery [-h] [-t TYPE] [-w SEC] [NAME]");
    process::exit(code)
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Args {
    let mut result = Args::default();
    args.next(); // skip argv[0]

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => usage(0),
            "-t" => {
                let value = args.next().unwrap_or_else(|| usage(1));
                result.qtype = value.parse().unwrap_or_else(|_| usage(1));
            }
            "-w" => {
                let value = args.next().unwrap_or_else(|| usage(1));
                let secs: u64 = value.parse().unwrap_or_else(|_| usage(1));
                result.wait = Some(Duration::from_secs(secs));
            }
            _ if arg.starts_with('-') => usage(1),
            _ => result.name = arg,
        }
    }

    result
}

/// Binds and joins the mDNS multicast group, in the manner of mquery.c's
/// `msock()`: SO_REUSEADDR/SO_REUSEPORT before bind, then join
/// 224.0.0.251 on the default interface.
fn open_socket(port: u16) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, SockType::DGRAM, None)?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;

    let socket: UdpSocket = socket.into();
    socket.join_multicast_v4(&mdnsd::wire::MULTICAST_GROUP, &Ipv4Addr::UNSPECIFIED)?;
    Ok(socket)
}

fn main() {
    env_logger::init();
    let args = parse_args(std::env::args());

    let config = EngineConfig::default();
    let socket = match open_socket(config.port) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed creating multicast socket: {}", e);
            process::exit(1);
        }
    };

    let mut engine = Engine::new(config);
    println!("Querying for {} type {} ... press Ctrl-C to stop", args.name, args.qtype);

    let name = match mdnsd::wire::Name::parse(&args.name) {
        Ok(n) => n,
        Err(e) => {
            eprintln!("invalid name {:?}: {}", args.name, e);
            process::exit(1);
        }
    };

    engine.query(name, args.qtype, |record| {
        println!("{}", record);
        QueryControl::Continue
    });

    let start = Instant::now();
    let mut buf = [0u8; mdnsd::wire::MAX_PACKET_LEN];

    loop {
        let now = Instant::now();
        engine.step(now);

        while let Some(out) = engine.next_outbound() {
            if let Err(e) = socket.send_to(&out.bytes, SocketAddr::V4(out.dest)) {
                warn!("failed writing to socket: {}", e);
            }
        }

        if let Some(wait) = args.wait {
            if start.elapsed() >= wait {
                break;
            }
        }

        let timeout = engine.sleep_duration(Instant::now()).max(Duration::from_millis(50));
        if socket.set_read_timeout(Some(timeout)).is_err() {
            break;
        }

        match socket.recv_from(&mut buf) {
            Ok((len, SocketAddr::V4(source))) => engine.receive(&buf[..len], source),
            Ok((_, SocketAddr::V6(_))) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => {
                warn!("failed reading from socket: {}", e);
                break;
            }
        }
    }

    info!("shutting down");
    engine.shutdown();
    let now = Instant::now();
    engine.step(now);
    while let Some(out) = engine.next_outbound() {
        let _ = socket.send_to(&out.bytes, SocketAddr::V4(out.dest));
    }
}
