use std::env;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use getopts::Options;
use log::{error, info, trace};
use simple_logger::SimpleLogger;

use pnet::datalink::{self, Config, DataLinkReceiver, NetworkInterface};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};

use tokio::runtime::Runtime;

use rxtcp::net::arp::ArpTable;
use rxtcp::net::{Descriptor, LinkSender, NetInfo, TcpConfig, TcpStack};
use rxtcp::prometheus::Exporter;

const CONNECTIONS: usize = 4;
const TICK: Duration = Duration::from_millis(10);

type Resolver = Arc<Mutex<ArpTable<LinkSender>>>;
type EchoStack = TcpStack<LinkSender, Resolver, CONNECTIONS>;

/// Echo server on top of the stack, run from the service tick.
struct Echo {
    port: u16,
    desc: Option<Descriptor>,
    closing: bool,
    send_buffer: usize,
    buffer: Vec<u8>,
}

impl Echo {
    fn new(port: u16, config: &TcpConfig) -> Self {
        Self {
            port,
            desc: None,
            closing: false,
            send_buffer: config.send_buffer,
            buffer: vec![0; config.recv_buffer],
        }
    }

    fn poll(&mut self, stack: &mut EchoStack) {
        let desc = match self.desc {
            Some(desc) if stack.probe(desc) => desc,
            _ => match stack.open(Ipv4Addr::UNSPECIFIED, self.port, true) {
                Ok(desc) => {
                    info!("echo listening on port {}", self.port);
                    self.desc = Some(desc);
                    self.closing = false;
                    desc
                }
                Err(_) => return,
            },
        };

        if stack.connected(desc) {
            let queued = stack.get_send_length(desc).unwrap_or(self.send_buffer);
            let room = self.send_buffer.saturating_sub(queued).min(self.buffer.len());
            if room > 0 {
                match stack.recv(desc, &mut self.buffer[..room]) {
                    Ok(0) => {}
                    Ok(size) => {
                        if let Err(e) = stack.send(desc, &self.buffer[..size]) {
                            error!("echo send failed: {}", e);
                        }
                    }
                    Err(e) => error!("echo recv failed: {}", e),
                }
            }
        }

        if !self.closing && !stack.is_open(desc) {
            if let (Some(ip), Some(port)) = (stack.get_ip(desc), stack.peer_port(desc)) {
                info!("echo connection from {}:{} closed", ip, port);
            }
            stack.close(desc);
            self.closing = true;
        }
    }
}

fn start_receiver(mut rx: Box<dyn DataLinkReceiver>, arp: Resolver, stack: Arc<Mutex<EchoStack>>) {
    thread::spawn(move || loop {
        let Ok(packet) = rx.next() else {
            continue;
        };
        let Some(ethernet_packet) = EthernetPacket::new(packet) else {
            continue;
        };

        match ethernet_packet.get_ethertype() {
            EtherTypes::Arp => {
                if let Ok(mut arp) = arp.lock() {
                    arp.handle_packet(&ethernet_packet);
                }
            }
            // a frame arriving while the tick runs is dropped, the peer resends it
            EtherTypes::Ipv4 => match stack.try_lock() {
                Ok(mut stack) => {
                    stack.process(packet);
                }
                Err(_) => trace!("stack busy, frame dropped"),
            },
            _ => {}
        }
    });
}

async fn service_main(stack: Arc<Mutex<EchoStack>>, arp: Resolver, mut echo: Echo) {
    let mut interval = tokio::time::interval(TICK);
    loop {
        interval.tick().await;

        if let Ok(mut arp) = arp.lock() {
            arp.heartbeat();
        }

        let Ok(mut stack) = stack.lock() else {
            error!("stack lock poisoned, stop service");
            return;
        };
        stack.service();
        echo.poll(&mut stack);
    }
}

fn find_interface(name: Option<String>) -> Option<NetworkInterface> {
    datalink::interfaces().into_iter().find(|iface| match &name {
        Some(name) => &iface.name == name,
        None => {
            !iface.is_loopback()
                && iface.mac.is_some_and(|mac| !mac.is_zero())
                && iface.ips.iter().any(|ip| ip.is_ipv4())
        }
    })
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let mut opts = Options::new();

    opts.optopt("i", "interface", "network interface", "interface");
    opts.optopt("a", "address", "local address", "address");
    opts.optopt("n", "netmask", "subnet mask", "netmask");
    opts.optopt("p", "port", "echo port", "port");
    opts.optopt("m", "metrics", "prometheus listen address", "metrics");
    opts.optopt("s", "seed", "random seed", "seed");

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(_) => return println!("{}", opts.short_usage(&args[0])),
    };

    SimpleLogger::new()
        .with_utc_timestamps()
        .with_level(log::LevelFilter::Info)
        .env()
        .init()
        .unwrap();

    let addr = matches
        .opt_get_default("a", Ipv4Addr::new(10, 6, 0, 1))
        .unwrap_or_else(|e| panic!("Invalid address: {}", e));
    let mask = matches
        .opt_get_default("n", Ipv4Addr::new(255, 255, 255, 0))
        .unwrap_or_else(|e| panic!("Invalid netmask: {}", e));
    let port = matches
        .opt_get_default("p", 7u16)
        .unwrap_or_else(|e| panic!("Invalid port: {}", e));
    let seed = matches
        .opt_get_default("s", 1u64)
        .unwrap_or_else(|e| panic!("Invalid seed: {}", e));
    let metrics = matches
        .opt_str("m")
        .unwrap_or("127.0.0.1:9100".to_string());

    let interface = find_interface(matches.opt_str("i"))
        .unwrap_or_else(|| panic!("Could not find local network interface."));
    let mac = interface
        .mac
        .unwrap_or_else(|| panic!("Interface {} has no MAC address.", interface.name));

    let datalink_config = Config {
        write_buffer_size: 4096,
        read_buffer_size: 4096,
        read_timeout: Some(Duration::from_millis(1)),
        write_timeout: None,
        channel_type: datalink::ChannelType::Layer2,
        bpf_fd_attempts: 1000,
        linux_fanout: None,
        promiscuous: false,
    };

    let (tx, rx) = match datalink::channel(&interface, datalink_config) {
        Ok(datalink::Channel::Ethernet(tx, rx)) => (tx, rx),
        Ok(_) => panic!("Unhandled channel type"),
        Err(e) => panic!("Unable to create channel: {}", e),
    };

    let info = NetInfo::new(mac, addr, mask);
    let config = TcpConfig {
        seed,
        ..TcpConfig::default()
    };

    info!(
        "start rxtcp echo on {}:{}({}) via {}, metrics on {} ...",
        addr, port, mask, interface.name, metrics
    );

    let sender = LinkSender::new(tx);
    let arp = Arc::new(Mutex::new(ArpTable::new(info, sender.clone())));
    let echo = Echo::new(port, &config);
    let stack = Arc::new(Mutex::new(EchoStack::new(sender, arp.clone(), info, config)));

    start_receiver(rx, arp.clone(), stack.clone());

    let rt = Runtime::new().unwrap_or_else(|e| panic!("Unable to start runtime: {}", e));
    rt.block_on(async move {
        tokio::spawn(async move {
            if let Err(e) = Exporter::new(&metrics).run().await {
                error!("metrics exporter stopped: {}", e);
            }
        });

        service_main(stack, arp, echo).await;
    });
}
