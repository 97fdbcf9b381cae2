//! Wires up three toy "nodes" in a line (`0 <-> 1 <-> 2`) through a
//! [`nodes_hub::Hub`], and shows a `version` handshake frame getting its
//! advertised port rewritten in flight.
//!
//! The node implementation itself is out of scope for this crate, so this
//! demo stands one in: each toy node is a bare TCP listener that logs what
//! it receives, and the `NodeController` impl simulates a node's "onetry"
//! control command by dialing the given address and sending one `version`
//! frame advertising its own real port, the way a real node would.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use nodes_hub::communication::frame::{HEADER_LENGTH, VERSION_PORT_OFFSET};
use nodes_hub::crypto::hash::hash256;
use nodes_hub::{AddNodeMode, Hub, HubConfig, NodeController, NodeIndex};

const BASE_PORT: u16 = 28_000;
const NODE_COUNT: usize = 3;

fn node_port(node: NodeIndex) -> u16 {
    BASE_PORT + u32::from(node) as u16
}

fn version_frame(advertised_port: u16) -> Vec<u8> {
    let mut payload = vec![0u8; VERSION_PORT_OFFSET + 2 + 8];
    BigEndian::write_u16(&mut payload[VERSION_PORT_OFFSET..VERSION_PORT_OFFSET + 2], advertised_port);
    let checksum = hash256(&payload).truncated();

    let mut header = vec![0u8; HEADER_LENGTH];
    header[..4].copy_from_slice(b"DEMO");
    header[4..4 + 7].copy_from_slice(b"version");
    LittleEndian::write_u32(&mut header[16..20], payload.len() as u32);
    header[20..24].copy_from_slice(&checksum);

    let mut frame = header;
    frame.extend_from_slice(&payload);
    frame
}

/// Simulates the text-form control interface a real node exposes: on
/// `onetry`, dials `addr` and sends one `version` frame advertising its own
/// port, then keeps reading whatever comes back.
struct ToyController;

impl NodeController for ToyController {
    fn addnode(&self, node: NodeIndex, addr: SocketAddr, mode: AddNodeMode) -> nodes_hub::error::Result<()> {
        if mode != AddNodeMode::OneTry {
            return Ok(());
        }
        let advertised = node_port(node);
        tokio::spawn(async move {
            let mut stream = match TcpStream::connect(addr).await {
                Ok(stream) => stream,
                Err(e) => {
                    log::warn!("node {}: failed to dial {}: {}", u32::from(node), addr, e);
                    return;
                }
            };
            if let Err(e) = stream.write_all(&version_frame(advertised)).await {
                log::warn!("node {}: failed to send version frame: {}", u32::from(node), e);
                return;
            }
            let mut buf = [0u8; 1024];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => log::info!("node {}: received {} bytes from its peer", u32::from(node), n),
                }
            }
        });
        Ok(())
    }
}

/// A toy node: accepts connections on its real port and logs the frames it
/// receives through the hub.
async fn run_toy_node(node: NodeIndex) {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), node_port(node));
    let listener = TcpListener::bind(addr).await.expect("bind toy node port");
    loop {
        let (mut stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(_) => return,
        };
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => log::info!("node {}: {} bytes arrived from {}", u32::from(node), n, peer),
                }
            }
        });
    }
}

fn main() {
    env_logger::init();

    let runtime = nodes_hub::async_runtime::init(num_cpus::get()).expect("failed to build runtime");
    runtime.block_on(run());
}

async fn run() {
    for i in 0..NODE_COUNT {
        tokio::spawn(run_toy_node(NodeIndex::from(i)));
    }
    // give the toy listeners a moment to bind before the hub starts dialing.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let config = HubConfig {
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        node_count: NODE_COUNT,
        node_port: Arc::new(node_port),
    };
    let hub = Hub::new(config, Arc::new(ToyController));
    hub.start_listeners().await.expect("bind proxy listeners");

    let indices: Vec<NodeIndex> = (0..NODE_COUNT).map(NodeIndex::from).collect();
    hub.connect_line(&indices).await.expect("connect linked list");

    // delay everything node 1 sends toward node 0, to show the per-edge
    // latency knob working independently of the rest of the graph.
    hub.set_delay(indices[1], indices[0], 0.25);

    log::info!("linked list up: 0 <-> 1 <-> 2, watch the logs for rewritten handshakes");
    tokio::time::sleep(Duration::from_secs(1)).await;
}
