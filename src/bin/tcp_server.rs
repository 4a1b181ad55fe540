//! Modbus TCP slave example host
//!
//! Serves a small demo data model over Modbus TCP. The engine instance is
//! single-owner, so the host runs a current-thread runtime and funnels every
//! connection through the shared instance.
//!
//! Usage: `tcp_server [-p <port>] [-n <max connections>] [-s] [-h]`

use std::cell::{Cell, RefCell};
use std::process::ExitCode;
use std::rc::Rc;

use log::{debug, error, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::LocalSet;

use voltage_modbus_slave::{
    CoilDescriptor, CoilRead, CoilWrite, ModbusSlave, RegisterDescriptor, RegisterRead,
    RegisterStorage, RegisterType, RegisterValue, RegisterWrite, MAX_TCP_FRAME_SIZE,
};

const DEFAULT_PORT: u16 = 502;
const DEFAULT_MAX_CONNECTIONS: usize = 10;

struct Options {
    port: u16,
    max_connections: usize,
    silent: bool,
}

fn usage() {
    println!("Modbus TCP slave example host");
    println!();
    println!("Usage: tcp_server [options]");
    println!("  -p <port>   TCP port to listen on (default {DEFAULT_PORT})");
    println!("  -n <count>  Maximum concurrent connections (default {DEFAULT_MAX_CONNECTIONS})");
    println!("  -s          Silent mode, log errors only");
    println!("  -h          Show this help");
}

fn parse_args() -> Result<Option<Options>, String> {
    let mut options = Options {
        port: DEFAULT_PORT,
        max_connections: DEFAULT_MAX_CONNECTIONS,
        silent: false,
    };

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-p" => {
                let value = args.next().ok_or("-p requires a port number")?;
                options.port = value.parse().map_err(|_| format!("invalid port: {value}"))?;
            }
            "-n" => {
                let value = args.next().ok_or("-n requires a connection count")?;
                options.max_connections =
                    value.parse().map_err(|_| format!("invalid count: {value}"))?;
            }
            "-s" => options.silent = true,
            "-h" => return Ok(None),
            other => return Err(format!("unknown option: {other}")),
        }
    }

    Ok(Some(options))
}

/// Demo data model: leaked so the `'static` instance can be shared with
/// connection tasks on the local set
fn build_slave() -> ModbusSlave<'static> {
    let holding_cells: &'static [Cell<u16>] =
        Box::leak((0u16..16).map(|i| Cell::new(0x1000 + i)).collect::<Vec<_>>().into_boxed_slice());
    let coil_bytes: &'static [Cell<u8>] =
        Box::leak(vec![Cell::new(0b0101_0101), Cell::new(0)].into_boxed_slice());
    let temperature: &'static Cell<f32> = Box::leak(Box::new(Cell::new(21.5)));

    let mut holding: Vec<RegisterDescriptor<'static>> = vec![RegisterDescriptor {
        address: 0x0000,
        ty: RegisterType::BlockU16,
        read: RegisterRead::Ptr(RegisterStorage::BlockU16(holding_cells)),
        write: RegisterWrite::Ptr(RegisterStorage::BlockU16(holding_cells)),
        ..Default::default()
    }];
    holding.push(RegisterDescriptor {
        address: 0x006B,
        ty: RegisterType::U16,
        read: RegisterRead::Value(RegisterValue::U16(0x4242)),
        ..Default::default()
    });
    let holding: &'static [RegisterDescriptor<'static>] = Box::leak(holding.into_boxed_slice());

    let input: &'static [RegisterDescriptor<'static>] = Box::leak(Box::new([RegisterDescriptor {
        address: 0x0000,
        ty: RegisterType::F32,
        read: RegisterRead::Ptr(RegisterStorage::F32(temperature)),
        ..Default::default()
    }]));

    let coils: &'static [CoilDescriptor<'static>] = Box::leak(
        (0u16..16)
            .map(|i| CoilDescriptor {
                address: i,
                read: CoilRead::Bit { cell: &coil_bytes[(i / 8) as usize], bit: (i % 8) as u8 },
                write: CoilWrite::Bit { cell: &coil_bytes[(i / 8) as usize], bit: (i % 8) as u8 },
                ..Default::default()
            })
            .collect::<Vec<_>>()
            .into_boxed_slice(),
    );

    let mut slave = ModbusSlave::new();
    slave.serial.slave_address = 17;
    slave.holding_registers = Some(holding);
    slave.input_registers = Some(input);
    slave.coils = Some(coils);
    slave.discrete_inputs = Some(coils);
    slave
}

async fn handle_connection(stream: TcpStream, slave: Rc<RefCell<ModbusSlave<'static>>>) {
    let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "unknown".into());
    info!("Client connected: {peer}");

    let mut stream = stream;
    let mut header = [0u8; 7];
    let mut frame = [0u8; MAX_TCP_FRAME_SIZE];
    let mut response = [0u8; MAX_TCP_FRAME_SIZE];

    loop {
        // MBAP header first, then the body its length field announces
        if stream.read_exact(&mut header).await.is_err() {
            break;
        }
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        if length == 0 || 6 + length > MAX_TCP_FRAME_SIZE {
            warn!("Client {peer}: unreasonable MBAP length {length}, closing");
            break;
        }

        frame[..7].copy_from_slice(&header);
        if stream.read_exact(&mut frame[7..6 + length]).await.is_err() {
            break;
        }

        let response_len = slave.borrow_mut().handle_tcp_frame(&frame[..6 + length], &mut response);
        debug!("Client {peer}: {} byte frame, {response_len} byte reply", 6 + length);

        if response_len > 0 {
            if let Err(e) = stream.write_all(&response[..response_len]).await {
                error!("Client {peer}: write failed: {e}");
                break;
            }
        }
    }

    info!("Client disconnected: {peer}");
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let options = match parse_args() {
        Ok(Some(options)) => options,
        Ok(None) => {
            usage();
            return ExitCode::SUCCESS;
        }
        Err(message) => {
            eprintln!("Error: {message}");
            usage();
            return ExitCode::FAILURE;
        }
    };

    env_logger::builder()
        .filter_level(if options.silent {
            log::LevelFilter::Error
        } else {
            log::LevelFilter::Info
        })
        .init();

    let slave = build_slave();
    if let Err(e) = slave.validate() {
        error!("Invalid data model: {e}");
        return ExitCode::FAILURE;
    }
    let slave = Rc::new(RefCell::new(slave));

    let listener = match TcpListener::bind(("0.0.0.0", options.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind port {}: {e}", options.port);
            return ExitCode::FAILURE;
        }
    };
    info!("Modbus TCP slave listening on port {} (unit 17)", options.port);

    let active = Rc::new(Cell::new(0usize));
    let local = LocalSet::new();
    local
        .run_until(async {
            loop {
                let (stream, addr) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Accept failed: {e}");
                        continue;
                    }
                };

                if active.get() >= options.max_connections {
                    warn!("Connection limit reached, rejecting {addr}");
                    continue; // dropped, closing the socket
                }

                active.set(active.get() + 1);
                let slave = slave.clone();
                let active = active.clone();
                tokio::task::spawn_local(async move {
                    handle_connection(stream, slave).await;
                    active.set(active.get() - 1);
                });
            }
        })
        .await
}
