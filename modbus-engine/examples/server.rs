use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec};

use modbus_engine::*;

/// Logs every write before applying it with the default policy
struct LoggingHandler {
    inner: DefaultWriteHandler,
}

impl WriteHandler for LoggingHandler {
    fn write_single_coil(&mut self, value: Indexed<bool>, database: &mut Database) -> WriteResult {
        tracing::info!("write single coil, {}", value);
        self.inner.write_single_coil(value, database)
    }

    fn write_single_register(
        &mut self,
        value: Indexed<u16>,
        database: &mut Database,
    ) -> WriteResult {
        tracing::info!("write single register, {}", value);
        self.inner.write_single_register(value, database)
    }

    fn write_multiple_coils(&mut self, values: WriteCoils, database: &mut Database) -> WriteResult {
        tracing::info!("write multiple coils, {}", values.range);
        self.inner.write_multiple_coils(values, database)
    }

    fn write_multiple_registers(
        &mut self,
        values: WriteRegisters,
        database: &mut Database,
    ) -> WriteResult {
        tracing::info!("write multiple registers, {}", values.range);
        self.inner.write_multiple_registers(values, database)
    }
}

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Address to listen on
    #[clap(short, long, value_parser, default_value = "127.0.0.1:502")]
    address: SocketAddr,
    /// Maximum number of concurrent sessions
    #[clap(short, long, value_parser, default_value_t = 10)]
    max_sessions: usize,
    /// Unit ids to serve, each with its own database
    #[clap(short, long, value_parser, default_values_t = vec![1u8])]
    unit: Vec<u8>,
    /// Number of points of each type created for every unit
    #[clap(short, long, value_parser, default_value_t = 10)]
    count: u16,
    /// Application decode level (nothing, function, headers, values)
    #[clap(short, long, value_parser, default_value = "function")]
    decode: AppDecodeLevel,
    /// Period of the simulated input changes in milliseconds, 0 to disable
    #[clap(short, long, value_parser, default_value_t = 1000)]
    period_ms: u64,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();

    // initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    let range = AddressRange::try_from(0, args.count)?;

    let mut map = DeviceMap::new();
    for unit in args.unit.iter() {
        map.add_endpoint(
            UnitId::new(*unit),
            LoggingHandler {
                inner: DefaultWriteHandler::new(),
            },
            |db| {
                db.add_coils(range, false);
                db.add_discrete_inputs(range, false);
                db.add_holding_registers(range, 0);
                db.add_input_registers(range, 0);
            },
        )?;
    }

    // if we ever drop this handle, the server will shutdown
    // along with all of its active sessions
    let mut server =
        spawn_tcp_server_task(args.max_sessions, args.address, map, args.decode.into()).await?;

    tracing::info!("listening on {}", server.local_addr());

    // simulate changing inputs, the tasks stop when the handles are dropped
    let mut periodic = Vec::new();
    if args.period_ms > 0 {
        for unit in args.unit.iter() {
            let handle = server.spawn_periodic_update(
                UnitId::new(*unit),
                Duration::from_millis(args.period_ms),
                move |db| {
                    for index in range.iter() {
                        if let Some(value) = db.get_discrete_input(index) {
                            db.update_discrete_input(index, !value);
                        }
                        if let Some(value) = db.get_input_register(index) {
                            db.update_input_register(index, value.wrapping_add(1));
                        }
                    }
                },
            )?;
            periodic.push(handle);
        }
    }

    let mut reader = FramedRead::new(tokio::io::stdin(), LinesCodec::new());
    while let Some(line) = reader.next().await {
        let line = line?;
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["x"] => return Ok(()),
            ["ed"] => {
                server
                    .set_decode_level(DecodeLevel::new(
                        AppDecodeLevel::DataValues,
                        FrameDecodeLevel::Header,
                        PhysDecodeLevel::Length,
                    ))
                    .await?
            }
            ["dd"] => server.set_decode_level(DecodeLevel::nothing()).await?,
            ["uc", unit, index, value] => {
                if let Err(err) = update_coil(&server, unit, index, value) {
                    println!("error: {err}");
                }
            }
            ["uhr", unit, index, value] => {
                if let Err(err) = update_holding_register(&server, unit, index, value) {
                    println!("error: {err}");
                }
            }
            _ => println!(
                "unknown command, options are: x, ed, dd, uc <unit> <index> <0|1>, uhr <unit> <index> <value>"
            ),
        }
    }

    Ok(())
}

fn update_coil(
    server: &Server,
    unit: &str,
    index: &str,
    value: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let unit = UnitId::new(unit.parse()?);
    let index: u16 = index.parse()?;
    let value = value.parse::<u8>()? != 0;
    if !server.update(unit, |db| db.update_coil(index, value))? {
        return Err(format!("no coil at index {index}").into());
    }
    Ok(())
}

fn update_holding_register(
    server: &Server,
    unit: &str,
    index: &str,
    value: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let unit = UnitId::new(unit.parse()?);
    let index: u16 = index.parse()?;
    let value: u16 = value.parse()?;
    if !server.update(unit, |db| db.update_holding_register(index, value))? {
        return Err(format!("no holding register at index {index}").into());
    }
    Ok(())
}
