//! A Modbus TCP server engine using [Tokio](https://docs.rs/tokio) and Rust's `async/await` syntax.
//!
//! Each device served by the engine owns a [`Database`] of coils, discrete inputs, holding
//! registers and input registers. Client reads are answered directly from the database, while
//! client writes are routed through the device's [`WriteHandler`], which decides whether they
//! are accepted.
//!
//! # Features
//!
//! * Multiple devices per server, keyed by unit id
//! * Per-device locking: requests for different units are processed in parallel
//! * Panic-free parsing
//! * Configurable protocol decoding through [`tracing`](https://docs.rs/tracing)
//!
//! # Supported Functions
//!
//! * Read Coils
//! * Read Discrete Inputs
//! * Read Holding Registers
//! * Read Input Registers
//! * Write Single Coil
//! * Write Single Register
//! * Write Multiple Coils
//! * Write Multiple Registers
//!
//! # Example
//!
//! ```no_run
//! use modbus_engine::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut map = DeviceMap::new();
//!     map.add_endpoint(UnitId::new(1), DefaultWriteHandler::new(), |db| {
//!         let range = AddressRange::try_from(0, 10).unwrap();
//!         db.add_coils(range, false);
//!         db.add_holding_registers(range, 0);
//!     })?;
//!
//!     let server = spawn_tcp_server_task(
//!         10,
//!         "127.0.0.1:502".parse()?,
//!         map,
//!         DecodeLevel::default(),
//!     )
//!     .await?;
//!
//!     // values written by the application are visible to every later request
//!     server.update(UnitId::new(1), |db| {
//!         db.update_holding_register(0, 42);
//!     })?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     Ok(())
//! }
//! ```

/// Protocol constants
pub mod constants;
/// Storage of the points of a single device
pub mod database;
/// Controls the decoding of transmitted and received data at the application, frame, and physical layer
pub mod decode;
/// Error types
pub mod error;
/// Modbus exception codes
pub mod exception;
/// Server API
pub mod server;
/// Types used in requests and the database API
pub mod types;

// internal modules
mod common;
mod tcp;

pub use crate::database::Database;
pub use crate::decode::*;
pub use crate::error::*;
pub use crate::exception::ExceptionCode;
pub use crate::server::*;
pub use crate::types::*;
