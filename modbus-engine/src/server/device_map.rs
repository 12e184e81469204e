use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::database::Database;
use crate::error::EndpointError;
use crate::exception::ExceptionCode;
use crate::server::handler::{RequestHandler, WriteHandler, WriteResult};
use crate::server::types::{WriteCoils, WriteRegisters};
use crate::types::{Indexed, UnitId};

/// A device served by the server: its database and the policy applied to client writes
pub(crate) struct Endpoint {
    pub(crate) database: Database,
    handler: Box<dyn WriteHandler>,
}

impl Endpoint {
    pub(crate) fn new(database: Database, handler: Box<dyn WriteHandler>) -> Self {
        Self { database, handler }
    }
}

impl RequestHandler for Endpoint {
    fn read_coil(&self, address: u16) -> Result<bool, ExceptionCode> {
        self.database
            .get_coil(address)
            .ok_or(ExceptionCode::IllegalDataAddress)
    }

    fn read_discrete_input(&self, address: u16) -> Result<bool, ExceptionCode> {
        self.database
            .get_discrete_input(address)
            .ok_or(ExceptionCode::IllegalDataAddress)
    }

    fn read_holding_register(&self, address: u16) -> Result<u16, ExceptionCode> {
        self.database
            .get_holding_register(address)
            .ok_or(ExceptionCode::IllegalDataAddress)
    }

    fn read_input_register(&self, address: u16) -> Result<u16, ExceptionCode> {
        self.database
            .get_input_register(address)
            .ok_or(ExceptionCode::IllegalDataAddress)
    }

    fn write_single_coil(&mut self, value: Indexed<bool>) -> WriteResult {
        self.handler.write_single_coil(value, &mut self.database)
    }

    fn write_single_register(&mut self, value: Indexed<u16>) -> WriteResult {
        self.handler.write_single_register(value, &mut self.database)
    }

    fn write_multiple_coils(&mut self, values: WriteCoils) -> WriteResult {
        self.handler.write_multiple_coils(values, &mut self.database)
    }

    fn write_multiple_registers(&mut self, values: WriteRegisters) -> WriteResult {
        self.handler
            .write_multiple_registers(values, &mut self.database)
    }
}

/// Devices to be served, keyed by unit id
///
/// The map is populated before the server is spawned. Once handed to
/// [`spawn_tcp_server_task`](crate::server::spawn_tcp_server_task) the set of devices is fixed;
/// only the contents of each device's [`Database`] can change afterwards.
#[derive(Default)]
pub struct DeviceMap {
    endpoints: BTreeMap<UnitId, Endpoint>,
}

impl std::fmt::Debug for DeviceMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.endpoints.keys()).finish()
    }
}

impl DeviceMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device
    ///
    /// `init` is invoked exactly once, immediately, with the new empty database so that the
    /// application can create the device's points.
    ///
    /// Fails without invoking `init` if the unit id is already registered or is the broadcast
    /// address.
    pub fn add_endpoint<H, F>(
        &mut self,
        unit_id: UnitId,
        handler: H,
        init: F,
    ) -> Result<(), EndpointError>
    where
        H: WriteHandler,
        F: FnOnce(&mut Database),
    {
        if unit_id.is_broadcast() {
            return Err(EndpointError::ReservedUnitId(unit_id));
        }

        match self.endpoints.entry(unit_id) {
            Entry::Occupied(_) => Err(EndpointError::DuplicateUnitId(unit_id)),
            Entry::Vacant(entry) => {
                let mut database = Database::new();
                init(&mut database);
                entry.insert(Endpoint::new(database, Box::new(handler)));
                Ok(())
            }
        }
    }

    /// Remove a device, returning `false` if it was not registered
    pub fn remove_endpoint(&mut self, unit_id: UnitId) -> bool {
        self.endpoints.remove(&unit_id).is_some()
    }

    /// Check if a device is registered for the unit id
    pub fn contains(&self, unit_id: UnitId) -> bool {
        self.endpoints.contains_key(&unit_id)
    }

    /// Number of registered devices
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// True if no devices are registered
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Unit ids of the registered devices in ascending order
    pub fn unit_ids(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.endpoints.keys().copied()
    }

    pub(crate) fn into_handler_map(self) -> ServerHandlerMap {
        ServerHandlerMap {
            handlers: Arc::new(
                self.endpoints
                    .into_iter()
                    .map(|(id, endpoint)| (id, Arc::new(Mutex::new(endpoint))))
                    .collect(),
            ),
        }
    }
}

pub(crate) type EndpointType = Arc<Mutex<Endpoint>>;

/// Frozen device map shared by the listener, the sessions and the server handle
#[derive(Clone)]
pub(crate) struct ServerHandlerMap {
    handlers: Arc<BTreeMap<UnitId, EndpointType>>,
}

impl ServerHandlerMap {
    pub(crate) fn resolve(&self, unit_id: UnitId) -> Option<&EndpointType> {
        self.handlers.get(&unit_id)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&UnitId, &EndpointType)> {
        self.handlers.iter()
    }
}

/// Acquire a device, recovering it if a previous holder panicked
pub(crate) fn lock(endpoint: &EndpointType) -> MutexGuard<'_, Endpoint> {
    match endpoint.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("device lock was poisoned by a panic, recovering");
            poisoned.into_inner()
        }
    }
}
