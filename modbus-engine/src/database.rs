use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::types::AddressRange;

/// Sparse point database of a single Modbus device
///
/// Each of the four Modbus tables is an independent map from address to value. An address
/// that was never added is absent, and reads of absent addresses are reported as `None`
/// rather than a default value.
///
/// Coils and holding registers can be written by clients through a
/// [`WriteHandler`](crate::server::WriteHandler). Discrete inputs and input registers are
/// only ever modified by the application.
#[derive(Clone, Debug, Default)]
pub struct Database {
    coils: HashMap<u16, bool>,
    discrete_inputs: HashMap<u16, bool>,
    holding_registers: HashMap<u16, u16>,
    input_registers: HashMap<u16, u16>,
}

fn add_entry<T>(map: &mut HashMap<u16, T>, index: u16, value: T) -> bool {
    if let Entry::Vacant(e) = map.entry(index) {
        e.insert(value);
        true
    } else {
        false
    }
}

fn add_entries<T: Copy>(map: &mut HashMap<u16, T>, range: AddressRange, value: T) -> usize {
    range
        .iter()
        .filter(|index| add_entry(map, *index, value))
        .count()
}

fn update_entry<T>(map: &mut HashMap<u16, T>, index: u16, value: T) -> bool {
    if let Entry::Occupied(mut e) = map.entry(index) {
        e.insert(value);
        true
    } else {
        false
    }
}

impl Database {
    /// Create an empty database
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a coil with an initial value
    ///
    /// Returns `false` if the coil already exists, leaving its value unchanged
    pub fn add_coil(&mut self, index: u16, value: bool) -> bool {
        add_entry(&mut self.coils, index, value)
    }

    /// Add a discrete input with an initial value
    ///
    /// Returns `false` if the discrete input already exists, leaving its value unchanged
    pub fn add_discrete_input(&mut self, index: u16, value: bool) -> bool {
        add_entry(&mut self.discrete_inputs, index, value)
    }

    /// Add a holding register with an initial value
    ///
    /// Returns `false` if the holding register already exists, leaving its value unchanged
    pub fn add_holding_register(&mut self, index: u16, value: u16) -> bool {
        add_entry(&mut self.holding_registers, index, value)
    }

    /// Add an input register with an initial value
    ///
    /// Returns `false` if the input register already exists, leaving its value unchanged
    pub fn add_input_register(&mut self, index: u16, value: u16) -> bool {
        add_entry(&mut self.input_registers, index, value)
    }

    /// Add a coil at every address in the range, returning the number of coils created
    pub fn add_coils(&mut self, range: AddressRange, value: bool) -> usize {
        add_entries(&mut self.coils, range, value)
    }

    /// Add a discrete input at every address in the range, returning the number created
    pub fn add_discrete_inputs(&mut self, range: AddressRange, value: bool) -> usize {
        add_entries(&mut self.discrete_inputs, range, value)
    }

    /// Add a holding register at every address in the range, returning the number created
    pub fn add_holding_registers(&mut self, range: AddressRange, value: u16) -> usize {
        add_entries(&mut self.holding_registers, range, value)
    }

    /// Add an input register at every address in the range, returning the number created
    pub fn add_input_registers(&mut self, range: AddressRange, value: u16) -> usize {
        add_entries(&mut self.input_registers, range, value)
    }

    /// Update the value of an existing coil
    ///
    /// Returns `false` if the coil does not exist. The coil is not created.
    pub fn update_coil(&mut self, index: u16, value: bool) -> bool {
        update_entry(&mut self.coils, index, value)
    }

    /// Update the value of an existing discrete input
    ///
    /// Returns `false` if the discrete input does not exist. The discrete input is not created.
    pub fn update_discrete_input(&mut self, index: u16, value: bool) -> bool {
        update_entry(&mut self.discrete_inputs, index, value)
    }

    /// Update the value of an existing holding register
    ///
    /// Returns `false` if the holding register does not exist. The register is not created.
    pub fn update_holding_register(&mut self, index: u16, value: u16) -> bool {
        update_entry(&mut self.holding_registers, index, value)
    }

    /// Update the value of an existing input register
    ///
    /// Returns `false` if the input register does not exist. The register is not created.
    pub fn update_input_register(&mut self, index: u16, value: u16) -> bool {
        update_entry(&mut self.input_registers, index, value)
    }

    /// Get the value of a coil
    pub fn get_coil(&self, index: u16) -> Option<bool> {
        self.coils.get(&index).copied()
    }

    /// Get the value of a discrete input
    pub fn get_discrete_input(&self, index: u16) -> Option<bool> {
        self.discrete_inputs.get(&index).copied()
    }

    /// Get the value of a holding register
    pub fn get_holding_register(&self, index: u16) -> Option<u16> {
        self.holding_registers.get(&index).copied()
    }

    /// Get the value of an input register
    pub fn get_input_register(&self, index: u16) -> Option<u16> {
        self.input_registers.get(&index).copied()
    }

    /// Remove a coil, returning `false` if it did not exist
    pub fn remove_coil(&mut self, index: u16) -> bool {
        self.coils.remove(&index).is_some()
    }

    /// Remove a discrete input, returning `false` if it did not exist
    pub fn remove_discrete_input(&mut self, index: u16) -> bool {
        self.discrete_inputs.remove(&index).is_some()
    }

    /// Remove a holding register, returning `false` if it did not exist
    pub fn remove_holding_register(&mut self, index: u16) -> bool {
        self.holding_registers.remove(&index).is_some()
    }

    /// Remove an input register, returning `false` if it did not exist
    pub fn remove_input_register(&mut self, index: u16) -> bool {
        self.input_registers.remove(&index).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_does_not_overwrite_existing_value() {
        let mut db = Database::new();
        assert!(db.add_holding_register(3, 7));
        assert!(!db.add_holding_register(3, 8));
        assert_eq!(db.get_holding_register(3), Some(7));
    }

    #[test]
    fn update_does_not_create() {
        let mut db = Database::new();
        assert!(!db.update_coil(1, true));
        assert_eq!(db.get_coil(1), None);

        db.add_coil(1, false);
        assert!(db.update_coil(1, true));
        assert_eq!(db.get_coil(1), Some(true));
    }

    #[test]
    fn tables_are_independent() {
        let mut db = Database::new();
        db.add_coil(10, true);
        db.add_holding_register(10, 0xCAFE);

        assert_eq!(db.get_discrete_input(10), None);
        assert_eq!(db.get_input_register(10), None);
        assert!(!db.update_discrete_input(10, true));
        assert!(db.remove_coil(10));
        assert_eq!(db.get_holding_register(10), Some(0xCAFE));
    }

    #[test]
    fn remove_reports_absent_points() {
        let mut db = Database::new();
        assert!(!db.remove_input_register(4));
        db.add_input_register(4, 1);
        assert!(db.remove_input_register(4));
        assert!(!db.remove_input_register(4));
        assert_eq!(db.get_input_register(4), None);
    }

    #[test]
    fn bulk_add_counts_created_points() {
        let mut db = Database::new();
        db.add_discrete_input(2, true);

        let created = db.add_discrete_inputs(AddressRange::try_from(0, 5).unwrap(), false);

        assert_eq!(created, 4);
        assert_eq!(db.get_discrete_input(2), Some(true));
        assert_eq!(db.get_discrete_input(4), Some(false));
        assert_eq!(db.get_discrete_input(5), None);
    }

    #[test]
    fn bulk_add_reaches_the_top_of_the_address_space() {
        let mut db = Database::new();
        let range = AddressRange::try_from(u16::MAX - 1, 2).unwrap();
        assert_eq!(db.add_coils(range, true), 2);
        assert_eq!(db.add_holding_registers(range, 1), 2);
        assert_eq!(db.add_input_registers(range, 1), 2);
        assert_eq!(db.get_coil(u16::MAX), Some(true));
    }
}
