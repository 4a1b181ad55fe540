//! Coil and discrete input descriptors
//!
//! A coil is a single readable/writable bit; a discrete input is the same
//! descriptor restricted to read bindings. Each descriptor maps one Modbus
//! address onto a storage binding: a fixed value, a bit inside a shared byte
//! cell, or a callback. Lock predicates gate access at request time.

use std::cell::Cell;

use crate::protocol::{ExceptionCode, ModbusAddress, PduResult};
use crate::BSEARCH_THRESHOLD;

/// Runtime lock predicate: `true` means access is currently forbidden
pub type LockFn<'a> = Box<dyn Fn() -> bool + 'a>;

/// Hook invoked after a successful write to the owning descriptor
pub type PostWriteFn<'a> = Box<dyn Fn() + 'a>;

/// Read binding of a coil
///
/// `Callback` returns `None` to signal a device failure.
#[derive(Default)]
pub enum CoilRead<'a> {
    /// Coil cannot be read; read requests report it as OFF
    #[default]
    None,
    /// Fixed value baked into the descriptor
    Value(bool),
    /// Bit `bit` (0 = LSB) of a shared byte cell
    Bit { cell: &'a Cell<u8>, bit: u8 },
    /// Host callback
    Callback(Box<dyn Fn() -> Option<bool> + 'a>),
}

/// Write binding of a coil
#[derive(Default)]
pub enum CoilWrite<'a> {
    /// Coil is read-only
    #[default]
    None,
    /// Bit `bit` (0 = LSB) of a shared byte cell; other bits are preserved
    Bit { cell: &'a Cell<u8>, bit: u8 },
    /// Host callback; its status decides whether the write succeeded
    Callback(Box<dyn Fn(bool) -> PduResult + 'a>),
}

/// Descriptor for a single coil or discrete input
///
/// Tables of descriptors must be sorted by `address` ascending without
/// duplicates; the lookup relies on it.
#[derive(Default)]
pub struct CoilDescriptor<'a> {
    /// Modbus coil address
    pub address: ModbusAddress,
    /// Read binding
    pub read: CoilRead<'a>,
    /// Write binding
    pub write: CoilWrite<'a>,
    /// Optional read lock; locked coils report `IllegalDataAddress`
    pub read_lock: Option<LockFn<'a>>,
    /// Optional write lock; locked coils report `IllegalDataAddress`
    pub write_lock: Option<LockFn<'a>>,
    /// Optional hook invoked after each successful write
    pub post_write: Option<PostWriteFn<'a>>,
}

/// Outcome of reading a single coil
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoilReadState {
    Off,
    On,
    /// Read lock is engaged
    Locked,
    /// No read binding present
    NoAccess,
    /// Misconfigured binding or callback failure
    DeviceFailure,
}

/// Find the coil descriptor for `addr`
///
/// Linear scan for small tables, binary search above [`BSEARCH_THRESHOLD`]
/// entries. Both strategies yield identical results on a sorted table.
pub fn find_coil<'a, 'b>(
    coils: &'b [CoilDescriptor<'a>],
    addr: ModbusAddress,
) -> Option<&'b CoilDescriptor<'a>> {
    if coils.len() > BSEARCH_THRESHOLD {
        coils
            .binary_search_by_key(&addr, |coil| coil.address)
            .ok()
            .map(|ix| &coils[ix])
    } else {
        coils.iter().find(|coil| coil.address == addr)
    }
}

impl<'a> CoilDescriptor<'a> {
    /// Read the current coil state through the configured binding
    pub fn read(&self) -> CoilReadState {
        if let Some(lock) = &self.read_lock {
            if lock() {
                return CoilReadState::Locked;
            }
        }

        match &self.read {
            CoilRead::Value(value) => {
                if *value {
                    CoilReadState::On
                } else {
                    CoilReadState::Off
                }
            }
            CoilRead::Bit { cell, bit } => {
                if *bit > 7 {
                    return CoilReadState::DeviceFailure;
                }
                if cell.get() & (1 << bit) != 0 {
                    CoilReadState::On
                } else {
                    CoilReadState::Off
                }
            }
            CoilRead::Callback(callback) => match callback() {
                Some(true) => CoilReadState::On,
                Some(false) => CoilReadState::Off,
                None => CoilReadState::DeviceFailure,
            },
            CoilRead::None => CoilReadState::NoAccess,
        }
    }

    /// Check whether writing this coil is currently allowed
    ///
    /// Only consults the write lock; the binding itself is checked by
    /// [`write`](Self::write).
    pub fn write_allowed(&self) -> bool {
        match &self.write_lock {
            Some(lock) => !lock(),
            None => true,
        }
    }

    /// Write the coil state through the configured binding
    ///
    /// Does not check the write lock; call [`write_allowed`](Self::write_allowed) first.
    pub fn write(&self, value: bool) -> PduResult {
        match &self.write {
            CoilWrite::Bit { cell, bit } => {
                if *bit > 7 {
                    return Err(ExceptionCode::ServerDeviceFailure);
                }
                if value {
                    cell.set(cell.get() | (1 << bit));
                } else {
                    cell.set(cell.get() & !(1 << bit));
                }
                Ok(())
            }
            CoilWrite::Callback(callback) => callback(value),
            CoilWrite::None => Err(ExceptionCode::ServerDeviceFailure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_coil(address: u16, value: bool) -> CoilDescriptor<'static> {
        CoilDescriptor {
            address,
            read: CoilRead::Value(value),
            ..Default::default()
        }
    }

    #[test]
    fn test_find_linear_and_binary_agree() {
        // 20 entries forces the binary path, a 5-entry prefix the linear one
        let coils: Vec<CoilDescriptor> = (0..20).map(|i| value_coil(i * 3, true)).collect();

        for addr in 0..64 {
            let linear = coils.iter().find(|c| c.address == addr).map(|c| c.address);
            let found = find_coil(&coils, addr).map(|c| c.address);
            assert_eq!(found, linear, "addr {addr}");
            let small = find_coil(&coils[..5], addr).map(|c| c.address);
            assert_eq!(small, linear.filter(|a| *a < 15), "addr {addr}");
        }
    }

    #[test]
    fn test_read_value_binding() {
        assert_eq!(value_coil(0, true).read(), CoilReadState::On);
        assert_eq!(value_coil(0, false).read(), CoilReadState::Off);
    }

    #[test]
    fn test_read_bit_binding() {
        let byte = Cell::new(0b0000_0100);
        let coil = CoilDescriptor {
            address: 1,
            read: CoilRead::Bit { cell: &byte, bit: 2 },
            ..Default::default()
        };
        assert_eq!(coil.read(), CoilReadState::On);
        byte.set(0);
        assert_eq!(coil.read(), CoilReadState::Off);

        let bad = CoilDescriptor {
            address: 2,
            read: CoilRead::Bit { cell: &byte, bit: 8 },
            ..Default::default()
        };
        assert_eq!(bad.read(), CoilReadState::DeviceFailure);
    }

    #[test]
    fn test_read_callback_binding() {
        let coil = CoilDescriptor {
            address: 0,
            read: CoilRead::Callback(Box::new(|| Some(true))),
            ..Default::default()
        };
        assert_eq!(coil.read(), CoilReadState::On);

        let failing = CoilDescriptor {
            address: 0,
            read: CoilRead::Callback(Box::new(|| None)),
            ..Default::default()
        };
        assert_eq!(failing.read(), CoilReadState::DeviceFailure);
    }

    #[test]
    fn test_read_lock_wins_over_binding() {
        let coil = CoilDescriptor {
            address: 0,
            read: CoilRead::Value(true),
            read_lock: Some(Box::new(|| true)),
            ..Default::default()
        };
        assert_eq!(coil.read(), CoilReadState::Locked);
    }

    #[test]
    fn test_write_bit_preserves_neighbours() {
        let byte = Cell::new(0b1010_0000);
        let coil = CoilDescriptor {
            address: 0,
            write: CoilWrite::Bit { cell: &byte, bit: 1 },
            ..Default::default()
        };

        coil.write(true).unwrap();
        assert_eq!(byte.get(), 0b1010_0010);
        coil.write(false).unwrap();
        assert_eq!(byte.get(), 0b1010_0000);
    }

    #[test]
    fn test_write_callback_status_propagates() {
        let coil = CoilDescriptor {
            address: 0,
            write: CoilWrite::Callback(Box::new(|_| Err(ExceptionCode::ServerDeviceBusy))),
            ..Default::default()
        };
        assert_eq!(coil.write(true), Err(ExceptionCode::ServerDeviceBusy));
    }

    #[test]
    fn test_write_without_binding_fails() {
        let coil = value_coil(0, true);
        assert!(coil.write_allowed()); // no lock present
        assert_eq!(coil.write(true), Err(ExceptionCode::ServerDeviceFailure));
    }

    #[test]
    fn test_write_lock() {
        let coil = CoilDescriptor {
            address: 0,
            write_lock: Some(Box::new(|| true)),
            ..Default::default()
        };
        assert!(!coil.write_allowed());
    }
}
