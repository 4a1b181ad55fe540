//! Holding and input register descriptors
//!
//! A register descriptor maps one Modbus address (or a run of consecutive
//! addresses for multi-word and block types) onto typed storage: an inline
//! constant, a typed cell, a block of cells, or callbacks. The accessors
//! translate between big-endian wire words and the typed storage, honouring
//! partial reads and read-modify-write partial updates of multi-word values.

use std::cell::Cell;

use crate::coil::{LockFn, PostWriteFn};
use crate::protocol::{ExceptionCode, ModbusAddress, PduResult};
use crate::BSEARCH_THRESHOLD;

/// Register data type
///
/// Multi-word types occupy `byte_size / 2` consecutive addresses. `U8` is
/// padded to a full 16-bit word on the wire. Block types expose one array
/// element per address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegisterType {
    U8,
    #[default]
    U16,
    U32,
    I32,
    F32,
    U64,
    I64,
    F64,
    /// Array of `u8`, one element per address, each padded to 16 bits
    BlockU8,
    /// Array of `u16`, one element per address
    BlockU16,
}

impl RegisterType {
    /// Wire size of one element in bytes (8-bit types are padded to 16 bits)
    pub fn byte_size(self) -> usize {
        match self {
            RegisterType::U8 | RegisterType::U16 => 2,
            RegisterType::U32 | RegisterType::I32 | RegisterType::F32 => 4,
            RegisterType::U64 | RegisterType::I64 | RegisterType::F64 => 8,
            RegisterType::BlockU8 | RegisterType::BlockU16 => 2,
        }
    }

    /// Wire size of one element in 16-bit words
    pub fn word_size(self) -> usize {
        self.byte_size() / 2
    }

    fn is_block(self) -> bool {
        matches!(self, RegisterType::BlockU8 | RegisterType::BlockU16)
    }
}

/// A typed register value, produced by reads and consumed by writes
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegisterValue {
    U8(u8),
    U16(u16),
    U32(u32),
    I32(i32),
    F32(f32),
    U64(u64),
    I64(i64),
    F64(f64),
}

impl RegisterValue {
    /// Encode as big-endian wire bytes, returning the number of bytes written
    fn encode(self, out: &mut [u8; 8]) -> usize {
        match self {
            RegisterValue::U8(v) => {
                out[..2].copy_from_slice(&(v as u16).to_be_bytes());
                2
            }
            RegisterValue::U16(v) => {
                out[..2].copy_from_slice(&v.to_be_bytes());
                2
            }
            RegisterValue::U32(v) => {
                out[..4].copy_from_slice(&v.to_be_bytes());
                4
            }
            RegisterValue::I32(v) => {
                out[..4].copy_from_slice(&v.to_be_bytes());
                4
            }
            RegisterValue::F32(v) => {
                out[..4].copy_from_slice(&v.to_be_bytes());
                4
            }
            RegisterValue::U64(v) => {
                out.copy_from_slice(&v.to_be_bytes());
                8
            }
            RegisterValue::I64(v) => {
                out.copy_from_slice(&v.to_be_bytes());
                8
            }
            RegisterValue::F64(v) => {
                out.copy_from_slice(&v.to_be_bytes());
                8
            }
        }
    }

    /// Whether this value is an element of the given register type
    fn matches(self, ty: RegisterType) -> bool {
        matches!(
            (self, ty),
            (RegisterValue::U8(_), RegisterType::U8 | RegisterType::BlockU8)
                | (RegisterValue::U16(_), RegisterType::U16 | RegisterType::BlockU16)
                | (RegisterValue::U32(_), RegisterType::U32)
                | (RegisterValue::I32(_), RegisterType::I32)
                | (RegisterValue::F32(_), RegisterType::F32)
                | (RegisterValue::U64(_), RegisterType::U64)
                | (RegisterValue::I64(_), RegisterType::I64)
                | (RegisterValue::F64(_), RegisterType::F64)
        )
    }

    /// Decode big-endian wire bytes for an element of type `ty`
    ///
    /// `bytes` must hold at least `ty.byte_size()` bytes.
    fn decode(ty: RegisterType, bytes: &[u8]) -> RegisterValue {
        match ty {
            RegisterType::U8 | RegisterType::BlockU8 => {
                RegisterValue::U8(u16::from_be_bytes([bytes[0], bytes[1]]) as u8)
            }
            RegisterType::U16 | RegisterType::BlockU16 => {
                RegisterValue::U16(u16::from_be_bytes([bytes[0], bytes[1]]))
            }
            RegisterType::U32 => {
                RegisterValue::U32(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            RegisterType::I32 => {
                RegisterValue::I32(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            RegisterType::F32 => {
                RegisterValue::F32(f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            RegisterType::U64 => RegisterValue::U64(u64::from_be_bytes(bytes[..8].try_into().unwrap())),
            RegisterType::I64 => RegisterValue::I64(i64::from_be_bytes(bytes[..8].try_into().unwrap())),
            RegisterType::F64 => RegisterValue::F64(f64::from_be_bytes(bytes[..8].try_into().unwrap())),
        }
    }
}

/// Typed storage binding shared by read and write pointer access
pub enum RegisterStorage<'a> {
    U8(&'a Cell<u8>),
    U16(&'a Cell<u16>),
    U32(&'a Cell<u32>),
    I32(&'a Cell<i32>),
    F32(&'a Cell<f32>),
    U64(&'a Cell<u64>),
    I64(&'a Cell<i64>),
    F64(&'a Cell<f64>),
    BlockU8(&'a [Cell<u8>]),
    BlockU16(&'a [Cell<u16>]),
}

impl<'a> RegisterStorage<'a> {
    /// Number of addressable elements (1 for scalars)
    fn entries(&self) -> usize {
        match self {
            RegisterStorage::BlockU8(cells) => cells.len(),
            RegisterStorage::BlockU16(cells) => cells.len(),
            _ => 1,
        }
    }

    /// Load element `index`, checking that the storage matches the declared type
    fn load(&self, ty: RegisterType, index: usize) -> Option<RegisterValue> {
        match (self, ty) {
            (RegisterStorage::U8(cell), RegisterType::U8) => Some(RegisterValue::U8(cell.get())),
            (RegisterStorage::U16(cell), RegisterType::U16) => Some(RegisterValue::U16(cell.get())),
            (RegisterStorage::U32(cell), RegisterType::U32) => Some(RegisterValue::U32(cell.get())),
            (RegisterStorage::I32(cell), RegisterType::I32) => Some(RegisterValue::I32(cell.get())),
            (RegisterStorage::F32(cell), RegisterType::F32) => Some(RegisterValue::F32(cell.get())),
            (RegisterStorage::U64(cell), RegisterType::U64) => Some(RegisterValue::U64(cell.get())),
            (RegisterStorage::I64(cell), RegisterType::I64) => Some(RegisterValue::I64(cell.get())),
            (RegisterStorage::F64(cell), RegisterType::F64) => Some(RegisterValue::F64(cell.get())),
            (RegisterStorage::BlockU8(cells), RegisterType::BlockU8) => {
                cells.get(index).map(|cell| RegisterValue::U8(cell.get()))
            }
            (RegisterStorage::BlockU16(cells), RegisterType::BlockU16) => {
                cells.get(index).map(|cell| RegisterValue::U16(cell.get()))
            }
            _ => None,
        }
    }

    /// Store `value` into element `index`; `false` on type/index mismatch
    fn store(&self, value: RegisterValue, index: usize) -> bool {
        match (self, value) {
            (RegisterStorage::U8(cell), RegisterValue::U8(v)) => cell.set(v),
            (RegisterStorage::U16(cell), RegisterValue::U16(v)) => cell.set(v),
            (RegisterStorage::U32(cell), RegisterValue::U32(v)) => cell.set(v),
            (RegisterStorage::I32(cell), RegisterValue::I32(v)) => cell.set(v),
            (RegisterStorage::F32(cell), RegisterValue::F32(v)) => cell.set(v),
            (RegisterStorage::U64(cell), RegisterValue::U64(v)) => cell.set(v),
            (RegisterStorage::I64(cell), RegisterValue::I64(v)) => cell.set(v),
            (RegisterStorage::F64(cell), RegisterValue::F64(v)) => cell.set(v),
            (RegisterStorage::BlockU8(cells), RegisterValue::U8(v)) => match cells.get(index) {
                Some(cell) => cell.set(v),
                None => return false,
            },
            (RegisterStorage::BlockU16(cells), RegisterValue::U16(v)) => match cells.get(index) {
                Some(cell) => cell.set(v),
                None => return false,
            },
            _ => return false,
        }
        true
    }
}

/// Read binding of a register
///
/// `Callback` returns `None` to signal a device failure; a value of the wrong
/// type is treated the same way.
#[derive(Default)]
pub enum RegisterRead<'a> {
    /// Register cannot be read
    #[default]
    None,
    /// Inline constant baked into the descriptor
    Value(RegisterValue),
    /// Direct typed storage
    Ptr(RegisterStorage<'a>),
    /// Host callback; must return a value matching the declared type
    Callback(Box<dyn Fn() -> Option<RegisterValue> + 'a>),
}

/// Write binding of a register
#[derive(Default)]
pub enum RegisterWrite<'a> {
    /// Register is read-only
    #[default]
    None,
    /// Direct typed storage
    Ptr(RegisterStorage<'a>),
    /// Host callback; its status decides whether the write succeeded
    Callback(Box<dyn Fn(RegisterValue) -> PduResult + 'a>),
}

/// Descriptor for a register or a block of registers
///
/// Tables must be sorted by `address` ascending, without duplicates, and laid
/// out so no other descriptor overlaps the addresses a multi-word descriptor
/// covers.
#[derive(Default)]
pub struct RegisterDescriptor<'a> {
    /// Address of the first (most significant) word
    pub address: ModbusAddress,
    /// Data type; multi-word types cover consecutive addresses
    pub ty: RegisterType,
    /// Read binding
    pub read: RegisterRead<'a>,
    /// Write binding
    pub write: RegisterWrite<'a>,
    /// Optional read lock; locked registers report `IllegalDataAddress`
    pub read_lock: Option<LockFn<'a>>,
    /// Optional write lock; locked registers report `IllegalDataAddress`
    pub write_lock: Option<LockFn<'a>>,
    /// Permit writes that start mid-descriptor or truncate a multi-word value
    pub allow_partial_write: bool,
    /// Optional hook invoked after each successful write
    pub post_write: Option<PostWriteFn<'a>>,
}

/// Outcome of a register read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterReadOutcome {
    /// Number of 16-bit words produced (or validated on a dry run)
    Words(usize),
    /// Read lock is engaged
    Locked,
    /// No read binding present
    NoAccess,
    /// Misconfigured binding or callback failure
    DeviceFailure,
}

impl<'a> RegisterDescriptor<'a> {
    /// Number of addressable elements (block length, 1 for scalars)
    fn entries(&self) -> usize {
        if !self.ty.is_block() {
            return 1;
        }
        match (&self.read, &self.write) {
            (RegisterRead::Ptr(storage), _) => storage.entries(),
            (_, RegisterWrite::Ptr(storage)) => storage.entries(),
            _ => 0,
        }
    }

    /// Total number of 16-bit words this descriptor covers
    pub fn word_span(&self) -> usize {
        self.ty.word_size() * self.entries().max(1)
    }

    /// Whether `addr` falls inside the address range of this descriptor
    pub fn covers(&self, addr: ModbusAddress) -> bool {
        addr == self.address
            || (addr > self.address && ((addr - self.address) as usize) < self.word_span())
    }

    /// Element index and word offset within that element for `addr`
    fn locate(&self, addr: ModbusAddress) -> (usize, usize) {
        let rel = (addr - self.address) as usize;
        let size_w = self.ty.word_size();
        (rel / size_w, rel % size_w)
    }

    /// Load the element covering `addr` through the read binding
    fn load_element(&self, index: usize) -> Option<RegisterValue> {
        if !self.ty.is_block() && index != 0 {
            return None; // scalar descriptors own a single element
        }
        match &self.read {
            RegisterRead::Value(value) => value.matches(self.ty).then_some(*value),
            RegisterRead::Ptr(storage) => storage.load(self.ty, index),
            RegisterRead::Callback(callback) => {
                if self.ty.is_block() {
                    return None; // blocks read through storage only
                }
                callback().filter(|value| value.matches(self.ty))
            }
            RegisterRead::None => None,
        }
    }

    /// Read up to `remaining` words starting at `addr`
    ///
    /// The output is big-endian. When `addr` lies inside a multi-word value
    /// only the trailing words are emitted. Pass `out: None` for a dry run
    /// that validates access without producing data. `swap_words` exchanges
    /// the 16-bit word order of multi-word values (legacy input registers).
    pub fn read(
        &self,
        addr: ModbusAddress,
        remaining: usize,
        out: Option<&mut [u8]>,
        swap_words: bool,
    ) -> RegisterReadOutcome {
        if remaining == 0 || addr < self.address {
            return RegisterReadOutcome::DeviceFailure;
        }
        if matches!(self.read, RegisterRead::None) {
            return RegisterReadOutcome::NoAccess;
        }
        if let Some(lock) = &self.read_lock {
            if lock() {
                return RegisterReadOutcome::Locked;
            }
        }

        let size_w = self.ty.word_size();
        let (index, offset_w) = self.locate(addr);

        if remaining >= size_w && offset_w == 0 {
            // Aligned full-element read
            if let Some(out) = out {
                let Some(value) = self.load_element(index) else {
                    return RegisterReadOutcome::DeviceFailure;
                };
                let mut buf = [0u8; 8];
                let len = value.encode(&mut buf);
                if swap_words {
                    swap_word_order(&mut buf[..len]);
                }
                out[..len].copy_from_slice(&buf[..len]);
            }
            return RegisterReadOutcome::Words(size_w);
        }

        // Trailing-words read of a multi-word value
        let Some(value) = self.load_element(index) else {
            return RegisterReadOutcome::DeviceFailure;
        };
        let mut buf = [0u8; 8];
        let len = value.encode(&mut buf);
        if swap_words {
            swap_word_order(&mut buf[..len]);
        }

        let byte_offset = offset_w * 2;
        let n_copy = (len - byte_offset).min(remaining * 2);
        if let Some(out) = out {
            out[..n_copy].copy_from_slice(&buf[byte_offset..byte_offset + n_copy]);
        }
        RegisterReadOutcome::Words(n_copy / 2)
    }

    /// Check whether a write of `remaining` words starting at `addr` may touch
    /// this descriptor, returning the number of words it would consume
    /// (0 means the write is not allowed)
    pub fn write_allowed(&self, addr: ModbusAddress, remaining: usize) -> usize {
        if remaining == 0 || addr < self.address {
            return 0;
        }
        if matches!(self.write, RegisterWrite::None) {
            return 0;
        }
        if let Some(lock) = &self.write_lock {
            if lock() {
                return 0;
            }
        }

        let size_w = self.ty.word_size();
        let (_, offset_w) = self.locate(addr);

        if offset_w == 0 && remaining >= size_w {
            return size_w;
        }

        // Partial update: opt-in, and only meaningful against storage
        if !self.allow_partial_write || !matches!(self.write, RegisterWrite::Ptr(_)) {
            return 0;
        }
        (size_w - offset_w).min(remaining)
    }

    /// Write up to `remaining` words of big-endian data starting at `addr`
    ///
    /// Returns the number of words consumed. Partial updates of multi-word
    /// storage are read-modify-write: the untouched bytes of the element are
    /// preserved. Permissions are not checked here; call
    /// [`write_allowed`](Self::write_allowed) first.
    pub fn write(
        &self,
        addr: ModbusAddress,
        remaining: usize,
        val: &[u8],
    ) -> Result<usize, ExceptionCode> {
        if remaining == 0 || addr < self.address || val.len() < remaining * 2 {
            return Err(ExceptionCode::ServerDeviceFailure);
        }

        let size_w = self.ty.word_size();
        let (index, offset_w) = self.locate(addr);
        if !self.ty.is_block() && index != 0 {
            return Err(ExceptionCode::ServerDeviceFailure);
        }

        if offset_w == 0 && remaining >= size_w {
            // Aligned full-element write
            let value = RegisterValue::decode(self.ty, val);
            return match &self.write {
                RegisterWrite::Ptr(storage) => {
                    if storage.store(value, index) {
                        Ok(size_w)
                    } else {
                        Err(ExceptionCode::ServerDeviceFailure)
                    }
                }
                RegisterWrite::Callback(callback) => callback(value).map(|_| size_w),
                RegisterWrite::None => Err(ExceptionCode::ServerDeviceFailure),
            };
        }

        // Partial update: merge the new words into the current element value
        let RegisterWrite::Ptr(storage) = &self.write else {
            return Err(ExceptionCode::ServerDeviceFailure);
        };
        let Some(current) = storage.load(self.ty, index) else {
            return Err(ExceptionCode::ServerDeviceFailure);
        };

        let mut buf = [0u8; 8];
        let len = current.encode(&mut buf);
        let byte_offset = offset_w * 2;
        let n_copy = (len - byte_offset).min(remaining * 2);
        buf[byte_offset..byte_offset + n_copy].copy_from_slice(&val[..n_copy]);

        let merged = RegisterValue::decode(self.ty, &buf);
        if storage.store(merged, index) {
            Ok(n_copy / 2)
        } else {
            Err(ExceptionCode::ServerDeviceFailure)
        }
    }
}

/// Exchange the 16-bit word order of a multi-word big-endian value in place
fn swap_word_order(buf: &mut [u8]) {
    match buf.len() {
        4 => {
            buf.swap(0, 2);
            buf.swap(1, 3);
        }
        8 => {
            buf.swap(0, 6);
            buf.swap(1, 7);
            buf.swap(2, 4);
            buf.swap(3, 5);
        }
        _ => {}
    }
}

/// Find the register descriptor covering `addr`
///
/// Linear scan for small tables, binary search above [`BSEARCH_THRESHOLD`]
/// entries. Multi-word descriptors match any address they cover.
pub fn find_register<'a, 'b>(
    regs: &'b [RegisterDescriptor<'a>],
    addr: ModbusAddress,
) -> Option<&'b RegisterDescriptor<'a>> {
    if regs.len() > BSEARCH_THRESHOLD {
        let mut lo = 0usize;
        let mut hi = regs.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let reg = &regs[mid];
            if reg.covers(addr) {
                return Some(reg);
            }
            if reg.address < addr {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        None
    } else {
        regs.iter().find(|reg| reg.covers(addr))
    }
}
